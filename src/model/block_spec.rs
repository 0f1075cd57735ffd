//! Block string grammar.
//!
//! A block string is an underscore separated token list. The first token selects the
//! block type, the remaining tokens may appear in any order:
//!
//! | token        | meaning                                   | default      |
//! |--------------|-------------------------------------------|--------------|
//! | `r<int>`     | repeat count                              | 1            |
//! | `k<int>`     | depthwise kernel size                     | required     |
//! | `s<int>`     | stride of the first repeat                | 1            |
//! | `e<float>`   | expansion ratio                           | 1.0          |
//! | `c<int>`     | output channels (before depth multiplier) | required     |
//! | `se<float>`  | squeeze-excite ratio in `(0, 1]`          | none         |
//! | `noskip`     | disable the residual connection           | off          |
//! | `a<act>`     | activation override (`re`, `r6`, `hs`, `sw`) | model default |
//!
//! `re`, `hs` and `sw` are also accepted without the `a` prefix. `r6` alone is a
//! repeat count.
use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use super::activation::ActivationKind;
use super::error::{GenMobileNetError, Result};

/// Block type selected by the leading token of a block string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// `ds`: depthwise conv -> pointwise linear projection.
    DepthwiseSeparable,
    /// `dsa`: MobileNet-V1 style depthwise separable conv, activated after the
    /// pointwise projection and never residual.
    DepthwiseSeparableActivated,
    /// `ir`: pointwise expansion -> depthwise conv -> pointwise linear projection.
    InvertedResidual,
    /// `cn`: single conv -> norm -> activation.
    ConvBnAct,
}

impl BlockKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            BlockKind::DepthwiseSeparable => "ds",
            BlockKind::DepthwiseSeparableActivated => "dsa",
            BlockKind::InvertedResidual => "ir",
            BlockKind::ConvBnAct => "cn",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "ds" => Some(BlockKind::DepthwiseSeparable),
            "dsa" => Some(BlockKind::DepthwiseSeparableActivated),
            "ir" => Some(BlockKind::InvertedResidual),
            "cn" => Some(BlockKind::ConvBnAct),
            _ => None,
        }
    }
}

/// Decoded block string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockSpec {
    pub kind: BlockKind,
    pub kernel_size: usize,
    pub stride: usize,
    pub expand_ratio: f64,
    pub out_channels: usize,
    pub repeat: usize,
    pub no_skip: bool,
    pub se_ratio: Option<f64>,
    pub act: Option<ActivationKind>,
}

impl BlockSpec {
    /// Decode a single block string such as `ir_r3_k5_s2_e6_c40_se0.25`.
    pub fn parse(block: &str) -> Result<Self> {
        log::trace!("Decoding block string `{block}`");

        let mut tokens = block.split('_');
        let prefix = tokens.next().unwrap_or_default();
        let kind = BlockKind::from_prefix(prefix).ok_or_else(|| {
            GenMobileNetError::malformed(block, format!("unknown block type `{prefix}`"))
        })?;

        let mut fields = Fields::default();
        for token in tokens {
            fields.decode(block, token)?;
        }

        let kernel_size = fields
            .kernel_size
            .ok_or_else(|| GenMobileNetError::malformed(block, "missing kernel size `k`"))?;
        let out_channels = fields
            .out_channels
            .ok_or_else(|| GenMobileNetError::malformed(block, "missing output channels `c`"))?;

        Ok(BlockSpec {
            kind,
            kernel_size,
            stride: fields.stride.unwrap_or(1),
            expand_ratio: fields.expand_ratio.unwrap_or(1.0),
            out_channels,
            repeat: fields.repeat.unwrap_or(1),
            no_skip: fields.no_skip || kind == BlockKind::DepthwiseSeparableActivated,
            se_ratio: fields.se_ratio,
            act: fields.act,
        })
    }

    /// Whether the squeeze-excite sub-block is enabled.
    pub fn has_se(&self) -> bool {
        self.se_ratio.is_some_and(|ratio| ratio > 0.0)
    }
}

impl FromStr for BlockSpec {
    type Err = GenMobileNetError;

    fn from_str(block: &str) -> Result<Self> {
        BlockSpec::parse(block)
    }
}

/// Canonical form: `kind_r_k_s_e_c[_se][_a][_noskip]`.
impl fmt::Display for BlockSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_r{}_k{}_s{}_e{}_c{}",
            self.kind.prefix(),
            self.repeat,
            self.kernel_size,
            self.stride,
            self.expand_ratio,
            self.out_channels
        )?;
        if let Some(ratio) = self.se_ratio {
            write!(f, "_se{ratio}")?;
        }
        if let Some(code) = self.act.and_then(|act| act.code()) {
            write!(f, "_a{code}")?;
        }
        // Implied by the block type for `dsa`
        if self.no_skip && self.kind != BlockKind::DepthwiseSeparableActivated {
            write!(f, "_noskip")?;
        }
        Ok(())
    }
}

/// Decode a full architecture definition, one list of block strings per stage.
///
/// Nothing is built here, so a malformed string anywhere in the definition fails
/// before any layer is allocated.
pub fn decode_arch_def(arch_def: &[Vec<String>]) -> Result<Vec<Vec<BlockSpec>>> {
    arch_def
        .iter()
        .map(|stage| stage.iter().map(|block| BlockSpec::parse(block)).collect())
        .collect()
}

#[derive(Default)]
struct Fields {
    repeat: Option<usize>,
    kernel_size: Option<usize>,
    stride: Option<usize>,
    expand_ratio: Option<f64>,
    out_channels: Option<usize>,
    se_ratio: Option<f64>,
    act: Option<ActivationKind>,
    no_skip: bool,
}

impl Fields {
    fn decode(&mut self, block: &str, token: &str) -> Result<()> {
        if token == "noskip" {
            if self.no_skip {
                return Err(duplicate(block, token));
            }
            self.no_skip = true;
            return Ok(());
        }

        let act = token
            .strip_prefix('a')
            .and_then(ActivationKind::from_code)
            .or_else(|| match token {
                "re" | "hs" | "sw" => ActivationKind::from_code(token),
                _ => None,
            });
        if let Some(act) = act {
            return set_once(&mut self.act, act, block, token);
        }

        if let Some(value) = token.strip_prefix("se") {
            let ratio: f64 = parse_value(block, token, value)?;
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(GenMobileNetError::malformed(
                    block,
                    format!("squeeze-excite ratio in `{token}` must be in (0, 1]"),
                ));
            }
            return set_once(&mut self.se_ratio, ratio, block, token);
        }

        let split = token
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(token.len());
        let (key, value) = token.split_at(split);
        match key {
            "r" => {
                let repeat = parse_positive(block, token, value)?;
                set_once(&mut self.repeat, repeat, block, token)
            }
            "k" => {
                let kernel_size = parse_positive(block, token, value)?;
                set_once(&mut self.kernel_size, kernel_size, block, token)
            }
            "s" => {
                let stride = parse_positive(block, token, value)?;
                set_once(&mut self.stride, stride, block, token)
            }
            "c" => {
                let channels = parse_value(block, token, value)?;
                set_once(&mut self.out_channels, channels, block, token)
            }
            "e" => {
                let ratio: f64 = parse_value(block, token, value)?;
                if !(ratio.is_finite() && ratio > 0.0) {
                    return Err(GenMobileNetError::malformed(
                        block,
                        format!("expansion ratio in `{token}` must be positive"),
                    ));
                }
                set_once(&mut self.expand_ratio, ratio, block, token)
            }
            _ => Err(GenMobileNetError::malformed(
                block,
                format!("unrecognized token `{token}`"),
            )),
        }
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, block: &str, token: &str) -> Result<()> {
    if slot.is_some() {
        return Err(duplicate(block, token));
    }
    *slot = Some(value);
    Ok(())
}

fn duplicate(block: &str, token: &str) -> GenMobileNetError {
    GenMobileNetError::malformed(block, format!("field of `{token}` is set more than once"))
}

fn parse_value<T: FromStr>(block: &str, token: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| GenMobileNetError::malformed(block, format!("invalid value in `{token}`")))
}

fn parse_positive(block: &str, token: &str, value: &str) -> Result<usize> {
    match parse_value(block, token, value)? {
        0 => Err(GenMobileNetError::malformed(
            block,
            format!("`{token}` must be positive"),
        )),
        value => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_inverted_residual() {
        let spec = BlockSpec::parse("ir_r3_k5_s2_e6_c40_se0.25").unwrap();
        assert_eq!(spec.kind, BlockKind::InvertedResidual);
        assert_eq!(spec.repeat, 3);
        assert_eq!(spec.kernel_size, 5);
        assert_eq!(spec.stride, 2);
        assert_eq!(spec.expand_ratio, 6.0);
        assert_eq!(spec.out_channels, 40);
        assert_eq!(spec.se_ratio, Some(0.25));
        assert!(spec.has_se());
        assert!(!spec.no_skip);
        assert_eq!(spec.act, None);
    }

    #[test]
    fn applies_defaults() {
        let spec = BlockSpec::parse("ds_k3_c16").unwrap();
        assert_eq!(spec.kind, BlockKind::DepthwiseSeparable);
        assert_eq!(spec.repeat, 1);
        assert_eq!(spec.stride, 1);
        assert_eq!(spec.expand_ratio, 1.0);
        assert_eq!(spec.se_ratio, None);
        assert!(!spec.no_skip);
        assert_eq!(spec.act, None);
    }

    #[test]
    fn token_order_is_not_significant() {
        let a = BlockSpec::parse("ir_r2_k3_s2_e6_c24_noskip").unwrap();
        let b = BlockSpec::parse("ir_noskip_c24_e6_s2_k3_r2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decodes_fractional_expansion_and_overrides() {
        let spec = BlockSpec::parse("ds_r1_k3_s1_e1_c16_are_noskip").unwrap();
        assert_eq!(spec.act, Some(ActivationKind::Relu));
        assert!(spec.no_skip);

        let spec = BlockSpec::parse("ir_r1_k3_s1_e2.5_c80_ahs").unwrap();
        assert_eq!(spec.expand_ratio, 2.5);
        assert_eq!(spec.act, Some(ActivationKind::HardSwish));

        let spec = BlockSpec::parse("ir_k3_c80_sw").unwrap();
        assert_eq!(spec.act, Some(ActivationKind::Swish));

        let spec = BlockSpec::parse("ir_k3_c80_ar6").unwrap();
        assert_eq!(spec.act, Some(ActivationKind::Relu6));
        assert_eq!(spec.repeat, 1);
    }

    #[test]
    fn bare_r6_is_a_repeat_count() {
        let spec = BlockSpec::parse("ir_r6_k3_c80").unwrap();
        assert_eq!(spec.repeat, 6);
        assert_eq!(spec.act, None);
    }

    #[test]
    fn dsa_implies_noskip() {
        let spec = BlockSpec::parse("dsa_r2_k3_s2_c128").unwrap();
        assert_eq!(spec.kind, BlockKind::DepthwiseSeparableActivated);
        assert!(spec.no_skip);
    }

    #[test]
    fn conv_block() {
        let spec = BlockSpec::parse("cn_r1_k1_s1_c960").unwrap();
        assert_eq!(spec.kind, BlockKind::ConvBnAct);
        assert_eq!(spec.kernel_size, 1);
        assert_eq!(spec.out_channels, 960);
    }

    #[test]
    fn rejects_missing_required_fields() {
        for block in ["ds_r1_k3_s1", "ir_r1_s1_e6_c24", ""] {
            assert!(
                matches!(
                    BlockSpec::parse(block),
                    Err(GenMobileNetError::MalformedSpec { .. })
                ),
                "{block}"
            );
        }
    }

    #[test]
    fn rejects_bad_tokens() {
        for block in [
            "xx_r1_k3_c16",
            "ir_r1_k3_c16_foo",
            "ir_r1_k3_c16_r2",
            "ir_r1_k3_c16_se1.5",
            "ir_r1_k3_c16_se0",
            "ir_r1_kx_c16",
            "ir_r0_k3_c16",
            "ir_r1_k3_s0_c16",
            "ir_r1_k3_e-1_c16",
            "ir_r1_k3_c16_are_ahs",
            "ir_r1_k3_c16_noskip_noskip",
            "ir_r1_k3_c16__",
        ] {
            assert!(
                matches!(
                    BlockSpec::parse(block),
                    Err(GenMobileNetError::MalformedSpec { .. })
                ),
                "{block}"
            );
        }
    }

    #[test]
    fn display_is_canonical_and_reparses() {
        for block in [
            "ds_r1_k3_s1_c16",
            "ds_r1_k3_s1_e1_c16_are_noskip",
            "dsa_r6_k3_s2_c512",
            "ir_c24_k3_s2_e6_r2",
            "ir_r1_k5_s2_e6_c160_se0.25",
            "ir_r1_k3_s1_e2.3_c80_hs",
            "cn_r1_k1_s1_c960",
        ] {
            let spec = BlockSpec::parse(block).unwrap();
            let canonical = spec.to_string();
            let reparsed: BlockSpec = canonical.parse().unwrap();
            assert_eq!(reparsed, spec, "{block} -> {canonical}");
            assert_eq!(reparsed.to_string(), canonical);
        }
        assert_eq!(
            BlockSpec::parse("ir_c24_k3_s2_e6_r2").unwrap().to_string(),
            "ir_r2_k3_s2_e6_c24"
        );
        assert_eq!(
            BlockSpec::parse("ds_noskip_are_c16_k3").unwrap().to_string(),
            "ds_r1_k3_s1_e1_c16_are_noskip"
        );
    }

    #[test]
    fn decodes_arch_def_in_order() {
        let arch_def = vec![
            vec!["ds_r1_k3_s1_c16".to_string()],
            vec![
                "ir_r1_k3_s2_e6_c24".to_string(),
                "ir_r2_k3_s1_e1_c24".to_string(),
            ],
        ];
        let stages = decode_arch_def(&arch_def).unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[1].len(), 2);
        assert_eq!(stages[1][1].repeat, 2);

        let broken = vec![vec!["ds_r1_k3_s1_c16".to_string()], vec!["ir_r1_k3".to_string()]];
        assert!(decode_arch_def(&broken).is_err());
    }
}
