//! Compiles decoded stages into a flat sequence of blocks.
use burn::{
    module::Module,
    tensor::{backend::Backend, Device, Tensor},
};

use super::{
    activation::ActivationKind,
    block_spec::{BlockKind, BlockSpec},
    channels::round_channels,
    conv_norm::{ConvBnAct, ConvBnActConfig, LayerSettings},
    depthwise_separable::{DepthwiseSeparableConfig, DepthwiseSeparableConv, DsaActPlacement},
    error::{GenMobileNetError, Result},
    inverted_residual::{InvertedResidual, InvertedResidualConfig},
    squeeze_excite::SqueezeExciteConfig,
};

/// A block of the network body.
///
/// Records decode into the first variant whose fields are all present, so variants go
/// from the largest field set to the smallest.
#[allow(clippy::large_enum_variant)]
#[derive(Module, Debug)]
pub enum GenBlock<B: Backend> {
    InvertedResidual(InvertedResidual<B>),
    DepthwiseSeparable(DepthwiseSeparableConv<B>),
    ConvBnAct(ConvBnAct<B>),
}

impl<B: Backend> GenBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            GenBlock::DepthwiseSeparable(block) => block.forward(input),
            GenBlock::InvertedResidual(block) => block.forward(input),
            GenBlock::ConvBnAct(block) => block.forward(input),
        }
    }

    pub fn in_channels(&self) -> usize {
        match self {
            GenBlock::DepthwiseSeparable(block) => block.in_channels(),
            GenBlock::InvertedResidual(block) => block.in_channels(),
            GenBlock::ConvBnAct(block) => block.in_channels(),
        }
    }

    pub fn out_channels(&self) -> usize {
        match self {
            GenBlock::DepthwiseSeparable(block) => block.out_channels(),
            GenBlock::InvertedResidual(block) => block.out_channels(),
            GenBlock::ConvBnAct(block) => block.out_channels(),
        }
    }

    pub fn stride(&self) -> usize {
        match self {
            GenBlock::DepthwiseSeparable(block) => block.stride(),
            GenBlock::InvertedResidual(block) => block.stride(),
            GenBlock::ConvBnAct(block) => block.stride(),
        }
    }

    pub fn has_residual(&self) -> bool {
        match self {
            GenBlock::DepthwiseSeparable(block) => block.has_residual(),
            GenBlock::InvertedResidual(block) => block.has_residual(),
            GenBlock::ConvBnAct(_) => false,
        }
    }

    pub fn has_se(&self) -> bool {
        match self {
            GenBlock::DepthwiseSeparable(block) => block.has_se(),
            GenBlock::InvertedResidual(block) => block.has_se(),
            GenBlock::ConvBnAct(_) => false,
        }
    }
}

/// Fully resolved arguments of one block, before any parameter is allocated.
#[derive(Debug, Clone)]
pub enum BlockConfig {
    DepthwiseSeparable(DepthwiseSeparableConfig),
    InvertedResidual(InvertedResidualConfig),
    ConvBnAct(ConvBnActConfig),
}

impl BlockConfig {
    pub fn init<B: Backend>(&self, settings: &LayerSettings, device: &Device<B>) -> GenBlock<B> {
        match self {
            BlockConfig::DepthwiseSeparable(config) => {
                GenBlock::DepthwiseSeparable(config.init(settings, device))
            }
            BlockConfig::InvertedResidual(config) => {
                GenBlock::InvertedResidual(config.init(settings, device))
            }
            BlockConfig::ConvBnAct(config) => GenBlock::ConvBnAct(config.init(settings, device)),
        }
    }

    pub fn in_channels(&self) -> usize {
        match self {
            BlockConfig::DepthwiseSeparable(config) => config.in_channels,
            BlockConfig::InvertedResidual(config) => config.in_channels,
            BlockConfig::ConvBnAct(config) => config.in_channels,
        }
    }

    pub fn out_channels(&self) -> usize {
        match self {
            BlockConfig::DepthwiseSeparable(config) => config.out_channels,
            BlockConfig::InvertedResidual(config) => config.out_channels,
            BlockConfig::ConvBnAct(config) => config.out_channels,
        }
    }

    pub fn stride(&self) -> usize {
        match self {
            BlockConfig::DepthwiseSeparable(config) => config.stride,
            BlockConfig::InvertedResidual(config) => config.stride,
            BlockConfig::ConvBnAct(config) => config.stride,
        }
    }

    /// Whether the block adds its input back onto its output.
    pub fn has_residual(&self) -> bool {
        match self {
            BlockConfig::DepthwiseSeparable(config) => {
                config.stride == 1 && config.in_channels == config.out_channels && !config.no_skip
            }
            BlockConfig::InvertedResidual(config) => {
                config.stride == 1 && config.in_channels == config.out_channels && !config.no_skip
            }
            BlockConfig::ConvBnAct(_) => false,
        }
    }
}

/// Network-wide settings used to resolve every block.
#[derive(Debug, Clone)]
pub struct BuilderSettings {
    pub depth_multiplier: f64,
    pub depth_divisor: usize,
    pub min_depth: Option<usize>,
    /// Default activation, overridden per block by the block string.
    pub act: ActivationKind,
    pub se_gate: ActivationKind,
    /// Squeeze-excite reduces relative to the expanded width instead of the block input.
    pub se_reduce_mid: bool,
    pub dsa_act_placement: DsaActPlacement,
    pub layers: LayerSettings,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            depth_multiplier: 1.0,
            depth_divisor: 8,
            min_depth: None,
            act: ActivationKind::Relu,
            se_gate: ActivationKind::Sigmoid,
            se_reduce_mid: false,
            dsa_act_placement: DsaActPlacement::default(),
            layers: LayerSettings::default(),
        }
    }
}

/// Expands stages of [block specs](BlockSpec) into blocks.
///
/// The builder carries the running input width across the whole definition and is
/// consumed by a single build pass.
#[derive(Debug)]
pub struct MobileNetBuilder {
    settings: BuilderSettings,
    in_channels: usize,
}

impl MobileNetBuilder {
    pub fn new(settings: BuilderSettings) -> Result<Self> {
        if settings.depth_divisor == 0 {
            return Err(GenMobileNetError::InvalidChannel {
                channels: 0,
                context: "depth divisor".to_string(),
            });
        }

        Ok(Self {
            settings,
            in_channels: 0,
        })
    }

    pub fn settings(&self) -> &BuilderSettings {
        &self.settings
    }

    /// Channel count of a layer after the depth multiplier.
    pub fn round_channels(&self, channels: usize) -> usize {
        round_channels(
            channels,
            self.settings.depth_multiplier,
            self.settings.depth_divisor,
            self.settings.min_depth,
        )
    }

    /// Resolve the block described by `spec` on an input of `in_channels`.
    pub fn block_config(&self, spec: &BlockSpec, in_channels: usize) -> Result<BlockConfig> {
        if in_channels == 0 {
            return Err(GenMobileNetError::InvalidChannel {
                channels: in_channels,
                context: format!("input of block `{spec}`"),
            });
        }
        if spec.kernel_size % 2 == 0 {
            return Err(GenMobileNetError::InvalidKernel {
                kernel_size: spec.kernel_size,
            });
        }

        let out_channels = self.round_channels(spec.out_channels);
        if out_channels == 0 {
            return Err(GenMobileNetError::InvalidChannel {
                channels: out_channels,
                context: format!("output of block `{spec}`"),
            });
        }

        let act = spec.act.unwrap_or(self.settings.act);
        let se = |mid_channels: usize| {
            spec.se_ratio
                .filter(|_| spec.has_se())
                .map(|se_ratio| {
                    let reduce_base = if self.settings.se_reduce_mid {
                        mid_channels
                    } else {
                        in_channels
                    };
                    SqueezeExciteConfig::new(mid_channels, reduce_base, se_ratio)
                        .with_act(act)
                        .with_gate(self.settings.se_gate)
                })
        };

        let config = match spec.kind {
            BlockKind::DepthwiseSeparable | BlockKind::DepthwiseSeparableActivated => {
                let (dw_act, pw_act) = match spec.kind {
                    BlockKind::DepthwiseSeparable => (true, false),
                    _ => (
                        self.settings.dsa_act_placement == DsaActPlacement::Both,
                        true,
                    ),
                };
                BlockConfig::DepthwiseSeparable(
                    DepthwiseSeparableConfig::new(in_channels, out_channels)
                        .with_kernel_size(spec.kernel_size)
                        .with_stride(spec.stride)
                        .with_act(act)
                        .with_dw_act(dw_act)
                        .with_pw_act(pw_act)
                        .with_no_skip(spec.no_skip)
                        .with_se(se(in_channels)),
                )
            }
            BlockKind::InvertedResidual => {
                let mid_channels = (in_channels as f64 * spec.expand_ratio).round() as usize;
                if mid_channels == 0 {
                    return Err(GenMobileNetError::InvalidChannel {
                        channels: mid_channels,
                        context: format!("expansion of block `{spec}`"),
                    });
                }
                BlockConfig::InvertedResidual(
                    InvertedResidualConfig::new(in_channels, mid_channels, out_channels)
                        .with_kernel_size(spec.kernel_size)
                        .with_stride(spec.stride)
                        .with_act(act)
                        .with_no_skip(spec.no_skip)
                        .with_se(se(mid_channels)),
                )
            }
            BlockKind::ConvBnAct => BlockConfig::ConvBnAct(
                ConvBnActConfig::new(in_channels, out_channels)
                    .with_kernel_size(spec.kernel_size)
                    .with_stride(spec.stride)
                    .with_act(act),
            ),
        };

        Ok(config)
    }

    /// Resolve every block of `stages` without allocating parameters.
    ///
    /// Returns the flat block sequence and the output width of the last block.
    pub fn plan(
        mut self,
        in_channels: usize,
        stages: &[Vec<BlockSpec>],
    ) -> Result<(Vec<BlockConfig>, usize)> {
        self.in_channels = in_channels;
        let mut blocks = Vec::new();

        for (stage_idx, stage) in stages.iter().enumerate() {
            for spec in stage {
                for repeat in 0..spec.repeat {
                    // Only the first repeat of a block string may downsample
                    let config = if repeat == 0 {
                        self.block_config(spec, self.in_channels)?
                    } else {
                        let spec = BlockSpec {
                            stride: 1,
                            ..spec.clone()
                        };
                        self.block_config(&spec, self.in_channels)?
                    };

                    log::debug!(
                        "Stage {stage_idx}, block {}: {} {} -> {} channels, stride {}{}",
                        blocks.len(),
                        spec.kind.prefix(),
                        config.in_channels(),
                        config.out_channels(),
                        config.stride(),
                        if config.has_residual() {
                            ", residual"
                        } else {
                            ""
                        },
                    );

                    self.in_channels = config.out_channels();
                    blocks.push(config);
                }
            }
        }

        Ok((blocks, self.in_channels))
    }

    /// Build every block of `stages`, starting from `in_channels`.
    ///
    /// Returns the flat block sequence and the output width of the last block.
    pub fn build<B: Backend>(
        self,
        in_channels: usize,
        stages: &[Vec<BlockSpec>],
        device: &Device<B>,
    ) -> Result<(Vec<GenBlock<B>>, usize)> {
        let layers = self.settings.layers;
        let (configs, out_channels) = self.plan(in_channels, stages)?;
        let blocks = configs
            .iter()
            .map(|config| config.init(&layers, device))
            .collect();

        Ok((blocks, out_channels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{arch::arch_def, block_spec::decode_arch_def};
    use burn::{
        backend::NdArray,
        module::ParamId,
        record::{
            serde::{
                adapter::DefaultAdapter,
                data::{unflatten, NestedValue, Serializable},
                de::Deserializer,
                error::Error,
                ser::Serializer,
            },
            FullPrecisionSettings, PrecisionSettings, Record,
        },
        tensor::TensorData,
    };
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    type TestBackend = NdArray<f32>;
    type GenBlockItem =
        <GenBlockRecord<TestBackend> as Record<TestBackend>>::Item<FullPrecisionSettings>;

    fn stages(stages: &[&[&str]]) -> Vec<Vec<BlockSpec>> {
        decode_arch_def(&arch_def(stages)).unwrap()
    }

    #[test]
    fn only_first_repeat_downsamples() {
        let builder = MobileNetBuilder::new(BuilderSettings::default()).unwrap();
        let (blocks, out_channels) = builder
            .plan(16, &stages(&[&["ir_r4_k3_s2_e6_c32"]]))
            .unwrap();

        assert_eq!(blocks.len(), 4);
        assert_eq!(out_channels, 32);
        assert_eq!(blocks[0].stride(), 2);
        assert_eq!(blocks[0].in_channels(), 16);
        for block in &blocks[1..] {
            assert_eq!(block.stride(), 1);
            assert_eq!(block.in_channels(), blocks[0].out_channels());
            assert!(block.has_residual());
        }
        assert!(!blocks[0].has_residual());
    }

    #[test]
    fn width_is_threaded_across_stages() {
        let builder = MobileNetBuilder::new(BuilderSettings::default()).unwrap();
        let (blocks, out_channels) = builder
            .plan(
                32,
                &stages(&[
                    &["ds_r1_k3_s1_c16"],
                    &["ir_r1_k3_s2_e6_c24", "ir_r2_k3_s1_e1_c24"],
                    &["cn_r1_k1_s1_c960"],
                ]),
            )
            .unwrap();

        assert_eq!(blocks.len(), 5);
        assert_eq!(out_channels, 960);
        let widths: Vec<_> = blocks
            .iter()
            .map(|block| (block.in_channels(), block.out_channels()))
            .collect();
        assert_eq!(widths, [(32, 16), (16, 24), (24, 24), (24, 24), (24, 960)]);
        assert!(!blocks[4].has_residual());
    }

    #[test]
    fn depth_multiplier_scales_outputs_only() {
        let builder = MobileNetBuilder::new(BuilderSettings {
            depth_multiplier: 0.5,
            ..Default::default()
        })
        .unwrap();
        let (blocks, out_channels) = builder
            .plan(16, &stages(&[&["ir_r2_k3_s2_e6_c24"]]))
            .unwrap();

        assert_eq!(out_channels, 16);
        match &blocks[0] {
            BlockConfig::InvertedResidual(config) => assert_eq!(config.mid_channels, 96),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn se_reduction_base() {
        let spec = BlockSpec::parse("ir_r1_k3_s1_e6_c24_se0.25").unwrap();

        let builder = MobileNetBuilder::new(BuilderSettings::default()).unwrap();
        match builder.block_config(&spec, 16).unwrap() {
            BlockConfig::InvertedResidual(config) => {
                assert_eq!(config.se.unwrap().reduced_channels(), 4)
            }
            other => panic!("unexpected block {other:?}"),
        }

        let builder = MobileNetBuilder::new(BuilderSettings {
            se_reduce_mid: true,
            ..Default::default()
        })
        .unwrap();
        match builder.block_config(&spec, 16).unwrap() {
            BlockConfig::InvertedResidual(config) => {
                assert_eq!(config.se.unwrap().reduced_channels(), 24)
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn dsa_activation_placement() {
        let spec = BlockSpec::parse("dsa_r1_k3_s1_c64").unwrap();
        for (placement, dw_act) in [
            (DsaActPlacement::Both, true),
            (DsaActPlacement::PointwiseOnly, false),
        ] {
            let builder = MobileNetBuilder::new(BuilderSettings {
                dsa_act_placement: placement,
                ..Default::default()
            })
            .unwrap();
            match builder.block_config(&spec, 64).unwrap() {
                BlockConfig::DepthwiseSeparable(config) => {
                    assert_eq!(config.dw_act, dw_act);
                    assert!(config.pw_act);
                    assert!(config.no_skip);
                }
                other => panic!("unexpected block {other:?}"),
            }
        }
    }

    #[test]
    fn block_overrides_default_activation() {
        let builder = MobileNetBuilder::new(BuilderSettings {
            act: ActivationKind::HardSwish,
            ..Default::default()
        })
        .unwrap();
        let spec = BlockSpec::parse("ir_r1_k3_s2_e4_c24_are").unwrap();
        match builder.block_config(&spec, 16).unwrap() {
            BlockConfig::InvertedResidual(config) => assert_eq!(config.act, ActivationKind::Relu),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_blocks() {
        let builder = MobileNetBuilder::new(BuilderSettings::default()).unwrap();

        let spec = BlockSpec::parse("ir_r1_k4_s1_e6_c24").unwrap();
        assert_eq!(
            builder.block_config(&spec, 16).unwrap_err(),
            GenMobileNetError::InvalidKernel { kernel_size: 4 }
        );

        let spec = BlockSpec::parse("ir_r1_k3_s1_e6_c24").unwrap();
        assert!(matches!(
            builder.block_config(&spec, 0),
            Err(GenMobileNetError::InvalidChannel { .. })
        ));

        let spec = BlockSpec::parse("ir_r1_k3_s1_e6_c0").unwrap();
        assert!(matches!(
            builder.block_config(&spec, 16),
            Err(GenMobileNetError::InvalidChannel { .. })
        ));

        let spec = BlockSpec::parse("ir_r1_k3_s1_e0.01_c24").unwrap();
        assert!(matches!(
            builder.block_config(&spec, 16),
            Err(GenMobileNetError::InvalidChannel { .. })
        ));
    }

    #[test]
    fn built_blocks_match_plan() {
        let device = Default::default();
        let stages = stages(&[&["ds_r1_k3_s1_c16"], &["ir_r2_k3_s2_e6_c24"]]);

        let (planned, _) = MobileNetBuilder::new(BuilderSettings::default())
            .unwrap()
            .plan(32, &stages)
            .unwrap();
        let (blocks, out_channels) = MobileNetBuilder::new(BuilderSettings::default())
            .unwrap()
            .build::<TestBackend>(32, &stages, &device)
            .unwrap();

        assert_eq!(out_channels, 24);
        assert_eq!(blocks.len(), planned.len());
        for (block, config) in blocks.iter().zip(&planned) {
            assert_eq!(block.in_channels(), config.in_channels());
            assert_eq!(block.out_channels(), config.out_channels());
            assert_eq!(block.stride(), config.stride());
            assert_eq!(block.has_residual(), config.has_residual());
        }

        let input = Tensor::<TestBackend, 4>::ones([1, 32, 8, 8], &device);
        let output = blocks
            .iter()
            .fold(input, |x, block| block.forward(x));
        assert_eq!(output.dims(), [1, 24, 4, 4]);
    }

    #[test]
    fn rejects_zero_depth_divisor() {
        let err = MobileNetBuilder::new(BuilderSettings {
            depth_divisor: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(
            err,
            GenMobileNetError::InvalidChannel {
                channels: 0,
                context: "depth divisor".to_string(),
            }
        );
    }

    /// Float tensor entry laid out the way the PyTorch reader hands them to the
    /// record deserializer.
    struct CheckpointTensor {
        shape: Vec<usize>,
    }

    impl Serializable for CheckpointTensor {
        fn serialize<PS>(&self, serializer: Serializer) -> core::result::Result<NestedValue, Error>
        where
            PS: PrecisionSettings,
        {
            let numel = self.shape.iter().product::<usize>();
            let data = TensorData::new(vec![0.5f32; numel], self.shape.clone());
            let (dtype, bytes) = (data.dtype, data.into_bytes());

            let mut tensor_data = HashMap::new();
            tensor_data.insert("bytes".to_string(), NestedValue::Bytes(bytes));
            tensor_data.insert("shape".to_string(), self.shape.serialize(serializer.clone())?);
            tensor_data.insert("dtype".to_string(), dtype.serialize(serializer)?);

            let mut param = HashMap::new();
            param.insert("id".to_string(), NestedValue::String(ParamId::new().serialize()));
            param.insert("param".to_string(), NestedValue::Map(tensor_data));
            Ok(NestedValue::Map(param))
        }
    }

    fn checkpoint_entry(tensors: &[(&str, &[usize])]) -> GenBlockRecord<TestBackend> {
        let tensors: HashMap<String, CheckpointTensor> = tensors
            .iter()
            .map(|(key, shape)| {
                let tensor = CheckpointTensor {
                    shape: shape.to_vec(),
                };
                (key.to_string(), tensor)
            })
            .collect();
        let nested = unflatten::<FullPrecisionSettings, _>(tensors).unwrap();
        let deserializer = Deserializer::<DefaultAdapter>::new(nested, true);
        let item = GenBlockItem::deserialize(deserializer).unwrap();

        Record::from_item::<FullPrecisionSettings>(item, &Default::default())
    }

    fn batch_norm(prefix: &str, channels: usize) -> Vec<(String, Vec<usize>)> {
        ["gamma", "beta", "running_mean", "running_var"]
            .iter()
            .map(|name| (format!("{prefix}.{name}"), vec![channels]))
            .collect()
    }

    fn entry(
        convs: &[(&str, [usize; 4])],
        norms: &[(&str, usize)],
    ) -> GenBlockRecord<TestBackend> {
        let mut tensors: Vec<(String, Vec<usize>)> = convs
            .iter()
            .map(|(name, shape)| (format!("{name}.weight"), shape.to_vec()))
            .collect();
        for (prefix, channels) in norms {
            tensors.extend(batch_norm(prefix, *channels));
        }
        let tensors: Vec<(&str, &[usize])> = tensors
            .iter()
            .map(|(key, shape)| (key.as_str(), shape.as_slice()))
            .collect();
        checkpoint_entry(&tensors)
    }

    #[test]
    fn inverted_residual_entry_decodes_as_inverted_residual() {
        let device = Default::default();
        let record = entry(
            &[
                ("conv_pw", [96, 16, 1, 1]),
                ("conv_dw", [96, 1, 3, 3]),
                ("conv_pwl", [16, 96, 1, 1]),
            ],
            &[("bn1", 96), ("bn2", 96), ("bn3", 16)],
        );
        assert!(matches!(record, GenBlockRecord::InvertedResidual(_)));

        let (blocks, _) = MobileNetBuilder::new(BuilderSettings::default())
            .unwrap()
            .build::<TestBackend>(16, &stages(&[&["ir_r1_k3_s1_e6_c16"]]), &device)
            .unwrap();
        let block = blocks.into_iter().next().unwrap().load_record(record);
        match &block {
            GenBlock::InvertedResidual(block) => assert!(block.has_residual()),
            other => panic!("unexpected block {other:?}"),
        }

        let input = Tensor::<TestBackend, 4>::ones([1, 16, 8, 8], &device);
        assert_eq!(block.forward(input).dims(), [1, 16, 8, 8]);
    }

    #[test]
    fn depthwise_separable_entry_decodes_as_depthwise_separable() {
        let record = entry(
            &[("conv_dw", [16, 1, 3, 3]), ("conv_pw", [16, 16, 1, 1])],
            &[("bn1", 16), ("bn2", 16)],
        );
        assert!(matches!(record, GenBlockRecord::DepthwiseSeparable(_)));
    }
}
