//! Architecture definitions of the supported networks.
//!
//! Each function returns a [GenMobileNetConfig] preset with its depth multiplier baked
//! in. Any other option (classes, input channels, stem size, dropout, activations,
//! batch norm hyper-parameters, TensorFlow compatibility) can be overridden with the
//! `with_*` setters before calling [init](GenMobileNetConfig::init).
use super::{
    activation::ActivationKind,
    genmobilenet::{GenMobileNetConfig, HeadConv},
};

/// MNasNet-A1, 112x112 stage 0 input at 224x224 resolution.
pub const MNASNET_A1: &[&[&str]] = &[
    &["ds_r1_k3_s1_e1_c16_noskip"],
    &["ir_r2_k3_s2_e6_c24"],
    &["ir_r3_k5_s2_e3_c40_se0.25"],
    &["ir_r4_k3_s2_e6_c80"],
    &["ir_r2_k3_s1_e6_c112_se0.25"],
    &["ir_r3_k5_s2_e6_c160_se0.25"],
    &["ir_r1_k3_s1_e6_c320"],
];

pub const MNASNET_B1: &[&[&str]] = &[
    &["ds_r1_k3_s1_c16_noskip"],
    &["ir_r3_k3_s2_e3_c24"],
    &["ir_r3_k5_s2_e3_c40"],
    &["ir_r3_k5_s2_e6_c80"],
    &["ir_r2_k3_s1_e6_c96"],
    &["ir_r4_k5_s2_e6_c192"],
    &["ir_r1_k3_s1_e6_c320_noskip"],
];

pub const MNASNET_SMALL: &[&[&str]] = &[
    &["ds_r1_k3_s1_c8"],
    &["ir_r1_k3_s2_e3_c16"],
    &["ir_r2_k3_s2_e6_c16"],
    &["ir_r4_k5_s2_e6_c32_se0.25"],
    &["ir_r3_k3_s1_e6_c32_se0.25"],
    &["ir_r3_k5_s2_e6_c88_se0.25"],
    &["ir_r1_k3_s1_e6_c144"],
];

pub const MOBILENET_V1: &[&[&str]] = &[
    &["dsa_r1_k3_s1_c64"],
    &["dsa_r2_k3_s2_c128"],
    &["dsa_r2_k3_s2_c256"],
    &["dsa_r6_k3_s2_c512"],
    &["dsa_r2_k3_s2_c1024"],
];

pub const MOBILENET_V2: &[&[&str]] = &[
    &["ds_r1_k3_s1_c16"],
    &["ir_r2_k3_s2_e6_c24"],
    &["ir_r3_k3_s2_e6_c32"],
    &["ir_r4_k3_s2_e6_c64"],
    &["ir_r3_k3_s1_e6_c96"],
    &["ir_r3_k3_s2_e6_c160"],
    &["ir_r1_k3_s1_e6_c320"],
];

/// MobileNet-V3 large. Stages 0-2 use relu, the rest the network default
/// (hard-swish).
///
/// The expansion ratios of stage 3 are uncertain. Stage 5 keeps an expansion of 6
/// and the usual 2-1-1 stride pattern instead of the 1-2-1 pattern printed in the
/// paper, which lands closer to the published 5.4M parameters.
pub const MOBILENET_V3: &[&[&str]] = &[
    &["ds_r1_k3_s1_e1_c16_are_noskip"],
    &["ir_r1_k3_s2_e4_c24_are", "ir_r1_k3_s1_e3_c24_are"],
    &["ir_r3_k5_s2_e3_c40_se0.25_are"],
    &["ir_r1_k3_s2_e6_c80", "ir_r1_k3_s1_e2.5_c80", "ir_r2_k3_s1_e2.3_c80"],
    &["ir_r2_k3_s1_e6_c112_se0.25"],
    &[
        "ir_r1_k5_s2_e6_c160_se0.25",
        "ir_r1_k5_s1_e6_c160_se0.25",
        "ir_r1_k5_s1_e6_c160_se0.25",
    ],
    &["cn_r1_k1_s1_c960"],
];

/// ChamNet-V1, inferred from the FBNet trunk definitions of maskrcnn-benchmark.
pub const CHAMNET_V1: &[&[&str]] = &[
    &["ir_r1_k3_s1_e1_c24"],
    &["ir_r2_k7_s2_e4_c48"],
    &["ir_r5_k3_s2_e7_c64"],
    &["ir_r7_k5_s2_e12_c56"],
    &["ir_r5_k3_s1_e8_c88"],
    &["ir_r4_k3_s2_e7_c152"],
    &["ir_r1_k3_s1_e10_c104"],
];

/// ChamNet-V2, inferred from the FBNet trunk definitions of maskrcnn-benchmark.
pub const CHAMNET_V2: &[&[&str]] = &[
    &["ir_r1_k3_s1_e1_c24"],
    &["ir_r4_k5_s2_e8_c32"],
    &["ir_r6_k7_s2_e5_c48"],
    &["ir_r3_k5_s2_e9_c56"],
    &["ir_r6_k3_s1_e6_c56"],
    &["ir_r6_k3_s2_e2_c152"],
    &["ir_r1_k3_s1_e6_c112"],
];

/// FBNet-C, derived from the paper.
pub const FBNET_C: &[&[&str]] = &[
    &["ir_r1_k3_s1_e1_c16"],
    &["ir_r1_k3_s2_e6_c24", "ir_r2_k3_s1_e1_c24"],
    &[
        "ir_r1_k5_s2_e6_c32",
        "ir_r1_k5_s1_e3_c32",
        "ir_r1_k5_s1_e6_c32",
        "ir_r1_k3_s1_e6_c32",
    ],
    &["ir_r1_k5_s2_e6_c64", "ir_r1_k5_s1_e3_c64", "ir_r2_k5_s1_e6_c64"],
    &["ir_r3_k5_s1_e6_c112", "ir_r1_k5_s1_e3_c112"],
    &["ir_r4_k5_s2_e6_c184"],
    &["ir_r1_k3_s1_e6_c352"],
];

/// Single-Path NAS, searched for the Pixel 1 phone.
pub const SPNASNET: &[&[&str]] = &[
    &["ds_r1_k3_s1_c16_noskip"],
    &["ir_r3_k3_s2_e3_c24"],
    &["ir_r1_k5_s2_e6_c40", "ir_r3_k3_s1_e3_c40"],
    &["ir_r1_k5_s2_e6_c80", "ir_r3_k3_s1_e3_c80"],
    &["ir_r1_k5_s1_e6_c96", "ir_r3_k5_s1_e3_c96"],
    &["ir_r4_k5_s2_e6_c192"],
    &["ir_r1_k3_s1_e6_c320_noskip"],
];

/// Owned copy of a static architecture table.
pub fn arch_def(stages: &[&[&str]]) -> Vec<Vec<String>> {
    stages
        .iter()
        .map(|stage| stage.iter().map(|block| block.to_string()).collect())
        .collect()
}

fn gen_config(stages: &[&[&str]], depth_multiplier: f64) -> GenMobileNetConfig {
    GenMobileNetConfig::new(arch_def(stages))
        .with_depth_multiplier(depth_multiplier)
        .with_depth_divisor(8)
        .with_min_depth(None)
}

/// [MnasNet-A1](https://arxiv.org/abs/1807.11626), with squeeze-excite.
fn gen_mnasnet_a1(depth_multiplier: f64) -> GenMobileNetConfig {
    gen_config(MNASNET_A1, depth_multiplier).with_stem_size(32)
}

/// [MnasNet-B1](https://arxiv.org/abs/1807.11626).
fn gen_mnasnet_b1(depth_multiplier: f64) -> GenMobileNetConfig {
    gen_config(MNASNET_B1, depth_multiplier).with_stem_size(32)
}

fn gen_mnasnet_small(depth_multiplier: f64) -> GenMobileNetConfig {
    gen_config(MNASNET_SMALL, depth_multiplier).with_stem_size(8)
}

/// [MobileNet-V1](https://arxiv.org/abs/1704.04861): no head conv, the last stage
/// feeds the classifier directly.
fn gen_mobilenet_v1(depth_multiplier: f64) -> GenMobileNetConfig {
    gen_config(MOBILENET_V1, depth_multiplier)
        .with_stem_size(32)
        .with_num_features(1024)
        .with_act_fn(ActivationKind::Relu6)
        .with_head_conv(HeadConv::None)
}

/// [MobileNet-V2](https://arxiv.org/abs/1801.04381).
fn gen_mobilenet_v2(depth_multiplier: f64) -> GenMobileNetConfig {
    gen_config(MOBILENET_V2, depth_multiplier)
        .with_stem_size(32)
        .with_act_fn(ActivationKind::Relu6)
}

/// [MobileNet-V3](https://arxiv.org/abs/1905.02244).
fn gen_mobilenet_v3(depth_multiplier: f64) -> GenMobileNetConfig {
    gen_config(MOBILENET_V3, depth_multiplier)
        .with_stem_size(16)
        .with_act_fn(ActivationKind::HardSwish)
        .with_se_gate_fn(ActivationKind::HardSigmoid)
        .with_se_reduce_mid(true)
        .with_head_conv(HeadConv::Efficient)
}

/// [ChamNet](https://arxiv.org/abs/1812.08934). The feature width is not published,
/// 1280 follows MobileNet-V2 and MnasNet.
fn gen_chamnet_v1(depth_multiplier: f64) -> GenMobileNetConfig {
    gen_config(CHAMNET_V1, depth_multiplier)
        .with_stem_size(32)
        .with_num_features(1280)
}

fn gen_chamnet_v2(depth_multiplier: f64) -> GenMobileNetConfig {
    gen_config(CHAMNET_V2, depth_multiplier)
        .with_stem_size(32)
        .with_num_features(1280)
}

/// [FBNet-C](https://arxiv.org/abs/1812.03443). The 1984 feature width is suggested
/// by the paper but not certain.
fn gen_fbnetc(depth_multiplier: f64) -> GenMobileNetConfig {
    gen_config(FBNET_C, depth_multiplier)
        .with_stem_size(16)
        .with_num_features(1984)
}

/// [Single-Path NAS](https://arxiv.org/abs/1904.02877) Pixel 1.
fn gen_spnasnet(depth_multiplier: f64) -> GenMobileNetConfig {
    gen_config(SPNASNET, depth_multiplier).with_stem_size(32)
}

/// Folded batch norms and "same" padding, matching TFLite checkpoints.
fn tflite(config: GenMobileNetConfig) -> GenMobileNetConfig {
    config.with_folded_bn(true).with_padding_same(true)
}

/// MnasNet-B1, depth multiplier of 0.5.
pub fn mnasnet_050() -> GenMobileNetConfig {
    gen_mnasnet_b1(0.5)
}

/// MnasNet-B1, depth multiplier of 0.75.
pub fn mnasnet_075() -> GenMobileNetConfig {
    gen_mnasnet_b1(0.75)
}

/// MnasNet-B1, depth multiplier of 1.0.
pub fn mnasnet_100() -> GenMobileNetConfig {
    gen_mnasnet_b1(1.0)
}

/// MnasNet-B1, depth multiplier of 1.0, TFLite compatible.
pub fn tflite_mnasnet_100() -> GenMobileNetConfig {
    tflite(gen_mnasnet_b1(1.0))
}

/// MnasNet-B1, depth multiplier of 1.4.
pub fn mnasnet_140() -> GenMobileNetConfig {
    gen_mnasnet_b1(1.4)
}

/// MnasNet-A1 (with SE), depth multiplier of 0.5.
pub fn semnasnet_050() -> GenMobileNetConfig {
    gen_mnasnet_a1(0.5)
}

/// MnasNet-A1 (with SE), depth multiplier of 0.75.
pub fn semnasnet_075() -> GenMobileNetConfig {
    gen_mnasnet_a1(0.75)
}

/// MnasNet-A1 (with SE), depth multiplier of 1.0.
pub fn semnasnet_100() -> GenMobileNetConfig {
    gen_mnasnet_a1(1.0)
}

/// MnasNet-A1 (with SE), depth multiplier of 1.0, TFLite compatible.
pub fn tflite_semnasnet_100() -> GenMobileNetConfig {
    tflite(gen_mnasnet_a1(1.0))
}

/// MnasNet-A1 (with SE), depth multiplier of 1.4.
pub fn semnasnet_140() -> GenMobileNetConfig {
    gen_mnasnet_a1(1.4)
}

/// MnasNet-Small, depth multiplier of 1.0.
pub fn mnasnet_small() -> GenMobileNetConfig {
    gen_mnasnet_small(1.0)
}

pub fn mobilenetv1_100() -> GenMobileNetConfig {
    gen_mobilenet_v1(1.0)
}

pub fn mobilenetv2_100() -> GenMobileNetConfig {
    gen_mobilenet_v2(1.0)
}

pub fn mobilenetv3_050() -> GenMobileNetConfig {
    gen_mobilenet_v3(0.5)
}

pub fn mobilenetv3_075() -> GenMobileNetConfig {
    gen_mobilenet_v3(0.75)
}

pub fn mobilenetv3_100() -> GenMobileNetConfig {
    gen_mobilenet_v3(1.0)
}

pub fn chamnetv1_100() -> GenMobileNetConfig {
    gen_chamnet_v1(1.0)
}

pub fn chamnetv2_100() -> GenMobileNetConfig {
    gen_chamnet_v2(1.0)
}

pub fn fbnetc_100() -> GenMobileNetConfig {
    gen_fbnetc(1.0)
}

pub fn spnasnet_100() -> GenMobileNetConfig {
    gen_spnasnet(1.0)
}
