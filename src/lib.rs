//! Generic MobileNet family for [burn](https://burn.dev).
//!
//! Every network is described by a list of stages, each stage a list of block
//! strings such as `ir_r2_k3_s2_e6_c24`. The strings are decoded into
//! [`BlockSpec`](model::block_spec::BlockSpec)s and compiled into a flat
//! sequence of depthwise-separable, inverted-residual and 1x1 conv blocks
//! wrapped by a stem, an optional head and a linear classifier.
pub mod model;

pub use model::{
    arch,
    error::{GenMobileNetError, Result},
    genmobilenet::{GenMobileNet, GenMobileNetConfig},
};
