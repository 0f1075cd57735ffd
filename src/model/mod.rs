pub mod activation;
pub mod arch;
pub mod block_spec;
pub mod builder;
mod channels;
mod conv_norm;
mod depthwise_separable;
pub mod error;
pub mod genmobilenet;
mod inverted_residual;
mod squeeze_excite;
#[cfg(feature = "pretrained")]
pub mod weights;

pub use channels::round_channels;
pub use conv_norm::{BatchNormParams, ConvBnAct, WeightInit};
pub use depthwise_separable::{DepthwiseSeparableConv, DsaActPlacement};
pub use genmobilenet::HeadConv;
pub use inverted_residual::InvertedResidual;
pub use squeeze_excite::SqueezeExcite;
