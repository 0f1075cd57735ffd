use core::f64::consts::SQRT_2;

use burn::{
    config::Config,
    module::{Ignored, Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d,
    },
    tensor::{backend::Backend, Device, ElementConversion, Tensor},
};
use serde::{Deserialize, Serialize};

use super::activation::ActivationKind;

/// PyTorch batch norm defaults.
pub const BN_MOMENTUM_DEFAULT: f64 = 0.1;
pub const BN_EPS_DEFAULT: f64 = 1e-5;

/// Defaults used for TensorFlow training of mobile networks, as a PyTorch momentum
/// (`1 - decay`).
pub const BN_MOMENTUM_TF_DEFAULT: f64 = 1.0 - 0.99;
pub const BN_EPS_TF_DEFAULT: f64 = 1e-3;

/// Batch norm hyper-parameters of every norm layer in a network.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchNormParams {
    pub momentum: f64,
    pub epsilon: f64,
}

impl BatchNormParams {
    /// Resolve the hyper-parameters from optional overrides, falling back to the
    /// TensorFlow or PyTorch defaults.
    pub fn resolve(momentum: Option<f64>, epsilon: Option<f64>, tf_defaults: bool) -> Self {
        let (default_momentum, default_epsilon) = if tf_defaults {
            (BN_MOMENTUM_TF_DEFAULT, BN_EPS_TF_DEFAULT)
        } else {
            (BN_MOMENTUM_DEFAULT, BN_EPS_DEFAULT)
        };

        Self {
            momentum: momentum.unwrap_or(default_momentum),
            epsilon: epsilon.unwrap_or(default_epsilon),
        }
    }

    pub fn init<B: Backend>(&self, channels: usize, device: &Device<B>) -> BatchNorm<B, 2> {
        BatchNormConfig::new(channels)
            .with_momentum(self.momentum)
            .with_epsilon(self.epsilon)
            .init(device)
    }
}

impl Default for BatchNormParams {
    fn default() -> Self {
        Self::resolve(None, None, false)
    }
}

/// Weight initialization scheme.
///
/// Both schemes draw conv weights from the same fan-out Kaiming normal distribution.
/// They differ on the classifier weights and on biases: `Goog` zeroes every conv and
/// classifier bias, `Default` keeps the layer's own bias init.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightInit {
    /// TensorFlow MNasNet reference: uniform classifier in `±1/sqrt(num_classes)`.
    #[default]
    Goog,
    /// Fan-in Kaiming uniform classifier.
    Default,
}

impl WeightInit {
    /// Conv weight initializer, shared by both schemes.
    pub fn conv(&self) -> Initializer {
        Initializer::KaimingNormal {
            gain: SQRT_2, // recommended value for ReLU
            fan_out_only: true,
        }
    }

    pub fn linear(&self, out_features: usize) -> Initializer {
        match self {
            WeightInit::Goog => {
                let range = 1.0 / (out_features as f64).sqrt();
                Initializer::Uniform {
                    min: -range,
                    max: range,
                }
            }
            WeightInit::Default => Initializer::KaimingUniform {
                gain: 1.0,
                fan_out_only: false,
            },
        }
    }

    /// Apply the scheme's bias policy to a freshly initialized layer bias.
    pub fn bias<B: Backend>(
        &self,
        bias: Option<Param<Tensor<B, 1>>>,
    ) -> Option<Param<Tensor<B, 1>>> {
        match self {
            WeightInit::Goog => bias.map(|bias| Param::from_tensor(bias.val().zeros_like())),
            WeightInit::Default => bias,
        }
    }
}

/// TensorFlow "same" padding computed from the input size at forward time.
///
/// Odd padding puts the extra row/column at the bottom/right.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DynamicPad {
    kernel_size: usize,
    stride: usize,
}

impl DynamicPad {
    fn amount(&self, size: usize) -> usize {
        let out = size.div_ceil(self.stride);
        ((out.max(1) - 1) * self.stride + self.kernel_size).saturating_sub(size)
    }

    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = input.dims();
        let pad_h = self.amount(height);
        let pad_w = self.amount(width);
        if pad_h == 0 && pad_w == 0 {
            return input;
        }

        input.pad(
            (pad_w / 2, pad_w - pad_w / 2, pad_h / 2, pad_h - pad_h / 2),
            0.0.elem::<B::FloatElem>(),
        )
    }
}

/// Apply the optional "same" padding of a conv layer.
pub fn pad_input<B: Backend>(pad: &Option<DynamicPad>, input: Tensor<B, 4>) -> Tensor<B, 4> {
    match pad {
        Some(pad) => pad.forward(input),
        None => input,
    }
}

/// Apply the norm layer of a conv, if it was not folded.
pub fn apply_norm<B: Backend>(
    norm: &Option<BatchNorm<B, 2>>,
    input: Tensor<B, 4>,
) -> Tensor<B, 4> {
    match norm {
        Some(norm) => norm.forward(input),
        None => input,
    }
}

/// Layer policy shared by every conv and norm of a network.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerSettings {
    pub bn: BatchNormParams,
    /// Norm layers are folded into the conv bias.
    pub folded_bn: bool,
    /// TensorFlow "same" padding instead of symmetric `k / 2` padding.
    pub padding_same: bool,
    pub weight_init: WeightInit,
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            bn: BatchNormParams::default(),
            folded_bn: false,
            padding_same: false,
            weight_init: WeightInit::default(),
        }
    }
}

impl LayerSettings {
    /// Create a conv layer, along with the dynamic padding to apply before it.
    #[allow(clippy::too_many_arguments)]
    pub fn conv<B: Backend>(
        &self,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        bias: bool,
        device: &Device<B>,
    ) -> (Conv2d<B>, Option<DynamicPad>) {
        let (padding, pad) = if self.padding_same {
            let pad = (kernel_size > 1 || stride > 1).then_some(DynamicPad {
                kernel_size,
                stride,
            });
            (PaddingConfig2d::Valid, pad)
        } else {
            let padding = (kernel_size - 1) / 2;
            (PaddingConfig2d::Explicit(padding, padding), None)
        };

        let mut conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(padding)
            .with_groups(groups)
            .with_bias(bias)
            .with_initializer(self.weight_init.conv())
            .init(device);
        conv.bias = self.weight_init.bias(conv.bias);

        (conv, pad)
    }

    /// Norm layer following a conv, unless norms are folded.
    pub fn norm<B: Backend>(&self, channels: usize, device: &Device<B>) -> Option<BatchNorm<B, 2>> {
        (!self.folded_bn).then(|| self.bn.init(channels, device))
    }
}

/// Conv -> BatchNorm -> activation block (`cn` block strings).
#[derive(Module, Debug)]
pub struct ConvBnAct<B: Backend> {
    conv: Conv2d<B>,
    bn1: Option<BatchNorm<B, 2>>,
    pad: Ignored<Option<DynamicPad>>,
    act: Ignored<ActivationKind>,
    in_channels: usize,
    out_channels: usize,
    stride: usize,
}

/// [ConvBnAct](ConvBnAct) configuration.
#[derive(Config, Debug)]
pub struct ConvBnActConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    #[config(default = "1")]
    pub kernel_size: usize,
    #[config(default = "1")]
    pub stride: usize,
    #[config(default = "ActivationKind::Relu")]
    pub act: ActivationKind,
}

impl ConvBnActConfig {
    pub fn init<B: Backend>(&self, settings: &LayerSettings, device: &Device<B>) -> ConvBnAct<B> {
        let (conv, pad) = settings.conv(
            self.in_channels,
            self.out_channels,
            self.kernel_size,
            self.stride,
            1,
            settings.folded_bn,
            device,
        );

        ConvBnAct {
            conv,
            bn1: settings.norm(self.out_channels, device),
            pad: Ignored(pad),
            act: Ignored(self.act),
            in_channels: self.in_channels,
            out_channels: self.out_channels,
            stride: self.stride,
        }
    }
}

impl<B: Backend> ConvBnAct<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = pad_input(&self.pad, input);
        let x = self.conv.forward(x);
        let x = apply_norm(&self.bn1, x);
        self.act.forward(x)
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}
