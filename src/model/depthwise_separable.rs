use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::{conv::Conv2d, BatchNorm},
    tensor::{backend::Backend, Device, Tensor},
};
use serde::{Deserialize, Serialize};

use super::{
    activation::ActivationKind,
    conv_norm::{apply_norm, pad_input, DynamicPad, LayerSettings},
    squeeze_excite::{SqueezeExcite, SqueezeExciteConfig},
};

/// Activation placement of MobileNet-V1 style (`dsa`) blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DsaActPlacement {
    /// Activation after both the depthwise and the pointwise conv.
    #[default]
    Both,
    /// Activation after the pointwise conv only.
    PointwiseOnly,
}

/// [Depthwise separable convolution](https://paperswithcode.com/method/depthwise-separable-convolution) block.
///
/// Depthwise conv -> norm -> activation -> optional SE -> pointwise conv -> norm,
/// with a trailing activation for the MobileNet-V1 variant.
#[derive(Module, Debug)]
pub struct DepthwiseSeparableConv<B: Backend> {
    conv_dw: Conv2d<B>,
    bn1: Option<BatchNorm<B, 2>>,
    se: Option<SqueezeExcite<B>>,
    conv_pw: Conv2d<B>,
    bn2: Option<BatchNorm<B, 2>>,
    dw_pad: Ignored<Option<DynamicPad>>,
    act: Ignored<ActivationKind>,
    dw_act: bool,
    pw_act: bool,
    has_residual: bool,
    in_channels: usize,
    out_channels: usize,
    stride: usize,
}

/// [DepthwiseSeparableConv](DepthwiseSeparableConv) configuration.
#[derive(Config, Debug)]
pub struct DepthwiseSeparableConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    #[config(default = "3")]
    pub kernel_size: usize,
    #[config(default = "1")]
    pub stride: usize,
    #[config(default = "ActivationKind::Relu")]
    pub act: ActivationKind,
    /// Activate the depthwise output.
    #[config(default = true)]
    pub dw_act: bool,
    /// Activate the pointwise output.
    #[config(default = false)]
    pub pw_act: bool,
    #[config(default = false)]
    pub no_skip: bool,
    pub se: Option<SqueezeExciteConfig>,
}

impl DepthwiseSeparableConfig {
    pub fn init<B: Backend>(
        &self,
        settings: &LayerSettings,
        device: &Device<B>,
    ) -> DepthwiseSeparableConv<B> {
        let (conv_dw, dw_pad) = settings.conv(
            self.in_channels,
            self.in_channels,
            self.kernel_size,
            self.stride,
            self.in_channels,
            settings.folded_bn,
            device,
        );
        let (conv_pw, _) = settings.conv(
            self.in_channels,
            self.out_channels,
            1,
            1,
            1,
            settings.folded_bn,
            device,
        );

        DepthwiseSeparableConv {
            conv_dw,
            bn1: settings.norm(self.in_channels, device),
            se: self.se.as_ref().map(|se| se.init(settings, device)),
            conv_pw,
            bn2: settings.norm(self.out_channels, device),
            dw_pad: Ignored(dw_pad),
            act: Ignored(self.act),
            dw_act: self.dw_act,
            pw_act: self.pw_act,
            has_residual: self.stride == 1 && self.in_channels == self.out_channels && !self.no_skip,
            in_channels: self.in_channels,
            out_channels: self.out_channels,
            stride: self.stride,
        }
    }
}

impl<B: Backend> DepthwiseSeparableConv<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = pad_input(&self.dw_pad, input.clone());
        let x = self.conv_dw.forward(x);
        let mut x = apply_norm(&self.bn1, x);
        if self.dw_act {
            x = self.act.forward(x);
        }

        if let Some(se) = &self.se {
            x = se.forward(x);
        }

        let x = self.conv_pw.forward(x);
        let mut x = apply_norm(&self.bn2, x);
        if self.pw_act {
            x = self.act.forward(x);
        }

        if self.has_residual {
            x = x + input;
        }
        x
    }

    pub fn has_residual(&self) -> bool {
        self.has_residual
    }

    pub fn has_se(&self) -> bool {
        self.se.is_some()
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

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn config(in_channels: usize, out_channels: usize, stride: usize) -> DepthwiseSeparableConfig {
        DepthwiseSeparableConfig::new(in_channels, out_channels).with_stride(stride)
    }

    #[test]
    fn residual_eligibility() {
        let device = Default::default();
        let settings = LayerSettings::default();

        let block = config(24, 24, 1).init::<TestBackend>(&settings, &device);
        assert!(block.has_residual());

        let block = config(24, 24, 1)
            .with_no_skip(true)
            .init::<TestBackend>(&settings, &device);
        assert!(!block.has_residual());

        let block = config(24, 24, 2).init::<TestBackend>(&settings, &device);
        assert!(!block.has_residual());

        let block = config(24, 32, 1).init::<TestBackend>(&settings, &device);
        assert!(!block.has_residual());
    }

    #[test]
    fn forward_shapes() {
        let device = Default::default();
        let settings = LayerSettings::default();
        let block = config(16, 32, 2)
            .with_pw_act(true)
            .with_se(Some(SqueezeExciteConfig::new(16, 16, 0.25)))
            .init::<TestBackend>(&settings, &device);
        assert!(block.has_se());

        let input = Tensor::<TestBackend, 4>::ones([2, 16, 9, 9], &device);
        assert_eq!(block.forward(input).dims(), [2, 32, 5, 5]);
    }
}
