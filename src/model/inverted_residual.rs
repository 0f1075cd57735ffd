use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::{conv::Conv2d, BatchNorm},
    tensor::{backend::Backend, Device, Tensor},
};

use super::{
    activation::ActivationKind,
    conv_norm::{apply_norm, pad_input, DynamicPad, LayerSettings},
    squeeze_excite::{SqueezeExcite, SqueezeExciteConfig},
};

/// [Inverted Residual Block](https://paperswithcode.com/method/inverted-residual-block).
///
/// Pointwise expansion -> depthwise conv -> optional SE -> pointwise linear projection.
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    conv_pw: Conv2d<B>,
    bn1: Option<BatchNorm<B, 2>>,
    conv_dw: Conv2d<B>,
    bn2: Option<BatchNorm<B, 2>>,
    se: Option<SqueezeExcite<B>>,
    conv_pwl: Conv2d<B>,
    bn3: Option<BatchNorm<B, 2>>,
    dw_pad: Ignored<Option<DynamicPad>>,
    act: Ignored<ActivationKind>,
    has_residual: bool,
    in_channels: usize,
    mid_channels: usize,
    out_channels: usize,
    stride: usize,
}

/// [InvertedResidual](InvertedResidual) configuration.
#[derive(Config, Debug)]
pub struct InvertedResidualConfig {
    pub in_channels: usize,
    /// Expanded width carried by the depthwise conv.
    pub mid_channels: usize,
    pub out_channels: usize,
    #[config(default = "3")]
    pub kernel_size: usize,
    #[config(default = "1")]
    pub stride: usize,
    #[config(default = "ActivationKind::Relu")]
    pub act: ActivationKind,
    #[config(default = false)]
    pub no_skip: bool,
    pub se: Option<SqueezeExciteConfig>,
}

impl InvertedResidualConfig {
    /// Initialize a new [InvertedResidual](InvertedResidual) module.
    pub fn init<B: Backend>(
        &self,
        settings: &LayerSettings,
        device: &Device<B>,
    ) -> InvertedResidual<B> {
        let bias = settings.folded_bn;
        let (conv_pw, _) =
            settings.conv(self.in_channels, self.mid_channels, 1, 1, 1, bias, device);
        let (conv_dw, dw_pad) = settings.conv(
            self.mid_channels,
            self.mid_channels,
            self.kernel_size,
            self.stride,
            self.mid_channels,
            bias,
            device,
        );
        let (conv_pwl, _) =
            settings.conv(self.mid_channels, self.out_channels, 1, 1, 1, bias, device);

        InvertedResidual {
            conv_pw,
            bn1: settings.norm(self.mid_channels, device),
            conv_dw,
            bn2: settings.norm(self.mid_channels, device),
            se: self.se.as_ref().map(|se| se.init(settings, device)),
            conv_pwl,
            bn3: settings.norm(self.out_channels, device),
            dw_pad: Ignored(dw_pad),
            act: Ignored(self.act),
            has_residual: self.stride == 1 && self.in_channels == self.out_channels && !self.no_skip,
            in_channels: self.in_channels,
            mid_channels: self.mid_channels,
            out_channels: self.out_channels,
            stride: self.stride,
        }
    }
}

impl<B: Backend> InvertedResidual<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        // Point-wise expansion
        let x = self.conv_pw.forward(input.clone());
        let x = apply_norm(&self.bn1, x);
        let x = self.act.forward(x);

        // Depth-wise convolution
        let x = pad_input(&self.dw_pad, x);
        let x = self.conv_dw.forward(x);
        let x = apply_norm(&self.bn2, x);
        let mut x = self.act.forward(x);

        if let Some(se) = &self.se {
            x = se.forward(x);
        }

        // Point-wise linear projection
        let x = self.conv_pwl.forward(x);
        let x = apply_norm(&self.bn3, x);

        if self.has_residual {
            x + input
        } else {
            x
        }
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

    pub fn mid_channels(&self) -> usize {
        self.mid_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}
