use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::conv::Conv2d,
    tensor::{backend::Backend, Device, Tensor},
};

use super::{activation::ActivationKind, conv_norm::LayerSettings};

/// [Squeeze-and-Excitation](https://arxiv.org/abs/1709.01507) channel attention.
#[derive(Module, Debug)]
pub struct SqueezeExcite<B: Backend> {
    conv_reduce: Conv2d<B>,
    conv_expand: Conv2d<B>,
    act: Ignored<ActivationKind>,
    gate: Ignored<ActivationKind>,
}

/// [SqueezeExcite](SqueezeExcite) configuration.
#[derive(Config, Debug)]
pub struct SqueezeExciteConfig {
    /// Channels of the gated activation.
    pub channels: usize,
    /// Channel count the squeeze ratio applies to.
    pub reduce_base: usize,
    pub se_ratio: f64,
    #[config(default = "ActivationKind::Relu")]
    pub act: ActivationKind,
    #[config(default = "ActivationKind::Sigmoid")]
    pub gate: ActivationKind,
}

impl SqueezeExciteConfig {
    pub fn reduced_channels(&self) -> usize {
        ((self.reduce_base as f64 * self.se_ratio).round() as usize).max(1)
    }

    pub fn init<B: Backend>(
        &self,
        settings: &LayerSettings,
        device: &Device<B>,
    ) -> SqueezeExcite<B> {
        let reduced = self.reduced_channels();
        let (conv_reduce, _) = settings.conv(self.channels, reduced, 1, 1, 1, true, device);
        let (conv_expand, _) = settings.conv(reduced, self.channels, 1, 1, 1, true, device);

        SqueezeExcite {
            conv_reduce,
            conv_expand,
            act: Ignored(self.act),
            gate: Ignored(self.gate),
        }
    }
}

impl<B: Backend> SqueezeExcite<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        // Global average pool [B, C, H, W] -> [B, C, 1, 1]
        let x_se = input.clone().mean_dim(3).mean_dim(2);
        let x_se = self.conv_reduce.forward(x_se);
        let x_se = self.act.forward(x_se);
        let x_se = self.conv_expand.forward(x_se);

        input * self.gate.forward(x_se)
    }

    pub fn reduced_channels(&self) -> usize {
        let [reduced, _, _, _] = self.conv_reduce.weight.dims();
        reduced
    }
}
