use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::{
        conv::Conv2d,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, Dropout, DropoutConfig, Linear, LinearConfig,
    },
    tensor::{backend::Backend, Device, Tensor},
};
use serde::{Deserialize, Serialize};

use super::{
    activation::ActivationKind,
    block_spec::{decode_arch_def, BlockSpec},
    builder::{BuilderSettings, GenBlock, MobileNetBuilder},
    conv_norm::{apply_norm, pad_input, BatchNormParams, DynamicPad, LayerSettings, WeightInit},
    depthwise_separable::DsaActPlacement,
    error::{self, GenMobileNetError},
};

#[cfg(feature = "pretrained")]
use {
    super::weights::{self, WeightsMeta},
    burn::record::{FullPrecisionSettings, Recorder, RecorderError},
    burn_import::pytorch::{LoadArgs, PyTorchFileRecorder},
};

/// Layers between the last block and the classifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadConv {
    /// No head conv: the body must already output `num_features` channels.
    None,
    /// 1x1 conv -> norm -> activation -> global pool.
    #[default]
    Default,
    /// Global pool -> 1x1 conv -> activation, without norm.
    Efficient,
}

/// Generic mobile network: stem conv, a body compiled from block strings, an optional
/// head conv, global pooling and a linear classifier.
#[derive(Module, Debug)]
pub struct GenMobileNet<B: Backend> {
    conv_stem: Conv2d<B>,
    bn1: Option<BatchNorm<B, 2>>,
    blocks: Vec<GenBlock<B>>,
    conv_head: Option<Conv2d<B>>,
    bn2: Option<BatchNorm<B, 2>>,
    global_pool: AdaptiveAvgPool2d,
    dropout: Dropout,
    classifier: Linear<B>,
    stem_pad: Ignored<Option<DynamicPad>>,
    act: Ignored<ActivationKind>,
    head_conv: Ignored<HeadConv>,
    weight_init: Ignored<WeightInit>,
    num_features: usize,
}

impl<B: Backend> GenMobileNet<B> {
    /// Pooled features `[batch, num_features, 1, 1]`.
    pub fn forward_features(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = pad_input(&self.stem_pad, input);
        let x = self.conv_stem.forward(x);
        let x = apply_norm(&self.bn1, x);
        let mut x = self.act.forward(x);

        for block in &self.blocks {
            x = block.forward(x);
        }

        match (*self.head_conv, &self.conv_head) {
            (HeadConv::Efficient, Some(conv_head)) => {
                let x = self.global_pool.forward(x);
                let x = conv_head.forward(x);
                self.act.forward(x)
            }
            (_, Some(conv_head)) => {
                let x = conv_head.forward(x);
                let x = apply_norm(&self.bn2, x);
                let x = self.act.forward(x);
                self.global_pool.forward(x)
            }
            (_, None) => self.global_pool.forward(x),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.forward_features(input);
        // Reshape [B, C, 1, 1] -> [B, C]
        let x = x.flatten(1, 3);
        let x = self.dropout.forward(x);

        self.classifier.forward(x)
    }

    /// Body blocks, in execution order.
    pub fn blocks(&self) -> &[GenBlock<B>] {
        &self.blocks
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_classes(&self) -> usize {
        let [_, num_classes] = self.classifier.weight.dims();
        num_classes
    }

    pub fn head_conv(&self) -> HeadConv {
        *self.head_conv
    }

    /// Re-initialize the classifier with the specified number of output classes.
    ///
    /// The new classifier follows the weight init scheme the network was built with.
    pub fn with_classes(mut self, num_classes: usize) -> Self {
        let [d_input, _d_output] = self.classifier.weight.dims();
        self.classifier = init_classifier(
            d_input,
            num_classes,
            *self.weight_init,
            &self.classifier.weight.device(),
        );
        self
    }
}

fn init_classifier<B: Backend>(
    num_features: usize,
    num_classes: usize,
    weight_init: WeightInit,
    device: &Device<B>,
) -> Linear<B> {
    let mut linear = LinearConfig::new(num_features, num_classes)
        .with_initializer(weight_init.linear(num_classes))
        .init(device);
    linear.bias = weight_init.bias(linear.bias);
    linear
}

/// Checkpoint key remaps from `blocks.{stage}.{block}` to the flat `blocks.{n}` sequence,
/// as `(pattern, replacement)` pairs in block order.
#[cfg_attr(not(feature = "pretrained"), allow(dead_code))]
fn checkpoint_key_remaps(stages: &[Vec<BlockSpec>]) -> Vec<(String, String)> {
    let mut remaps = Vec::new();
    for (stage_idx, stage) in stages.iter().enumerate() {
        let repeats: usize = stage.iter().map(|spec| spec.repeat).sum();
        for block_idx in 0..repeats {
            let flat_idx = remaps.len();
            remaps.push((
                format!("^blocks\\.{stage_idx}\\.{block_idx}\\.(.+)"),
                format!("blocks.{flat_idx}.$1"),
            ));
        }
    }
    remaps
}

#[cfg(feature = "pretrained")]
impl<B: Backend> GenMobileNet<B> {
    /// Load specified pre-trained PyTorch weights as a record.
    ///
    /// Checkpoints keep one `blocks.{stage}.{block}` entry per block string repeat, which
    /// is remapped onto the flat block sequence.
    fn load_weights_record(
        weights: &weights::Weights,
        config: &GenMobileNetConfig,
        device: &Device<B>,
    ) -> core::result::Result<GenMobileNetRecord<B>, RecorderError> {
        let stages = decode_arch_def(&config.arch_def)
            .map_err(|err| RecorderError::Unknown(err.to_string()))?;

        // Download torch weights
        let torch_weights = weights.download().map_err(|err| {
            RecorderError::Unknown(format!("Could not download weights.\nError: {err}"))
        })?;

        let mut load_args = LoadArgs::new(torch_weights);
        for (pattern, replacement) in checkpoint_key_remaps(&stages) {
            load_args = load_args.with_key_remap(&pattern, &replacement);
        }

        PyTorchFileRecorder::<FullPrecisionSettings>::new().load(load_args, device)
    }

    /// Network with pre-trained weights.
    ///
    /// # Arguments
    ///
    /// * `weights`: Pre-trained weights to load.
    /// * `device` - Device to create the module on.
    ///
    /// # Returns
    ///
    /// The network matching the weights, with pre-trained weights loaded.
    pub fn pretrained<W: WeightsMeta>(
        weights: W,
        device: &Device<B>,
    ) -> core::result::Result<Self, RecorderError> {
        let config = weights.config();
        let weights = weights.weights();
        let config = config.with_num_classes(weights.num_classes);
        let model = config
            .init(device)
            .map_err(|err| RecorderError::Unknown(err.to_string()))?;
        let record = Self::load_weights_record(&weights, &config, device)?;

        Ok(model.load_record(record))
    }
}

/// [GenMobileNet](GenMobileNet) configuration.
#[derive(Config, Debug)]
pub struct GenMobileNetConfig {
    /// Block strings, one list per stage.
    pub arch_def: Vec<Vec<String>>,

    #[config(default = "1000")]
    pub num_classes: usize,

    #[config(default = "3")]
    pub in_chans: usize,

    /// Stem width before the depth multiplier.
    #[config(default = "32")]
    pub stem_size: usize,

    /// Width of the features fed to the classifier.
    #[config(default = "1280")]
    pub num_features: usize,

    #[config(default = "1.0")]
    pub depth_multiplier: f64,

    #[config(default = "8")]
    pub depth_divisor: usize,

    #[config(default = "None")]
    pub min_depth: Option<usize>,

    #[config(default = "None")]
    pub bn_momentum: Option<f64>,

    #[config(default = "None")]
    pub bn_eps: Option<f64>,

    /// Use TensorFlow batch norm defaults when momentum or epsilon are not set.
    #[config(default = false)]
    pub bn_tf: bool,

    /// Classifier dropout, only active while training.
    #[config(default = "0.0")]
    pub drop_rate: f64,

    #[config(default = "ActivationKind::Relu")]
    pub act_fn: ActivationKind,

    #[config(default = "ActivationKind::Sigmoid")]
    pub se_gate_fn: ActivationKind,

    #[config(default = false)]
    pub se_reduce_mid: bool,

    #[config(default = "HeadConv::Default")]
    pub head_conv: HeadConv,

    #[config(default = "WeightInit::Goog")]
    pub weight_init: WeightInit,

    /// Fold batch norms into conv biases (TFLite checkpoints).
    #[config(default = false)]
    pub folded_bn: bool,

    /// TensorFlow "same" padding (TFLite checkpoints).
    #[config(default = false)]
    pub padding_same: bool,

    #[config(default = "DsaActPlacement::Both")]
    pub dsa_act_placement: DsaActPlacement,
}

impl GenMobileNetConfig {
    fn layer_settings(&self) -> LayerSettings {
        LayerSettings {
            bn: BatchNormParams::resolve(self.bn_momentum, self.bn_eps, self.bn_tf),
            folded_bn: self.folded_bn,
            padding_same: self.padding_same,
            weight_init: self.weight_init,
        }
    }

    fn builder(&self) -> error::Result<MobileNetBuilder> {
        MobileNetBuilder::new(BuilderSettings {
            depth_multiplier: self.depth_multiplier,
            depth_divisor: self.depth_divisor,
            min_depth: self.min_depth,
            act: self.act_fn,
            se_gate: self.se_gate_fn,
            se_reduce_mid: self.se_reduce_mid,
            dsa_act_placement: self.dsa_act_placement,
            layers: self.layer_settings(),
        })
    }

    /// Initialize a new [GenMobileNet](GenMobileNet).
    ///
    /// The whole architecture is decoded and checked before any parameter is allocated.
    ///
    /// # Arguments
    ///
    /// * `device` - Device to create the module on.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> error::Result<GenMobileNet<B>> {
        for (channels, context) in [
            (self.depth_divisor, "depth divisor"),
            (self.in_chans, "input"),
            (self.num_features, "features"),
            (self.num_classes, "classifier"),
        ] {
            if channels == 0 {
                return Err(GenMobileNetError::InvalidChannel {
                    channels,
                    context: context.to_string(),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.drop_rate) {
            return Err(GenMobileNetError::InvalidDropRate {
                drop_rate: self.drop_rate,
            });
        }

        let stages = decode_arch_def(&self.arch_def)?;
        let builder = self.builder()?;
        let layers = builder.settings().layers;
        let act = builder.settings().act;

        let stem_size = builder.round_channels(self.stem_size);
        if stem_size == 0 {
            return Err(GenMobileNetError::InvalidChannel {
                channels: stem_size,
                context: "stem".to_string(),
            });
        }

        let (block_configs, body_channels) = builder.plan(stem_size, &stages)?;
        if self.head_conv == HeadConv::None && body_channels != self.num_features {
            return Err(GenMobileNetError::ConfigurationMismatch {
                num_features: self.num_features,
                channels: body_channels,
            });
        }

        // Stem: 3x3 conv, /2
        let (conv_stem, stem_pad) =
            layers.conv(self.in_chans, stem_size, 3, 2, 1, self.folded_bn, device);
        let bn1 = layers.norm(stem_size, device);

        let blocks: Vec<GenBlock<B>> = block_configs
            .iter()
            .map(|config| config.init(&layers, device))
            .collect();

        let (conv_head, bn2) = match self.head_conv {
            HeadConv::None => (None, None),
            HeadConv::Default => {
                let (conv, _) = layers.conv(
                    body_channels,
                    self.num_features,
                    1,
                    1,
                    1,
                    self.folded_bn,
                    device,
                );
                (Some(conv), layers.norm(self.num_features, device))
            }
            HeadConv::Efficient => {
                let (conv, _) =
                    layers.conv(body_channels, self.num_features, 1, 1, 1, false, device);
                (Some(conv), None)
            }
        };

        let classifier =
            init_classifier(self.num_features, self.num_classes, self.weight_init, device);

        log::info!(
            "Built network: stem {stem_size}, {} blocks, {body_channels} body channels, \
             {:?} head with {} features, {} classes",
            blocks.len(),
            self.head_conv,
            self.num_features,
            self.num_classes
        );

        Ok(GenMobileNet {
            conv_stem,
            bn1,
            blocks,
            conv_head,
            bn2,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.drop_rate).init(),
            classifier,
            stem_pad: Ignored(stem_pad),
            act: Ignored(act),
            head_conv: Ignored(self.head_conv),
            weight_init: Ignored(self.weight_init),
            num_features: self.num_features,
        })
    }
}
