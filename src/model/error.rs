use thiserror::Error;

/// Failures raised while turning an architecture definition into a network.
///
/// Construction is deterministic, so every error points at a configuration the
/// caller has to fix.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenMobileNetError {
    #[error("Malformed block string `{block}`: {reason}")]
    MalformedSpec { block: String, reason: String },

    #[error("Head conv is disabled but the body outputs {channels} channels instead of {num_features}")]
    ConfigurationMismatch { num_features: usize, channels: usize },

    #[error("Invalid channel count {channels} for {context}")]
    InvalidChannel { channels: usize, context: String },

    #[error("Kernel size {kernel_size} must be odd")]
    InvalidKernel { kernel_size: usize },

    #[error("Dropout rate {drop_rate} is not in [0, 1]")]
    InvalidDropRate { drop_rate: f64 },
}

impl GenMobileNetError {
    pub(crate) fn malformed(block: &str, reason: impl Into<String>) -> Self {
        GenMobileNetError::MalformedSpec {
            block: block.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = core::result::Result<T, GenMobileNetError>;
