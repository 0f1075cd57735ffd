use super::{arch, genmobilenet::GenMobileNetConfig};

/// Pre-trained weights metadata.
pub struct Weights {
    pub(super) url: &'static str,
    pub(super) num_classes: usize,
}

mod downloader {
    use super::*;
    use burn::data::network::downloader;
    use std::fs::{create_dir_all, File};
    use std::io::{Error, ErrorKind, Write};
    use std::path::PathBuf;

    impl Weights {
        /// File name of the checkpoint, without the query string.
        fn file_base_name(&self) -> Option<&'static str> {
            let path = self.url.split_once('?').map_or(self.url, |(path, _)| path);
            path.rsplit_once('/').map(|(_, name)| name)
        }

        /// Download the pre-trained weights to the local cache directory.
        pub fn download(&self) -> Result<PathBuf, Error> {
            // Model cache directory
            let model_dir = dirs::home_dir()
                .ok_or_else(|| Error::new(ErrorKind::NotFound, "No home directory."))?
                .join(".cache")
                .join("genmobilenet-burn");

            if !model_dir.exists() {
                create_dir_all(&model_dir)?;
            }

            let file_base_name = self.file_base_name().ok_or_else(|| {
                Error::new(ErrorKind::InvalidInput, "Weights URL has no file name.")
            })?;
            let file_name = model_dir.join(file_base_name);
            if !file_name.exists() {
                log::info!("Downloading {} to {}", self.url, file_name.display());
                // Download file content
                let bytes = downloader::download_file_as_bytes(self.url, file_base_name);

                // Write content to file
                let mut output_file = File::create(&file_name)?;
                let bytes_written = output_file.write(&bytes)?;

                if bytes_written != bytes.len() {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "Failed to write the whole model weights file.",
                    ));
                }
            }

            Ok(file_name)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn file_name_drops_query() {
            let weights = SpNasNet::ImageNet1k.weights();
            assert_eq!(weights.file_base_name(), Some("spnasnet_100-048bc3f4.pth"));
        }
    }
}

/// Pre-trained checkpoint and the architecture it was trained with.
pub trait WeightsMeta {
    fn weights(&self) -> Weights;

    fn config(&self) -> GenMobileNetConfig;
}

/// MnasNet-B1 pre-trained weights, ported from the TFLite reference models.
pub enum TfliteMnasNet100 {
    /// ImageNet-1k classifier.
    ImageNet1k,
}

impl WeightsMeta for TfliteMnasNet100 {
    fn weights(&self) -> Weights {
        let url = match *self {
            TfliteMnasNet100::ImageNet1k => {
                "https://www.dropbox.com/s/q55ir3tx8mpeyol/tflite_mnasnet_100-31639cdc.pth?dl=1"
            }
        };
        Weights {
            url,
            num_classes: 1000,
        }
    }

    fn config(&self) -> GenMobileNetConfig {
        arch::tflite_mnasnet_100()
    }
}

/// MnasNet-A1 (with SE) pre-trained weights, ported from the TFLite reference models.
pub enum TfliteSemNasNet100 {
    /// ImageNet-1k classifier.
    ImageNet1k,
}

impl WeightsMeta for TfliteSemNasNet100 {
    fn weights(&self) -> Weights {
        let url = match *self {
            TfliteSemNasNet100::ImageNet1k => {
                "https://www.dropbox.com/s/yiori47sr9dydev/tflite_semnasnet_100-7c780429.pth?dl=1"
            }
        };
        Weights {
            url,
            num_classes: 1000,
        }
    }

    fn config(&self) -> GenMobileNetConfig {
        arch::tflite_semnasnet_100()
    }
}

/// Single-Path NAS pre-trained weights.
pub enum SpNasNet {
    /// ImageNet-1k classifier.
    ImageNet1k,
}

impl WeightsMeta for SpNasNet {
    fn weights(&self) -> Weights {
        let url = match *self {
            SpNasNet::ImageNet1k => {
                "https://www.dropbox.com/s/iieopt18rytkgaa/spnasnet_100-048bc3f4.pth?dl=1"
            }
        };
        Weights {
            url,
            num_classes: 1000,
        }
    }

    fn config(&self) -> GenMobileNetConfig {
        arch::spnasnet_100()
    }
}
