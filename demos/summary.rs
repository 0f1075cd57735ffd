use genmobilenet_burn::{arch, GenMobileNetConfig};

use burn::{backend::NdArray, module::Module, tensor::Tensor};

const HEIGHT: usize = 224;
const WIDTH: usize = 224;

pub fn main() {
    env_logger::init();

    // Optional name filter, e.g. `cargo run --example summary -- mobilenetv3`
    let filter = std::env::args().nth(1);

    let presets: [(&str, fn() -> GenMobileNetConfig); 22] = [
        ("mnasnet_050", arch::mnasnet_050),
        ("mnasnet_075", arch::mnasnet_075),
        ("mnasnet_100", arch::mnasnet_100),
        ("mnasnet_140", arch::mnasnet_140),
        ("tflite_mnasnet_100", arch::tflite_mnasnet_100),
        ("semnasnet_050", arch::semnasnet_050),
        ("semnasnet_075", arch::semnasnet_075),
        ("semnasnet_100", arch::semnasnet_100),
        ("semnasnet_140", arch::semnasnet_140),
        ("tflite_semnasnet_100", arch::tflite_semnasnet_100),
        ("mnasnet_small", arch::mnasnet_small),
        ("mobilenetv1_100", arch::mobilenetv1_100),
        ("mobilenetv2_100", arch::mobilenetv2_100),
        ("mobilenetv3_050", arch::mobilenetv3_050),
        ("mobilenetv3_075", arch::mobilenetv3_075),
        ("mobilenetv3_100", arch::mobilenetv3_100),
        ("chamnetv1_100", arch::chamnetv1_100),
        ("chamnetv2_100", arch::chamnetv2_100),
        ("fbnetc_100", arch::fbnetc_100),
        ("spnasnet_100", arch::spnasnet_100),
        ("mobilenetv2_100_tf", || arch::mobilenetv2_100().with_bn_tf(true)),
        ("mobilenetv2_100_10cls", || {
            arch::mobilenetv2_100().with_num_classes(10)
        }),
    ];

    let device = Default::default();
    for (name, preset) in presets {
        if filter.as_deref().is_some_and(|filter| !name.contains(filter)) {
            continue;
        }

        let model = match preset().init::<NdArray>(&device) {
            Ok(model) => model,
            Err(err) => {
                println!("{name:<24} failed to build: {err}");
                continue;
            }
        };

        let input = Tensor::<NdArray, 4>::zeros([1, 3, HEIGHT, WIDTH], &device);
        let out = model.forward(input);

        println!(
            "{name:<24} {:>3} blocks, {:>10} params, {:>5} features, output {:?}",
            model.blocks().len(),
            model.num_params(),
            model.num_features(),
            out.dims()
        );
    }
}
