use burn::tensor::{activation, backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

/// Element-wise non-linearity shared by the stem, the blocks, the head and the
/// squeeze-excite gates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationKind {
    Relu,
    Relu6,
    HardSwish,
    Swish,
    Sigmoid,
    HardSigmoid,
}

impl ActivationKind {
    pub fn forward<B: Backend, const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            ActivationKind::Relu => activation::relu(input),
            ActivationKind::Relu6 => relu6(input),
            ActivationKind::HardSwish => hard_swish(input),
            ActivationKind::Swish => activation::silu(input),
            ActivationKind::Sigmoid => activation::sigmoid(input),
            ActivationKind::HardSigmoid => hard_sigmoid(input),
        }
    }

    /// Block grammar code of the activation, if it can be selected per block.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            ActivationKind::Relu => Some("re"),
            ActivationKind::Relu6 => Some("r6"),
            ActivationKind::HardSwish => Some("hs"),
            ActivationKind::Swish => Some("sw"),
            ActivationKind::Sigmoid | ActivationKind::HardSigmoid => None,
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "re" => Some(ActivationKind::Relu),
            "r6" => Some(ActivationKind::Relu6),
            "hs" => Some(ActivationKind::HardSwish),
            "sw" => Some(ActivationKind::Swish),
            _ => None,
        }
    }
}

fn relu6<B: Backend, const D: usize>(input: Tensor<B, D>) -> Tensor<B, D> {
    activation::relu(input).clamp_max(6)
}

/// `relu6(x + 3) / 6`
fn hard_sigmoid<B: Backend, const D: usize>(input: Tensor<B, D>) -> Tensor<B, D> {
    relu6(input.add_scalar(3.0)).div_scalar(6.0)
}

fn hard_swish<B: Backend, const D: usize>(input: Tensor<B, D>) -> Tensor<B, D> {
    input.clone() * hard_sigmoid(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn apply(kind: ActivationKind, values: [f32; 5]) -> Vec<f32> {
        let device = Default::default();
        let input = Tensor::<TestBackend, 1>::from_floats(values, &device);
        kind.forward(input).into_data().to_vec::<f32>().unwrap()
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn relu6_clamps_both_ends() {
        let out = apply(ActivationKind::Relu6, [-2.0, 0.0, 3.0, 6.0, 9.0]);
        assert_close(&out, &[0.0, 0.0, 3.0, 6.0, 6.0]);
    }

    #[test]
    fn hard_sigmoid_is_piecewise_linear() {
        let out = apply(ActivationKind::HardSigmoid, [-4.0, -3.0, 0.0, 3.0, 4.0]);
        assert_close(&out, &[0.0, 0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn hard_swish_matches_definition() {
        let out = apply(ActivationKind::HardSwish, [-4.0, -1.0, 0.0, 1.0, 4.0]);
        assert_close(&out, &[0.0, -1.0 / 3.0, 0.0, 2.0 / 3.0, 4.0]);
    }

    #[test]
    fn codes_round_trip() {
        for kind in [
            ActivationKind::Relu,
            ActivationKind::Relu6,
            ActivationKind::HardSwish,
            ActivationKind::Swish,
        ] {
            let code = kind.code().unwrap();
            assert_eq!(ActivationKind::from_code(code), Some(kind));
        }
        assert_eq!(ActivationKind::Sigmoid.code(), None);
        assert_eq!(ActivationKind::from_code("gelu"), None);
    }
}
