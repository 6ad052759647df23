use super::{
    batch_norm::{BatchNorm, BatchNormInit},
    cond_inst_norm::{ConditionalInstanceNorm, ConditionalInstanceNormInit},
};
use crate::common::*;

pub const LEAKY_RELU_SLOPE: f64 = 0.2;

pub fn leaky_relu(xs: &Tensor) -> Tensor {
    xs.maximum(&(xs * LEAKY_RELU_SLOPE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormKind {
    BatchNorm,
    ConditionalInstanceNorm,
}

impl NormKind {
    pub fn from_inst_norm(inst_norm: bool) -> Self {
        if inst_norm {
            Self::ConditionalInstanceNorm
        } else {
            Self::BatchNorm
        }
    }

    pub fn build<'a>(
        self,
        path: impl Borrow<nn::Path<'a>>,
        out_dim: usize,
        num_styles: usize,
    ) -> Norm {
        let path = path.borrow();

        match self {
            Self::BatchNorm => Norm::BatchNorm(BatchNormInit::default().build(path / "bn", out_dim)),
            Self::ConditionalInstanceNorm => Norm::ConditionalInstanceNorm(
                ConditionalInstanceNormInit::new(num_styles).build(path / "inst_norm", out_dim),
            ),
        }
    }
}

#[derive(Debug)]
pub enum Norm {
    BatchNorm(BatchNorm),
    ConditionalInstanceNorm(ConditionalInstanceNorm),
}

impl Norm {
    pub fn forward_t(&mut self, input: &Tensor, style_ids: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::BatchNorm(norm) => norm.forward_t(input, train),
            Self::ConditionalInstanceNorm(norm) => norm.forward(input, style_ids),
        }
    }

    pub fn style_params(&self) -> Vec<Tensor> {
        match self {
            Self::BatchNorm(_) => vec![],
            Self::ConditionalInstanceNorm(norm) => norm.style_params(),
        }
    }
}
