use crate::{common::*, model::LossLog};

#[derive(Debug, TensorLike)]
pub struct TrainingMessage {
    /// Images in `[0, 255]` with shape `[batch, channel, width, width]`.
    pub images: Tensor,
    /// One int64 style id per image.
    pub style_ids: Tensor,
    pub batch_index: usize,
}

#[derive(Debug)]
pub enum LogMessage {
    Loss {
        step: usize,
        learning_rate: f64,
        losses: LossLog,
    },
    /// Batches in `[-1, 1]`.
    Sample {
        step: usize,
        real: Tensor,
        fake_s: Tensor,
        fake_c: Tensor,
    },
}
