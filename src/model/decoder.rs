use super::{
    conv::{Conv2D, Conv2DInit},
    misc::{Norm, NormKind},
};
use crate::common::*;

/// Channel multipliers of the first five decoder stages. The last stage
/// emits the output channels.
pub const DECODER_SCALES: [usize; 5] = [8, 4, 4, 2, 1];
pub const DROPOUT_RATE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct DecoderInit {
    /// Channels of the bottleneck feature, style embedding included.
    pub input_channels: usize,
    pub output_channels: usize,
    pub base_channels: usize,
    /// Channels of the encoder features, shallowest first.
    pub skip_channels: Vec<usize>,
    pub norm_kind: NormKind,
    pub num_styles: usize,
}

impl DecoderInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Decoder> {
        let path = path.borrow();
        let Self {
            input_channels,
            output_channels,
            base_channels,
            skip_channels,
            norm_kind,
            num_styles,
        } = self;
        ensure!(
            skip_channels.len() == DECODER_SCALES.len() + 1,
            "expect {} encoder features, but get {}",
            DECODER_SCALES.len() + 1,
            skip_channels.len()
        );

        // stage k concatenates the encoder feature e(5-k), deepest first
        let skip_iter = skip_channels.iter().rev().skip(1);

        let (stages, last_in_c) = izip!(DECODER_SCALES.iter(), skip_iter)
            .enumerate()
            .try_fold(
                (vec![], input_channels),
                |(mut stages, in_c), (index, (&scale, &skip_c))| -> Result<_> {
                    let layer = index + 1;
                    let out_c = scale * base_channels;
                    let deconv = Conv2DInit::up_sample().build(
                        path / format!("d{}_deconv", layer),
                        in_c,
                        out_c,
                    )?;
                    let norm = norm_kind.build(path / format!("d{}_norm", layer), out_c, num_styles);
                    stages.push(DecoderStage {
                        deconv,
                        norm,
                        dropout: index == 0,
                    });
                    Ok((stages, out_c + skip_c))
                },
            )?;

        let last_deconv = Conv2DInit::up_sample().build(
            path / format!("d{}_deconv", DECODER_SCALES.len() + 1),
            last_in_c,
            output_channels,
        )?;

        Ok(Decoder {
            stages,
            last_deconv,
        })
    }
}

#[derive(Debug)]
struct DecoderStage {
    deconv: Conv2D,
    norm: Norm,
    dropout: bool,
}

#[derive(Debug)]
pub struct Decoder {
    stages: Vec<DecoderStage>,
    last_deconv: Conv2D,
}

impl Decoder {
    pub fn forward_t(
        &mut self,
        input: &Tensor,
        features: &[Tensor],
        style_ids: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let Self {
            ref mut stages,
            ref last_deconv,
        } = *self;
        ensure!(
            features.len() == stages.len() + 1,
            "expect {} encoder features, but get {}",
            stages.len() + 1,
            features.len()
        );

        let xs = izip!(stages.iter_mut(), features.iter().rev().skip(1)).try_fold(
            input.shallow_clone(),
            |xs, (stage, skip)| -> Result<_> {
                let xs = stage.deconv.forward(&xs.relu());
                let xs = stage.norm.forward_t(&xs, style_ids, train)?;
                let xs = if stage.dropout {
                    xs.dropout(DROPOUT_RATE, train)
                } else {
                    xs
                };
                ensure!(
                    xs.size()[2..] == skip.size()[2..],
                    "skip connection size mismatch: {:?} vs {:?}",
                    xs.size(),
                    skip.size()
                );
                Ok(Tensor::cat(&[&xs, skip], 1))
            },
        )?;

        let xs = last_deconv.forward(&xs.relu());
        Ok(xs.tanh())
    }

    pub fn style_params(&self) -> Vec<Tensor> {
        self.stages
            .iter()
            .flat_map(|stage| stage.norm.style_params())
            .collect()
    }
}
