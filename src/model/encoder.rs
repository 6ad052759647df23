use super::{
    batch_norm::{BatchNorm, BatchNormInit},
    conv::{Conv2D, Conv2DInit},
    misc::leaky_relu,
};
use crate::common::*;

/// Channel multipliers of the six encoder stages.
pub const ENCODER_SCALES: [usize; 6] = [1, 2, 4, 4, 8, 8];

#[derive(Debug, Clone)]
pub struct EncoderInit {
    pub input_channels: usize,
    pub base_channels: usize,
}

impl EncoderInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Encoder> {
        let path = path.borrow();
        let Self {
            input_channels,
            base_channels,
        } = self;
        ensure!(base_channels > 0, "base_channels must be positive");

        let channels: Vec<_> = ENCODER_SCALES
            .iter()
            .map(|scale| scale * base_channels)
            .collect();

        let first_conv =
            Conv2DInit::down_sample().build(path / "e1_conv", input_channels, channels[0])?;

        let stages: Vec<_> = channels
            .iter()
            .tuple_windows()
            .enumerate()
            .map(|(index, (&in_c, &out_c))| -> Result<_> {
                let layer = index + 2;
                let conv = Conv2DInit::down_sample().build(
                    path / format!("e{}_conv", layer),
                    in_c,
                    out_c,
                )?;
                let bn = BatchNormInit::default().build(path / format!("e{}_bn", layer), out_c);
                Ok(EncoderStage { conv, bn })
            })
            .try_collect()?;

        Ok(Encoder {
            first_conv,
            stages,
            channels,
        })
    }
}

#[derive(Debug)]
struct EncoderStage {
    conv: Conv2D,
    bn: BatchNorm,
}

#[derive(Debug)]
pub struct EncoderOutput {
    /// Output of the deepest stage.
    pub encoded: Tensor,
    /// Outputs of all stages, shallowest first. The last entry aliases `encoded`.
    pub features: Vec<Tensor>,
}

#[derive(Debug)]
pub struct Encoder {
    first_conv: Conv2D,
    stages: Vec<EncoderStage>,
    channels: Vec<usize>,
}

impl Encoder {
    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    pub fn set_trainable(&self, trainable: bool) {
        self.first_conv.set_trainable(trainable);
        self.stages.iter().for_each(|stage| {
            stage.conv.set_trainable(trainable);
            stage.bn.set_trainable(trainable);
        });
    }

    pub fn forward_t(&mut self, input: &Tensor, train: bool) -> Result<EncoderOutput> {
        let Self {
            ref first_conv,
            ref mut stages,
            ..
        } = *self;

        let first = first_conv.forward(input);

        let (encoded, mut features) = stages.iter_mut().try_fold(
            (first, vec![]),
            |(prev, mut features), stage| -> Result<_> {
                let xs = leaky_relu(&prev);
                let xs = stage.conv.forward(&xs);
                let xs = stage.bn.forward_t(&xs, train)?;
                features.push(prev);
                Ok((xs, features))
            },
        )?;
        features.push(encoded.shallow_clone());

        Ok(EncoderOutput { encoded, features })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_test() -> Result<()> {
        let bs = 2;
        let cx = 3;
        let wx = 64;

        let vs = nn::VarStore::new(Device::Cpu);
        let mut encoder = EncoderInit {
            input_channels: cx,
            base_channels: 2,
        }
        .build(&vs.root() / "encoder")?;

        let input = Tensor::rand(&[bs, cx as i64, wx, wx], FLOAT_CPU);
        let EncoderOutput { encoded, features } = encoder.forward_t(&input, true)?;

        ensure!(features.len() == 6, "expect 6 feature maps");
        izip!(&features, encoder.channels())
            .enumerate()
            .try_for_each(|(index, (feature, &channels))| -> Result<_> {
                let width = wx >> (index + 1);
                ensure!(
                    feature.size() == vec![bs, channels as i64, width, width],
                    "incorrect shape {:?} at stage {}",
                    feature.size(),
                    index + 1
                );
                Ok(())
            })?;
        ensure!(encoded.size() == vec![bs, 16, 1, 1]);

        Ok(())
    }
}
