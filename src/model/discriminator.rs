use super::{
    batch_norm::{BatchNorm, BatchNormInit},
    conv::{Conv2D, Conv2DInit, WEIGHT_STDDEV},
    misc::leaky_relu,
};
use crate::common::*;

#[derive(Debug, Clone)]
pub struct DiscriminatorInit {
    pub input_channels: usize,
    pub discriminator_dim: usize,
    pub image_width: usize,
    pub embedding_num: usize,
}

impl DiscriminatorInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Discriminator> {
        let path = path.borrow();
        let Self {
            input_channels,
            discriminator_dim: dim,
            image_width,
            embedding_num,
        } = self;
        ensure!(
            image_width % 8 == 0 && image_width > 0,
            "image_width must be a positive multiple of 8"
        );
        ensure!(embedding_num > 0, "embedding_num must be positive");

        let first_conv = Conv2DInit::down_sample().build(path / "h0_conv", input_channels, dim)?;

        let stage_shapes = [(dim, dim * 2, 2), (dim * 2, dim * 4, 2), (dim * 4, dim * 8, 1)];
        let stages: Vec<_> = izip!(1.., stage_shapes)
            .map(|(index, (in_c, out_c, stride))| -> Result<_> {
                let conv = Conv2DInit {
                    stride,
                    ..Conv2DInit::new(5)
                }
                .build(path / format!("h{}_conv", index), in_c, out_c)?;
                let bn = BatchNormInit::default().build(path / format!("bn_{}", index), out_c);
                Ok((conv, bn))
            })
            .try_collect()?;

        let flat_dim = {
            let last_width = image_width / 8;
            (dim * 8 * last_width * last_width) as i64
        };
        let binary_fc = nn::linear(path / "fc1", flat_dim, 1, linear_config());
        let category_fc = nn::linear(
            path / "fc2",
            flat_dim,
            embedding_num as i64,
            linear_config(),
        );

        Ok(Discriminator {
            first_conv,
            stages,
            binary_fc,
            category_fc,
        })
    }
}

fn linear_config() -> nn::LinearConfig {
    nn::LinearConfig {
        ws_init: nn::Init::Randn {
            mean: 0.0,
            stdev: WEIGHT_STDDEV,
        },
        ..Default::default()
    }
}

#[derive(Debug)]
pub struct DiscriminatorOutput {
    /// Real/fake probability with shape `[batch, 1]`.
    pub probability: Tensor,
    /// Real/fake logit with shape `[batch, 1]`.
    pub logits: Tensor,
    /// Style category logits with shape `[batch, embedding_num]`.
    pub category_logits: Tensor,
}

#[derive(Debug)]
pub struct Discriminator {
    first_conv: Conv2D,
    stages: Vec<(Conv2D, BatchNorm)>,
    binary_fc: nn::Linear,
    category_fc: nn::Linear,
}

impl Discriminator {
    pub fn forward_t(&mut self, input: &Tensor, train: bool) -> Result<DiscriminatorOutput> {
        let Self {
            ref first_conv,
            ref mut stages,
            ref binary_fc,
            ref category_fc,
        } = *self;

        let xs = leaky_relu(&first_conv.forward(input));
        let xs = stages
            .iter_mut()
            .try_fold(xs, |xs, (conv, bn)| -> Result<_> {
                let xs = bn.forward_t(&conv.forward(&xs), train)?;
                Ok(leaky_relu(&xs))
            })?;

        let bsize = xs.size()[0];
        let flat = xs.view([bsize, -1]);
        let logits = flat.apply(binary_fc);
        let category_logits = flat.apply(category_fc);

        Ok(DiscriminatorOutput {
            probability: logits.sigmoid(),
            logits,
            category_logits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminator_test() -> Result<()> {
        let bs = 2;
        let cx = 3;
        let wx = 64;

        let vs = nn::VarStore::new(Device::Cpu);
        let mut discriminator = DiscriminatorInit {
            input_channels: cx,
            discriminator_dim: 4,
            image_width: wx,
            embedding_num: 2,
        }
        .build(&vs.root() / "discriminator")?;

        let input = Tensor::rand(&[bs as i64, cx as i64, wx as i64, wx as i64], FLOAT_CPU);
        let DiscriminatorOutput {
            probability,
            logits,
            category_logits,
        } = discriminator.forward_t(&input, true)?;

        ensure!(logits.size() == vec![bs, 1], "incorrect logits shape");
        ensure!(probability.size() == vec![bs, 1], "incorrect probability shape");
        ensure!(category_logits.size() == vec![bs, 2], "incorrect category shape");
        ensure!(bool::from(probability.ge(0.0).all()) && bool::from(probability.le(1.0).all()));

        Ok(())
    }
}
