use super::{
    discriminator::{Discriminator, DiscriminatorOutput},
    embedding::validate_ids,
    generator::{Generator, GeneratorOutput},
    perceptual::PerceptualLoss,
};
use crate::{common::*, config, utils::denormalize};

/// Maps each style id to the other style. Only defined for two styles.
pub fn complement_ids(ids: &Tensor, embedding_num: usize) -> Result<Tensor> {
    ensure!(
        embedding_num == 2,
        "complement ids are only defined for 2 styles, but get {}",
        embedding_num
    );
    validate_ids(ids, ids.size1()?, 2)?;
    Ok(ids.ones_like() - ids)
}

/// `d_loss = d_loss_real + d_loss_fake_s + d_loss_fake_c + category_loss / 2`
pub fn discriminator_total<T>(d_loss_real: T, d_loss_fake_s: T, d_loss_fake_c: T, category_loss: T) -> T
where
    T: Add<Output = T> + Div<f64, Output = T>,
{
    d_loss_real + d_loss_fake_s + d_loss_fake_c + category_loss / 2.0
}

/// `g_loss = cheat + l1 + perceptual + const + lcategory * (fake_s_category + fake_c_category)`
#[allow(clippy::too_many_arguments)]
pub fn generator_total<T>(
    cheat_loss: T,
    l1_loss: T,
    perceptual_loss: T,
    const_loss: T,
    fake_s_category_loss: T,
    fake_c_category_loss: T,
    lcategory_penalty: f64,
) -> T
where
    T: Add<Output = T> + Mul<f64, Output = T>,
{
    cheat_loss
        + l1_loss
        + perceptual_loss
        + const_loss
        + (fake_s_category_loss + fake_c_category_loss) * lcategory_penalty
}

fn bce(logits: &Tensor, target: &Tensor) -> Tensor {
    logits.binary_cross_entropy_with_logits::<Tensor>(target, None, None, Reduction::Mean)
}

#[derive(Debug)]
pub struct LossBundle {
    pub d_loss: Tensor,
    pub g_loss: Tensor,
    pub const_loss: Tensor,
    pub l1_loss: Tensor,
    pub category_loss: Tensor,
    pub cheat_loss: Tensor,
    pub perceptual_loss: Tensor,
    pub d_loss_real: Tensor,
    pub d_loss_fake_s: Tensor,
    pub d_loss_fake_c: Tensor,
    pub fake_s_category_loss: Tensor,
    pub fake_c_category_loss: Tensor,
}

impl LossBundle {
    pub fn to_log(&self) -> LossLog {
        let value = |tensor: &Tensor| tensor.double_value(&[]);

        LossLog {
            d_loss: value(&self.d_loss),
            g_loss: value(&self.g_loss),
            const_loss: value(&self.const_loss),
            l1_loss: value(&self.l1_loss),
            category_loss: value(&self.category_loss),
            cheat_loss: value(&self.cheat_loss),
            perceptual_loss: value(&self.perceptual_loss),
            d_loss_real: value(&self.d_loss_real),
            d_loss_fake_s: value(&self.d_loss_fake_s),
            d_loss_fake_c: value(&self.d_loss_fake_c),
            fake_s_category_loss: value(&self.fake_s_category_loss),
            fake_c_category_loss: value(&self.fake_c_category_loss),
        }
    }
}

/// Detached scalar values of a [LossBundle].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossLog {
    pub d_loss: f64,
    pub g_loss: f64,
    pub const_loss: f64,
    pub l1_loss: f64,
    pub category_loss: f64,
    pub cheat_loss: f64,
    pub perceptual_loss: f64,
    pub d_loss_real: f64,
    pub d_loss_fake_s: f64,
    pub d_loss_fake_c: f64,
    pub fake_s_category_loss: f64,
    pub fake_c_category_loss: f64,
}

impl LossLog {
    pub fn is_finite(&self) -> bool {
        self.scalars().iter().all(|(_, value)| value.is_finite())
    }

    /// Tagged values in the order they are written to event files.
    pub fn scalars(&self) -> [(&'static str, f64); 12] {
        [
            ("d_loss", self.d_loss),
            ("g_loss", self.g_loss),
            ("const_loss", self.const_loss),
            ("l1_loss", self.l1_loss),
            ("category_loss", self.category_loss),
            ("cheat_loss", self.cheat_loss),
            ("perceptual_loss", self.perceptual_loss),
            ("d_loss_real", self.d_loss_real),
            ("d_loss_fake_s", self.d_loss_fake_s),
            ("d_loss_fake_c", self.d_loss_fake_c),
            ("fake_s_category_loss", self.fake_s_category_loss),
            ("fake_c_category_loss", self.fake_c_category_loss),
        ]
    }
}

#[derive(Debug)]
pub struct LossOutput {
    pub losses: LossBundle,
    pub fake_s: Tensor,
    pub fake_c: Tensor,
    pub encoded_real: Tensor,
}

/// Runs the generator on both styles and the shared discriminator on real,
/// fake_s and fake_c, and combines the objectives.
///
/// `real` is in `[-1, 1]` and `style_ids` holds one id per batch element.
#[allow(clippy::too_many_arguments)]
pub fn assemble_losses(
    generator: &mut Generator,
    discriminator: &mut Discriminator,
    perceptual: &dyn PerceptualLoss,
    penalties: &config::Loss,
    real: &Tensor,
    style_ids: &Tensor,
    embedding_num: usize,
    train: bool,
) -> Result<LossOutput> {
    let config::Loss {
        l1_penalty,
        lconst_penalty,
        lperceptual_penalty,
        lcategory_penalty,
    } = *penalties;
    let (bsize, _c, _h, _w) = real.size4()?;
    validate_ids(style_ids, bsize, embedding_num as i64)?;
    let complement = complement_ids(style_ids, embedding_num)?;

    // generator branches
    let GeneratorOutput {
        output: fake_s,
        encoded: encoded_real,
    } = generator.forward_t(real, style_ids, train)?;
    let GeneratorOutput { output: fake_c, .. } = generator.forward_t(real, &complement, train)?;
    let encoded_fake_s = generator.encode(&fake_s, train)?;
    let encoded_fake_c = generator.encode(&fake_c, train)?;

    let const_loss = (encoded_real.mse_loss(&encoded_fake_s, Reduction::Mean)
        + encoded_real.mse_loss(&encoded_fake_c, Reduction::Mean))
        * lconst_penalty;

    // shared discriminator
    let DiscriminatorOutput {
        logits: real_logits,
        category_logits: real_category_logits,
        ..
    } = discriminator.forward_t(real, train)?;
    let DiscriminatorOutput {
        logits: fake_s_logits,
        category_logits: fake_s_category_logits,
        ..
    } = discriminator.forward_t(&fake_s, train)?;
    let DiscriminatorOutput {
        logits: fake_c_logits,
        category_logits: fake_c_category_logits,
        ..
    } = discriminator.forward_t(&fake_c, train)?;

    let num_classes = embedding_num as i64;
    let style_onehot = style_ids.one_hot(num_classes).to_kind(Kind::Float);
    let complement_onehot = complement.one_hot(num_classes).to_kind(Kind::Float);

    let real_category_loss = bce(&real_category_logits, &style_onehot);
    let fake_s_category_loss = bce(&fake_s_category_logits, &style_onehot);
    let fake_c_category_loss = bce(&fake_c_category_logits, &complement_onehot);
    let category_loss =
        (&real_category_loss + &fake_s_category_loss + &fake_c_category_loss) * lcategory_penalty;

    let d_loss_real = bce(&real_logits, &real_logits.ones_like());
    let d_loss_fake_s = bce(&fake_s_logits, &fake_s_logits.zeros_like());
    let d_loss_fake_c = bce(&fake_c_logits, &fake_c_logits.zeros_like());

    let cheat_loss = bce(&fake_s_logits, &fake_s_logits.ones_like())
        + bce(&fake_c_logits, &fake_c_logits.ones_like());

    let l1_loss = (&fake_s - real).abs().mean(Kind::Float) * l1_penalty;

    let perceptual_loss =
        perceptual.forward(&denormalize(&fake_c), &denormalize(real))? * lperceptual_penalty;

    let d_loss = discriminator_total(
        d_loss_real.shallow_clone(),
        d_loss_fake_s.shallow_clone(),
        d_loss_fake_c.shallow_clone(),
        category_loss.shallow_clone(),
    );
    let g_loss = generator_total(
        cheat_loss.shallow_clone(),
        l1_loss.shallow_clone(),
        perceptual_loss.shallow_clone(),
        const_loss.shallow_clone(),
        fake_s_category_loss.shallow_clone(),
        fake_c_category_loss.shallow_clone(),
        lcategory_penalty,
    );

    Ok(LossOutput {
        losses: LossBundle {
            d_loss,
            g_loss,
            const_loss,
            l1_loss,
            category_loss,
            cheat_loss,
            perceptual_loss,
            d_loss_real,
            d_loss_fake_s,
            d_loss_fake_c,
            fake_s_category_loss,
            fake_c_category_loss,
        },
        fake_s,
        fake_c,
        encoded_real,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiscriminatorInit, GeneratorInit, NormKind};
    use approx::assert_abs_diff_eq;

    struct PixelDistance;

    impl PerceptualLoss for PixelDistance {
        fn forward(&self, lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
            Ok((lhs - rhs).abs().mean(Kind::Float))
        }
    }

    #[test]
    fn complement_ids_test() -> Result<()> {
        let mut rng = rand::thread_rng();

        for _ in 0..10 {
            let bsize = rng.gen_range(1..=16);
            let ids: Vec<i64> = (0..bsize).map(|_| rng.gen_range(0..2)).collect();
            let ids = Tensor::of_slice(&ids);
            let complement = complement_ids(&ids, 2)?;
            ensure!(bool::from((&ids + &complement).eq(1).all()));
        }

        ensure!(complement_ids(&Tensor::of_slice(&[0i64, 1]), 3).is_err());
        ensure!(complement_ids(&Tensor::of_slice(&[0i64, 2]), 2).is_err());

        Ok(())
    }

    #[test]
    fn total_decomposition_test() {
        assert_abs_diff_eq!(discriminator_total(0.5, 0.3, 0.2, 0.4), 1.2, epsilon = 1e-12);
        assert_abs_diff_eq!(
            generator_total(1.0, 2.0, 0.5, 0.25, 0.1, 0.2, 2.0),
            4.35,
            epsilon = 1e-12
        );

        let tensor_total = discriminator_total(
            Tensor::from(0.5),
            Tensor::from(0.3),
            Tensor::from(0.2),
            Tensor::from(0.4),
        );
        assert_abs_diff_eq!(tensor_total.double_value(&[]), 1.2, epsilon = 1e-6);
    }

    #[test]
    fn shared_weights_test() -> Result<()> {
        let generator_vs = nn::VarStore::new(Device::Cpu);
        let discriminator_vs = nn::VarStore::new(Device::Cpu);

        let mut generator = GeneratorInit {
            input_channels: 1,
            output_channels: 1,
            generator_dim: 2,
            embedding_num: 2,
            embedding_dim: 4,
            norm_kind: NormKind::BatchNorm,
        }
        .build(generator_vs.root())?;
        let mut discriminator = DiscriminatorInit {
            input_channels: 1,
            discriminator_dim: 4,
            image_width: 64,
            embedding_num: 2,
        }
        .build(discriminator_vs.root())?;

        let num_generator_vars = generator_vs.len();
        let num_discriminator_vars = discriminator_vs.len();
        let discriminator_ptrs: Vec<_> = discriminator_vs
            .trainable_variables()
            .iter()
            .map(|var| var.data_ptr())
            .collect();

        let real = Tensor::rand(&[2, 1, 64, 64], FLOAT_CPU) * 2.0 - 1.0;
        let ids = Tensor::of_slice(&[0i64, 1]);

        for _ in 0..2 {
            let LossOutput { losses, fake_s, fake_c, .. } = assemble_losses(
                &mut generator,
                &mut discriminator,
                &PixelDistance,
                &config::Loss::default(),
                &real,
                &ids,
                2,
                true,
            )?;
            ensure!(losses.to_log().is_finite(), "non-finite loss");
            ensure!(fake_s.size() == real.size() && fake_c.size() == real.size());
        }

        ensure!(generator_vs.len() == num_generator_vars, "new generator variables are created");
        ensure!(
            discriminator_vs.len() == num_discriminator_vars,
            "new discriminator variables are created"
        );
        let ptrs_after: Vec<_> = discriminator_vs
            .trainable_variables()
            .iter()
            .map(|var| var.data_ptr())
            .collect();
        ensure!(discriminator_ptrs == ptrs_after, "discriminator storage is replaced");

        Ok(())
    }
}
