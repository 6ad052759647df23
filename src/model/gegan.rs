use super::{
    discriminator::{Discriminator, DiscriminatorInit},
    generator::{Generator, GeneratorInit},
    loss::{assemble_losses, LossOutput},
    misc::NormKind,
    perceptual::PerceptualLoss,
};
use crate::{common::*, config};

/// Which partition receives gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainPhase {
    Discriminator,
    Generator { freeze_encoder: bool },
    /// Nothing receives gradients.
    Inference,
}

/// Generator and discriminator together with their variable stores.
///
/// The generator store holds `encoder/…`, `embedding/…` and `decoder/…`.
/// The discriminator store holds the rest.
#[derive(Debug)]
pub struct ModelState {
    pub generator_vs: nn::VarStore,
    pub discriminator_vs: nn::VarStore,
    pub generator: Generator,
    pub discriminator: Discriminator,
    embedding_num: usize,
}

impl ModelState {
    pub fn new(config: &config::Model, device: Device) -> Result<Self> {
        let config::Model {
            image_width,
            input_channels,
            output_channels,
            generator_dim,
            discriminator_dim,
            embedding_num,
            embedding_dim,
            inst_norm,
        } = *config;

        let generator_vs = nn::VarStore::new(device);
        let discriminator_vs = nn::VarStore::new(device);

        let generator = GeneratorInit {
            input_channels,
            output_channels,
            generator_dim,
            embedding_num,
            embedding_dim,
            norm_kind: NormKind::from_inst_norm(inst_norm),
        }
        .build(generator_vs.root())?;

        // the discriminator judges generated images
        let discriminator = DiscriminatorInit {
            input_channels: output_channels,
            discriminator_dim,
            image_width,
            embedding_num,
        }
        .build(discriminator_vs.root())?;

        Ok(Self {
            generator_vs,
            discriminator_vs,
            generator,
            discriminator,
            embedding_num,
        })
    }

    pub fn device(&self) -> Device {
        self.generator_vs.device()
    }

    pub fn embedding_num(&self) -> usize {
        self.embedding_num
    }

    pub fn set_phase(&mut self, phase: TrainPhase) {
        match phase {
            TrainPhase::Discriminator => {
                self.generator_vs.freeze();
                self.discriminator_vs.unfreeze();
            }
            TrainPhase::Generator { freeze_encoder } => {
                self.discriminator_vs.freeze();
                self.generator_vs.unfreeze();
                if freeze_encoder {
                    self.generator.encoder().set_trainable(false);
                }
            }
            TrainPhase::Inference => {
                self.generator_vs.freeze();
                self.discriminator_vs.freeze();
            }
        }
    }

    pub fn losses(
        &mut self,
        perceptual: &dyn PerceptualLoss,
        penalties: &config::Loss,
        real: &Tensor,
        style_ids: &Tensor,
        train: bool,
    ) -> Result<LossOutput> {
        assemble_losses(
            &mut self.generator,
            &mut self.discriminator,
            perceptual,
            penalties,
            real,
            style_ids,
            self.embedding_num,
            train,
        )
    }

    /// Translates `source` in `[-1, 1]` to the styles in `style_ids` in evaluation mode.
    pub fn generate(&mut self, source: &Tensor, style_ids: &Tensor) -> Result<Tensor> {
        let generator = &mut self.generator;
        let output = tch::no_grad(|| generator.forward_t(source, style_ids, false))?.output;
        Ok(output)
    }
}
