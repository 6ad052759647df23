use crate::{
    checkpoint::{CheckpointKey, CheckpointStore},
    common::*,
    config, message as msg,
    model::{LossLog, LossOutput, ModelState, PerceptualLoss, TrainPhase, VggPerceptualLossInit},
    utils::normalize,
};

/// Adam momentum terms of both partitions.
pub const ADAM_BETA1: f64 = 0.5;
pub const ADAM_BETA2: f64 = 0.999;

#[derive(Debug)]
pub struct StepOutput {
    /// Losses of the second generator update.
    pub losses: LossLog,
    /// Input batch in `[-1, 1]`.
    pub real: Tensor,
    pub fake_s: Tensor,
    pub fake_c: Tensor,
}

/// Runs one discriminator update followed by two generator updates per batch.
pub struct Trainer {
    model: ModelState,
    perceptual: Box<dyn PerceptualLoss>,
    penalties: config::Loss,
    freeze_encoder: bool,
}

impl Trainer {
    pub fn new(
        model: ModelState,
        perceptual: Box<dyn PerceptualLoss>,
        penalties: config::Loss,
        freeze_encoder: bool,
    ) -> Self {
        Self {
            model,
            perceptual,
            penalties,
            freeze_encoder,
        }
    }

    pub fn model(&self) -> &ModelState {
        &self.model
    }

    /// `images` are in `[0, 255]`. The callbacks apply one optimizer step on
    /// the discriminator and generator partitions respectively.
    pub fn step(
        &mut self,
        images: &Tensor,
        style_ids: &Tensor,
        mut update_discriminator: impl FnMut(&Tensor),
        mut update_generator: impl FnMut(&Tensor),
    ) -> Result<StepOutput> {
        let Self {
            ref mut model,
            ref perceptual,
            ref penalties,
            freeze_encoder,
        } = *self;
        let real = normalize(images);

        // discriminator step
        model.set_phase(TrainPhase::Discriminator);
        let LossOutput { losses, .. } =
            model.losses(perceptual.as_ref(), penalties, &real, style_ids, true)?;
        update_discriminator(&losses.d_loss);

        // generator steps, the second one harvests the logs
        model.set_phase(TrainPhase::Generator { freeze_encoder });
        let LossOutput { losses, .. } =
            model.losses(perceptual.as_ref(), penalties, &real, style_ids, true)?;
        update_generator(&losses.g_loss);

        let LossOutput {
            losses,
            fake_s,
            fake_c,
            ..
        } = model.losses(perceptual.as_ref(), penalties, &real, style_ids, true)?;
        update_generator(&losses.g_loss);

        Ok(StepOutput {
            losses: losses.to_log(),
            real,
            fake_s: fake_s.detach(),
            fake_c: fake_c.detach(),
        })
    }
}

pub fn training_worker(
    config: Arc<config::Config>,
    mut train_rx: mpsc::Receiver<msg::TrainingMessage>,
    log_tx: mpsc::Sender<msg::LogMessage>,
) -> Result<()> {
    let config::Training {
        batch_size,
        device,
        learning_rate,
        max_steps,
        resume,
        flip_labels,
        freeze_encoder,
        sample_steps,
        checkpoint_steps,
    } = config.train;
    let learning_rate = learning_rate.raw();

    if flip_labels {
        warn!("flip_labels is set but has no effect on training");
    }

    let store = CheckpointStore::new(
        config.experiment.checkpoint_dir(),
        CheckpointKey {
            experiment_id: config.experiment.id,
            batch_size: batch_size.get(),
        },
    );

    // initialize model
    let mut model = ModelState::new(&config.model, device)?;
    let init_step = if resume {
        match store.load_latest(&mut model)? {
            Some(step) => step + 1,
            None => {
                info!("start training from scratch");
                0
            }
        }
    } else {
        0
    };

    let perceptual = {
        let config::Perceptual {
            ref weights_file,
            ref layers,
        } = config.perceptual;
        VggPerceptualLossInit {
            layers: layers.clone(),
            weights_file: weights_file.clone(),
        }
        .build(device)?
    };

    let mut generator_opt =
        nn::adam(ADAM_BETA1, ADAM_BETA2, 0.).build(&model.generator_vs, learning_rate)?;
    let mut discriminator_opt =
        nn::adam(ADAM_BETA1, ADAM_BETA2, 0.).build(&model.discriminator_vs, learning_rate)?;

    let mut trainer = Trainer::new(model, Box::new(perceptual), config.loss, freeze_encoder);
    let mut last_saved_step = None;

    for step in init_step..max_steps {
        let msg::TrainingMessage {
            images,
            style_ids,
            batch_index,
        } = match train_rx.blocking_recv() {
            Some(msg) => msg,
            None => bail!(
                "training data stream closed at step {} before max_steps {}",
                step,
                max_steps
            ),
        };
        debug!("step {} uses batch {}", step, batch_index);

        let StepOutput {
            losses,
            real,
            fake_s,
            fake_c,
        } = trainer.step(
            &images,
            &style_ids,
            |loss| discriminator_opt.backward_step(loss),
            |loss| generator_opt.backward_step(loss),
        )?;

        log_tx
            .blocking_send(msg::LogMessage::Loss {
                step,
                learning_rate,
                losses,
            })
            .map_err(|_| format_err!("logging worker stopped at step {}", step))?;

        if step % sample_steps.get() == 0 {
            info!(
                "step: {}\tD_loss: {:.5}\tG_loss: {:.5}\tperceptual_loss: {:.5}",
                step, losses.d_loss, losses.g_loss, losses.perceptual_loss
            );

            log_tx
                .blocking_send(msg::LogMessage::Sample {
                    step,
                    real: real.to_device(Device::Cpu),
                    fake_s: fake_s.to_device(Device::Cpu),
                    fake_c: fake_c.to_device(Device::Cpu),
                })
                .map_err(|_| format_err!("logging worker stopped at step {}", step))?;
        }

        if step % checkpoint_steps.get() == 0 {
            store.save(trainer.model(), step)?;
            last_saved_step = Some(step);
        }
    }

    // every step up to max_steps has been trained here
    if max_steps > init_step {
        let last_step = max_steps - 1;
        if last_saved_step != Some(last_step) {
            store.save(trainer.model(), last_step)?;
        }
    }

    info!("training finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VggPerceptualLoss;

    fn build_trainer(freeze_encoder: bool) -> Result<Trainer> {
        let model = ModelState::new(
            &config::Model {
                image_width: 64,
                input_channels: 1,
                output_channels: 1,
                generator_dim: 2,
                discriminator_dim: 4,
                embedding_num: 2,
                embedding_dim: 4,
                inst_norm: true,
            },
            Device::Cpu,
        )?;
        let perceptual: VggPerceptualLoss = VggPerceptualLossInit {
            layers: vec![3],
            weights_file: None,
        }
        .build(Device::Cpu)?;

        Ok(Trainer::new(
            model,
            Box::new(perceptual),
            config::Loss::default(),
            freeze_encoder,
        ))
    }

    fn snapshot(vs: &nn::VarStore, prefix: &str) -> Vec<Tensor> {
        vs.variables()
            .into_iter()
            .filter(|(name, _)| name.starts_with(prefix) && !name.contains("running_"))
            .sorted_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs))
            .map(|(_, var)| var.detach().copy())
            .collect()
    }

    fn changed(before: &[Tensor], after: &[Tensor]) -> bool {
        izip!(before, after).any(|(lhs, rhs)| !lhs.equal(rhs))
    }

    #[test]
    fn training_step_test() -> Result<()> {
        let mut trainer = build_trainer(false)?;
        let mut generator_opt =
            nn::adam(ADAM_BETA1, ADAM_BETA2, 0.).build(&trainer.model().generator_vs, 1e-3)?;
        let mut discriminator_opt =
            nn::adam(ADAM_BETA1, ADAM_BETA2, 0.).build(&trainer.model().discriminator_vs, 1e-3)?;

        let generator_before = snapshot(&trainer.model().generator_vs, "");
        let discriminator_before = snapshot(&trainer.model().discriminator_vs, "");

        let images = (Tensor::rand(&[2, 1, 64, 64], FLOAT_CPU) * 255.0).round();
        let style_ids = Tensor::of_slice(&[0i64, 1]);

        let mut num_d_updates = 0;
        let mut num_g_updates = 0;
        let StepOutput {
            losses,
            real,
            fake_s,
            fake_c,
        } = trainer.step(
            &images,
            &style_ids,
            |loss| {
                num_d_updates += 1;
                discriminator_opt.backward_step(loss);
            },
            |loss| {
                num_g_updates += 1;
                generator_opt.backward_step(loss);
            },
        )?;

        ensure!(num_d_updates == 1 && num_g_updates == 2);
        ensure!(losses.is_finite(), "non-finite losses {:?}", losses);
        ensure!(real.size() == vec![2, 1, 64, 64]);
        ensure!(fake_s.size() == real.size() && fake_c.size() == real.size());

        ensure!(changed(&generator_before, &snapshot(&trainer.model().generator_vs, "")));
        ensure!(changed(
            &discriminator_before,
            &snapshot(&trainer.model().discriminator_vs, "")
        ));

        Ok(())
    }

    #[test]
    fn freeze_encoder_test() -> Result<()> {
        let mut trainer = build_trainer(true)?;
        let mut generator_opt =
            nn::adam(ADAM_BETA1, ADAM_BETA2, 0.).build(&trainer.model().generator_vs, 1e-3)?;
        let mut discriminator_opt =
            nn::adam(ADAM_BETA1, ADAM_BETA2, 0.).build(&trainer.model().discriminator_vs, 1e-3)?;

        let encoder_before = snapshot(&trainer.model().generator_vs, "encoder");
        let decoder_before = snapshot(&trainer.model().generator_vs, "decoder");

        let images = (Tensor::rand(&[2, 1, 64, 64], FLOAT_CPU) * 255.0).round();
        trainer.step(
            &images,
            &Tensor::of_slice(&[1i64, 0]),
            |loss| discriminator_opt.backward_step(loss),
            |loss| generator_opt.backward_step(loss),
        )?;

        let encoder_after = snapshot(&trainer.model().generator_vs, "encoder");
        ensure!(!changed(&encoder_before, &encoder_after), "encoder must stay fixed");
        ensure!(changed(
            &decoder_before,
            &snapshot(&trainer.model().generator_vs, "decoder")
        ));

        Ok(())
    }

    /// Runs the worker over `num_batches` queued batches and collects the
    /// steps of the loss and sample messages.
    fn run_worker(
        config: &config::Config,
        num_batches: usize,
    ) -> Result<(Result<()>, Vec<usize>, Vec<usize>)> {
        let (train_tx, train_rx) = mpsc::channel(num_batches.max(1));
        (0..num_batches).try_for_each(|batch_index| -> Result<_> {
            let msg = msg::TrainingMessage {
                images: (Tensor::rand(&[2, 1, 64, 64], FLOAT_CPU) * 255.0).round(),
                style_ids: Tensor::of_slice(&[0i64, 1]),
                batch_index,
            };
            train_tx
                .try_send(msg)
                .map_err(|_| format_err!("training channel is full"))?;
            Ok(())
        })?;
        drop(train_tx);

        let (log_tx, mut log_rx) = mpsc::channel(256);
        let result = training_worker(Arc::new(config.clone()), train_rx, log_tx);

        let mut loss_steps = vec![];
        let mut sample_steps = vec![];
        while let Some(msg) = log_rx.blocking_recv() {
            match msg {
                msg::LogMessage::Loss { step, losses, .. } => {
                    ensure!(losses.is_finite(), "non-finite losses {:?}", losses);
                    loss_steps.push(step);
                }
                msg::LogMessage::Sample {
                    step, real, fake_s, ..
                } => {
                    ensure!(real.device() == Device::Cpu);
                    ensure!(fake_s.size() == vec![2, 1, 64, 64]);
                    sample_steps.push(step);
                }
            }
        }

        Ok((result, loss_steps, sample_steps))
    }

    fn store_of(config: &config::Config) -> CheckpointStore {
        CheckpointStore::new(
            config.experiment.checkpoint_dir(),
            CheckpointKey {
                experiment_id: config.experiment.id,
                batch_size: config.train.batch_size.get(),
            },
        )
    }

    #[test]
    fn training_worker_schedule_test() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("gegan-worker-{}", std::process::id()));
        let mut config = config::tests::tiny_config(&dir);
        let store = store_of(&config);

        // resume without checkpoint starts from scratch
        let (result, loss_steps, sample_steps) = run_worker(&config, 5)?;
        result?;
        ensure!(loss_steps == vec![0, 1, 2, 3, 4]);
        ensure!(sample_steps == vec![0, 2, 4]);
        ensure!(store.steps()? == vec![0, 2, 4]);

        // resume continues after the restored step up to the new max_steps
        config.train.max_steps = 7;
        let (result, loss_steps, sample_steps) = run_worker(&config, 2)?;
        result?;
        ensure!(loss_steps == vec![5, 6]);
        ensure!(sample_steps == vec![6]);
        ensure!(store.steps()? == vec![2, 4, 6]);

        // nothing is left to train
        let (result, loss_steps, _) = run_worker(&config, 0)?;
        result?;
        ensure!(loss_steps.is_empty());
        ensure!(store.latest()? == Some(6));

        // the final step is saved even off the checkpoint interval
        config.train.max_steps = 10;
        let (result, loss_steps, _) = run_worker(&config, 3)?;
        result?;
        ensure!(loss_steps == vec![7, 8, 9]);
        ensure!(store.steps()? == vec![6, 8, 9]);

        // a fresh run in the same directory becomes the latest checkpoint
        config.train.resume = false;
        config.train.max_steps = 1;
        let (result, loss_steps, _) = run_worker(&config, 1)?;
        result?;
        ensure!(loss_steps == vec![0]);
        ensure!(store.latest()? == Some(0));

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn training_worker_stream_closed_test() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("gegan-worker-closed-{}", std::process::id()));
        let config = config::tests::tiny_config(&dir);
        let store = store_of(&config);

        // the stream ends after 3 of 5 steps
        let (result, loss_steps, _) = run_worker(&config, 3)?;
        ensure!(result.is_err(), "a closed stream must fail the worker");
        ensure!(loss_steps == vec![0, 1, 2]);
        ensure!(store.steps()? == vec![0, 2], "no checkpoint is saved for untrained steps");
        ensure!(!store.dir().join("generator_00000004.ckpt").exists());

        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
