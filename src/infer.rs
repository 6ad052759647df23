use crate::{
    checkpoint::{CheckpointKey, CheckpointStore},
    common::*,
    config,
    model::{Generator, ModelState, TrainPhase},
    utils::{concat_horizontal, denormalize, list_images, load_image, merge_batch, normalize, save_image},
};

/// Number of batch strips joined side by side in one output image.
pub const STRIPS_PER_IMAGE: usize = 10;

/// Builds the model and restores the latest generator of the configured run.
pub fn load_generator(config: &config::Config) -> Result<(ModelState, Option<usize>)> {
    let mut model = ModelState::new(&config.model, config.train.device)?;
    let store = CheckpointStore::new(
        config.experiment.checkpoint_dir(),
        CheckpointKey {
            experiment_id: config.experiment.id,
            batch_size: config.train.batch_size.get(),
        },
    );
    let step = store.load_latest_generator(&mut model.generator_vs)?;
    model.set_phase(TrainPhase::Inference);
    Ok((model, step))
}

/// Loads the images of `source_dir` in path order, normalized to `[-1, 1]`,
/// in batches of at most `batch_size`.
fn load_source_batches(
    config: &config::Config,
    source_dir: &Path,
) -> Result<Vec<Tensor>> {
    let config::Model {
        image_width,
        input_channels,
        ..
    } = config.model;
    let batch_size = config.train.batch_size.get();
    let device = config.train.device;

    let paths = list_images(source_dir)?;
    ensure!(
        !paths.is_empty(),
        "no image found in '{}'",
        source_dir.display()
    );
    info!("{} source images", paths.len());

    paths
        .chunks(batch_size)
        .map(|chunk| -> Result<_> {
            let images: Vec<_> = chunk
                .iter()
                .map(|path| load_image(path, image_width, input_channels))
                .try_collect()?;
            Ok(normalize(&Tensor::stack(&images, 0)).to_device(device))
        })
        .try_collect()
}

/// Generates one vertical strip in `[0, 255]` per batch. Short batches are
/// padded with white up to `batch_size` images so that strips align.
fn generate_strips(
    batches: &[Tensor],
    batch_size: usize,
    mut generate: impl FnMut(&Tensor) -> Result<Tensor>,
) -> Result<Vec<Tensor>> {
    batches
        .iter()
        .map(|batch| -> Result<_> {
            let (bsize, _c, _h, width) = batch.size4()?;
            let output = generate(batch)?;
            let strip = merge_batch(&denormalize(&output))?.to_device(Device::Cpu);

            let missing = batch_size as i64 - bsize;
            let strip = if missing > 0 {
                let (channels, _h, _w) = strip.size3()?;
                let pad = Tensor::full(&[channels, missing * width, width], 255.0, FLOAT_CPU);
                Tensor::cat(&[strip, pad], 1)
            } else {
                strip
            };
            Ok(strip)
        })
        .try_collect()
}

/// Translates every image in `source_dir` and writes `inferred_<count>.png` files.
///
/// A single style id is used for all images. With several ids, one is
/// drawn at random per image.
pub fn infer(
    config: &config::Config,
    source_dir: &Path,
    output_dir: &Path,
    style_ids: &[usize],
) -> Result<Vec<PathBuf>> {
    ensure!(!style_ids.is_empty(), "at least one style id is required");
    let embedding_num = config.model.embedding_num;
    style_ids.iter().try_for_each(|&id| -> Result<_> {
        ensure!(
            id < embedding_num,
            "style id {} is out of range [0, {})",
            id,
            embedding_num
        );
        Ok(())
    })?;
    fs::create_dir_all(output_dir)?;

    let (mut model, _) = load_generator(config)?;
    let batches = load_source_batches(config, source_dir)?;

    let mut rng = rand::thread_rng();
    let strips = generate_strips(&batches, config.train.batch_size.get(), |batch| {
        let (bsize, _c, _h, _w) = batch.size4()?;
        let ids: Vec<i64> = (0..bsize)
            .map(|_| match style_ids {
                [id] => *id as i64,
                ids => *ids.choose(&mut rng).unwrap_or(&0) as i64,
            })
            .collect();
        let ids = Tensor::of_slice(&ids).to_device(batch.device());
        model.generate(batch, &ids)
    })?;

    strips
        .chunks(STRIPS_PER_IMAGE)
        .enumerate()
        .map(|(count, chunk)| -> Result<_> {
            let path = output_dir.join(format!("inferred_{:04}.png", count));
            save_image(&concat_horizontal(chunk)?, &path)?;
            info!("saved '{}'", path.display());
            Ok(path)
        })
        .try_collect()
}

/// Temporarily replaces every per-style parameter table of a generator with
/// rows interpolated between two styles. Row `k` of `steps + 1` rows has
/// weight `k / steps` on the second style. The original tables are restored
/// on drop.
pub struct StyleInterpolation<'a> {
    generator: &'a mut Generator,
    params: Vec<Tensor>,
    originals: Vec<Tensor>,
}

impl<'a> StyleInterpolation<'a> {
    pub fn new(generator: &'a mut Generator, between: [usize; 2], steps: usize) -> Result<Self> {
        ensure!(steps > 0, "interpolation steps must be positive");
        let params = generator.style_params();
        let [from, to] = between;

        let originals: Vec<_> = params
            .iter()
            .map(|param| -> Result<_> {
                let (num_rows, _) = param.size2()?;
                ensure!(
                    (from as i64) < num_rows && (to as i64) < num_rows,
                    "interpolated styles {:?} are out of range [0, {})",
                    between,
                    num_rows
                );
                Ok(param.detach().copy())
            })
            .try_collect()?;

        let mut params = params;
        tch::no_grad(|| {
            izip!(&mut params, &originals).for_each(|(param, original)| {
                let device = original.device();
                let alphas = (Tensor::arange(steps as i64 + 1, (Kind::Float, device))
                    / steps as f64)
                    .view([-1, 1]);
                let lhs = original.get(from as i64).unsqueeze(0);
                let rhs = original.get(to as i64).unsqueeze(0);
                let rows = &lhs * (alphas.ones_like() - &alphas) + &rhs * &alphas;
                param.set_data(&rows.to_kind(original.kind()));
            });
        });

        Ok(Self {
            generator,
            params,
            originals,
        })
    }

    pub fn generator(&mut self) -> &mut Generator {
        &mut *self.generator
    }
}

impl Drop for StyleInterpolation<'_> {
    fn drop(&mut self) {
        tch::no_grad(|| {
            izip!(&mut self.params, &self.originals)
                .for_each(|(param, original)| param.set_data(original));
        });
    }
}

/// Writes `frame_<a>_<b>_step_<k>.png` for each interpolation step `k` in `0..=steps`.
pub fn interpolate(
    config: &config::Config,
    source_dir: &Path,
    output_dir: &Path,
    between: [usize; 2],
    steps: usize,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;

    let (mut model, _) = load_generator(config)?;
    let batches = load_source_batches(config, source_dir)?;
    let batch_size = config.train.batch_size.get();
    let [from, to] = between;

    // the guard borrows the generator mutably, so generation runs through it
    let mut interpolation = StyleInterpolation::new(&mut model.generator, between, steps)?;

    let paths = (0..=steps)
        .map(|step| -> Result<_> {
            let generator = interpolation.generator();
            let strips = generate_strips(&batches, batch_size, |batch| {
                let (bsize, _c, _h, _w) = batch.size4()?;
                let ids = Tensor::full(&[bsize], step as i64, (Kind::Int64, batch.device()));
                let output = tch::no_grad(|| generator.forward_t(batch, &ids, false))?.output;
                Ok(output)
            })?;

            let path = output_dir.join(format!("frame_{:02}_{:02}_step_{:02}.png", from, to, step));
            save_image(&concat_horizontal(&strips)?, &path)?;
            info!("saved '{}'", path.display());
            Ok(path)
        })
        .try_collect()?;

    Ok(paths)
}

/// Writes the generator parameters of the latest checkpoint to `output_file`.
pub fn export(config: &config::Config, output_file: &Path) -> Result<usize> {
    let (model, step) = load_generator(config)?;
    let step = step.ok_or_else(|| format_err!("no checkpoint to export"))?;

    if let Some(parent) = output_file.parent() {
        fs::create_dir_all(parent)?;
    }
    model
        .generator_vs
        .save(output_file)
        .with_context(|| format!("unable to save '{}'", output_file.display()))?;
    info!("exported generator of step {} to '{}'", step, output_file.display());

    Ok(step)
}
