use crate::{common::*, model::ModelState};
use std::fmt;

pub const MAX_CHECKPOINTS_TO_KEEP: usize = 3;
const GENERATOR_PREFIX: &str = "generator_";
const DISCRIMINATOR_PREFIX: &str = "discriminator_";
const CHECKPOINT_EXT: &str = "ckpt";
const MANIFEST_FILE: &str = "checkpoint.json";

/// Identifies the checkpoint directory of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    pub experiment_id: usize,
    pub batch_size: usize,
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "experiment_{}_batch_{}",
            self.experiment_id, self.batch_size
        )
    }
}

/// Steps of the saved checkpoints, oldest save first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    steps: Vec<usize>,
}

/// Generator and discriminator parameter files saved side by side and
/// named by training step.
///
/// Saves are recorded in order in `checkpoint.json`. The latest checkpoint
/// is the last one saved, which is not necessarily the highest step.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    max_to_keep: usize,
}

impl CheckpointStore {
    pub fn new(checkpoint_dir: impl AsRef<Path>, key: CheckpointKey) -> Self {
        Self {
            dir: checkpoint_dir.as_ref().join(key.to_string()),
            max_to_keep: MAX_CHECKPOINTS_TO_KEEP,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn generator_path(&self, step: usize) -> PathBuf {
        self.dir
            .join(format!("{}{:08}.{}", GENERATOR_PREFIX, step, CHECKPOINT_EXT))
    }

    fn discriminator_path(&self, step: usize) -> PathBuf {
        self.dir
            .join(format!("{}{:08}.{}", DISCRIMINATOR_PREFIX, step, CHECKPOINT_EXT))
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    fn read_manifest(&self) -> Result<Manifest> {
        let path = self.manifest_path();
        if !path.is_file() {
            return Ok(Manifest::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("unable to read '{}'", path.display()))?;
        let manifest = serde_json::from_str(&text)
            .with_context(|| format!("invalid checkpoint manifest '{}'", path.display()))?;
        Ok(manifest)
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let path = self.manifest_path();
        let tmp_path = self.dir.join(format!("{}.tmp", MANIFEST_FILE));
        fs::write(&tmp_path, serde_json::to_string_pretty(manifest)?)?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("unable to write '{}'", path.display()))?;
        Ok(())
    }

    /// Steps of complete checkpoints in save order, oldest first.
    pub fn steps(&self) -> Result<Vec<usize>> {
        let steps = self
            .read_manifest()?
            .steps
            .into_iter()
            .filter(|&step| {
                self.generator_path(step).is_file() && self.discriminator_path(step).is_file()
            })
            .collect();
        Ok(steps)
    }

    /// Step of the most recently saved checkpoint.
    pub fn latest(&self) -> Result<Option<usize>> {
        Ok(self.steps()?.last().copied())
    }

    pub fn save(&self, model: &ModelState, step: usize) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let generator_path = self.generator_path(step);
        model
            .generator_vs
            .save(&generator_path)
            .with_context(|| format!("unable to save '{}'", generator_path.display()))?;

        let discriminator_path = self.discriminator_path(step);
        model
            .discriminator_vs
            .save(&discriminator_path)
            .with_context(|| format!("unable to save '{}'", discriminator_path.display()))?;

        // move the step to the end if it was saved before
        let mut manifest = self.read_manifest()?;
        manifest.steps.retain(|&saved| saved != step);
        manifest.steps.push(step);

        let num_removed = manifest.steps.len().saturating_sub(self.max_to_keep);
        let removed: Vec<_> = manifest.steps.drain(..num_removed).collect();
        self.write_manifest(&manifest)?;
        info!("checkpoint of step {} saved to '{}'", step, self.dir.display());

        removed.into_iter().try_for_each(|step| -> Result<_> {
            [self.generator_path(step), self.discriminator_path(step)]
                .iter()
                .filter(|path| path.is_file())
                .try_for_each(fs::remove_file)?;
            debug!("removed checkpoint of step {}", step);
            Ok(())
        })
    }

    /// Restores both partitions from the latest checkpoint. Returns its step,
    /// or `None` if no checkpoint is found.
    pub fn load_latest(&self, model: &mut ModelState) -> Result<Option<usize>> {
        let step = match self.latest_or_warn()? {
            Some(step) => step,
            None => return Ok(None),
        };

        model.generator_vs.load(self.generator_path(step))?;
        model.discriminator_vs.load(self.discriminator_path(step))?;
        info!("restored checkpoint of step {} from '{}'", step, self.dir.display());

        Ok(Some(step))
    }

    /// Restores only the generator partition from the latest checkpoint.
    pub fn load_latest_generator(&self, generator_vs: &mut nn::VarStore) -> Result<Option<usize>> {
        let step = match self.latest_or_warn()? {
            Some(step) => step,
            None => return Ok(None),
        };

        generator_vs.load(self.generator_path(step))?;
        info!("restored generator of step {} from '{}'", step, self.dir.display());

        Ok(Some(step))
    }

    fn latest_or_warn(&self) -> Result<Option<usize>> {
        let latest = self.latest()?;
        if latest.is_none() {
            warn!("no checkpoint found in '{}'", self.dir.display());
        }
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn model_config() -> config::Model {
        config::Model {
            image_width: 64,
            input_channels: 1,
            output_channels: 1,
            generator_dim: 2,
            discriminator_dim: 4,
            embedding_num: 2,
            embedding_dim: 4,
            inst_norm: false,
        }
    }

    #[test]
    fn checkpoint_key_test() {
        let key = CheckpointKey {
            experiment_id: 3,
            batch_size: 16,
        };
        assert_eq!(key.to_string(), "experiment_3_batch_16");
    }

    #[test]
    fn checkpoint_restore_test() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("gegan-ckpt-{}", std::process::id()));
        let store = CheckpointStore::new(
            &dir,
            CheckpointKey {
                experiment_id: 0,
                batch_size: 2,
            },
        );

        let mut model = ModelState::new(&model_config(), Device::Cpu)?;
        ensure!(store.load_latest(&mut model)?.is_none());

        let source = Tensor::rand(&[2, 1, 64, 64], FLOAT_CPU) * 2.0 - 1.0;
        let ids = Tensor::of_slice(&[0i64, 1]);
        let expect = model.generate(&source, &ids)?;

        for step in 1..=5 {
            store.save(&model, step * 10)?;
        }
        ensure!(store.steps()? == vec![30, 40, 50], "only the 3 latest checkpoints are kept");

        let mut restored = ModelState::new(&model_config(), Device::Cpu)?;
        ensure!(!restored.generate(&source, &ids)?.equal(&expect));
        ensure!(store.load_latest(&mut restored)? == Some(50));
        ensure!(restored.generate(&source, &ids)?.equal(&expect));

        let mut generator_only = ModelState::new(&model_config(), Device::Cpu)?;
        ensure!(store.load_latest_generator(&mut generator_only.generator_vs)? == Some(50));
        ensure!(generator_only.generate(&source, &ids)?.equal(&expect));

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn checkpoint_save_order_test() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("gegan-ckpt-order-{}", std::process::id()));
        let store = CheckpointStore::new(
            &dir,
            CheckpointKey {
                experiment_id: 1,
                batch_size: 2,
            },
        );
        let model = ModelState::new(&model_config(), Device::Cpu)?;

        for step in [100, 200, 300] {
            store.save(&model, step)?;
        }

        // a fresh run in the same directory
        store.save(&model, 0)?;
        ensure!(store.latest()? == Some(0));
        ensure!(store.steps()? == vec![200, 300, 0]);
        ensure!(store.generator_path(0).is_file() && store.discriminator_path(0).is_file());
        ensure!(!store.generator_path(100).exists());

        // saving an existing step again makes it the latest
        store.save(&model, 200)?;
        ensure!(store.steps()? == vec![300, 0, 200]);

        // a checkpoint with a missing half does not count
        fs::remove_file(store.discriminator_path(200))?;
        ensure!(store.latest()? == Some(0));

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn checkpoint_dir_with_glob_chars_test() -> Result<()> {
        let dir = std::env::temp_dir()
            .join(format!("gegan-ckpt-[{}]*?", std::process::id()));
        let store = CheckpointStore::new(
            &dir,
            CheckpointKey {
                experiment_id: 0,
                batch_size: 2,
            },
        );
        let mut model = ModelState::new(&model_config(), Device::Cpu)?;
        store.save(&model, 7)?;
        ensure!(store.load_latest(&mut model)? == Some(7));

        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
