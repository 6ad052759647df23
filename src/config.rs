use crate::common::*;

/// Spatial reduction of the six stride-2 encoder stages.
pub const MIN_IMAGE_WIDTH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub experiment: Experiment,
    pub dataset: Dataset,
    pub model: Model,
    #[serde(default)]
    pub loss: Loss,
    #[serde(default)]
    pub perceptual: Perceptual,
    pub train: Training,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config: Self = json5::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let Model {
            image_width,
            input_channels,
            output_channels,
            generator_dim,
            discriminator_dim,
            embedding_num,
            embedding_dim,
            ..
        } = self.model;

        ensure!(
            image_width >= MIN_IMAGE_WIDTH && image_width % MIN_IMAGE_WIDTH == 0,
            "image_width must be a positive multiple of {}, but get {}",
            MIN_IMAGE_WIDTH,
            image_width
        );
        ensure!(
            input_channels == output_channels,
            "input_channels ({}) and output_channels ({}) must agree",
            input_channels,
            output_channels
        );
        ensure!(
            input_channels == 1 || input_channels == 3,
            "only 1 or 3 image channels are supported"
        );
        ensure!(
            generator_dim > 0 && discriminator_dim > 0 && embedding_dim > 0,
            "generator_dim, discriminator_dim and embedding_dim must be positive"
        );
        ensure!(
            embedding_num == 2,
            "the complement style is only defined for embedding_num = 2, but get {}",
            embedding_num
        );

        let Loss {
            l1_penalty,
            lconst_penalty,
            lperceptual_penalty,
            lcategory_penalty,
        } = self.loss;
        ensure!(
            [l1_penalty, lconst_penalty, lperceptual_penalty, lcategory_penalty]
                .iter()
                .all(|penalty| *penalty >= 0.0),
            "loss penalties must be non-negative"
        );

        ensure!(
            !self.perceptual.layers.is_empty(),
            "at least one perceptual layer is required"
        );
        ensure!(self.train.learning_rate > 0.0, "learning_rate must be positive");

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub dir: PathBuf,
    #[serde(default)]
    pub id: usize,
}

impl Experiment {
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.dir.join("checkpoint")
    }

    pub fn sample_dir(&self) -> PathBuf {
        self.dir.join("sample")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.join("logs")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub dataset_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub image_width: usize,
    pub input_channels: usize,
    pub output_channels: usize,
    pub generator_dim: usize,
    pub discriminator_dim: usize,
    pub embedding_num: usize,
    pub embedding_dim: usize,
    #[serde(default)]
    pub inst_norm: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Loss {
    pub l1_penalty: f64,
    pub lconst_penalty: f64,
    pub lperceptual_penalty: f64,
    pub lcategory_penalty: f64,
}

impl Default for Loss {
    fn default() -> Self {
        Self {
            l1_penalty: 100.0,
            lconst_penalty: 15.0,
            lperceptual_penalty: 0.1,
            lcategory_penalty: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Perceptual {
    pub weights_file: Option<PathBuf>,
    /// Indices of ReLU outputs in the VGG-16 feature stack.
    pub layers: Vec<usize>,
}

impl Default for Perceptual {
    fn default() -> Self {
        Self {
            weights_file: None,
            layers: vec![3, 8, 15, 22],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Training {
    pub batch_size: NonZeroUsize,
    #[serde(with = "tch_serde::serde_device")]
    pub device: Device,
    pub learning_rate: R64,
    pub max_steps: usize,
    #[serde(default = "default_true")]
    pub resume: bool,
    /// Accepted for compatibility; has no effect on training.
    #[serde(default)]
    pub flip_labels: bool,
    #[serde(default)]
    pub freeze_encoder: bool,
    #[serde(default = "default_sample_steps")]
    pub sample_steps: NonZeroUsize,
    #[serde(default = "default_checkpoint_steps")]
    pub checkpoint_steps: NonZeroUsize,
}

const DEFAULT_SAMPLE_STEPS: NonZeroUsize = match NonZeroUsize::new(50) {
    Some(steps) => steps,
    None => panic!("sample_steps must be positive"),
};
const DEFAULT_CHECKPOINT_STEPS: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(steps) => steps,
    None => panic!("checkpoint_steps must be positive"),
};

fn default_true() -> bool {
    true
}

fn default_sample_steps() -> NonZeroUsize {
    DEFAULT_SAMPLE_STEPS
}

fn default_checkpoint_steps() -> NonZeroUsize {
    DEFAULT_CHECKPOINT_STEPS
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A CPU configuration with the smallest model, rooted at `dir`.
    pub fn tiny_config(dir: &Path) -> Config {
        Config {
            experiment: Experiment {
                dir: dir.to_owned(),
                id: 0,
            },
            dataset: Dataset {
                dataset_dir: dir.join("dataset"),
            },
            model: Model {
                image_width: 64,
                input_channels: 1,
                output_channels: 1,
                generator_dim: 2,
                discriminator_dim: 4,
                embedding_num: 2,
                embedding_dim: 4,
                inst_norm: true,
            },
            loss: Loss::default(),
            perceptual: Perceptual {
                weights_file: None,
                layers: vec![3],
            },
            train: Training {
                batch_size: NonZeroUsize::new(2).unwrap(),
                device: Device::Cpu,
                learning_rate: r64(1e-3),
                max_steps: 5,
                resume: true,
                flip_labels: false,
                freeze_encoder: false,
                sample_steps: NonZeroUsize::new(2).unwrap(),
                checkpoint_steps: NonZeroUsize::new(2).unwrap(),
            },
        }
    }

    const EXAMPLE: &str = r#"{
        experiment: { dir: "experiment", id: 0 },
        dataset: { dataset_dir: "data" },
        model: {
            image_width: 64,
            input_channels: 1,
            output_channels: 1,
            generator_dim: 64,
            discriminator_dim: 64,
            embedding_num: 2,
            embedding_dim: 64,
        },
        train: {
            batch_size: 16,
            device: "cpu",
            learning_rate: 0.0001,
            max_steps: 100000,
        },
    }"#;

    #[test]
    fn parse_config_test() -> Result<()> {
        let config: Config = json5::from_str(EXAMPLE)?;
        config.validate()?;

        ensure!(config.loss == Loss::default());
        ensure!(config.perceptual.layers == vec![3, 8, 15, 22]);
        ensure!(config.train.resume && !config.train.freeze_encoder);
        ensure!(!config.model.inst_norm);
        ensure!(config.train.sample_steps.get() == 50);
        ensure!(config.train.checkpoint_steps.get() == 1000);
        ensure!(config.experiment.checkpoint_dir() == Path::new("experiment/checkpoint"));

        Ok(())
    }

    #[test]
    fn tiny_config_is_valid_test() -> Result<()> {
        tiny_config(Path::new("experiment")).validate()
    }

    #[test]
    fn reject_invalid_config_test() -> Result<()> {
        let config: Config = json5::from_str(EXAMPLE)?;

        let mut bad_width = config.clone();
        bad_width.model.image_width = 48;
        ensure!(bad_width.validate().is_err());

        let mut bad_styles = config.clone();
        bad_styles.model.embedding_num = 3;
        ensure!(bad_styles.validate().is_err());

        let mut bad_channels = config;
        bad_channels.model.output_channels = 3;
        ensure!(bad_channels.validate().is_err());

        Ok(())
    }
}
