use crate::common::*;
use std::collections::HashSet;

/// Channels of the VGG-16 convolutions, one inner list per pooling block.
const VGG16_BLOCKS: [&[i64]; 5] = [
    &[64, 64],
    &[128, 128],
    &[256, 256, 256],
    &[512, 512, 512],
    &[512, 512, 512],
];
/// Per-channel statistics of torchvision models, for pixels scaled to `[0, 1]`.
const IMAGENET_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f64; 3] = [0.229, 0.224, 0.225];

/// A fixed feature extractor that scores the distance between two image batches.
///
/// Inputs are `[batch, channel, height, width]` tensors in `[0, 255]`.
pub trait PerceptualLoss {
    fn forward(&self, lhs: &Tensor, rhs: &Tensor) -> Result<Tensor>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VggLayer {
    Conv,
    Relu,
    MaxPool,
}

#[derive(Debug, Clone)]
pub struct VggPerceptualLossInit {
    /// Indices into the torchvision `features` stack whose outputs are compared.
    pub layers: Vec<usize>,
    pub weights_file: Option<PathBuf>,
}

impl VggPerceptualLossInit {
    pub fn build(self, device: Device) -> Result<VggPerceptualLoss> {
        let Self {
            layers: output_layers,
            weights_file,
        } = self;
        ensure!(
            !output_layers.is_empty(),
            "at least one output layer is required"
        );

        // torchvision numbering: every conv, relu and max pool takes an index
        let stack: Vec<(VggLayer, i64, i64)> = {
            let mut stack = vec![];
            let mut in_c = 3;
            for block in VGG16_BLOCKS {
                for &out_c in block {
                    stack.push((VggLayer::Conv, in_c, out_c));
                    stack.push((VggLayer::Relu, out_c, out_c));
                    in_c = out_c;
                }
                stack.push((VggLayer::MaxPool, in_c, in_c));
            }
            stack
        };

        let last_layer = output_layers.iter().copied().max().unwrap_or(0);
        ensure!(
            last_layer < stack.len(),
            "layer index {} exceeds the {} VGG-16 feature layers",
            last_layer,
            stack.len()
        );

        let mut vs = nn::VarStore::new(device);
        let layers: Vec<_> = {
            let root = vs.root();
            let features = &root / "features";
            stack[..=last_layer]
                .iter()
                .enumerate()
                .map(|(index, &(kind, in_c, out_c))| match kind {
                    VggLayer::Conv => {
                        let conv = nn::conv2d(
                            &features / index,
                            in_c,
                            out_c,
                            3,
                            nn::ConvConfig {
                                padding: 1,
                                ..Default::default()
                            },
                        );
                        VggModule::Conv(conv)
                    }
                    VggLayer::Relu => VggModule::Relu,
                    VggLayer::MaxPool => VggModule::MaxPool,
                })
                .collect()
        };

        match weights_file {
            Some(weights_file) => {
                vs.load_partial(&weights_file).with_context(|| {
                    format!(
                        "unable to load perceptual weights '{}'",
                        weights_file.display()
                    )
                })?;
                info!("loaded perceptual weights from '{}'", weights_file.display());
            }
            None => {
                warn!("no perceptual weights file is given, randomly initialized VGG-16 is used");
            }
        }
        vs.freeze();

        let [mean, std] = [IMAGENET_MEAN, IMAGENET_STD].map(|stat| {
            Tensor::of_slice(&stat)
                .to_kind(Kind::Float)
                .view([1, 3, 1, 1])
                .to_device(device)
        });

        Ok(VggPerceptualLoss {
            _vs: vs,
            layers,
            output_layers: output_layers.into_iter().collect(),
            mean,
            std,
        })
    }
}

#[derive(Debug)]
enum VggModule {
    Conv(nn::Conv2D),
    Relu,
    MaxPool,
}

/// Mean squared distance of frozen VGG-16 features.
#[derive(Debug)]
pub struct VggPerceptualLoss {
    _vs: nn::VarStore,
    layers: Vec<VggModule>,
    output_layers: HashSet<usize>,
    mean: Tensor,
    std: Tensor,
}

impl VggPerceptualLoss {
    /// Maps `[0, 255]` pixels to the normalized RGB input of torchvision VGG-16.
    fn preprocess(&self, input: &Tensor) -> Result<Tensor> {
        let (_b, channels, _h, _w) = input.size4()?;
        let input = match channels {
            3 => input.shallow_clone(),
            1 => input.repeat(&[1, 3, 1, 1]),
            _ => bail!("expect 1 or 3 input channels, but get {}", channels),
        };
        Ok((input / 255.0 - &self.mean) / &self.std)
    }

    fn features(&self, input: &Tensor) -> Result<Vec<Tensor>> {
        let xs = self.preprocess(input)?;

        let (_, outputs) = self.layers.iter().enumerate().fold(
            (xs, vec![]),
            |(xs, mut outputs), (index, layer)| {
                let xs = match layer {
                    VggModule::Conv(conv) => xs.apply(conv),
                    VggModule::Relu => xs.relu(),
                    VggModule::MaxPool => xs.max_pool2d_default(2),
                };
                if self.output_layers.contains(&index) {
                    outputs.push(xs.shallow_clone());
                }
                (xs, outputs)
            },
        );

        Ok(outputs)
    }
}

impl PerceptualLoss for VggPerceptualLoss {
    fn forward(&self, lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
        ensure!(
            lhs.size() == rhs.size(),
            "perceptual inputs differ in shape: {:?} vs {:?}",
            lhs.size(),
            rhs.size()
        );

        let lhs_features = self.features(lhs)?;
        let rhs_features = self.features(rhs)?;
        let num_layers = lhs_features.len() as f64;

        let loss = izip!(&lhs_features, &rhs_features)
            .map(|(lhs, rhs)| lhs.mse_loss(rhs, Reduction::Mean))
            .fold1(|lhs, rhs| lhs + rhs)
            .ok_or_else(|| format_err!("no perceptual feature is extracted"))?;

        Ok(loss / num_layers)
    }
}
