use crate::{
    common::*,
    dataset::{DatasetInit, StyleDataset},
    message::TrainingMessage,
    utils::load_image,
};

#[derive(Debug, Clone)]
pub struct TrainingStreamInit<P>
where
    P: AsRef<Path>,
{
    pub dataset_dir: P,
    pub batch_size: usize,
    pub image_width: usize,
    pub input_channels: usize,
    pub num_styles: usize,
    pub device: Device,
}

impl<P> TrainingStreamInit<P>
where
    P: AsRef<Path>,
{
    pub async fn build(self) -> Result<TrainingStream> {
        let Self {
            dataset_dir,
            batch_size,
            image_width,
            input_channels,
            num_styles,
            device,
        } = self;
        ensure!(batch_size > 0, "batch_size must be positive");

        let dataset = DatasetInit {
            dir: dataset_dir,
            num_styles,
        }
        .load()
        .await?;

        Ok(TrainingStream {
            dataset: Arc::new(dataset),
            batch_size,
            image_width,
            input_channels,
            device,
        })
    }
}

#[derive(Debug)]
pub struct TrainingStream {
    dataset: Arc<StyleDataset>,
    batch_size: usize,
    image_width: usize,
    input_channels: usize,
    device: Device,
}

impl TrainingStream {
    /// Endless stream of randomly drawn batches.
    pub fn stream(&self) -> impl Stream<Item = Result<TrainingMessage>> {
        let Self {
            ref dataset,
            batch_size,
            image_width,
            input_channels,
            device,
        } = *self;
        let dataset = dataset.clone();

        stream::repeat(())
            .wrapping_enumerate()
            .map(|(batch_index, ())| Fallible::Ok(batch_index))
            .try_par_then_unordered(None, move |batch_index| {
                let dataset = dataset.clone();

                async move {
                    let samples = dataset.sample(batch_size);

                    let (images, style_ids): (Vec<_>, Vec<_>) = samples
                        .into_iter()
                        .map(|(path, style_id)| -> Result<_> {
                            let image = load_image(&path, image_width, input_channels)?;
                            Ok((image, style_id as i64))
                        })
                        .try_collect::<_, Vec<_>, _>()?
                        .into_iter()
                        .unzip();

                    let images = Tensor::stack(&images, 0);
                    let style_ids = Tensor::of_slice(&style_ids);

                    let message = TrainingMessage {
                        images,
                        style_ids,
                        batch_index,
                    }
                    .to_device(device);

                    Fallible::Ok(message)
                }
            })
    }
}
