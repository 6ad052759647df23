use crate::{
    common::*,
    message as msg,
    utils::{denormalize, merge_batch, save_image},
};
use tfrecord::EventWriterInit;

/// Writes loss scalars to TensorBoard event files under `log_dir` and
/// sample strips under `sample_dir`.
pub async fn logging_worker(
    log_dir: impl AsRef<Path>,
    sample_dir: impl AsRef<Path>,
    mut log_rx: mpsc::Receiver<msg::LogMessage>,
) -> Result<()> {
    let event_dir = log_dir.as_ref().join("events");
    let sample_dir = sample_dir.as_ref().to_owned();
    tokio::fs::create_dir_all(&event_dir).await?;
    tokio::fs::create_dir_all(&sample_dir).await?;

    let mut event_writer = {
        let event_path_prefix = event_dir
            .join("gegan")
            .into_os_string()
            .into_string()
            .map_err(|path| format_err!("non-UTF-8 event path {:?}", path))?;

        EventWriterInit::default()
            .from_prefix_async(event_path_prefix, None)
            .await?
    };

    while let Some(msg) = log_rx.recv().await {
        match msg {
            msg::LogMessage::Loss {
                step,
                learning_rate,
                losses,
            } => {
                let step = step as i64;

                for (tag, value) in losses.scalars() {
                    event_writer
                        .write_scalar_async(format!("loss/{}", tag), step, value as f32)
                        .await?;
                }
                event_writer
                    .write_scalar_async("params/learning_rate", step, learning_rate as f32)
                    .await?;
            }
            msg::LogMessage::Sample {
                step,
                real,
                fake_s,
                fake_c,
            } => {
                let sample_dir = sample_dir.clone();

                tokio::task::spawn_blocking(move || -> Result<_> {
                    save_sample_images(&sample_dir, step, &real, &fake_s, &fake_c)
                })
                .await??;
            }
        }
    }

    Ok(())
}

/// Saves `<step>_real.jpg`, `<step>_fake_s.jpg` and `<step>_fake_c.jpg`,
/// each a vertical strip of the batch.
pub fn save_sample_images(
    sample_dir: &Path,
    step: usize,
    real: &Tensor,
    fake_s: &Tensor,
    fake_c: &Tensor,
) -> Result<()> {
    [("real", real), ("fake_s", fake_s), ("fake_c", fake_c)]
        .into_iter()
        .try_for_each(|(name, images)| -> Result<_> {
            let strip = merge_batch(&denormalize(images))?;
            let path = sample_dir.join(format!("{}_{}.jpg", step, name));
            save_image(&strip, &path)?;
            debug!("sample image saved to '{}'", path.display());
            Ok(())
        })
}
