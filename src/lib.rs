pub mod checkpoint;
pub mod common;
pub mod config;
pub mod dataset;
pub mod infer;
pub mod logging;
pub mod message;
pub mod model;
pub mod train;
pub mod training_stream;
pub mod utils;

pub(crate) const FILE_STRFTIME: &str = "%Y-%m-%d-%H-%M-%S.%3f%z";

use crate::{common::*, training_stream::TrainingStreamInit};

pub async fn start(config: config::Config) -> Result<()> {
    // data logging
    let start_time = Local::now();
    let log_dir = config
        .experiment
        .log_dir()
        .join(format!("{}", start_time.format(FILE_STRFTIME)));
    let sample_dir = config.experiment.sample_dir();

    tokio::fs::create_dir_all(&log_dir).await?;
    tokio::fs::create_dir_all(config.experiment.checkpoint_dir()).await?;
    tokio::fs::create_dir_all(&sample_dir).await?;

    // keep a copy of the configuration beside the event files
    {
        let text = serde_json::to_string_pretty(&config)?;
        tokio::fs::write(log_dir.join("config.json"), text).await?;
    }

    let config = Arc::new(config);
    let (train_tx, train_rx) = tokio::sync::mpsc::channel(2);
    let (log_tx, log_rx) = tokio::sync::mpsc::channel(2);

    // data stream to channel worker
    let data_fut = {
        let config = config.clone();

        tokio::task::spawn(async move {
            let stream = TrainingStreamInit {
                dataset_dir: &config.dataset.dataset_dir,
                batch_size: config.train.batch_size.get(),
                image_width: config.model.image_width,
                input_channels: config.model.input_channels,
                num_styles: config.model.embedding_num,
                device: config.train.device,
            }
            .build()
            .await?;
            let mut stream = stream.stream().boxed();

            while let Some(msg) = stream.next().await.transpose()? {
                let result = train_tx.send(msg).await;
                if result.is_err() {
                    break;
                }
            }

            Fallible::Ok(())
        })
        .map(|result| Fallible::Ok(result??))
    };

    // training worker
    let train_fut = {
        let config = config.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            train::training_worker(config, train_rx, log_tx)
        })
        .map(|result| Fallible::Ok(result??))
    };

    let log_fut = tokio::task::spawn(logging::logging_worker(log_dir, sample_dir, log_rx))
        .map(|result| Fallible::Ok(result??));

    // run all tasks
    futures::try_join!(data_fut, train_fut, log_fut)?;

    Ok(())
}
