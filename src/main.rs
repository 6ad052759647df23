use anyhow::Result;
use gegan::{common::*, config, infer};
use std::{env, path::PathBuf};
use structopt::StructOpt;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(Debug, Clone, StructOpt)]
/// Style-conditioned image translation GAN.
pub struct Args {
    #[structopt(long, default_value = "config.json5")]
    pub config: PathBuf,
    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Clone, StructOpt)]
pub enum Command {
    /// Train the generator and discriminator.
    Train,
    /// Translate every image in a directory to the given styles.
    Infer {
        #[structopt(long)]
        source_dir: PathBuf,
        #[structopt(long)]
        output_dir: PathBuf,
        /// Style ids, one is drawn at random per image if several are given.
        #[structopt(long, required = true)]
        style_ids: Vec<usize>,
    },
    /// Render the transition between two styles.
    Interpolate {
        #[structopt(long)]
        source_dir: PathBuf,
        #[structopt(long)]
        output_dir: PathBuf,
        #[structopt(long)]
        from: usize,
        #[structopt(long)]
        to: usize,
        #[structopt(long, default_value = "10")]
        steps: usize,
    },
    /// Save the generator of the latest checkpoint to a file.
    Export {
        #[structopt(long)]
        output_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // setup tracing
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        if env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::INFO.into())
        } else {
            filter
        }
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    // parse config
    let Args { config, cmd } = Args::from_args();
    let config = config::Config::load(&config)?;

    match cmd {
        Command::Train => gegan::start(config).await?,
        Command::Infer {
            source_dir,
            output_dir,
            style_ids,
        } => {
            tokio::task::spawn_blocking(move || {
                infer::infer(&config, &source_dir, &output_dir, &style_ids)
            })
            .await??;
        }
        Command::Interpolate {
            source_dir,
            output_dir,
            from,
            to,
            steps,
        } => {
            tokio::task::spawn_blocking(move || {
                infer::interpolate(&config, &source_dir, &output_dir, [from, to], steps)
            })
            .await??;
        }
        Command::Export { output_file } => {
            let step = tokio::task::spawn_blocking(move || infer::export(&config, &output_file))
                .await??;
            info!("export of step {} finished", step);
        }
    }

    Ok(())
}
