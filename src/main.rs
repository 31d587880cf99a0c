// --- File: src/main.rs ---

//! Command-line entry point: `train`, `evaluate` and `inspect`.

use clap::{Parser, Subcommand};
use env_logger::Env;
use rustyscan::config::RunConfig;
use rustyscan::pipeline::{inspect, run_evaluation, run_training};
use rustyscan::training::TrainError;
use std::path::PathBuf;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "RustyScan: medical scan classification", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a classifier and keep the best checkpoint
    Train {
        /// Run configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Learning rate
        #[arg(long)]
        lr: Option<f32>,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Evaluate a saved checkpoint
    Evaluate {
        #[arg(short, long)]
        config: PathBuf,

        /// Checkpoint directory; defaults to `output_dir/<checkpoint.dir>`
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Decode and transform the first sample of the index
    Inspect {
        #[arg(short, long)]
        config: PathBuf,

        /// Write the transformed tensor to this NIfTI file
        #[arg(long)]
        dump: Option<PathBuf>,
    },
}

fn main() -> Result<(), TrainError> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        log::error!("{e}");
        return Err(e);
    }
    Ok(())
}

fn run(command: Command) -> Result<(), TrainError> {
    match command {
        Command::Train {
            config,
            epochs,
            batch_size,
            lr,
            seed,
        } => {
            let mut config = RunConfig::from_path(&config)?;
            if let Some(epochs) = epochs {
                config.train.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.train.batch_size = batch_size;
            }
            if let Some(lr) = lr {
                config.train.learning_rate = lr;
            }
            if seed.is_some() {
                config.train.seed = seed;
            }
            config.validate()?;

            let summary = run_training(&config)?;
            println!("seed: {}", summary.seed);
            println!("history: {}", summary.history_path.display());
            match (summary.best, &summary.checkpoint_dir) {
                (Some((acc, epoch)), Some(dir)) => {
                    println!("best val accuracy {acc:.4} at epoch {epoch}, saved to {}", dir.display())
                }
                (Some((acc, epoch)), None) => println!("best val accuracy {acc:.4} at epoch {epoch} (not saved)"),
                _ => println!("no checkpoint written"),
            }
        }
        Command::Evaluate { config, checkpoint } => {
            let config = RunConfig::from_path(&config)?;
            let dir = checkpoint.unwrap_or_else(|| config.output_dir.join(&config.checkpoint.dir));
            let report = run_evaluation(&config, &dir)?;
            println!("{report}");
        }
        Command::Inspect { config, dump } => {
            let config = RunConfig::from_path(&config)?;
            let report = inspect(&config, dump.as_deref())?;
            println!("{report}");
        }
    }
    Ok(())
}
