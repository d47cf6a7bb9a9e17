//! LeafScan CLI
//!
//! `train` fits the classifier head on a labeled image directory;
//! `infer` runs a saved artifact on a single image.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

use leafscan::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use leafscan::inference::{parse_class_names, Predictor, DEFAULT_CLASS_NAMES};
use leafscan::model::load_model;
use leafscan::training::{train, TrainingConfig};
use leafscan::utils::logging::{init_logging, LogConfig};

/// Plant leaf disease classification with Burn
#[derive(Parser, Debug)]
#[command(name = "leafscan")]
#[command(version)]
#[command(about = "Train and run the leaf disease classifier", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fine-tune a new classification head on a labeled image directory
    Train {
        /// Directory with one subdirectory of images per class
        #[arg(long)]
        data_dir: PathBuf,

        /// Maximum number of training epochs
        #[arg(long, default_value = "15")]
        epochs: usize,

        /// Batch size
        #[arg(long = "batch", default_value = "32")]
        batch_size: usize,

        /// Square input side in pixels
        #[arg(long = "img", default_value = "224")]
        image_size: usize,

        /// Output artifact: `.mpk` bundle, `.bin` legacy file, otherwise a serving directory
        #[arg(long, default_value = "model.mpk")]
        out: PathBuf,

        /// Pretrained weights to initialise the frozen backbone from
        #[arg(long)]
        backbone: Option<PathBuf>,

        /// Initial learning rate
        #[arg(long, default_value = "0.001")]
        learning_rate: f64,

        /// Random seed for the split and shuffling
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Fraction of images held out for validation
        #[arg(long, default_value = "0.2")]
        val_split: f64,

        /// Decode all images into memory up front instead of per batch
        #[arg(long)]
        cache: bool,
    },

    /// Classify a single image with a saved model
    Infer {
        /// Path to the input image
        #[arg(short, long)]
        input: PathBuf,

        /// Directory holding model.mpk, model.bin or model/
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,

        /// Comma-separated class names, in output order
        #[arg(long, env = "CLASS_NAMES", default_value = DEFAULT_CLASS_NAMES)]
        classes: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    println!("{} v{} ({})", "LeafScan".green().bold(), leafscan::VERSION, backend_name());

    match cli.command {
        Commands::Train {
            data_dir,
            epochs,
            batch_size,
            image_size,
            out,
            backbone,
            learning_rate,
            seed,
            val_split,
            cache,
        } => {
            let config = TrainingConfig {
                data_dir,
                out,
                backbone,
                epochs,
                batch_size,
                image_size,
                learning_rate,
                seed,
                validation_split: val_split,
                cache_images: cache,
                ..TrainingConfig::default()
            };
            let summary = train::<TrainingBackend>(&config, &default_device())?;

            if summary.stopped_early {
                println!(
                    "  Stopped early, restored weights from epoch {}",
                    summary.best_epoch.map(|e| e + 1).unwrap_or(0)
                );
            }
            println!("  Best val_loss: {:.4}", summary.best_val_loss);
        }

        Commands::Infer {
            input,
            base_dir,
            classes,
        } => {
            let model = load_model::<DefaultBackend>(&base_dir, &default_device())?;
            let predictor = Predictor::new(model, parse_class_names(&classes));
            let (prediction, elapsed) = predictor.predict_timed(&input)?;

            println!("{}", "Prediction".cyan().bold());
            println!("  Image:      {}", input.display());
            println!("  Label:      {}", prediction.label.green());
            println!("  Confidence: {:.2}%", prediction.confidence * 100.0);
            println!("  Time:       {:.1} ms", elapsed.as_secs_f64() * 1000.0);
        }
    }

    Ok(())
}
