//! Transfer-learning training loop
//!
//! The backbone is frozen: each batch runs through the backbone on the inner
//! (non-autodiff) backend in inference mode, and only the head sees gradients.
//! Validation loss drives checkpointing, early stopping and the
//! learning-rate schedule.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::callbacks::{EarlyStopping, ReduceLrOnPlateau, Verdict};
use crate::dataset::{
    train_val_split, write_class_names, LabeledImageDir, LeafBatch, LeafBatcher,
    LeafImageDataset, SplitConfig,
};
use crate::model::artifact::{load_backbone, save_artifact, save_bundle, ArtifactFormat};
use crate::model::classifier::{ClassifierHead, FeatureExtractor, LeafClassifier, LeafClassifierConfig};
use crate::utils::error::{LeafScanError, Result};
use crate::utils::format_duration;
use crate::utils::logging::TrainingLogger;

/// File name of the best-so-far checkpoint, written next to the output artifact
pub const BEST_CHECKPOINT_FILE: &str = "best.mpk";

/// File name of the exported class list, written next to the output artifact
pub const CLASS_NAMES_FILE: &str = "class_names.json";

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub data_dir: PathBuf,
    pub out: PathBuf,
    pub backbone: Option<PathBuf>,
    pub epochs: usize,
    pub batch_size: usize,
    pub image_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub validation_split: f64,
    pub base_filters: usize,
    pub dropout_rate: f64,
    pub early_stopping_patience: usize,
    pub lr_patience: usize,
    pub lr_factor: f64,
    /// Decode the whole dataset into memory before the first epoch
    pub cache_images: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            out: PathBuf::from("model.mpk"),
            backbone: None,
            epochs: 15,
            batch_size: 32,
            image_size: 224,
            learning_rate: 1e-3,
            seed: 42,
            validation_split: 0.2,
            base_filters: 32,
            dropout_rate: 0.3,
            early_stopping_patience: 3,
            lr_patience: 2,
            lr_factor: 0.3,
            cache_images: false,
        }
    }
}

impl TrainingConfig {
    /// Directory that receives the checkpoint and class list
    pub fn output_dir(&self) -> PathBuf {
        self.out
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir().join(BEST_CHECKPOINT_FILE)
    }

    pub fn class_names_path(&self) -> PathBuf {
        self.output_dir().join(CLASS_NAMES_FILE)
    }

    fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(LeafScanError::Config("epochs must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(LeafScanError::Config("batch size must be at least 1".to_string()));
        }
        if self.image_size < 16 {
            return Err(LeafScanError::Config(format!(
                "image size {} is too small, the backbone downsamples by 16",
                self.image_size
            )));
        }
        Ok(())
    }
}

/// Metrics for one epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
}

/// What a finished training run produced
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub class_names: Vec<String>,
    pub history: Vec<EpochMetrics>,
    pub best_epoch: Option<usize>,
    pub best_val_loss: f64,
    pub stopped_early: bool,
    pub artifact: ArtifactFormat,
    pub checkpoint_path: PathBuf,
    pub class_names_path: PathBuf,
}

/// Run a complete training job
pub fn train<B: AutodiffBackend>(config: &TrainingConfig, device: &B::Device) -> Result<TrainingSummary> {
    config.validate()?;
    let start = Instant::now();

    println!("{}", "Loading Dataset...".cyan().bold());
    let data = LabeledImageDir::open(&config.data_dir)?;
    let num_classes = data.num_classes();
    println!(
        "{} {} classes in {}",
        "Found".green(),
        num_classes,
        data.root_dir.display()
    );
    for (name, count) in data.class_names.iter().zip(data.class_counts()) {
        println!("  {:<40} {:>6}", name, count);
    }

    let split = train_val_split(
        &data.samples,
        &SplitConfig::new(config.validation_split, config.seed)?,
    );
    let (train_set, val_set) = if config.cache_images {
        (
            LeafImageDataset::cached(&split.train, config.image_size),
            LeafImageDataset::cached(&split.validation, config.image_size),
        )
    } else {
        (
            LeafImageDataset::new(&split.train, config.image_size),
            LeafImageDataset::new(&split.validation, config.image_size),
        )
    };
    if train_set.is_empty() {
        return Err(LeafScanError::Dataset("no readable training images".to_string()));
    }
    if val_set.is_empty() {
        return Err(LeafScanError::Dataset(
            "validation split produced no readable images".to_string(),
        ));
    }
    println!(
        "  Training samples: {} | Validation samples: {}",
        train_set.len(),
        val_set.len()
    );

    let model_config = LeafClassifierConfig::new(num_classes)
        .with_input_size(config.image_size)
        .with_base_filters(config.base_filters)
        .with_dropout_rate(config.dropout_rate);
    let mut model = model_config.init::<B>(device);
    if let Some(path) = &config.backbone {
        info!("Initialising backbone from {}", path.display());
        model = load_backbone(model, path, device)?;
    }
    let LeafClassifier { backbone, mut head } = model;
    let frozen = backbone.valid();

    let output_dir = config.output_dir();
    if !output_dir.as_os_str().is_empty() {
        std::fs::create_dir_all(&output_dir)?;
    }

    let batcher = LeafBatcher::new(config.image_size);
    let mut optimizer = AdamConfig::new().init::<B, ClassifierHead<B>>();
    let mut early_stopping = EarlyStopping::new(config.early_stopping_patience);
    let mut scheduler = ReduceLrOnPlateau::new(config.learning_rate, config.lr_factor, config.lr_patience);
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut logger = TrainingLogger::new(config.epochs);
    let mut history = Vec::with_capacity(config.epochs);
    let mut stopped_early = false;

    println!();
    println!("{}", "Starting Training...".green().bold());

    for epoch in 0..config.epochs {
        logger.start_epoch(epoch);
        println!("{}", format!("Epoch {}/{}", epoch + 1, config.epochs).yellow().bold());

        let lr = scheduler.lr();
        let (trained, train_loss, train_accuracy) = train_epoch(
            head,
            &frozen,
            &mut optimizer,
            &train_set,
            &batcher,
            config.batch_size,
            lr,
            &mut rng,
            device,
        )?;
        head = trained;

        let (val_loss, val_accuracy) =
            evaluate::<B>(&frozen, &head, &val_set, &batcher, config.batch_size, device);

        logger.end_epoch(train_loss, train_accuracy, val_loss, val_accuracy, lr);
        history.push(EpochMetrics {
            epoch,
            train_loss,
            train_accuracy,
            val_loss,
            val_accuracy,
            learning_rate: lr,
        });

        let verdict = early_stopping.step(epoch, val_loss, &head);
        if verdict == Verdict::Improved {
            let checkpoint = LeafClassifier {
                backbone: backbone.clone(),
                head: head.clone(),
            };
            save_bundle(&checkpoint, &model_config, &config.checkpoint_path())?;
            logger.log_new_best(val_loss);
        }

        if let Some(new_lr) = scheduler.step(val_loss) {
            logger.log_lr_reduced(new_lr);
        }

        if verdict == Verdict::Stop {
            logger.log_early_stop(config.early_stopping_patience);
            stopped_early = true;
            break;
        }
    }

    let best_epoch = early_stopping.best_epoch();
    let best_val_loss = early_stopping.best_value();
    if let Some(best_head) = early_stopping.into_best() {
        head = best_head;
    }
    logger.log_complete(history.len(), best_val_loss);

    println!();
    println!("{}", "Saving Model...".cyan().bold());
    let final_model = LeafClassifier { backbone, head };
    let artifact = save_artifact(&final_model, &model_config, &config.out)?;
    let class_names_path = config.class_names_path();
    write_class_names(&data.class_names, &class_names_path)?;

    println!("  Model:       {}", artifact.path().display());
    println!("  Checkpoint:  {}", config.checkpoint_path().display());
    println!("  Class names: {}", class_names_path.display());
    println!(
        "{} in {}",
        "Training Complete!".green().bold(),
        format_duration(start.elapsed().as_secs_f64())
    );

    Ok(TrainingSummary {
        class_names: data.class_names,
        history,
        best_epoch,
        best_val_loss,
        stopped_early,
        artifact,
        checkpoint_path: config.checkpoint_path(),
        class_names_path,
    })
}

/// One pass over the shuffled training set; returns the updated head,
/// mean batch loss and accuracy
#[allow(clippy::too_many_arguments)]
fn train_epoch<B, O>(
    mut head: ClassifierHead<B>,
    frozen: &FeatureExtractor<B::InnerBackend>,
    optimizer: &mut O,
    dataset: &LeafImageDataset,
    batcher: &LeafBatcher,
    batch_size: usize,
    learning_rate: f64,
    rng: &mut ChaCha8Rng,
    device: &B::Device,
) -> Result<(ClassifierHead<B>, f64, f64)>
where
    B: AutodiffBackend,
    O: Optimizer<ClassifierHead<B>, B>,
{
    let mut indices: Vec<usize> = (0..dataset.len()).collect();
    indices.shuffle(rng);
    let num_batches = indices.len().div_ceil(batch_size);

    let pb = ProgressBar::new(num_batches as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  [{bar:40.cyan/blue}] {pos}/{len} batches {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut total_loss = 0.0f64;
    let mut correct = 0usize;
    let mut seen = 0usize;
    let mut batches = 0usize;

    for chunk in indices.chunks(batch_size) {
        let items: Vec<_> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
        if items.is_empty() {
            pb.inc(1);
            continue;
        }
        let batch: LeafBatch<B> = batcher.batch(items, device);
        let n = batch.targets.dims()[0];

        let features = Tensor::<B, 4>::from_inner(frozen.forward(batch.images.inner()));
        let logits = head.forward(features);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());

        let loss_value: f64 = loss.clone().into_scalar().elem();
        if !loss_value.is_finite() {
            pb.abandon();
            return Err(LeafScanError::Training(format!(
                "loss became {} during training",
                loss_value
            )));
        }
        total_loss += loss_value;
        correct += count_correct(logits, batch.targets);
        seen += n;
        batches += 1;

        let grads = GradientsParams::from_grads(loss.backward(), &head);
        head = optimizer.step(learning_rate, head, grads);

        pb.set_message(format!("loss {:.4}", loss_value));
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok((
        head,
        total_loss / batches.max(1) as f64,
        correct as f64 / seen.max(1) as f64,
    ))
}

/// Mean validation loss and accuracy, computed without autodiff
fn evaluate<B: AutodiffBackend>(
    frozen: &FeatureExtractor<B::InnerBackend>,
    head: &ClassifierHead<B>,
    dataset: &LeafImageDataset,
    batcher: &LeafBatcher,
    batch_size: usize,
    device: &B::Device,
) -> (f64, f64) {
    let head = head.valid();
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut total_loss = 0.0f64;
    let mut correct = 0usize;
    let mut seen = 0usize;

    let len = dataset.len();
    for start in (0..len).step_by(batch_size) {
        let end = (start + batch_size).min(len);
        let items: Vec<_> = (start..end).filter_map(|i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }
        let batch: LeafBatch<B::InnerBackend> = batcher.batch(items, device);
        let n = batch.targets.dims()[0];

        let logits = head.forward(frozen.forward(batch.images));
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        let loss_value: f64 = loss.into_scalar().elem();

        total_loss += loss_value * n as f64;
        correct += count_correct(logits, batch.targets);
        seen += n;
    }

    (
        total_loss / seen.max(1) as f64,
        correct as f64 / seen.max(1) as f64,
    )
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [n, _] = logits.dims();
    let predictions = logits.argmax(1).reshape([n]);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}
