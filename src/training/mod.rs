//! Training module: transfer learning with a frozen backbone
//!
//! - `callbacks`: early stopping and reduce-on-plateau learning rate
//! - `trainer`: the epoch loop, checkpointing and export

pub mod callbacks;
pub mod trainer;

pub use callbacks::{EarlyStopping, ReduceLrOnPlateau, Verdict};
pub use trainer::{train, EpochMetrics, TrainingConfig, TrainingSummary};
