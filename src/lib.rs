//! # LeafScan
//!
//! Plant leaf disease classification with the Burn framework: a small
//! transfer-learning classifier, the artifact formats it is stored in, the
//! preprocessing shared by training and serving, and the training loop.
//!
//! ## Modules
//!
//! - `dataset`: preprocessing, labeled directory discovery, splits and batching
//! - `model`: classifier architecture, artifact formats and the scoring interface
//! - `inference`: class selection and the image-to-label predictor
//! - `training`: frozen-backbone training with early stopping and LR schedule
//! - `utils`: logging, errors and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use leafscan::backend::{default_device, DefaultBackend};
//! use leafscan::inference::{parse_class_names, Predictor, DEFAULT_CLASS_NAMES};
//! use leafscan::model::load_model;
//!
//! let model = load_model::<DefaultBackend>(Path::new("."), &default_device())?;
//! let predictor = Predictor::new(model, parse_class_names(DEFAULT_CLASS_NAMES));
//! let prediction = predictor.predict_path(Path::new("leaf.jpg"))?;
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use inference::{Prediction, Predictor};
pub use model::{LoadedModel, Scorer};
pub use utils::error::{LeafScanError, Result};

/// Input side used when a model does not declare one
pub const DEFAULT_IMAGE_SIZE: usize = model::artifact::DEFAULT_INPUT_SIZE;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
