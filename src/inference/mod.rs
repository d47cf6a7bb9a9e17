//! Inference module: class selection and the image-to-label predictor

pub mod predictor;

pub use predictor::{parse_class_names, select_class, Prediction, Predictor, DEFAULT_CLASS_NAMES};
