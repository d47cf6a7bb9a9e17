//! Application state for the LeafScan server
//!
//! Built once at startup and shared read-only by every handler.

use std::path::PathBuf;
use std::sync::Arc;

use leafscan::Predictor;

use crate::history::HistoryStore;

pub struct AppState {
    /// Loaded model plus the configured class list
    pub predictor: Predictor,
    /// Absolute directory uploads are written to and served from
    pub upload_dir: PathBuf,
    /// Prediction log; `None` when no store is configured
    pub history: Option<Arc<dyn HistoryStore>>,
}

impl AppState {
    pub fn new(
        predictor: Predictor,
        upload_dir: PathBuf,
        history: Option<Arc<dyn HistoryStore>>,
    ) -> Self {
        Self {
            predictor,
            upload_dir,
            history,
        }
    }

    pub fn img_size(&self) -> usize {
        self.predictor.input_size()
    }
}

/// Shared state type for handlers
pub type SharedState = Arc<AppState>;
