//! LeafScan Server
//!
//! Loads the model once at startup, then serves predictions, uploaded
//! images, prediction history and a health check over HTTP.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use leafscan::backend::{backend_name, default_device, DefaultBackend};
use leafscan::inference::{parse_class_names, Predictor, DEFAULT_CLASS_NAMES};
use leafscan::model::load_model;
use leafscan::utils::logging::{init_logging, LogConfig, LogLevel};
use leafscan_server::history::{HistoryStore, InMemoryHistory, MongoHistory};
use leafscan_server::{app, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HistoryBackend {
    /// MongoDB, enabled when a URI is configured
    Mongo,
    /// Process-local, lost on restart
    Memory,
}

/// LeafScan inference server
#[derive(Parser, Debug)]
#[command(name = "leafscan-server")]
#[command(version)]
#[command(about = "HTTP inference server for the LeafScan leaf disease classifier")]
struct Cli {
    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "5000")]
    port: u16,

    /// Directory holding model.mpk, model.bin or model/ (defaults to the executable's directory)
    #[arg(long, env = "LEAFSCAN_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Where uploads are stored (defaults to <base-dir>/uploads)
    #[arg(long, env = "UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    /// Comma-separated class names, in model output order
    #[arg(long, env = "CLASS_NAMES", default_value = DEFAULT_CLASS_NAMES)]
    class_names: String,

    /// MongoDB connection string; history is disabled when unset
    #[arg(long, env = "MONGO_URI")]
    mongo_uri: Option<String>,

    #[arg(long, env = "MONGO_DB", default_value = "airy_ai_db")]
    mongo_db: String,

    #[arg(long, env = "MONGO_COLLECTION", default_value = "history")]
    mongo_collection: String,

    /// Prediction history backend
    #[arg(long, env = "LEAFSCAN_HISTORY", value_enum, default_value = "mongo")]
    history: HistoryBackend,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig {
            level: LogLevel::parse(&cli.log_level),
            ..LogConfig::production()
        }
    };
    let _ = init_logging(&log_config);

    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => executable_dir()?,
    };
    let upload_dir = absolute(cli.upload_dir.unwrap_or_else(|| base_dir.join("uploads")))?;
    std::fs::create_dir_all(&upload_dir)
        .with_context(|| format!("Failed to create upload dir {}", upload_dir.display()))?;

    info!("LeafScan Server v{} ({})", env!("CARGO_PKG_VERSION"), backend_name());
    info!("  Base dir:   {}", base_dir.display());
    info!("  Upload dir: {}", upload_dir.display());

    let model = load_model::<DefaultBackend>(&base_dir, &default_device())?;
    let predictor = Predictor::new(model, parse_class_names(&cli.class_names));
    info!("  Classes:    {:?}", predictor.class_names());

    let history: Option<Arc<dyn HistoryStore>> = match (cli.history, cli.mongo_uri) {
        (HistoryBackend::Memory, _) => {
            info!("Prediction history kept in memory");
            Some(Arc::new(InMemoryHistory::new()))
        }
        (HistoryBackend::Mongo, Some(uri)) => {
            match MongoHistory::connect(&uri, &cli.mongo_db, &cli.mongo_collection).await {
                Ok(store) => {
                    info!(
                        "Prediction history in MongoDB {}.{}",
                        cli.mongo_db, cli.mongo_collection
                    );
                    Some(Arc::new(store))
                }
                Err(e) => {
                    warn!("MongoDB unavailable, history disabled: {}", e);
                    None
                }
            }
        }
        (HistoryBackend::Mongo, None) => {
            info!("MONGO_URI not set, history disabled");
            None
        }
    };

    let state = Arc::new(AppState::new(predictor, upload_dir, history));

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}

fn executable_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("Cannot locate the server executable")?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

fn absolute(path: PathBuf) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
