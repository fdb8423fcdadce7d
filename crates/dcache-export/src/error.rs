use std::io;
use std::path::PathBuf;

use dcache_core::DecodeError;
use thiserror::Error;

/// Errors raised on the export side
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Bad trace record: {0}")]
    Decode(#[from] DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Malformed {path}: {detail}")]
    Malformed { path: PathBuf, detail: String },

    #[error("Trace consumer thread panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, ExportError>;
