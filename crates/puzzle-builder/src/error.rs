//! Build error types. Every variant here aborts the run; row-local
//! problems are counted, never raised.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing input file: {}", .0.display())]
    InputMissing(PathBuf),

    #[error("Decompressor unavailable: {0}")]
    DecompressorUnavailable(String),

    #[error("Decompressor exited with status {code:?}. {stderr}")]
    DecompressorFailed { code: Option<i32>, stderr: String },

    #[error("Unexpected puzzle CSV header: missing column(s) {}", .missing.join(", "))]
    MalformedHeader { missing: Vec<String> },

    #[error("Existing build state version is {found}, expected {expected}. Run with --reset to rebuild with the current generator.")]
    StateVersion { found: u32, expected: u32 },

    #[error("Existing build state is unreadable ({0}). Run with --reset to rebuild.")]
    StateCorrupt(String),

    #[error("Existing build state uses {field}={existing}. Requested {field}={requested}. Run with --reset to change this filter.")]
    ConfigMismatch {
        field: &'static str,
        existing: String,
        requested: String,
    },

    #[error("Shard {} is unreadable ({reason}). Run with --reset to rebuild.", .path.display())]
    ShardCorrupt { path: PathBuf, reason: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
