//! Offline puzzle database builder.
//!
//! Streams the compressed puzzle corpus through an external decompressor,
//! filters and classifies each row, enriches low-piece positions through the
//! tablebase service, and writes rating-bucketed shards plus a manifest. Each
//! invocation consumes a bounded number of rows and resumes where the last
//! one stopped.

pub mod buckets;
pub mod config;
pub mod enricher;
pub mod error;
pub mod ingest;
pub mod manifest;
pub mod pipeline;
pub mod state;
pub mod store;
pub mod tablebase;

pub use config::{BuildConfig, Cli, FilterConfig, Sources};
pub use error::BuildError;
pub use pipeline::{run, RunReport};
