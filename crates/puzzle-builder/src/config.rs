//! Build configuration from CLI flags and environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use serde::{Deserialize, Serialize};

use puzzle_core::filter::LOW_PIECE_ENDGAME_THRESHOLD;

pub const DEFAULT_TABLEBASE_URL: &str = "https://tablebase.lichess.ovh/standard";

/// Which puzzle sources feed the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sources {
    pub lichess: bool,
    pub tablebase: bool,
}

impl Sources {
    /// Canonical comma-separated form, used to compare configurations.
    pub fn key(&self) -> String {
        let mut parts = Vec::new();
        if self.lichess {
            parts.push("lichess");
        }
        if self.tablebase {
            parts.push("tablebase");
        }
        parts.join(",")
    }

    /// Provenance labels as listed in the manifest.
    pub fn used_labels(&self) -> Vec<String> {
        let mut used = Vec::new();
        if self.lichess {
            used.push("lichess".to_string());
        }
        if self.tablebase {
            used.push("tablebase_api".to_string());
        }
        used
    }
}

impl FromStr for Sources {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut sources = Sources {
            lichess: false,
            tablebase: false,
        };

        for token in raw.split(',').map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty()) {
            match token.as_str() {
                "lichess" => sources.lichess = true,
                "tablebase" => sources.tablebase = true,
                other => return Err(format!("Unknown source '{other}'. Allowed: lichess,tablebase")),
            }
        }

        if !sources.lichess && !sources.tablebase {
            return Err("At least one source must be enabled. Allowed: lichess,tablebase".to_string());
        }
        Ok(sources)
    }
}

impl fmt::Display for Sources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Settings that define what a dataset contains. These may not change
/// between runs without a reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilterConfig {
    pub max_pieces: u32,
    pub max_continuation_plies: u32,
    pub include_endgames_low_piece: bool,
    pub sources: Sources,
    pub tablebase_budget: u32,
    /// How many plies faster a winning move must mate than the runner-up
    /// to count as clearly best.
    pub tie_break_margin_plies: u32,
}

/// Everything a single pipeline run needs.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub filter: FilterConfig,
    pub rows_per_run: u64,
    pub max_per_bucket: usize,
    pub reset: bool,
    pub full: bool,
    pub tablebase_url: String,
}

/// Build the sharded puzzle database from the compressed puzzle corpus
#[derive(Parser, Debug)]
#[command(name = "build-puzzle-db", version, about)]
pub struct Cli {
    /// Compressed puzzle CSV
    #[arg(long, default_value = "lichess_db_puzzle.csv.zst")]
    pub input: PathBuf,

    /// Directory receiving shards, manifest and build state
    #[arg(long, default_value = "public/puzzles")]
    pub output: PathBuf,

    /// Discard existing state and shards before building
    #[arg(long)]
    pub reset: bool,

    /// Read the whole input in this run
    #[arg(long)]
    pub full: bool,

    /// Rows to consume in this run
    #[arg(long, env = "PUZZLES_ROWS_PER_RUN", default_value_t = 250_000,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub rows: u64,

    #[arg(long, env = "PUZZLES_MAX_PIECES", default_value_t = 7,
          value_parser = clap::value_parser!(u32).range(2..=32))]
    pub max_pieces: u32,

    #[arg(long, env = "PUZZLES_MAX_CONTINUATION_PLIES", default_value_t = 4,
          value_parser = clap::value_parser!(u32).range(1..=12))]
    pub max_plies: u32,

    /// Accepted tablebase puzzles per run
    #[arg(long, env = "PUZZLES_TABLEBASE_BUDGET", default_value_t = 250)]
    pub tablebase_budget: u32,

    #[arg(long, env = "PUZZLES_MAX_PER_BUCKET", default_value_t = 10_000,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub max_per_bucket: u64,

    /// Comma-separated: lichess,tablebase
    #[arg(long, env = "PUZZLES_SOURCES", default_value = "lichess,tablebase")]
    pub sources: Sources,

    #[arg(long, conflicts_with = "exclude_endgames_low_piece")]
    pub include_endgames_low_piece: bool,

    #[arg(long)]
    pub exclude_endgames_low_piece: bool,

    #[arg(long, default_value_t = 1)]
    pub tie_break_margin: u32,

    /// zstd binary to use instead of the one on PATH
    #[arg(long, env = "ZSTD_BIN")]
    pub zstd_bin: Option<PathBuf>,

    #[arg(long, env = "TABLEBASE_URL", default_value = DEFAULT_TABLEBASE_URL)]
    pub tablebase_url: String,
}

impl Cli {
    pub fn into_config(self) -> BuildConfig {
        // Low-piece endgames default on when the piece cap is already shallow
        let include_endgames_low_piece = if self.include_endgames_low_piece {
            true
        } else if self.exclude_endgames_low_piece {
            false
        } else {
            self.max_pieces <= LOW_PIECE_ENDGAME_THRESHOLD
        };

        BuildConfig {
            input: self.input,
            output_dir: self.output,
            filter: FilterConfig {
                max_pieces: self.max_pieces,
                max_continuation_plies: self.max_plies,
                include_endgames_low_piece,
                sources: self.sources,
                tablebase_budget: self.tablebase_budget,
                tie_break_margin_plies: self.tie_break_margin,
            },
            rows_per_run: if self.full { u64::MAX } else { self.rows },
            max_per_bucket: self.max_per_bucket as usize,
            reset: self.reset,
            full: self.full,
            tablebase_url: self.tablebase_url,
        }
    }
}
