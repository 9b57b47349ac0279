//! Resumable build state: row cursor, cumulative counters and the filter
//! settings that produced the dataset.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{BuildConfig, FilterConfig};
use crate::error::BuildError;
use crate::store::write_json_atomic;

pub const STATE_VERSION: u32 = 5;
pub const STATE_FILE: &str = "build-state.json";

/// Per-reason tallies. Used both per run and cumulatively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Counters {
    pub kept: u64,
    pub lichess_kept: u64,
    pub skipped_invalid: u64,
    pub skipped_out_of_range: u64,
    pub skipped_piece_cap: u64,
    pub skipped_not_clear: u64,
    pub skipped_cap: u64,
    pub duplicates: u64,
    pub tablebase_candidates: u64,
    pub tablebase_kept: u64,
    pub tablebase_skipped: u64,
}

impl Counters {
    /// Rows rejected for any reason other than a failed tablebase attempt.
    pub fn skipped_total(&self) -> u64 {
        self.skipped_invalid
            + self.skipped_out_of_range
            + self.skipped_piece_cap
            + self.skipped_not_clear
            + self.skipped_cap
            + self.duplicates
    }

    pub fn absorb(&mut self, other: &Counters) {
        self.kept += other.kept;
        self.lichess_kept += other.lichess_kept;
        self.skipped_invalid += other.skipped_invalid;
        self.skipped_out_of_range += other.skipped_out_of_range;
        self.skipped_piece_cap += other.skipped_piece_cap;
        self.skipped_not_clear += other.skipped_not_clear;
        self.skipped_cap += other.skipped_cap;
        self.duplicates += other.duplicates;
        self.tablebase_candidates += other.tablebase_candidates;
        self.tablebase_kept += other.tablebase_kept;
        self.tablebase_skipped += other.tablebase_skipped;
    }
}

/// What one run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunStats {
    pub rows_advanced: u64,
    pub counters: Counters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BuildState {
    pub version: u32,
    /// Input file name
    pub source: String,
    /// Data rows consumed so far, header excluded
    pub rows_processed: u64,
    pub complete: bool,
    pub runs: u64,
    pub totals: Counters,
    pub filter: FilterConfig,
    pub rows_per_run: u64,
    pub max_per_bucket: usize,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: Option<u32>,
}

impl BuildState {
    pub fn fresh(config: &BuildConfig) -> Self {
        Self {
            version: STATE_VERSION,
            source: source_name(&config.input),
            rows_processed: 0,
            complete: false,
            runs: 0,
            totals: Counters::default(),
            filter: config.filter.clone(),
            rows_per_run: config.rows_per_run,
            max_per_bucket: config.max_per_bucket,
            last_run_at: None,
        }
    }

    /// Load the state for a new run.
    ///
    /// A reset or a missing file yields fresh state. An existing state must
    /// have the current version and the same filter settings; row budget and
    /// bucket cap are taken from the new request.
    pub fn load(path: &Path, config: &BuildConfig) -> Result<Self, BuildError> {
        if config.reset || !path.exists() {
            return Ok(Self::fresh(config));
        }

        let raw = std::fs::read_to_string(path)?;
        let probe: VersionProbe =
            serde_json::from_str(&raw).map_err(|e| BuildError::StateCorrupt(e.to_string()))?;
        let found = probe.version.unwrap_or(0);
        if found != STATE_VERSION {
            return Err(BuildError::StateVersion {
                found,
                expected: STATE_VERSION,
            });
        }

        let mut state: BuildState =
            serde_json::from_str(&raw).map_err(|e| BuildError::StateCorrupt(e.to_string()))?;
        check_filter(&state.filter, &config.filter)?;

        state.rows_per_run = config.rows_per_run;
        state.max_per_bucket = config.max_per_bucket;
        info!(
            rows_processed = state.rows_processed,
            runs = state.runs,
            complete = state.complete,
            "Loaded build state"
        );
        Ok(state)
    }

    /// Fold a finished run into the cumulative state.
    pub fn record_run(&mut self, run: &RunStats, truncated: bool) {
        self.rows_processed += run.rows_advanced;
        self.runs += 1;
        self.totals.absorb(&run.counters);
        self.complete = !truncated;
        self.last_run_at = Some(Utc::now());
    }

    pub fn save(&self, path: &Path) -> Result<(), BuildError> {
        write_json_atomic(path, self)
    }
}

pub fn source_name(input: &Path) -> String {
    input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string())
}

fn check_filter(existing: &FilterConfig, requested: &FilterConfig) -> Result<(), BuildError> {
    fn mismatch(field: &'static str, existing: impl ToString, requested: impl ToString) -> BuildError {
        BuildError::ConfigMismatch {
            field,
            existing: existing.to_string(),
            requested: requested.to_string(),
        }
    }

    if existing.max_pieces != requested.max_pieces {
        return Err(mismatch("maxPieces", existing.max_pieces, requested.max_pieces));
    }
    if existing.max_continuation_plies != requested.max_continuation_plies {
        return Err(mismatch(
            "maxContinuationPlies",
            existing.max_continuation_plies,
            requested.max_continuation_plies,
        ));
    }
    if existing.include_endgames_low_piece != requested.include_endgames_low_piece {
        return Err(mismatch(
            "includeEndgamesLowPiece",
            existing.include_endgames_low_piece,
            requested.include_endgames_low_piece,
        ));
    }
    if existing.sources.key() != requested.sources.key() {
        return Err(mismatch("sources", existing.sources, requested.sources));
    }
    if existing.tablebase_budget != requested.tablebase_budget {
        return Err(mismatch("tablebaseBudget", existing.tablebase_budget, requested.tablebase_budget));
    }
    if existing.tie_break_margin_plies != requested.tie_break_margin_plies {
        return Err(mismatch(
            "tieBreakMarginPlies",
            existing.tie_break_margin_plies,
            requested.tie_break_margin_plies,
        ));
    }
    Ok(())
}
