//! Shard writer and manifest: the only files downstream readers consume.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use puzzle_core::Provenance;

use crate::buckets::{shard_file_name, BucketMap, RATING_BUCKET_SIZE, RATING_MAX, RATING_MIN};
use crate::error::BuildError;
use crate::state::{BuildState, RunStats, STATE_FILE};
use crate::store::write_json_atomic;

/// Version 5 derives `tb:` puzzle ids from SHA-256, so tablebase ids differ
/// from datasets written by earlier versions. Rebuild with `--reset` rather
/// than mixing them.
pub const MANIFEST_VERSION: u32 = 5;
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SELECTION_PROFILE: &str = "blindfold-short-forcing-v1";
pub const SHARD_PATTERN: &str = "r{bucket}.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardEntry {
    pub bucket: i32,
    pub file: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceHistogram {
    pub local_db: u64,
    pub tablebase_api: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Manifest {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub source: String,
    pub rating_min: i32,
    pub rating_max: i32,
    pub rating_bucket_size: i32,
    pub max_per_bucket: usize,
    pub max_pieces: u32,
    pub max_continuation_plies: u32,
    pub include_endgames_low_piece: bool,
    pub tie_break_margin_plies: u32,
    pub filter_profile: String,
    pub selection_profile: String,
    pub sources_used: Vec<String>,
    pub tablebase_budget: u32,
    /// Piece count -> records
    pub piece_histogram: BTreeMap<u32, u64>,
    pub source_histogram: SourceHistogram,
    pub rows_scanned: u64,
    pub rows_kept: u64,
    pub rows_skipped: u64,
    pub complete: bool,
    pub shard_pattern: String,
    pub files: Vec<ShardEntry>,
    pub last_run: RunStats,
}

impl Manifest {
    pub fn describe(buckets: &BucketMap, state: &BuildState, run: &RunStats, files: Vec<ShardEntry>) -> Self {
        let mut piece_histogram = BTreeMap::new();
        let mut source_histogram = SourceHistogram::default();
        for record in buckets.records() {
            *piece_histogram.entry(record.piece_count).or_insert(0) += 1;
            match record.source {
                Provenance::LocalDb => source_histogram.local_db += 1,
                Provenance::TablebaseApi => source_histogram.tablebase_api += 1,
            }
        }

        Self {
            version: MANIFEST_VERSION,
            generated_at: Utc::now(),
            source: state.source.clone(),
            rating_min: RATING_MIN,
            rating_max: RATING_MAX,
            rating_bucket_size: RATING_BUCKET_SIZE,
            max_per_bucket: state.max_per_bucket,
            max_pieces: state.filter.max_pieces,
            max_continuation_plies: state.filter.max_continuation_plies,
            include_endgames_low_piece: state.filter.include_endgames_low_piece,
            tie_break_margin_plies: state.filter.tie_break_margin_plies,
            filter_profile: SELECTION_PROFILE.to_string(),
            selection_profile: SELECTION_PROFILE.to_string(),
            sources_used: state.filter.sources.used_labels(),
            tablebase_budget: state.filter.tablebase_budget,
            piece_histogram,
            source_histogram,
            rows_scanned: state.rows_processed,
            rows_kept: state.totals.kept,
            rows_skipped: state.totals.skipped_total(),
            complete: state.complete,
            shard_pattern: SHARD_PATTERN.to_string(),
            files,
            last_run: *run,
        }
    }
}

/// Flush every bucket to its shard, then the state, then the manifest.
///
/// Each file is replaced atomically. The manifest goes last so a reader never
/// sees it describe shards that are not on disk yet.
pub fn write_shards_and_manifest(
    dir: &Path,
    buckets: &BucketMap,
    state: &BuildState,
    run: &RunStats,
) -> Result<Manifest, BuildError> {
    std::fs::create_dir_all(dir)?;

    let mut files = Vec::new();
    for (bucket, records) in buckets.iter() {
        let file = shard_file_name(bucket);
        write_json_atomic(&dir.join(&file), records)?;
        files.push(ShardEntry {
            bucket,
            file,
            count: records.len(),
        });
    }

    state.save(&dir.join(STATE_FILE))?;

    let manifest = Manifest::describe(buckets, state, run, files);
    write_json_atomic(&dir.join(MANIFEST_FILE), &manifest)?;
    info!(
        shards = manifest.files.len(),
        records = manifest.rows_kept,
        complete = manifest.complete,
        "Wrote shards and manifest"
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cli;
    use crate::state::Counters;
    use clap::Parser;
    use puzzle_core::{PuzzleRecord, SideToMove};

    fn record(id: &str, rating: i32, piece_count: u32, source: Provenance) -> PuzzleRecord {
        PuzzleRecord {
            puzzle_id: id.to_string(),
            fen: format!("fen-{id}"),
            side_to_move: SideToMove::Black,
            rating,
            piece_count,
            white_pieces: vec![],
            black_pieces: vec![],
            continuation_san: vec!["Qb8#".to_string()],
            continuation_text: "1. Qb8#".to_string(),
            themes: vec!["mate".to_string()],
            source,
        }
    }

    #[test]
    fn test_write_shards_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = Cli::try_parse_from(["build-puzzle-db"]).unwrap().into_config();
        let mut state = BuildState::fresh(&config);
        let run = RunStats {
            rows_advanced: 10,
            counters: Counters {
                kept: 3,
                lichess_kept: 2,
                tablebase_kept: 1,
                skipped_not_clear: 4,
                tablebase_skipped: 2,
                ..Counters::default()
            },
        };
        state.record_run(&run, false);

        let mut buckets = BucketMap::new(10);
        buckets.add(record("b", 1720, 6, Provenance::LocalDb));
        buckets.add(record("a", 900, 4, Provenance::LocalDb));
        buckets.add(record("tb:1", 1750, 3, Provenance::TablebaseApi));

        let manifest = write_shards_and_manifest(dir.path(), &buckets, &state, &run).unwrap();
        let buckets_written: Vec<i32> = manifest.files.iter().map(|f| f.bucket).collect();
        assert_eq!(buckets_written, vec![900, 1700]);
        assert_eq!(manifest.files[1].count, 2);
        assert_eq!(manifest.source_histogram, SourceHistogram { local_db: 2, tablebase_api: 1 });
        assert_eq!(manifest.piece_histogram.get(&3), Some(&1));
        assert_eq!(manifest.rows_scanned, 10);
        assert_eq!(manifest.rows_skipped, 4);
        assert!(manifest.complete);

        let on_disk: Manifest =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(on_disk, manifest);

        let shard: Vec<PuzzleRecord> =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("r1700.json")).unwrap()).unwrap();
        assert_eq!(shard.len(), 2);
        assert!(dir.path().join(STATE_FILE).exists());
    }

    #[test]
    fn test_manifest_json_keys() {
        let config = Cli::try_parse_from(["build-puzzle-db"]).unwrap().into_config();
        let state = BuildState::fresh(&config);
        let manifest = Manifest::describe(&BucketMap::new(1), &state, &RunStats::default(), vec![]);
        let value = serde_json::to_value(&manifest).unwrap();

        assert_eq!(value["version"], 5);
        assert_eq!(value["shardPattern"], "r{bucket}.json");
        assert_eq!(value["sourcesUsed"], serde_json::json!(["lichess", "tablebase_api"]));
        assert_eq!(value["sourceHistogram"]["local_db"], 0);
        assert_eq!(value["lastRun"]["rowsAdvanced"], 0);
        assert_eq!(value["complete"], false);
    }
}
