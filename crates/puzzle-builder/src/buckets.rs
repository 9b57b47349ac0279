//! Rating buckets: capacity limits, identity dedup and shard rehydration.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use puzzle_core::PuzzleRecord;

use crate::error::BuildError;

pub const RATING_MIN: i32 = 600;
pub const RATING_MAX: i32 = 2800;
pub const RATING_BUCKET_SIZE: i32 = 100;

static SHARD_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^r(\d+)\.json$").expect("shard file pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Duplicate,
    BucketFull,
    OutOfRange,
}

/// Bucket for a rating, or `None` outside the supported span.
pub fn bucket_for(rating: i32) -> Option<i32> {
    if !(RATING_MIN..=RATING_MAX).contains(&rating) {
        return None;
    }
    Some(rating.div_euclid(RATING_BUCKET_SIZE) * RATING_BUCKET_SIZE)
}

/// Shard file name for a bucket.
pub fn shard_file_name(bucket: i32) -> String {
    format!("r{bucket}.json")
}

/// Accepted records grouped by rating bucket.
#[derive(Debug, Clone)]
pub struct BucketMap {
    max_per_bucket: usize,
    buckets: BTreeMap<i32, Vec<PuzzleRecord>>,
    seen_ids: HashSet<String>,
    seen_tablebase_fens: HashSet<String>,
}

impl BucketMap {
    pub fn new(max_per_bucket: usize) -> Self {
        Self {
            max_per_bucket,
            buckets: BTreeMap::new(),
            seen_ids: HashSet::new(),
            seen_tablebase_fens: HashSet::new(),
        }
    }

    /// Rebuild from shard files written by earlier runs.
    ///
    /// Only `r<bucket>.json` files are read. Repeated identities are dropped
    /// and each bucket is truncated to `max_per_bucket`. A shard that does
    /// not parse aborts the run.
    pub fn rehydrate(dir: &Path, max_per_bucket: usize) -> Result<Self, BuildError> {
        let mut map = Self::new(max_per_bucket);
        if !dir.is_dir() {
            return Ok(map);
        }

        let mut shards: Vec<(i32, std::path::PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(bucket) = SHARD_FILE
                .captures(name)
                .and_then(|caps| caps[1].parse::<i32>().ok())
            else {
                continue;
            };
            shards.push((bucket, path));
        }
        shards.sort();

        for (bucket, path) in shards {
            let raw = std::fs::read_to_string(&path)?;
            let records: Vec<PuzzleRecord> =
                serde_json::from_str(&raw).map_err(|e| BuildError::ShardCorrupt {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;

            let mut kept = Vec::with_capacity(records.len().min(max_per_bucket));
            for record in records {
                if kept.len() >= max_per_bucket {
                    break;
                }
                if !map.seen_ids.insert(record.puzzle_id.clone()) {
                    continue;
                }
                if record.is_tablebase() {
                    map.seen_tablebase_fens.insert(record.fen.clone());
                }
                kept.push(record);
            }

            debug!(bucket, count = kept.len(), path = %path.display(), "Rehydrated shard");
            if !kept.is_empty() {
                map.buckets.insert(bucket, kept);
            }
        }

        if !map.is_empty() {
            info!(buckets = map.buckets.len(), records = map.len(), "Loaded existing shards");
        }
        Ok(map)
    }

    pub fn max_per_bucket(&self) -> usize {
        self.max_per_bucket
    }

    /// Why a record with this rating and identity would be refused, if it would be.
    pub fn admission(&self, rating: i32, puzzle_id: &str) -> Option<AddOutcome> {
        let Some(bucket) = bucket_for(rating) else {
            return Some(AddOutcome::OutOfRange);
        };
        if self.seen_ids.contains(puzzle_id) {
            return Some(AddOutcome::Duplicate);
        }
        if self.bucket_len(bucket) >= self.max_per_bucket {
            return Some(AddOutcome::BucketFull);
        }
        None
    }

    /// Insert a record. Adding the same record twice yields `Duplicate`.
    pub fn add(&mut self, record: PuzzleRecord) -> AddOutcome {
        if let Some(refused) = self.admission(record.rating, &record.puzzle_id) {
            return refused;
        }
        if record.is_tablebase() && self.seen_tablebase_fens.contains(&record.fen) {
            return AddOutcome::Duplicate;
        }
        let Some(bucket) = bucket_for(record.rating) else {
            return AddOutcome::OutOfRange;
        };

        self.seen_ids.insert(record.puzzle_id.clone());
        if record.is_tablebase() {
            self.seen_tablebase_fens.insert(record.fen.clone());
        }
        self.buckets.entry(bucket).or_default().push(record);
        AddOutcome::Added
    }

    pub fn contains_id(&self, puzzle_id: &str) -> bool {
        self.seen_ids.contains(puzzle_id)
    }

    /// True if a tablebase record for this position was already accepted.
    pub fn has_tablebase_fen(&self, fen: &str) -> bool {
        self.seen_tablebase_fens.contains(fen)
    }

    pub fn bucket_len(&self, bucket: i32) -> usize {
        self.buckets.get(&bucket).map_or(0, Vec::len)
    }

    /// Non-empty buckets in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &[PuzzleRecord])> {
        self.buckets
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(bucket, records)| (*bucket, records.as_slice()))
    }

    pub fn records(&self) -> impl Iterator<Item = &PuzzleRecord> {
        self.buckets.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use puzzle_core::{Provenance, SideToMove};

    fn record(id: &str, rating: i32, source: Provenance) -> PuzzleRecord {
        PuzzleRecord {
            puzzle_id: id.to_string(),
            fen: format!("fen-{id}"),
            side_to_move: SideToMove::White,
            rating,
            piece_count: 5,
            white_pieces: vec!["Ke1".to_string()],
            black_pieces: vec!["Ke8".to_string()],
            continuation_san: vec!["Ra8#".to_string()],
            continuation_text: "1. Ra8#".to_string(),
            themes: vec!["mate".to_string()],
            source,
        }
    }

    #[test]
    fn test_bucket_for() {
        assert_eq!(bucket_for(600), Some(600));
        assert_eq!(bucket_for(1549), Some(1500));
        assert_eq!(bucket_for(2800), Some(2800));
        assert_eq!(bucket_for(599), None);
        assert_eq!(bucket_for(2801), None);
        assert_eq!(shard_file_name(1500), "r1500.json");
    }

    #[test]
    fn test_add_outcomes() {
        let mut map = BucketMap::new(2);
        assert_eq!(map.add(record("a", 1510, Provenance::LocalDb)), AddOutcome::Added);
        assert_eq!(map.add(record("a", 1510, Provenance::LocalDb)), AddOutcome::Duplicate);
        assert_eq!(map.add(record("b", 1599, Provenance::LocalDb)), AddOutcome::Added);
        assert_eq!(map.add(record("c", 1500, Provenance::LocalDb)), AddOutcome::BucketFull);
        assert_eq!(map.add(record("d", 3000, Provenance::LocalDb)), AddOutcome::OutOfRange);
        assert_eq!(map.add(record("e", 1600, Provenance::LocalDb)), AddOutcome::Added);

        assert_eq!(map.len(), 3);
        assert_eq!(map.bucket_len(1500), 2);
        assert_eq!(map.admission(1550, "z"), Some(AddOutcome::BucketFull));
        assert_eq!(map.admission(1650, "a"), Some(AddOutcome::Duplicate));
        assert_eq!(map.admission(1650, "z"), None);
    }

    #[test]
    fn test_tablebase_position_dedup() {
        let mut map = BucketMap::new(10);
        let first = record("tb:1", 1750, Provenance::TablebaseApi);
        let mut same_position = record("tb:2", 1750, Provenance::TablebaseApi);
        same_position.fen = first.fen.clone();

        assert_eq!(map.add(first.clone()), AddOutcome::Added);
        assert!(map.has_tablebase_fen(&first.fen));
        assert_eq!(map.add(same_position), AddOutcome::Duplicate);
    }

    #[test]
    fn test_rehydrate_drops_duplicates_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let shard = vec![
            record("a", 1500, Provenance::LocalDb),
            record("a", 1500, Provenance::LocalDb),
            record("b", 1500, Provenance::TablebaseApi),
            record("c", 1500, Provenance::LocalDb),
        ];
        std::fs::write(dir.path().join("r1500.json"), serde_json::to_string(&shard).unwrap()).unwrap();
        std::fs::write(dir.path().join("manifest.json"), "{}").unwrap();
        std::fs::write(dir.path().join("rx.json"), "not json").unwrap();

        let map = BucketMap::rehydrate(dir.path(), 2).unwrap();
        let ids: Vec<&str> = map.records().map(|r| r.puzzle_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(map.has_tablebase_fen("fen-b"));
        assert!(!map.contains_id("c"));
    }

    #[test]
    fn test_rehydrate_rejects_corrupt_shard() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("r900.json"), "[{\"puzzleId\": 1}]").unwrap();
        assert!(matches!(
            BucketMap::rehydrate(dir.path(), 10),
            Err(BuildError::ShardCorrupt { .. })
        ));
    }

    #[test]
    fn test_rehydrate_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = BucketMap::rehydrate(&dir.path().join("nope"), 10).unwrap();
        assert!(map.is_empty());
    }
}
