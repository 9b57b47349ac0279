//! Puzzle record: the unit persisted to rating shards.

use serde::{Deserialize, Serialize};

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    /// Row from the bulk puzzle corpus.
    #[serde(rename = "local_db")]
    LocalDb,
    /// Synthesized from tablebase lookups.
    #[serde(rename = "tablebase_api")]
    TablebaseApi,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::LocalDb => "local_db",
            Provenance::TablebaseApi => "tablebase_api",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SideToMove {
    #[serde(rename = "w")]
    White,
    #[serde(rename = "b")]
    Black,
}

impl SideToMove {
    /// Read the side to move from the second field of a position string.
    /// Anything other than `b` is treated as white.
    pub fn from_fen(fen: &str) -> Self {
        match fen.split_whitespace().nth(1) {
            Some("b") => SideToMove::Black,
            _ => SideToMove::White,
        }
    }
}

/// A puzzle accepted into the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PuzzleRecord {
    /// Globally unique identity (corpus id, or `tb:<hash>` for tablebase records)
    pub puzzle_id: String,
    pub fen: String,
    pub side_to_move: SideToMove,
    pub rating: i32,
    pub piece_count: u32,
    pub white_pieces: Vec<String>,
    pub black_pieces: Vec<String>,
    /// Notated moves, always 1..=max plies long
    pub continuation_san: Vec<String>,
    pub continuation_text: String,
    pub themes: Vec<String>,
    pub source: Provenance,
}

impl PuzzleRecord {
    pub fn is_tablebase(&self) -> bool {
        self.source == Provenance::TablebaseApi
    }
}
