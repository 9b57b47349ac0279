//! Tablebase enrichment: turn a low-piece position into a short forced line.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use puzzle_core::{continuation_text, PieceInventory, Provenance, PuzzleRecord, Replay};

use crate::tablebase::{CandidateMove, TablebaseCache, TablebaseClient, TablebaseTransport};

/// Positions with more pieces than this are never sent to the tablebase.
pub const TABLEBASE_MAX_PIECES: u32 = 7;

pub const TABLEBASE_THEMES: [&str; 3] = ["tablebase", "endgame", "short"];

const RATING_UNKNOWN_DTM: i32 = 1300;
const RATING_BASE: i32 = 1900;
const RATING_PER_PLY: i32 = 70;
const RATING_DTM_CAP: u32 = 18;
const RATING_MIN: i32 = 700;
const RATING_MAX: i32 = 2000;
const RATING_STEP: i32 = 50;

/// Capture, check or mate somewhere in the line.
static SALIENT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[x+#]").expect("salient marker pattern is valid"));

/// Why a position produced no tablebase puzzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichRejection {
    /// Lookup failed or retries were exhausted
    Unavailable,
    /// Service returned no candidate moves
    NoMoves,
    /// No single move is clearly best
    Ambiguous,
    /// Best move does not win
    NotWinning,
    /// A move in the line could not be replayed
    IllegalReplay,
    /// Line is longer than two plies with no capture, check or mate
    NotSalient,
}

/// Pick the clearly best candidate, if there is one.
///
/// Candidates are ranked by outcome category, then by smaller absolute DTM
/// (unknown DTM ranks last). The leader is clearly best if it has a better
/// category than the runner-up, or if both win and the leader mates more
/// than `margin_plies` plies sooner.
pub fn select_clear_best_move(moves: &[CandidateMove], margin_plies: u32) -> Option<&CandidateMove> {
    let dtm_key = |m: &CandidateMove| m.dtm.map(|d| d.unsigned_abs()).unwrap_or(u32::MAX);

    let mut ranked: Vec<&CandidateMove> = moves.iter().collect();
    ranked.sort_by(|a, b| {
        b.category
            .score()
            .cmp(&a.category.score())
            .then_with(|| dtm_key(a).cmp(&dtm_key(b)))
    });

    let best = *ranked.first()?;
    let second = match ranked.get(1) {
        Some(second) => *second,
        None => return Some(best),
    };

    if best.category.score() > second.category.score() {
        return Some(best);
    }

    if best.category.is_winning() {
        if let (Some(best_dtm), Some(second_dtm)) = (best.dtm, second.dtm) {
            if best_dtm.unsigned_abs().saturating_add(margin_plies) < second_dtm.unsigned_abs() {
                return Some(best);
            }
        }
    }

    None
}

/// Rating from the first move's DTM: closer to mate rates higher.
pub fn tablebase_rating(dtm: Option<i32>) -> i32 {
    let Some(dtm) = dtm else {
        return RATING_UNKNOWN_DTM;
    };

    let plies = dtm.unsigned_abs().min(RATING_DTM_CAP) as i32;
    let raw = (RATING_BASE - plies * RATING_PER_PLY).clamp(RATING_MIN, RATING_MAX);
    ((raw as f64 / RATING_STEP as f64).round() as i32) * RATING_STEP
}

/// SAN equality ignoring check and mate suffixes.
fn same_san(a: &str, b: &str) -> bool {
    a.trim_end_matches(['+', '#']) == b.trim_end_matches(['+', '#'])
}

pub fn has_salient_marker<S: AsRef<str>>(san_line: &[S]) -> bool {
    san_line.iter().any(|san| SALIENT_MARKER.is_match(san.as_ref()))
}

/// Stable identity for a tablebase puzzle: `tb:` + 16 hex chars of SHA-256(fen).
pub fn tablebase_puzzle_id(fen: &str) -> String {
    let digest = Sha256::digest(fen.as_bytes());
    format!("tb:{}", &hex::encode(digest)[..16])
}

/// Builds tablebase puzzles for qualifying positions.
pub struct TablebaseEnricher<T> {
    client: TablebaseClient<T>,
    max_plies: usize,
    margin_plies: u32,
}

impl<T: TablebaseTransport> TablebaseEnricher<T> {
    pub fn new(client: TablebaseClient<T>, max_plies: usize, margin_plies: u32) -> Self {
        Self {
            client,
            max_plies,
            margin_plies,
        }
    }

    pub fn client(&self) -> &TablebaseClient<T> {
        &self.client
    }

    /// Query, pick the best move, replay a forced line and emit a record.
    pub async fn enrich(
        &self,
        cache: &mut TablebaseCache,
        fen: &str,
        pieces: &PieceInventory,
    ) -> Result<PuzzleRecord, EnrichRejection> {
        let initial = self
            .client
            .probe(cache, fen)
            .await
            .ok_or(EnrichRejection::Unavailable)?;
        if initial.moves.is_empty() {
            return Err(EnrichRejection::NoMoves);
        }

        let first = select_clear_best_move(&initial.moves, self.margin_plies)
            .ok_or(EnrichRejection::Ambiguous)?
            .clone();
        if !first.category.is_winning() {
            return Err(EnrichRejection::NotWinning);
        }

        let mut replay = Replay::from_fen(fen).map_err(|_| EnrichRejection::IllegalReplay)?;
        let mut san_line: Vec<String> = Vec::with_capacity(self.max_plies);

        for ply in 0..self.max_plies {
            let candidate = if ply == 0 {
                first.clone()
            } else {
                // Follow the service's top choice; a failed lookup ends the line
                let Some(next) = self.client.probe(cache, &replay.fen()).await else {
                    break;
                };
                match next.moves.first() {
                    Some(candidate) => candidate.clone(),
                    None => break,
                }
            };

            let san = replay.play(&candidate.uci).ok_or(EnrichRejection::IllegalReplay)?;
            if let Some(expected) = &candidate.san {
                if !same_san(expected, &san) {
                    return Err(EnrichRejection::IllegalReplay);
                }
            }
            let mate = san.ends_with('#');
            san_line.push(san);
            if mate {
                break;
            }
        }

        if san_line.is_empty() {
            return Err(EnrichRejection::NoMoves);
        }
        if san_line.len() > 2 && !has_salient_marker(&san_line) {
            return Err(EnrichRejection::NotSalient);
        }

        Ok(PuzzleRecord {
            puzzle_id: tablebase_puzzle_id(fen),
            fen: fen.to_string(),
            side_to_move: pieces.side_to_move,
            rating: tablebase_rating(first.dtm),
            piece_count: pieces.piece_count,
            white_pieces: pieces.white_pieces.clone(),
            black_pieces: pieces.black_pieces.clone(),
            continuation_text: continuation_text(fen, &san_line),
            continuation_san: san_line,
            themes: TABLEBASE_THEMES.iter().map(|t| t.to_string()).collect(),
            source: Provenance::TablebaseApi,
        })
    }
}
