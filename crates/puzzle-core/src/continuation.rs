//! Continuation building: replay UCI move codes and render SAN lines.

use shakmaty::{fen::Fen, san::San, uci::UciMove, Chess, EnPassantMode, Position};

use crate::position::{parse_position, PositionError};

/// A position being replayed move by move.
///
/// Wraps the rules engine: each `play` either returns the SAN of a legal move
/// (with `+`/`#` suffix) or `None` if the code does not parse or is illegal.
#[derive(Debug, Clone)]
pub struct Replay {
    pos: Chess,
}

impl Replay {
    pub fn from_fen(fen: &str) -> Result<Self, PositionError> {
        Ok(Self {
            pos: parse_position(fen)?,
        })
    }

    /// Play a UCI move code, returning its SAN.
    pub fn play(&mut self, code: &str) -> Option<String> {
        let uci: UciMove = code.trim().parse().ok()?;
        let mv = uci.to_move(&self.pos).ok()?;
        let san = San::from_move(&self.pos, mv.clone()).to_string();
        self.pos.play_unchecked(mv);

        let suffix = if self.pos.is_checkmate() {
            "#"
        } else if self.pos.is_check() {
            "+"
        } else {
            ""
        };
        Some(format!("{san}{suffix}"))
    }

    /// Current position as FEN.
    pub fn fen(&self) -> String {
        Fen::from_position(&self.pos, EnPassantMode::Legal).to_string()
    }

    pub fn is_checkmate(&self) -> bool {
        self.pos.is_checkmate()
    }
}

/// Replay up to `max_plies` move codes from `fen`.
///
/// Returns an empty list if the position is invalid or any move in the
/// replayed prefix is illegal. Never panics on malformed input.
pub fn build_continuation<S: AsRef<str>>(fen: &str, move_codes: &[S], max_plies: usize) -> Vec<String> {
    let mut replay = match Replay::from_fen(fen) {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };

    let mut san_line = Vec::with_capacity(move_codes.len().min(max_plies));
    for code in move_codes.iter().take(max_plies) {
        match replay.play(code.as_ref()) {
            Some(san) => san_line.push(san),
            None => return Vec::new(),
        }
    }
    san_line
}

/// Format SAN moves as a numbered line, e.g. `"17... Kd7 18. Qxe7+"`.
///
/// Side to move and starting move number come from the FEN's second and
/// sixth fields; a missing or invalid move number counts as 1.
pub fn continuation_text<S: AsRef<str>>(fen: &str, san_line: &[S]) -> String {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    let mut white_to_move = fields.get(1).copied() != Some("b");
    let mut move_number: u32 = fields
        .get(5)
        .and_then(|n| n.parse().ok())
        .filter(|n| *n >= 1)
        .unwrap_or(1);

    let mut tokens = Vec::with_capacity(san_line.len());
    for san in san_line {
        if white_to_move {
            tokens.push(format!("{}. {}", move_number, san.as_ref()));
        } else {
            tokens.push(format!("{}... {}", move_number, san.as_ref()));
            move_number += 1;
        }
        white_to_move = !white_to_move;
    }

    tokens.join(" ")
}
