//! Position classification: piece inventory, side to move and piece count.

use shakmaty::{fen::Fen, CastlingMode, Chess, Color, Position};
use thiserror::Error;

use crate::record::SideToMove;

/// Inventory sort order by role letter.
const ROLE_ORDER: &str = "KQRBNP";

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("invalid FEN '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },
}

/// Piece inventory of a position, one token per piece (`Qd1`, `Pe4`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceInventory {
    pub side_to_move: SideToMove,
    pub white_pieces: Vec<String>,
    pub black_pieces: Vec<String>,
    /// Total pieces on the board, kings included
    pub piece_count: u32,
}

/// Parse a FEN string into a legal standard-chess position.
pub fn parse_position(fen: &str) -> Result<Chess, PositionError> {
    let parsed: Fen = fen.trim().parse().map_err(|e: shakmaty::fen::ParseFenError| {
        PositionError::InvalidFen {
            fen: fen.to_string(),
            reason: e.to_string(),
        }
    })?;

    parsed
        .into_position::<Chess>(CastlingMode::Standard)
        .map_err(|e| PositionError::InvalidFen {
            fen: fen.to_string(),
            reason: e.to_string(),
        })
}

/// Derive the piece inventory of a FEN position.
pub fn extract_pieces(fen: &str) -> Result<PieceInventory, PositionError> {
    let pos = parse_position(fen)?;
    Ok(inventory_of(&pos))
}

/// Piece inventory of an already parsed position.
pub fn inventory_of(pos: &Chess) -> PieceInventory {
    let board = pos.board();
    let mut white_pieces = Vec::new();
    let mut black_pieces = Vec::new();

    for sq in board.occupied() {
        if let Some(piece) = board.piece_at(sq) {
            let token = format!("{}{}", piece.role.upper_char(), sq);
            match piece.color {
                Color::White => white_pieces.push(token),
                Color::Black => black_pieces.push(token),
            }
        }
    }

    white_pieces.sort_by(|a, b| piece_sort_index(a).cmp(&piece_sort_index(b)).then_with(|| a.cmp(b)));
    black_pieces.sort_by(|a, b| piece_sort_index(a).cmp(&piece_sort_index(b)).then_with(|| a.cmp(b)));

    let piece_count = (white_pieces.len() + black_pieces.len()) as u32;
    let side_to_move = match pos.turn() {
        Color::White => SideToMove::White,
        Color::Black => SideToMove::Black,
    };

    PieceInventory {
        side_to_move,
        white_pieces,
        black_pieces,
        piece_count,
    }
}

fn piece_sort_index(token: &str) -> usize {
    token
        .chars()
        .next()
        .and_then(|c| ROLE_ORDER.find(c))
        .unwrap_or(ROLE_ORDER.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_pieces_start_position() {
        let inv = extract_pieces("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").unwrap();
        assert_eq!(inv.piece_count, 32);
        assert_eq!(inv.side_to_move, SideToMove::White);
        assert_eq!(inv.white_pieces[0], "Ke1");
        assert_eq!(inv.white_pieces[1], "Qd1");
        assert_eq!(inv.white_pieces[2], "Ra1");
        assert_eq!(inv.white_pieces[3], "Rh1");
        assert_eq!(inv.black_pieces[0], "Ke8");
        assert_eq!(inv.black_pieces.last().unwrap(), "Ph7");
    }

    #[test]
    fn test_extract_pieces_endgame() {
        let inv = extract_pieces("8/8/8/4k3/8/8/4P3/4K3 b - - 0 50").unwrap();
        assert_eq!(inv.piece_count, 3);
        assert_eq!(inv.side_to_move, SideToMove::Black);
        assert_eq!(inv.white_pieces, vec!["Ke1", "Pe2"]);
        assert_eq!(inv.black_pieces, vec!["Ke5"]);
    }

    #[test]
    fn test_extract_pieces_rejects_garbage() {
        assert!(extract_pieces("not a fen").is_err());
        // No kings
        assert!(extract_pieces("8/8/8/8/8/8/8/8 w - - 0 1").is_err());
    }
}
