//! Eligibility filter for corpus puzzles, driven by theme tags.

/// Positions at or below this many pieces count as shallow endgames.
pub const LOW_PIECE_ENDGAME_THRESHOLD: u32 = 10;

/// Marker for lines the corpus itself flags as too long to be clear.
pub const TOO_LONG_THEME: &str = "veryLong";

pub const ENDGAME_THEMES: &[&str] = &[
    "endgame",
    "pawnEndgame",
    "rookEndgame",
    "bishopEndgame",
    "knightEndgame",
    "queenEndgame",
    "queenRookEndgame",
];

pub const TACTICAL_THEMES: &[&str] = &[
    "oneMove",
    "short",
    "fork",
    "pin",
    "skewer",
    "discoveredAttack",
    "doubleCheck",
    "hangingPiece",
    "trappedPiece",
    "sacrifice",
    "deflection",
    "attraction",
    "interference",
    "clearance",
    "capturingDefender",
    "xRayAttack",
    "backRankMate",
    "smotheredMate",
    "arabianMate",
    "anastasiaMate",
    "bodenMate",
    "dovetailMate",
    "hookMate",
    "doubleBishopMate",
];

/// Split a space-delimited theme column into tags.
pub fn parse_themes(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

pub fn is_endgame_theme(theme: &str) -> bool {
    ENDGAME_THEMES.contains(&theme)
}

/// `mate`, `mateIn2`, ... or any listed tactical motif.
pub fn is_tactical_or_mate_theme(theme: &str) -> bool {
    theme.starts_with("mate") || TACTICAL_THEMES.contains(&theme)
}

/// Themes that disqualify a puzzle unless the endgame rule lets it through.
pub fn is_excluded_theme(theme: &str) -> bool {
    theme == TOO_LONG_THEME || is_endgame_theme(theme)
}

/// Decide whether a corpus puzzle is short and clear enough to keep.
pub fn should_keep<S: AsRef<str>, M>(
    themes: &[S],
    move_codes: &[M],
    piece_count: u32,
    max_plies: usize,
    include_shallow_endgames: bool,
) -> bool {
    if move_codes.is_empty() || move_codes.len() > max_plies {
        return false;
    }
    has_clear_theme(themes, piece_count, include_shallow_endgames)
}

fn has_clear_theme<S: AsRef<str>>(themes: &[S], piece_count: u32, include_shallow_endgames: bool) -> bool {
    if themes.is_empty() || themes.iter().any(|t| t.as_ref() == TOO_LONG_THEME) {
        return false;
    }

    let has_endgame = themes.iter().any(|t| is_endgame_theme(t.as_ref()));
    let has_tactical = themes.iter().any(|t| is_tactical_or_mate_theme(t.as_ref()));

    if has_endgame {
        let shallow = include_shallow_endgames && piece_count <= LOW_PIECE_ENDGAME_THRESHOLD;
        if shallow || has_tactical {
            return true;
        }
    }

    if themes.iter().any(|t| is_excluded_theme(t.as_ref())) {
        return false;
    }
    has_tactical
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_MOVES: [&str; 3] = ["e2e4", "e7e5", "g1f3"];

    #[test]
    fn test_fork_middlegame_is_kept() {
        assert!(should_keep(&["fork", "middlegame"], &THREE_MOVES, 20, 4, false));
    }

    #[test]
    fn test_plain_endgame_with_many_pieces_rejected() {
        assert!(!should_keep(&["endgame"], &THREE_MOVES, 14, 4, false));
        assert!(!should_keep(&["endgame"], &THREE_MOVES, 14, 4, true));
    }

    #[test]
    fn test_shallow_endgame_needs_policy() {
        assert!(should_keep(&["rookEndgame"], &THREE_MOVES, 6, 4, true));
        assert!(!should_keep(&["rookEndgame"], &THREE_MOVES, 6, 4, false));
        assert!(should_keep(&["endgame"], &THREE_MOVES, 10, 4, true));
        assert!(!should_keep(&["endgame"], &THREE_MOVES, 11, 4, true));
    }

    #[test]
    fn test_endgame_with_tactic_is_kept() {
        assert!(should_keep(&["endgame", "skewer"], &THREE_MOVES, 14, 4, false));
        assert!(should_keep(&["pawnEndgame", "mateIn2"], &THREE_MOVES, 14, 4, false));
    }

    #[test]
    fn test_very_long_always_rejected() {
        assert!(!should_keep(&["fork", "veryLong"], &THREE_MOVES, 20, 4, true));
        assert!(!should_keep(&["endgame", "veryLong"], &THREE_MOVES, 4, 4, true));
    }

    #[test]
    fn test_no_themes_rejected() {
        let none: [&str; 0] = [];
        assert!(!should_keep(&none, &THREE_MOVES, 4, 4, true));
    }

    #[test]
    fn test_move_count_bounds() {
        let none: [&str; 0] = [];
        assert!(!should_keep(&["fork"], &none, 20, 4, false));
        assert!(!should_keep(&["fork"], &["a", "b", "c", "d", "e"], 20, 4, false));
        assert!(should_keep(&["fork"], &["a", "b", "c", "d"], 20, 4, false));
    }

    #[test]
    fn test_needs_tactical_or_mate_theme() {
        assert!(!should_keep(&["middlegame", "advantage"], &THREE_MOVES, 20, 4, false));
        assert!(should_keep(&["mate", "mateIn1"], &["h5f7"], 20, 4, false));
    }

    #[test]
    fn test_parse_themes() {
        assert_eq!(parse_themes(" fork  middlegame short "), vec!["fork", "middlegame", "short"]);
        assert!(parse_themes("").is_empty());
    }
}
