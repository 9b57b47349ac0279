//! Pure building blocks for the puzzle database: record model, position
//! classification, continuation replay and the theme filter.

pub mod continuation;
pub mod filter;
pub mod position;
pub mod record;

pub use continuation::{build_continuation, continuation_text, Replay};
pub use filter::should_keep;
pub use position::{extract_pieces, PieceInventory, PositionError};
pub use record::{Provenance, PuzzleRecord, SideToMove};
