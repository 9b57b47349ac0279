#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use puzzle_builder::ingest::DecompressCommand;
use puzzle_builder::tablebase::{
    CandidateMove, Category, FetchError, RetryPolicy, TablebaseClient, TablebaseResponse, TablebaseTransport,
};
use puzzle_builder::{BuildConfig, Cli};

pub const HEADER: &str = "PuzzleId,FEN,Moves,Rating,RatingDeviation,Popularity,NbPlays,Themes,GameUrl,OpeningTags";

/// 18 pieces, both sides may still castle.
pub const MIDDLEGAME: &str = "r3k2r/ppp2ppp/8/8/8/8/PPP2PPP/R3K2R w KQkq - 0 20";

/// White mates with Qb8#.
pub const MATE_B8: &str = "7k/8/6K1/8/8/8/8/1Q6 w - - 0 1";
/// White mates with Qc8#.
pub const MATE_C8: &str = "7k/8/6K1/8/8/8/8/2Q5 w - - 0 1";

/// One corpus line with the columns the builder ignores filled in.
pub fn row(id: &str, fen: &str, moves: &str, rating: i32, themes: &str) -> String {
    format!("{id},{fen},{moves},{rating},75,90,1000,{themes},https://lichess.org/training/{id},")
}

/// Write a corpus file (header plus rows). Stands in for the compressed input.
pub fn write_corpus(dir: &Path, rows: &[String]) -> PathBuf {
    let path = dir.join("lichess_db_puzzle.csv.zst");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    path
}

/// `cat` passes the test corpus through unchanged.
pub fn cat() -> DecompressCommand {
    DecompressCommand {
        program: PathBuf::from("cat"),
        args: vec![],
    }
}

pub fn config(input: &Path, output: &Path, extra: &[&str]) -> BuildConfig {
    let input = input.to_string_lossy().into_owned();
    let output = output.to_string_lossy().into_owned();
    let mut argv = vec![
        "build-puzzle-db",
        "--input",
        input.as_str(),
        "--output",
        output.as_str(),
        "--max-pieces",
        "20",
    ];
    argv.extend_from_slice(extra);
    Cli::try_parse_from(argv).unwrap().into_config()
}

pub fn candidate(uci: &str, category: Category, dtm: Option<i32>) -> CandidateMove {
    CandidateMove {
        uci: uci.to_string(),
        san: None,
        category,
        dtm,
    }
}

/// In-memory tablebase keyed by board placement. Unknown positions get a 404.
#[derive(Default)]
pub struct ScriptedTablebase {
    responses: HashMap<String, Vec<CandidateMove>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTablebase {
    pub fn with(mut self, placement: &str, moves: Vec<CandidateMove>) -> Self {
        self.responses.insert(placement.to_string(), moves);
        self
    }

    pub fn mates() -> Self {
        Self::default()
            .with("7k/8/6K1/8/8/8/8/1Q6", vec![candidate("b1b8", Category::Win, Some(1))])
            .with("7k/8/6K1/8/8/8/8/2Q5", vec![candidate("c1c8", Category::Win, Some(1))])
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl TablebaseTransport for ScriptedTablebase {
    async fn fetch(&self, fen: &str) -> Result<TablebaseResponse, FetchError> {
        self.requests.lock().unwrap().push(fen.to_string());
        let placement = fen.split_whitespace().next().unwrap_or("");
        match self.responses.get(placement) {
            Some(moves) => Ok(TablebaseResponse { moves: moves.clone() }),
            None => Err(FetchError::Status(404)),
        }
    }
}

pub fn no_delay() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        network_base: Duration::ZERO,
        status_base: Duration::ZERO,
    }
}

pub fn offline() -> TablebaseClient<ScriptedTablebase> {
    TablebaseClient::new(ScriptedTablebase::default(), no_delay())
}

pub fn client(tablebase: ScriptedTablebase) -> TablebaseClient<ScriptedTablebase> {
    TablebaseClient::new(tablebase, no_delay())
}

/// Prints the corpus like `cat`, then exits with `code`.
pub fn exits_after_output(code: i32) -> DecompressCommand {
    DecompressCommand {
        program: PathBuf::from("sh"),
        args: vec!["-c".to_string(), format!(r#"cat "$0"; exit {code}"#)],
    }
}
