//! Stream ingestion: decompress the corpus through an external process and
//! hand out CSV rows one at a time.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use csv::StringRecord;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Split};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use puzzle_core::filter::parse_themes;

use crate::error::BuildError;

const PUZZLE_ID_COLUMN: &str = "PuzzleId";
const FEN_COLUMN: &str = "FEN";
const MOVES_COLUMN: &str = "Moves";
const RATING_COLUMN: &str = "Rating";
const THEMES_COLUMN: &str = "Themes";

/// External command whose stdout is the decompressed corpus.
/// The input path is appended as the last argument.
#[derive(Debug, Clone)]
pub struct DecompressCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl DecompressCommand {
    pub fn zstd(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["-dc".to_string()],
        }
    }

    /// Find a working zstd binary: the explicit one if given, else `zstd` on PATH.
    pub async fn resolve_zstd(explicit: Option<&Path>) -> Result<Self, BuildError> {
        if let Some(path) = explicit {
            if is_usable(path).await {
                return Ok(Self::zstd(path));
            }
            return Err(BuildError::DecompressorUnavailable(format!(
                "{} does not run `--version` successfully",
                path.display()
            )));
        }

        if is_usable(Path::new("zstd")).await {
            return Ok(Self::zstd("zstd"));
        }

        Err(BuildError::DecompressorUnavailable(
            "zstd CLI is not installed or not on PATH. Install zstd or pass --zstd-bin.".to_string(),
        ))
    }
}

async fn is_usable(program: &Path) -> bool {
    Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Column positions resolved from the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub puzzle_id: usize,
    pub fen: usize,
    pub moves: usize,
    pub rating: usize,
    pub themes: usize,
}

impl ColumnMap {
    pub fn from_header(header: &StringRecord) -> Result<Self, BuildError> {
        let mut missing = Vec::new();
        let mut require = |name: &str| match header.iter().position(|h| h.trim() == name) {
            Some(idx) => idx,
            None => {
                missing.push(name.to_string());
                0
            }
        };

        let columns = Self {
            puzzle_id: require(PUZZLE_ID_COLUMN),
            fen: require(FEN_COLUMN),
            moves: require(MOVES_COLUMN),
            rating: require(RATING_COLUMN),
            themes: require(THEMES_COLUMN),
        };

        if !missing.is_empty() {
            return Err(BuildError::MalformedHeader { missing });
        }
        Ok(columns)
    }
}

/// A corpus row with the fields the pipeline needs, validated.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusRow {
    pub puzzle_id: String,
    pub fen: String,
    pub moves: Vec<String>,
    pub rating: i32,
    pub themes: Vec<String>,
}

impl CorpusRow {
    /// `None` when the id, position or moves are empty or the rating is not an integer.
    pub fn from_record(record: &StringRecord, columns: &ColumnMap) -> Option<Self> {
        let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");

        let puzzle_id = field(columns.puzzle_id);
        let fen = field(columns.fen);
        let moves = field(columns.moves);
        if puzzle_id.is_empty() || fen.is_empty() || moves.is_empty() {
            return None;
        }
        let rating: i32 = field(columns.rating).parse().ok()?;

        Some(Self {
            puzzle_id: puzzle_id.to_string(),
            fen: fen.to_string(),
            moves: moves.split_whitespace().map(str::to_string).collect(),
            rating,
            themes: parse_themes(field(columns.themes)),
        })
    }
}

/// Parse one CSV line. `None` if the line is not valid CSV.
pub fn parse_csv_line(line: &str) -> Option<StringRecord> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    reader.records().next()?.ok()
}

/// How the stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamEnd {
    /// Stopped by the row budget rather than end of input
    pub truncated: bool,
    pub rows_advanced: u64,
}

/// Row reader over a running decompressor.
///
/// Skips the first `skip` data rows (already consumed by earlier runs) and
/// stops handing out rows once `budget` rows have been advanced.
pub struct RowStream {
    child: Child,
    lines: Split<BufReader<ChildStdout>>,
    stderr: JoinHandle<String>,
    columns: ColumnMap,
    skip: u64,
    budget: u64,
    rows_seen: u64,
    rows_advanced: u64,
    truncated: bool,
}

impl RowStream {
    /// Spawn the decompressor and resolve the header row.
    pub async fn open(
        command: &DecompressCommand,
        input: &Path,
        skip: u64,
        budget: u64,
    ) -> Result<Self, BuildError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BuildError::DecompressorUnavailable(format!(
                    "failed to spawn {}: {e}",
                    command.program.display()
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BuildError::DecompressorUnavailable("stdout was not captured".to_string()))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| BuildError::DecompressorUnavailable("stderr was not captured".to_string()))?;

        let stderr = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).split(b'\n');

        let header_line = loop {
            match lines.next_segment().await? {
                Some(line) if trim_line_end(&line).is_empty() => continue,
                Some(line) => break Some(String::from_utf8_lossy(trim_line_end(&line)).into_owned()),
                None => break None,
            }
        };

        let header_line = match header_line {
            Some(line) => line,
            None => {
                // No output at all: report the process failure if there was one
                let status = child.wait().await?;
                let stderr = stderr.await.unwrap_or_default();
                if !status.success() {
                    return Err(failed(status, &stderr));
                }
                return Err(BuildError::MalformedHeader {
                    missing: [PUZZLE_ID_COLUMN, FEN_COLUMN, MOVES_COLUMN, RATING_COLUMN, THEMES_COLUMN]
                        .iter()
                        .map(|c| c.to_string())
                        .collect(),
                });
            }
        };

        let header = parse_csv_line(&header_line).unwrap_or_default();
        let columns = match ColumnMap::from_header(&header) {
            Ok(columns) => columns,
            Err(e) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(e);
            }
        };
        debug!(?columns, "Resolved CSV header");

        if skip > 0 {
            info!(skip, "Resuming after previously consumed rows");
        }

        Ok(Self {
            child,
            lines,
            stderr,
            columns,
            skip,
            budget,
            rows_seen: 0,
            rows_advanced: 0,
            truncated: false,
        })
    }

    pub fn columns(&self) -> ColumnMap {
        self.columns
    }

    pub fn rows_advanced(&self) -> u64 {
        self.rows_advanced
    }

    /// Next unconsumed data row, parsed as CSV (`Some(None)` for a line that
    /// is not valid UTF-8 or CSV). `None` at end of input or once the budget
    /// is spent.
    pub async fn next_row(&mut self) -> Result<Option<Option<StringRecord>>, BuildError> {
        loop {
            if self.rows_advanced >= self.budget {
                self.truncated = true;
                return Ok(None);
            }

            let segment = match self.lines.next_segment().await? {
                Some(segment) => segment,
                None => return Ok(None),
            };
            let line = trim_line_end(&segment);
            if line.is_empty() {
                continue;
            }

            self.rows_seen += 1;
            if self.rows_seen <= self.skip {
                continue;
            }

            self.rows_advanced += 1;
            return Ok(Some(std::str::from_utf8(line).ok().and_then(parse_csv_line)));
        }
    }

    /// Stop the decompressor and check how it exited.
    ///
    /// A non-zero exit is fatal unless the stream was cut off by the budget,
    /// in which case the process is killed and its status ignored.
    pub async fn finish(self) -> Result<StreamEnd, BuildError> {
        let RowStream {
            mut child,
            lines,
            stderr,
            truncated,
            rows_advanced,
            ..
        } = self;

        drop(lines);
        if truncated {
            let _ = child.start_kill();
        }

        let status = child.wait().await?;
        let stderr = stderr.await.unwrap_or_default();

        if !truncated && !status.success() {
            return Err(failed(status, &stderr));
        }

        debug!(?status, truncated, rows_advanced, "Decompressor finished");
        Ok(StreamEnd {
            truncated,
            rows_advanced,
        })
    }
}

/// Strip the line terminator left by splitting on `\n`.
fn trim_line_end(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn failed(status: ExitStatus, stderr: &str) -> BuildError {
    BuildError::DecompressorFailed {
        code: status.code(),
        stderr: stderr.trim().to_string(),
    }
}
