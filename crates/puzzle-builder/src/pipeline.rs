//! The build driver: stream rows, classify, filter, enrich, aggregate and
//! persist.

use tracing::{debug, info};

use puzzle_core::{build_continuation, continuation_text, extract_pieces, should_keep, Provenance, PuzzleRecord};

use crate::buckets::{AddOutcome, BucketMap};
use crate::config::{BuildConfig, FilterConfig};
use crate::enricher::{TablebaseEnricher, TABLEBASE_MAX_PIECES};
use crate::error::BuildError;
use crate::ingest::{CorpusRow, DecompressCommand, RowStream};
use crate::manifest::{write_shards_and_manifest, Manifest};
use crate::state::{BuildState, Counters, RunStats, STATE_FILE};
use crate::store::clear_generated_files;
use crate::tablebase::{TablebaseCache, TablebaseClient, TablebaseTransport};

const PROGRESS_INTERVAL: u64 = 50_000;

/// What happened to one input row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// Unparsable row, bad position or illegal bulk continuation
    Invalid,
    /// More pieces than the configured ceiling
    PieceCap,
    /// Went through the source paths; `added` records were accepted
    Evaluated { added: u32 },
}

/// Per-row decision logic over the run's buckets and counters.
pub struct RowProcessor<T> {
    filter: FilterConfig,
    enricher: TablebaseEnricher<T>,
    cache: TablebaseCache,
    buckets: BucketMap,
    counters: Counters,
}

impl<T: TablebaseTransport> RowProcessor<T> {
    pub fn new(filter: &FilterConfig, buckets: BucketMap, client: TablebaseClient<T>) -> Self {
        let enricher = TablebaseEnricher::new(
            client,
            filter.max_continuation_plies as usize,
            filter.tie_break_margin_plies,
        );
        Self {
            filter: filter.clone(),
            enricher,
            cache: TablebaseCache::new(),
            buckets,
            counters: Counters::default(),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn buckets(&self) -> &BucketMap {
        &self.buckets
    }

    pub fn into_parts(self) -> (BucketMap, Counters) {
        (self.buckets, self.counters)
    }

    /// Process one row. `None` stands for a row that failed to parse.
    pub async fn process(&mut self, row: Option<CorpusRow>) -> RowOutcome {
        let Some(row) = row else {
            self.counters.skipped_invalid += 1;
            return RowOutcome::Invalid;
        };

        let pieces = match extract_pieces(&row.fen) {
            Ok(pieces) => pieces,
            Err(e) => {
                debug!(puzzle_id = %row.puzzle_id, error = %e, "Skipping row with invalid position");
                self.counters.skipped_invalid += 1;
                return RowOutcome::Invalid;
            }
        };

        if pieces.piece_count > self.filter.max_pieces {
            self.counters.skipped_piece_cap += 1;
            return RowOutcome::PieceCap;
        }

        let mut added = 0;

        if self.tablebase_eligible(&row.fen, pieces.piece_count) {
            self.counters.tablebase_candidates += 1;
            match self.enricher.enrich(&mut self.cache, &row.fen, &pieces).await {
                Err(reason) => {
                    debug!(fen = %row.fen, ?reason, "Tablebase position rejected");
                    self.counters.tablebase_skipped += 1;
                }
                Ok(record) => match self.buckets.add(record) {
                    AddOutcome::Added => {
                        self.counters.kept += 1;
                        self.counters.tablebase_kept += 1;
                        added += 1;
                    }
                    AddOutcome::Duplicate => self.counters.duplicates += 1,
                    AddOutcome::BucketFull => {
                        self.counters.skipped_cap += 1;
                        self.counters.tablebase_skipped += 1;
                    }
                    AddOutcome::OutOfRange => {
                        self.counters.skipped_out_of_range += 1;
                        self.counters.tablebase_skipped += 1;
                    }
                },
            }
        }

        if self.filter.sources.lichess {
            let max_plies = self.filter.max_continuation_plies as usize;

            if let Some(refused) = self.buckets.admission(row.rating, &row.puzzle_id) {
                self.tally_refusal(refused);
            } else if !should_keep(
                &row.themes,
                &row.moves,
                pieces.piece_count,
                max_plies,
                self.filter.include_endgames_low_piece,
            ) {
                self.counters.skipped_not_clear += 1;
            } else {
                let continuation_san = build_continuation(&row.fen, &row.moves, max_plies);
                if continuation_san.is_empty() {
                    self.counters.skipped_invalid += 1;
                    return RowOutcome::Evaluated { added };
                }

                let record = PuzzleRecord {
                    continuation_text: continuation_text(&row.fen, &continuation_san),
                    continuation_san,
                    puzzle_id: row.puzzle_id,
                    fen: row.fen,
                    side_to_move: pieces.side_to_move,
                    rating: row.rating,
                    piece_count: pieces.piece_count,
                    white_pieces: pieces.white_pieces,
                    black_pieces: pieces.black_pieces,
                    themes: row.themes,
                    source: Provenance::LocalDb,
                };

                match self.buckets.add(record) {
                    AddOutcome::Added => {
                        self.counters.kept += 1;
                        self.counters.lichess_kept += 1;
                        added += 1;
                    }
                    refused => self.tally_refusal(refused),
                }
            }
        }

        RowOutcome::Evaluated { added }
    }

    fn tablebase_eligible(&self, fen: &str, piece_count: u32) -> bool {
        self.filter.sources.tablebase
            && self.counters.tablebase_kept < u64::from(self.filter.tablebase_budget)
            && piece_count <= TABLEBASE_MAX_PIECES
            && !self.buckets.has_tablebase_fen(fen)
    }

    fn tally_refusal(&mut self, refused: AddOutcome) {
        match refused {
            AddOutcome::OutOfRange => self.counters.skipped_out_of_range += 1,
            AddOutcome::Duplicate => self.counters.duplicates += 1,
            AddOutcome::BucketFull => self.counters.skipped_cap += 1,
            AddOutcome::Added => {}
        }
    }
}

/// Result of one invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: RunStats,
    pub state: BuildState,
    pub manifest: Manifest,
    /// The dataset was already complete and no input was read
    pub already_complete: bool,
}

/// Run one resumable build step over `config.input`.
pub async fn run<T: TablebaseTransport>(
    config: &BuildConfig,
    decompressor: &DecompressCommand,
    client: TablebaseClient<T>,
) -> Result<RunReport, BuildError> {
    if !config.input.is_file() {
        return Err(BuildError::InputMissing(config.input.clone()));
    }

    let dir = config.output_dir.as_path();
    std::fs::create_dir_all(dir)?;
    if config.reset {
        clear_generated_files(dir)?;
    }

    let mut state = BuildState::load(&dir.join(STATE_FILE), config)?;
    let buckets = BucketMap::rehydrate(dir, state.max_per_bucket)?;

    if state.complete && !config.full {
        let run = RunStats::default();
        let manifest = write_shards_and_manifest(dir, &buckets, &state, &run)?;
        info!(
            rows_processed = state.rows_processed,
            kept = state.totals.kept,
            "Puzzle DB is already complete. Use --reset to restart or --full to reprocess."
        );
        return Ok(RunReport {
            run,
            state,
            manifest,
            already_complete: true,
        });
    }

    info!(
        input = %config.input.display(),
        output = %dir.display(),
        cursor = state.rows_processed,
        rows_per_run = state.rows_per_run,
        sources = %state.filter.sources,
        "Starting puzzle DB build"
    );

    let mut stream = RowStream::open(decompressor, &config.input, state.rows_processed, state.rows_per_run).await?;
    let columns = stream.columns();
    let mut processor = RowProcessor::new(&state.filter, buckets, client);

    while let Some(record) = stream.next_row().await? {
        let row = record.and_then(|r| CorpusRow::from_record(&r, &columns));
        processor.process(row).await;

        let advanced = stream.rows_advanced();
        if advanced % PROGRESS_INTERVAL == 0 {
            let counters = processor.counters();
            info!(
                rows = advanced,
                kept = counters.kept,
                tablebase_kept = counters.tablebase_kept,
                skipped = counters.skipped_total(),
                "Progress"
            );
        }
    }

    let end = stream.finish().await?;
    let (buckets, counters) = processor.into_parts();
    let run = RunStats {
        rows_advanced: end.rows_advanced,
        counters,
    };

    state.record_run(&run, end.truncated);
    let manifest = write_shards_and_manifest(dir, &buckets, &state, &run)?;
    log_summary(&state, &run);

    Ok(RunReport {
        run,
        state,
        manifest,
        already_complete: false,
    })
}

fn log_summary(state: &BuildState, run: &RunStats) {
    let c = &run.counters;
    info!(
        rows_advanced = run.rows_advanced,
        kept = c.kept,
        lichess_kept = c.lichess_kept,
        skipped_invalid = c.skipped_invalid,
        skipped_out_of_range = c.skipped_out_of_range,
        skipped_piece_cap = c.skipped_piece_cap,
        skipped_not_clear = c.skipped_not_clear,
        skipped_cap = c.skipped_cap,
        duplicates = c.duplicates,
        tablebase_candidates = c.tablebase_candidates,
        tablebase_kept = c.tablebase_kept,
        tablebase_skipped = c.tablebase_skipped,
        "Run finished"
    );
    info!(
        rows_processed = state.rows_processed,
        total_kept = state.totals.kept,
        max_pieces = state.filter.max_pieces,
        max_plies = state.filter.max_continuation_plies,
        include_endgames_low_piece = state.filter.include_endgames_low_piece,
        sources = %state.filter.sources,
        tablebase_budget = state.filter.tablebase_budget,
        complete = state.complete,
        "Puzzle DB updated"
    );
    if !state.complete {
        info!("Row budget reached. Run again to resume.");
    }
}
