//! build-puzzle-db
//!
//! Builds or resumes the sharded puzzle database. Run repeatedly until the
//! manifest reports `complete`.

use clap::Parser;
use tracing::info;

use puzzle_builder::ingest::DecompressCommand;
use puzzle_builder::tablebase::{HttpTablebase, RetryPolicy, TablebaseClient};
use puzzle_builder::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let decompressor = DecompressCommand::resolve_zstd(cli.zstd_bin.as_deref()).await?;
    let config = cli.into_config();

    let transport = HttpTablebase::new(&config.tablebase_url)?;
    let client = TablebaseClient::new(transport, RetryPolicy::default());

    let report = puzzle_builder::run(&config, &decompressor, client).await?;
    if report.already_complete {
        info!(output = %config.output_dir.display(), "Nothing to do");
    } else {
        info!(
            output = %config.output_dir.display(),
            rows = report.run.rows_advanced,
            kept = report.run.counters.kept,
            complete = report.state.complete,
            "Done"
        );
    }

    Ok(())
}
