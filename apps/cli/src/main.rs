//! CodeMatch CLI — map free-text clinical descriptions to LOINC / ICD-10-CM codes.
//!
//! Retrieves candidate codes from a search index and asks a language model
//! to pick the ones that truly match.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
