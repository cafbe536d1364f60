use anyhow::Result;
use clap::{Parser, Subcommand};

mod error;
mod export;
mod filter;
mod grid;
mod inspect;
mod join;
mod keys;
mod pipeline;
mod pretty;
mod progress;
mod reader;
mod search;
mod table;

#[derive(Parser)]
#[command(
    name = "nifjoin",
    version,
    about = "Match NIFs from a reference file against a large CSV/XLSX file.",
    long_about = "nifjoin looks up the NIFs listed in a reference spreadsheet inside a large CSV or XLSX file, streaming CSV input in chunks so files of millions of rows fit in memory. Matching rows are left-joined onto the reference rows, previewed, optionally edited, and written out as resultado_NIF.csv and resultado_NIF.xlsx. Set RUST_LOG=debug for detailed progress.",
    author = "nifjoin"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up reference NIFs in a large file and export the joined result
    Search(search::SearchArgs),
    /// Report the shape and columns of an input file
    Inspect(inspect::InspectArgs),
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Search(args) => search::run(args),
        Commands::Inspect(args) => inspect::run(args),
    }
}
