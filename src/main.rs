use chrono::Local;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use apex_scrap::cli::{Cli, Command};
use apex_scrap::process::process_site;
use apex_scrap::store::combine_dir;
use apex_scrap::{info_time, Result};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let start_time = Local::now();
    match Cli::parse().command {
        Command::Scrape(args) => {
            let config = args.scrape_config();
            let summary = process_site(config, args.transport.into()).await?;
            if !summary.failed_offsets.is_empty() {
                tracing::warn!(
                    offsets = ?summary.failed_offsets,
                    "Pages at these offsets couldn't be fetched and are missing from the output"
                );
            }
        }
        Command::Combine(args) => {
            combine_dir(&args.output_dir, &args.combined_file)?;
        }
    }
    info_time!(start_time, "Full program time:");

    Ok(())
}
