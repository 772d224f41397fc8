use std::path::PathBuf;
use std::time::Duration;

use clap::builder::TypedValueParser;
use clap::{Args, Parser, Subcommand};

use crate::config::{
    RetryPolicy, ScrapeConfig, TransportConfig, DEFAULT_BATCH_WIDTH, DEFAULT_COMBINED_FILE,
    DEFAULT_OUTPUT_DIR, DEFAULT_PAGE_SIZE, DEFAULT_START_OFFSET,
};

#[derive(Debug, Parser)]
#[command(name = "apex-scrap", version, about = "Scrape a paginated APEX report into CSV files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch every page of the report and combine them.
    Scrape(ScrapeArgs),
    /// Rebuild the combined CSV from page files already on disk.
    Combine(CombineArgs),
}

#[derive(Debug, Args)]
pub struct ScrapeArgs {
    /// Rows per page.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, value_parser = clap::value_parser!(u64).range(1..).map(|n| n as usize))]
    pub page_size: usize,
    /// Pages requested concurrently per batch.
    #[arg(long, default_value_t = DEFAULT_BATCH_WIDTH, value_parser = clap::value_parser!(u64).range(1..).map(|n| n as usize))]
    pub batch_width: usize,
    #[arg(long, default_value_t = DEFAULT_START_OFFSET)]
    pub start_offset: usize,
    /// Stop after this many batches, 0 means no limit.
    #[arg(long, default_value_t = 0)]
    pub max_batches: usize,
    /// Cool-down between batches in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub delay_ms: u64,
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_COMBINED_FILE)]
    pub combined_file: PathBuf,

    #[command(flatten)]
    pub transport: TransportArgs,
}

#[derive(Debug, Args)]
pub struct TransportArgs {
    /// The `wwv_flow.show` endpoint.
    #[arg(long, env = "APEX_ENDPOINT")]
    pub endpoint: String,
    #[arg(long, env = "APEX_ORIGIN", default_value = "")]
    pub origin: String,
    #[arg(long, env = "APEX_REFERER", default_value = "")]
    pub referer: String,
    /// Session cookie, e.g. `WWV_CUSTOM-F_..._104=ORA_WWV-...`.
    #[arg(long, env = "APEX_COOKIE")]
    pub cookie: Option<String>,
    #[arg(long, env = "APEX_INSTANCE")]
    pub instance: String,
    #[arg(long, env = "APEX_FLOW_ID")]
    pub flow_id: String,
    #[arg(long, env = "APEX_FLOW_STEP_ID")]
    pub flow_step_id: String,
    #[arg(long, env = "APEX_X01")]
    pub x01: String,
    #[arg(long, env = "APEX_X02")]
    pub x02: String,
    /// Prefix for relative document links, e.g. `http://host:8080/apex/`.
    #[arg(long, env = "APEX_DOCUMENT_BASE", default_value = "")]
    pub document_base: String,
    /// Skip TLS certificate validation for the endpoint.
    #[arg(long)]
    pub insecure: bool,
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
    /// Extra attempts per failed page.
    #[arg(long, default_value_t = 0)]
    pub retries: u32,
    #[arg(long, default_value_t = 500)]
    pub backoff_ms: u64,
}

#[derive(Debug, Args)]
pub struct CombineArgs {
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_COMBINED_FILE)]
    pub combined_file: PathBuf,
}

impl ScrapeArgs {
    pub fn scrape_config(&self) -> ScrapeConfig {
        ScrapeConfig {
            page_size: self.page_size,
            batch_width: self.batch_width,
            start_offset: self.start_offset,
            output_dir: self.output_dir.clone(),
            delay: Duration::from_millis(self.delay_ms),
            max_batches: self.max_batches,
            combined_file: self.combined_file.clone(),
        }
    }
}

impl From<TransportArgs> for TransportConfig {
    fn from(args: TransportArgs) -> Self {
        Self {
            endpoint: args.endpoint,
            origin: args.origin,
            referer: args.referer,
            cookie: args.cookie.filter(|c| !c.is_empty()),
            instance: args.instance,
            flow_id: args.flow_id,
            flow_step_id: args.flow_step_id,
            x01: args.x01,
            x02: args.x02,
            document_base: args.document_base,
            accept_invalid_certs: args.insecure,
            timeout: Duration::from_secs(args.timeout_secs),
            retry: RetryPolicy {
                max_retries: args.retries,
                initial_backoff: Duration::from_millis(args.backoff_ms),
            },
        }
    }
}
