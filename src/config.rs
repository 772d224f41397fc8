use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_BATCH_WIDTH: usize = 10;
/// APEX report rows are 1-based.
pub const DEFAULT_START_OFFSET: usize = 1;
pub const DEFAULT_OUTPUT_DIR: &str = "page_data";
pub const DEFAULT_COMBINED_FILE: &str = "combined_data.csv";
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings of the pagination run.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub page_size: usize,
    /// Number of pages requested concurrently in one batch.
    pub batch_width: usize,
    pub start_offset: usize,
    pub output_dir: PathBuf,
    /// Cool-down between two batches.
    pub delay: Duration,
    /// If set to 0 the number of batches is unlimited.
    pub max_batches: usize,
    pub combined_file: PathBuf,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            batch_width: DEFAULT_BATCH_WIDTH,
            start_offset: DEFAULT_START_OFFSET,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            delay: DEFAULT_BATCH_DELAY,
            max_batches: 0,
            combined_file: PathBuf::from(DEFAULT_COMBINED_FILE),
        }
    }
}

impl ScrapeConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_batch_width(mut self, batch_width: usize) -> Self {
        self.batch_width = batch_width;
        self
    }

    pub fn with_start_offset(mut self, start_offset: usize) -> Self {
        self.start_offset = start_offset;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_batches(mut self, max_batches: usize) -> Self {
        self.max_batches = max_batches;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Config("page size must be at least 1".into()));
        }
        if self.batch_width == 0 {
            return Err(Error::Config("batch width must be at least 1".into()));
        }
        Ok(())
    }
}

/// How often a failed fetch is attempted again. The default never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Doubled after every failed attempt.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (starting at 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor)
    }
}

/// Everything the page fetcher needs to talk to one APEX session.
///
/// The cookie and the `p_instance`/`x01`/`x02` tokens belong to a single
/// server-side session, so they are always passed in, never baked in.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// The `wwv_flow.show` URL.
    pub endpoint: String,
    pub origin: String,
    pub referer: String,
    pub cookie: Option<String>,
    pub instance: String,
    pub flow_id: String,
    pub flow_step_id: String,
    pub x01: String,
    pub x02: String,
    /// Prefix for relative document links found in the report.
    pub document_base: String,
    /// Disables TLS certificate validation for this endpoint only.
    pub accept_invalid_certs: bool,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl TransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            origin: String::new(),
            referer: String::new(),
            cookie: None,
            instance: String::new(),
            flow_id: String::new(),
            flow_step_id: String::new(),
            x01: String::new(),
            x02: String::new(),
            document_base: String::new(),
            accept_invalid_certs: false,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config("endpoint must not be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("request timeout must be positive".into()));
        }
        Ok(())
    }
}
