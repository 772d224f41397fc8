use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use crate::batch::{BatchReport, BatchScheduler};
use crate::config::{ScrapeConfig, TransportConfig};
use crate::model::Dataset;
use crate::parse::TableExtractor;
use crate::request::{PageFetcher, PageSource};
use crate::store::{CsvSink, PersistenceSink};
use crate::{info_time, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    /// The last batch had a short page and was persisted, nothing more is fetched.
    Draining,
    Done,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// First short page of the final batch.
    ShortPage { offset: usize },
    /// A batch where nothing produced rows and at least one page answered.
    EmptyBatch,
    /// A batch where every single fetch failed. The stream may not be exhausted.
    TransportFailure { offsets: Vec<usize> },
    BatchLimit,
    /// The next batch would run past `usize::MAX`.
    OffsetOverflow,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub batches: usize,
    pub page_files: Vec<PathBuf>,
    pub combined: Option<PathBuf>,
    pub records: usize,
    /// Offsets whose fetch failed in any batch.
    pub failed_offsets: Vec<usize>,
    pub termination: Termination,
}

impl RunSummary {
    pub fn pages_saved(&self) -> usize {
        self.page_files.len()
    }
}

/// Drives sequential batches until the report runs out of rows.
pub struct Driver<S, K> {
    config: ScrapeConfig,
    scheduler: BatchScheduler<S>,
    sink: K,
    state: DriverState,
    next_offset: usize,
    dataset: Dataset,
    batches: usize,
    page_files: Vec<PathBuf>,
    failed_offsets: Vec<usize>,
    termination: Option<Termination>,
}

impl<S: PageSource, K: PersistenceSink> Driver<S, K> {
    pub fn new(config: ScrapeConfig, scheduler: BatchScheduler<S>, sink: K) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            next_offset: config.start_offset,
            config,
            scheduler,
            sink,
            state: DriverState::Running,
            dataset: Dataset::new(),
            batches: 0,
            page_files: Vec::new(),
            failed_offsets: Vec::new(),
            termination: None,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    /// Offsets of the batch starting at `start`, `None` if any would overflow.
    pub fn batch_offsets(&self, start: usize) -> Option<Vec<usize>> {
        (0..self.config.batch_width)
            .map(|i| {
                i.checked_mul(self.config.page_size)
                    .and_then(|step| start.checked_add(step))
            })
            .collect()
    }

    /// Advances the state machine by one transition.
    ///
    /// `Running` fetches and persists one batch, `Draining` finishes without
    /// fetching, `Done` stays put.
    pub async fn step(&mut self) -> Result<DriverState> {
        match self.state {
            DriverState::Running => self.run_next_batch().await?,
            DriverState::Draining => {
                info!("Reached the end of the report");
                self.state = DriverState::Done;
            }
            DriverState::Done => {}
        }
        Ok(self.state)
    }

    pub async fn run(&mut self) -> Result<RunSummary> {
        let start_time = Local::now();
        info_time!("Started scraping");

        while self.step().await? != DriverState::Done {}

        let combined = if self.dataset.is_empty() {
            warn!("No records were scraped, skipping the combined file");
            None
        } else {
            let path = self.sink.save_combined(&self.dataset)?;
            info!(
                "Combined {} pages into {} ({} rows)",
                self.dataset.page_count(),
                path.display(),
                self.dataset.len()
            );
            Some(path)
        };

        let summary = RunSummary {
            batches: self.batches,
            page_files: self.page_files.clone(),
            combined,
            records: self.dataset.len(),
            failed_offsets: self.failed_offsets.clone(),
            termination: self.termination.clone().unwrap_or(Termination::BatchLimit),
        };
        info_time!(
            start_time,
            "Finished scraping: {} pages, {} records, stopped on {:?}",
            summary.pages_saved(),
            summary.records,
            summary.termination
        );
        Ok(summary)
    }

    fn finish(&mut self, termination: Termination) {
        self.state = DriverState::Done;
        self.termination = Some(termination);
    }

    async fn run_next_batch(&mut self) -> Result<()> {
        if self.config.max_batches > 0 && self.batches == self.config.max_batches {
            info!("Reached the limit of {} batches", self.batches);
            self.finish(Termination::BatchLimit);
            return Ok(());
        }
        let Some(offsets) = self.batch_offsets(self.next_offset) else {
            warn!(start = self.next_offset, "Next batch would overflow the row offset");
            self.finish(Termination::OffsetOverflow);
            return Ok(());
        };
        if self.batches > 0 && !self.config.delay.is_zero() {
            tokio::time::sleep(self.config.delay).await;
        }
        self.batches += 1;

        let batch_time = Local::now();
        info!(
            batch = self.batches,
            first = offsets[0],
            last = offsets[offsets.len() - 1],
            "Processing batch"
        );
        let report = self
            .scheduler
            .run_batch(&offsets, self.config.page_size)
            .await;
        self.failed_offsets.extend_from_slice(&report.failed);

        self.apply(report)?;
        info_time!(batch_time, "Processed batch {}", self.batches);
        Ok(())
    }

    /// Applies the termination rule to one batch and persists its pages.
    fn apply(&mut self, report: BatchReport) -> Result<()> {
        if !report.failed.is_empty() {
            warn!(offsets = ?report.failed, "Some pages failed to fetch");
        }

        if report.results.is_empty() {
            if report.all_failed() {
                warn!("Every fetch of the batch failed, stopping");
                self.finish(Termination::TransportFailure {
                    offsets: report.failed,
                });
            } else {
                info!("No more data to fetch");
                self.finish(Termination::EmptyBatch);
            }
            return Ok(());
        }

        let short = report
            .results
            .iter()
            .find(|page| page.is_short)
            .map(|page| page.offset);

        for page in report.results {
            let path = self.sink.save_page(&page)?;
            info!("Saved {} with {} rows", path.display(), page.len());
            self.page_files.push(path);
            self.dataset.insert(page);
        }

        if let Some(offset) = short {
            self.state = DriverState::Draining;
            self.termination = Some(Termination::ShortPage { offset });
            return Ok(());
        }

        let advance = self.config.batch_width.checked_mul(self.config.page_size);
        match advance.and_then(|n| self.next_offset.checked_add(n)) {
            Some(next) => self.next_offset = next,
            None => {
                warn!(start = self.next_offset, "Row offset would overflow");
                self.finish(Termination::OffsetOverflow);
            }
        }
        Ok(())
    }
}

/// Scrapes the whole report into CSV files under `config.output_dir`.
///
/// A run that ends because every fetch of a batch failed still writes what it
/// has, then reports [`Error::TransportExhausted`].
pub async fn process_site(config: ScrapeConfig, transport: TransportConfig) -> Result<RunSummary> {
    let sink = CsvSink::create(&config.output_dir, &config.combined_file)?;
    let extractor = TableExtractor::new(transport.document_base.clone());
    let fetcher = PageFetcher::new(transport)?;
    let scheduler = BatchScheduler::new(Arc::new(fetcher), extractor);

    let mut driver = Driver::new(config, scheduler, sink)?;
    let summary = driver.run().await?;
    if let Termination::TransportFailure { offsets } = &summary.termination {
        return Err(Error::TransportExhausted {
            failed: offsets.len(),
        });
    }
    Ok(summary)
}
