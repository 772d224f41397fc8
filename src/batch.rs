use std::sync::Arc;

use tokio::task::{spawn_blocking, JoinSet};
use tracing::{debug, error, info, warn};

use crate::model::{PageRequest, PageResult};
use crate::parse::{EmptyReason, Extraction, TableExtractor};
use crate::request::PageSource;
use crate::Result;

/// What happened to a single offset of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Fetched(PageResult),
    Empty(EmptyReason),
    TransportFailure,
}

/// Results of one batch, in the order the offsets were given.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<PageResult>,
    pub empty: Vec<usize>,
    pub failed: Vec<usize>,
}

impl BatchReport {
    pub fn requested(&self) -> usize {
        self.results.len() + self.empty.len() + self.failed.len()
    }

    /// Every fetch of the batch failed on the transport level.
    pub fn all_failed(&self) -> bool {
        !self.failed.is_empty() && self.failed.len() == self.requested()
    }

    pub fn has_short_page(&self) -> bool {
        self.results.iter().any(|page| page.is_short)
    }
}

/// Fetches and extracts a group of pages concurrently.
pub struct BatchScheduler<S> {
    source: Arc<S>,
    extractor: Arc<TableExtractor>,
}

impl<S: PageSource> BatchScheduler<S> {
    pub fn new(source: Arc<S>, extractor: TableExtractor) -> Self {
        Self {
            source,
            extractor: Arc::new(extractor),
        }
    }

    /// Spawns one task per offset and waits for all of them.
    /// Results are slotted by position, so completion order doesn't matter.
    pub async fn run_batch(&self, offsets: &[usize], page_size: usize) -> BatchReport {
        let mut task_set = JoinSet::new();
        for (idx, &offset) in offsets.iter().enumerate() {
            task_set.spawn({
                let source = Arc::clone(&self.source);
                let extractor = Arc::clone(&self.extractor);
                let request = PageRequest::new(offset, page_size);

                async move { (idx, process_page(source, extractor, request).await) }
            });
        }

        let mut slots: Vec<Option<PageOutcome>> = vec![None; offsets.len()];
        while let Some(task) = task_set.join_next().await {
            match task {
                Ok((idx, outcome)) => slots[idx] = Some(outcome),
                Err(e) => error!("Tokio Join Error, couldn't await a page task! {e}"),
            }
        }

        let mut report = BatchReport::default();
        for (slot, &offset) in slots.into_iter().zip(offsets) {
            match slot.unwrap_or(PageOutcome::TransportFailure) {
                PageOutcome::Fetched(page) => report.results.push(page),
                PageOutcome::Empty(_) => report.empty.push(offset),
                PageOutcome::TransportFailure => report.failed.push(offset),
            }
        }
        report
    }
}

async fn process_page<S: PageSource>(
    source: Arc<S>,
    extractor: Arc<TableExtractor>,
    request: PageRequest,
) -> PageOutcome {
    let offset = request.offset;
    let raw = source.fetch(request).await;
    let body = match raw.body {
        Some(body) if raw.transport_ok => body,
        _ => return PageOutcome::TransportFailure,
    };

    match extract_page(extractor, body).await {
        Ok(Extraction::Records(records)) => {
            let page = PageResult::new(offset, records, request.page_size);
            debug!(offset, rows = page.len(), "parsed page");
            PageOutcome::Fetched(page)
        }
        Ok(Extraction::Empty(reason)) => {
            if reason.is_malformed() {
                warn!(offset, ?reason, "page markup doesn't contain the report grid");
            } else {
                info!(offset, "found EMPTY page");
            }
            PageOutcome::Empty(reason)
        }
        Err(e) => {
            error!(offset, "couldn't parse page: {e}");
            PageOutcome::Empty(EmptyReason::MissingTable)
        }
    }
}

/// Parsing is CPU bound, keep it off the runtime threads.
async fn extract_page(extractor: Arc<TableExtractor>, body: String) -> Result<Extraction> {
    let extraction = spawn_blocking(move || extractor.extract(&body)).await??;
    Ok(extraction)
}
