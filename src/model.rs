use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identity of a single fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub page_size: usize,
}

impl PageRequest {
    pub fn new(offset: usize, page_size: usize) -> Self {
        Self { offset, page_size }
    }

    /// The opaque `p_widget_action_mod` value the report widget pages on.
    pub fn action_mod(&self) -> String {
        format!(
            "pgR_min_row={}max_rows={}rows_fetched={}",
            self.offset, self.page_size, self.page_size
        )
    }
}

/// What came back over the wire for one offset.
/// A missing body means the transport failed, an empty body is still a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub offset: usize,
    pub body: Option<String>,
    pub transport_ok: bool,
}

impl RawPage {
    pub fn ok(offset: usize, body: impl Into<String>) -> Self {
        Self {
            offset,
            body: Some(body.into()),
            transport_ok: true,
        }
    }

    pub fn failed(offset: usize) -> Self {
        Self {
            offset,
            body: None,
            transport_ok: false,
        }
    }
}

/// One report row. Field order is the CSV column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub year: String,
    pub number: String,
    pub extract: String,
    pub document_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult {
    pub offset: usize,
    pub records: Vec<Record>,
    pub is_short: bool,
}

impl PageResult {
    pub fn new(offset: usize, records: Vec<Record>, page_size: usize) -> Self {
        let is_short = records.len() < page_size;
        Self {
            offset,
            records,
            is_short,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// All pages of one run, keyed by their numeric offset.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pages: BTreeMap<usize, Vec<Record>>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, page: PageResult) {
        self.pages.insert(page.offset, page.records);
    }

    /// Records of every page in ascending offset order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.pages.values().flatten()
    }

    pub fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        self.pages.keys().copied()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn len(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
