//! Scraper for paginated APEX interactive reports.
//!
//! Pages are requested in concurrent batches of row offsets until a batch
//! comes back with a short page. Every page is stored as its own CSV file and
//! the whole report is combined into one CSV at the end.

mod error;
mod macros;

pub mod batch;
pub mod cli;
pub mod config;
pub mod model;
pub mod parse;
pub mod process;
pub mod request;
pub mod store;

pub use error::{Error, Result};
