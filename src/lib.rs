pub mod browser;
pub mod challenge;
pub mod config;
pub mod document;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod normalizer;
pub mod pipeline;
pub mod poll;
pub mod records;
pub mod scroller;
pub mod session;
pub mod stealth;
pub mod writer;

pub use config::{Cli, RunConfig};
pub use error::{ScrapeError, Stage};
pub use pipeline::{run, RunSummary};
