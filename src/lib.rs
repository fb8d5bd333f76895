//! homecrawl - multi-source new-home listing crawler.
//!
//! Extracts structured listing records from heterogeneous builder and
//! portal websites and reconciles them into one canonical set: a resilient
//! fetch layer, cascading markup extraction, pure normalization and
//! cross-source deduplication.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-exports for downstream consumers
pub use application::{CrawlRun, MemorySink, RecordSink, RunReport, RunStats};
pub use domain::{HouseType, ListingRecord, ListingStatus};
pub use infrastructure::{AppConfig, ConfigError, init_logging};
