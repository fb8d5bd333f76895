//! Application layer: source definitions, the per-source crawl
//! orchestrator, the multi-source run and the reconciliation join point.

pub mod orchestrator;
pub mod reconciler;
pub mod run;
pub mod sink;
pub mod sources;
pub mod stats;

pub use orchestrator::CrawlOrchestrator;
pub use run::CrawlRun;
pub use sink::{MemorySink, RecordSink};
pub use sources::SourceSpec;
pub use stats::{RunReport, RunStats};
