//! Infrastructure layer: configuration, logging, transport, pagination and
//! markup extraction.

pub mod config;
pub mod extraction;
pub mod fetcher;
pub mod identity;
pub mod logging;
pub mod paginator;

// Re-export commonly used items
pub use config::{AppConfig, ConfigError, FetchConfig, PaginationConfig};
pub use extraction::{ExtractionError, ExtractionPlan, RawRecord};
pub use fetcher::{Document, FetchError, FetchMethod, FetchSession, FetchTransport};
pub use identity::IdentityPool;
pub use logging::init_logging;
pub use paginator::{PaginationError, PaginationOutcome, Paginator, PaginatorState};
