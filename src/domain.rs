//! Domain module - canonical records, crawl-tree nodes and pure
//! normalization rules. No I/O lives here.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod crawl_target;
pub mod listing;
pub mod normalize;
pub mod states;

pub use crawl_target::{CrawlTarget, TargetLevel};
pub use listing::{HouseType, ListingRecord, ListingStatus};
