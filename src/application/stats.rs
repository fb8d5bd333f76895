//! Run statistics and reporting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::ListingRecord;

/// Per-source crawl statistics. Failures are counted, never fatal: a node
/// that yields no data is a statistic, not an abort.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub source: String,
    /// Nodes fetched and processed, successfully or not.
    pub nodes_visited: u32,
    /// Nodes that yielded no data because retries were exhausted.
    pub nodes_skipped: u32,
    /// Nodes that failed permanently (bad URL, 4xx).
    pub nodes_failed: u32,
    /// Documents that could not be treated as markup.
    pub malformed_documents: u32,
    /// Children dropped by the configured max_children bound.
    pub children_truncated: u32,
    /// Pagination loops ended by the hard trigger cap.
    pub pagination_capped: u32,
    /// Pagination loops that ended in the Blocked state.
    pub pagination_blocked: u32,
    /// Records emitted into the stream.
    pub records_emitted: u32,
    /// Records dropped by the source's builder filter.
    pub filtered_out: u32,
}

impl RunStats {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }
}

/// Result of one complete multi-source run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Canonical records after reconciliation.
    pub records: Vec<ListingRecord>,
    pub source_stats: Vec<RunStats>,
}

impl RunReport {
    pub fn total_records(&self) -> usize {
        self.records.len()
    }
}
