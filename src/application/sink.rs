//! Record sink: the "append record" seam downstream writers implement.
//!
//! File and columnar exporters live outside the core; they consume the
//! record stream through this interface.

use crate::domain::ListingRecord;

/// Append-only consumer of the canonical record stream.
pub trait RecordSink: Send {
    fn append(&mut self, record: &ListingRecord) -> anyhow::Result<()>;
}

/// In-memory sink, also the default when no writer is attached.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<ListingRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ListingRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ListingRecord> {
        self.records
    }
}

impl RecordSink for MemorySink {
    fn append(&mut self, record: &ListingRecord) -> anyhow::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}
