//! Nodes of a source's navigation hierarchy.

use serde::{Deserialize, Serialize};

/// Depth of a node in the region hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetLevel {
    Region,
    SubRegion,
    Community,
    Market,
}

impl TargetLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Region => "region",
            Self::SubRegion => "sub-region",
            Self::Community => "community",
            Self::Market => "market",
        }
    }
}

/// A discovered node in the crawl hierarchy.
///
/// Targets are discovered by parsing a parent document's links, deduplicated
/// by URL within a crawl run, consumed exactly once and never mutated after
/// discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTarget {
    pub level: TargetLevel,
    pub slug: String,
    pub display_name: String,
    pub url: String,
    /// Slug of the parent node this target was discovered under.
    pub parent_key: String,
}

impl CrawlTarget {
    pub fn new(
        level: TargetLevel,
        slug: impl Into<String>,
        display_name: impl Into<String>,
        url: impl Into<String>,
        parent_key: impl Into<String>,
    ) -> Self {
        Self {
            level,
            slug: slug.into(),
            display_name: display_name.into(),
            url: url.into(),
            parent_key: parent_key.into(),
        }
    }
}
