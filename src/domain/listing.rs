//! Canonical listing record produced by every source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// House type enumeration. `Unknown` is reserved for explicit fields that
/// could not be mapped; keyword inference defaults to `SingleFamily`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HouseType {
    SingleFamily,
    Townhome,
    Condominium,
    #[default]
    Unknown,
}

/// Availability status of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ListingStatus {
    MoveInReady,
    UnderConstruction,
    ComingSoon,
    #[default]
    Unknown,
}

/// Canonical unit of output, reconciled across sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    // Identity fields
    pub address: Option<String>,
    pub city: String,
    /// Always a 2-letter postal code or empty, never free-form.
    #[serde(rename = "stateCode")]
    pub state_code: String,
    #[serde(rename = "zipCode")]
    pub zip_code: Option<String>,

    // Commercial fields
    #[serde(rename = "priceDisplay")]
    pub price_display: String,
    /// Present iff a parseable price string was found.
    #[serde(rename = "priceNumeric")]
    pub price_numeric: Option<i64>,

    // Physical fields
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<f64>,
    #[serde(rename = "squareFeet")]
    pub square_feet: Option<u32>,

    // Grouping fields
    #[serde(rename = "communityName")]
    pub community_name: String,
    #[serde(rename = "marketName")]
    pub market_name: String,
    #[serde(rename = "marketCode")]
    pub market_code: String,
    #[serde(rename = "houseType")]
    pub house_type: HouseType,
    #[serde(rename = "planName")]
    pub plan_name: Option<String>,

    pub status: ListingStatus,

    // Provenance
    #[serde(rename = "sourceName")]
    pub source_name: String,
    #[serde(rename = "sourceUrl")]
    pub source_url: String,
    #[serde(rename = "scrapedAt")]
    pub scraped_at: DateTime<Utc>,
}

impl ListingRecord {
    /// Deduplication key: (normalized address-or-community, numeric price).
    ///
    /// Returns `None` when the record cannot be matched against others:
    /// no address, no community name, or no parseable price. Unmatchable
    /// records are kept unconditionally by the reconciler.
    pub fn identity_key(&self) -> Option<(String, i64)> {
        let price = self.price_numeric?;
        let name = self
            .address
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or(&self.community_name);
        if name.trim().is_empty() {
            return None;
        }
        Some((normalize_identity(name), price))
    }
}

/// Case- and whitespace-insensitive form used for identity comparison.
fn normalize_identity(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
