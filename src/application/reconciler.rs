//! Cross-source reconciliation.
//!
//! Merges completed per-source record streams into one canonical set.
//! First-seen-wins: stream order, then intra-stream order. No field-level
//! merge across duplicates is attempted.

use std::collections::HashSet;

use tracing::info;

use crate::domain::ListingRecord;

/// Merge source streams, dropping later records that share an identity key
/// with an earlier one. Records without an identity key (no address or
/// community, or no parseable price) cannot be matched against others and
/// are kept unconditionally.
pub fn merge(streams: Vec<Vec<ListingRecord>>) -> Vec<ListingRecord> {
    let mut seen: HashSet<(String, i64)> = HashSet::new();
    let mut merged = Vec::new();
    let mut duplicates = 0usize;

    for stream in streams {
        for record in stream {
            match record.identity_key() {
                Some(key) => {
                    if seen.insert(key) {
                        merged.push(record);
                    } else {
                        duplicates += 1;
                    }
                }
                None => merged.push(record),
            }
        }
    }

    info!(
        total = merged.len(),
        duplicates_dropped = duplicates,
        "Reconciled source streams"
    );
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HouseType, ListingStatus};
    use chrono::Utc;

    fn record(source: &str, address: &str, price: Option<i64>) -> ListingRecord {
        ListingRecord {
            address: (!address.is_empty()).then(|| address.to_string()),
            city: "Frisco".to_string(),
            state_code: "TX".to_string(),
            zip_code: None,
            price_display: price.map(|p| format!("${p}")).unwrap_or_default(),
            price_numeric: price,
            bedrooms: None,
            bathrooms: None,
            square_feet: None,
            community_name: String::new(),
            market_name: String::new(),
            market_code: String::new(),
            house_type: HouseType::SingleFamily,
            plan_name: None,
            status: ListingStatus::Unknown,
            source_name: source.to_string(),
            source_url: format!("https://{source}.example/l"),
            scraped_at: Utc::now(),
        }
    }

    #[test]
    fn duplicates_collapse_to_first_seen() {
        let a = vec![
            record("lennar", "1 Elm St", Some(400_000)),
            record("lennar", "2 Oak Ave", Some(500_000)),
        ];
        let b = vec![
            record("zillow", "1 elm st", Some(400_000)),
            record("zillow", "3 Fir Ct", Some(600_000)),
        ];

        let merged = merge(vec![a, b]);
        assert_eq!(merged.len(), 3);
        // The first stream's rendition of the shared listing survives.
        let elm = merged
            .iter()
            .find(|r| r.price_numeric == Some(400_000))
            .unwrap();
        assert_eq!(elm.source_name, "lennar");
    }

    #[test]
    fn merging_a_stream_with_itself_is_idempotent() {
        let stream = vec![
            record("lennar", "1 Elm St", Some(400_000)),
            record("lennar", "2 Oak Ave", Some(500_000)),
        ];

        let once = merge(vec![stream.clone()]);
        let doubled = merge(vec![stream.clone(), stream]);
        assert_eq!(once.len(), doubled.len());
    }

    #[test]
    fn unmatchable_records_are_never_dropped() {
        let a = vec![record("lennar", "", None), record("lennar", "", None)];
        let b = vec![record("zillow", "1 Elm St", None)];

        let merged = merge(vec![a, b]);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn same_address_different_price_is_not_a_duplicate() {
        let a = vec![record("lennar", "1 Elm St", Some(400_000))];
        let b = vec![record("zillow", "1 Elm St", Some(410_000))];
        assert_eq!(merge(vec![a, b]).len(), 2);
    }
}
