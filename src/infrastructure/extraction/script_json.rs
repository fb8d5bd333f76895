//! Recovery of listings from JSON embedded in `<script>` bodies.
//!
//! Some portals render listing cards client-side from an inlined result
//! payload; when structural discovery finds nothing, the payload itself is
//! the most reliable thing on the page.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use super::RawRecord;
use super::plan::ScriptRecovery;

static SCRIPT_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("script").unwrap());

/// Scan script bodies for the recovery marker and map the first reachable
/// result array to raw records.
pub fn recover(html: &Html, recovery: &ScriptRecovery) -> Vec<RawRecord> {
    for script in html.select(&SCRIPT_SELECTOR) {
        let body: String = script.text().collect();
        if !body.contains(&recovery.marker) {
            continue;
        }
        let Some(payload) = first_json_value(&body) else {
            continue;
        };
        for path in &recovery.array_paths {
            if let Some(results) = payload.pointer(path).and_then(Value::as_array) {
                let records: Vec<RawRecord> = results.iter().filter_map(map_entry).collect();
                if !records.is_empty() {
                    debug!(
                        path,
                        count = records.len(),
                        "Recovered listings from embedded script payload"
                    );
                    return records;
                }
            }
        }
    }
    Vec::new()
}

/// Parse the first balanced JSON value starting at the first `{` in the
/// script body. Tolerates `var x = {...};` style assignments and trailing
/// code.
fn first_json_value(body: &str) -> Option<Value> {
    let start = body.find('{')?;
    serde_json::Deserializer::from_str(&body[start..])
        .into_iter::<Value>()
        .next()?
        .ok()
}

fn map_entry(entry: &Value) -> Option<RawRecord> {
    let mut record = RawRecord {
        address: get_string(entry, &["address", "streetAddress"]),
        city: get_string(entry, &["addressCity", "city"]),
        state: get_string(entry, &["addressState", "state"]),
        zip: get_string(entry, &["addressZipcode", "zipCode", "zip"]),
        bedrooms: get_display(entry, &["beds", "bedrooms"]),
        bathrooms: get_display(entry, &["baths", "bathrooms"]),
        square_feet: get_display(entry, &["area", "sqft", "squareFeet"]),
        detail_url: get_string(entry, &["detailUrl", "url"]),
        community: get_string(entry, &["communityName", "community"]),
        builder: get_string(entry, &["builderName", "builder"]),
        name: get_string(entry, &["planName", "name", "title"]),
        status: get_string(entry, &["statusText", "status"]),
        house_type: get_string(entry, &["homeType", "propertyType"]),
        ..Default::default()
    };

    // Price may be a formatted string or a raw number.
    record.price = get_string(entry, &["price"]).or_else(|| {
        entry
            .get("unformattedPrice")
            .and_then(Value::as_i64)
            .map(|p| format!("${p}"))
    });

    record.is_meaningful().then_some(record)
}

fn get_string(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Numeric-or-string field rendered as display text.
fn get_display(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match entry.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
