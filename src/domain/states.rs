//! Static US state lookup used to resolve region slugs to postal codes.

use once_cell::sync::Lazy;
use std::collections::HashMap;

static SLUG_TO_ABBREV: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("alabama", "AL"),
        ("alaska", "AK"),
        ("arizona", "AZ"),
        ("arkansas", "AR"),
        ("california", "CA"),
        ("colorado", "CO"),
        ("connecticut", "CT"),
        ("delaware", "DE"),
        ("district-of-columbia", "DC"),
        ("florida", "FL"),
        ("georgia", "GA"),
        ("hawaii", "HI"),
        ("idaho", "ID"),
        ("illinois", "IL"),
        ("indiana", "IN"),
        ("iowa", "IA"),
        ("kansas", "KS"),
        ("kentucky", "KY"),
        ("louisiana", "LA"),
        ("maine", "ME"),
        ("maryland", "MD"),
        ("massachusetts", "MA"),
        ("michigan", "MI"),
        ("minnesota", "MN"),
        ("mississippi", "MS"),
        ("missouri", "MO"),
        ("montana", "MT"),
        ("nebraska", "NE"),
        ("nevada", "NV"),
        ("new-hampshire", "NH"),
        ("new-jersey", "NJ"),
        ("new-mexico", "NM"),
        ("new-york", "NY"),
        ("north-carolina", "NC"),
        ("north-dakota", "ND"),
        ("ohio", "OH"),
        ("oklahoma", "OK"),
        ("oregon", "OR"),
        ("pennsylvania", "PA"),
        ("rhode-island", "RI"),
        ("south-carolina", "SC"),
        ("south-dakota", "SD"),
        ("tennessee", "TN"),
        ("texas", "TX"),
        ("utah", "UT"),
        ("vermont", "VT"),
        ("virginia", "VA"),
        ("washington", "WA"),
        ("west-virginia", "WV"),
        ("wisconsin", "WI"),
        ("wyoming", "WY"),
    ])
});

/// Resolve a region URL slug (e.g. "texas", "new-jersey") to its 2-letter
/// postal abbreviation.
///
/// Unknown slugs fall back to the first two characters uppercased. That is a
/// documented approximation for sources that invent their own region slugs,
/// not a silent failure: the result is still always a 2-letter token.
pub fn slug_to_abbrev(slug: &str) -> String {
    let key = slug.trim().to_ascii_lowercase();
    if let Some(abbrev) = SLUG_TO_ABBREV.get(key.as_str()) {
        return (*abbrev).to_string();
    }
    key.chars()
        .filter(|c| c.is_ascii_alphabetic())
        .take(2)
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Whether a token is a known state abbreviation.
pub fn is_state_abbrev(token: &str) -> bool {
    token.len() == 2 && SLUG_TO_ABBREV.values().any(|v| *v == token)
}
