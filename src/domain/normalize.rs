//! Pure normalization functions for raw listing fields.
//!
//! Everything in this module is deterministic and I/O free: raw strings in,
//! canonical typed values out. Extraction recovers text, normalization owns
//! the conversion rules.

use once_cell::sync::Lazy;
use regex::Regex;

use super::listing::{HouseType, ListingStatus};
use super::states::slug_to_abbrev;

static ZIP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{5}(?:-\d{4})?)\b").unwrap()
});

static STATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Z]{2})\b").unwrap());

static NUMERIC_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d,.]+").unwrap());

static FULL_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    // "Street, City, ST 12345" with optional ZIP.
    Regex::new(r"^(.+?),\s*([^,]+),\s*([A-Z]{2})\b\s*(\d{5})?").unwrap()
});

/// Extract a whole-currency-unit price from display text.
///
/// Strips every non-digit character; an empty or unparseable remainder is
/// `None`. Decimal points are not interpreted, prices are whole units.
pub fn parse_price(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Return the first numeric run (digits, commas, decimal points) in the text,
/// or an empty string.
pub fn parse_count(text: &str) -> String {
    NUMERIC_RUN_RE
        .find(text)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Typed bedroom count from a raw field value.
pub fn to_bedrooms(text: &str) -> Option<u32> {
    parse_count(text).replace(',', "").split('.').next()?.parse().ok()
}

/// Typed bathroom count; half-baths survive as the fractional part.
pub fn to_bathrooms(text: &str) -> Option<f64> {
    parse_count(text).replace(',', "").parse().ok()
}

/// Typed square footage from a raw field value.
pub fn to_square_feet(text: &str) -> Option<u32> {
    parse_count(text).replace(',', "").split('.').next()?.parse().ok()
}

/// Split location text into (city, state, zip).
///
/// ZIP comes from a 5-digit (optionally +4) pattern, state from a bare
/// 2-letter uppercase token, falling back to resolving `state_hint` through
/// the slug table. City is the alphabetic text preceding the state token.
///
/// A bare 2-letter token that is not actually a state code (say, an
/// abbreviation inside a community name) can be mis-captured here. Known
/// heuristic limitation, shared with every source this was built against.
pub fn parse_location(text: &str, state_hint: &str) -> (String, String, String) {
    let zip = ZIP_RE
        .captures(text)
        .map(|c| c[1].to_string())
        .unwrap_or_default();

    let state = match STATE_RE.captures(text) {
        Some(c) => c[1].to_string(),
        None if !state_hint.is_empty() => slug_to_abbrev(state_hint),
        None => String::new(),
    };

    let mut city = String::new();
    if !state.is_empty() {
        // Safe to interpolate: state is always exactly two uppercase letters.
        if let Ok(city_re) = Regex::new(&format!(r"([A-Za-z\s]+),?\s*{state}\b")) {
            if let Some(c) = city_re.captures(text) {
                city = c[1].trim().to_string();
            }
        }
    }

    (city, state, zip)
}

/// Components of a full one-line address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressParts {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

/// Split a one-line "Street, City, ST 12345" address into components.
///
/// Falls back to positional comma splitting when the strict shape does not
/// match, leaving state/zip empty rather than guessing.
pub fn split_full_address(text: &str) -> AddressParts {
    if let Some(c) = FULL_ADDRESS_RE.captures(text) {
        return AddressParts {
            street: c[1].trim().to_string(),
            city: c[2].trim().to_string(),
            state: c[3].to_string(),
            zip: c.get(4).map(|m| m.as_str().to_string()).unwrap_or_default(),
        };
    }

    let parts: Vec<&str> = text.split(',').collect();
    let mut out = AddressParts::default();
    if parts.len() >= 2 {
        out.street = parts[0].trim().to_string();
        if parts.len() >= 3 {
            out.city = parts[1].trim().to_string();
        }
    } else {
        out.street = text.trim().to_string();
    }
    out
}

/// Infer a house type from the card's full text when no explicit field
/// exists. The SingleFamily fallback is a deliberate default bias for
/// builder inventory, not an absence marker.
pub fn infer_house_type(card_text: &str) -> HouseType {
    let lower = card_text.to_lowercase();
    if lower.contains("townhome") || lower.contains("townhouse") {
        HouseType::Townhome
    } else if lower.contains("condo") {
        HouseType::Condominium
    } else {
        HouseType::SingleFamily
    }
}

/// Map an explicit house-type field value to the enum.
pub fn parse_house_type(text: &str) -> HouseType {
    let lower = text.to_lowercase();
    if lower.contains("townhome") || lower.contains("townhouse") {
        HouseType::Townhome
    } else if lower.contains("condo") {
        HouseType::Condominium
    } else if lower.contains("single") {
        HouseType::SingleFamily
    } else {
        HouseType::Unknown
    }
}

/// Map a raw status string to the canonical status enum.
pub fn parse_status(text: &str) -> ListingStatus {
    let lower = text.to_lowercase();
    if lower.contains("move-in ready") || lower.contains("move in ready") || lower.contains("quick move") {
        ListingStatus::MoveInReady
    } else if lower.contains("under construction") {
        ListingStatus::UnderConstruction
    } else if lower.contains("coming soon") {
        ListingStatus::ComingSoon
    } else {
        ListingStatus::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("$1,234,567", Some(1_234_567))]
    #[case("From $389,990", Some(389_990))]
    #[case("Call for price", None)]
    #[case("", None)]
    #[case("$0", Some(0))]
    fn price_parsing(#[case] input: &str, #[case] expected: Option<i64>) {
        assert_eq!(parse_price(input), expected);
    }

    #[rstest]
    #[case("3 bd", "3")]
    #[case("2.5 baths", "2.5")]
    #[case("1,944 sqft", "1,944")]
    #[case("no numbers here", "")]
    fn numeric_runs(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(parse_count(input), expected);
    }

    #[test]
    fn typed_counts() {
        assert_eq!(to_bedrooms("4 beds"), Some(4));
        assert_eq!(to_bathrooms("2.5 ba"), Some(2.5));
        assert_eq!(to_square_feet("2,105 sq ft"), Some(2105));
        assert_eq!(to_bedrooms("studio"), None);
    }

    #[test]
    fn location_with_explicit_state_and_zip() {
        let (city, state, zip) = parse_location("Dallas, TX 75201", "");
        assert_eq!(city, "Dallas");
        assert_eq!(state, "TX");
        assert_eq!(zip, "75201");
    }

    #[test]
    fn location_falls_back_to_state_hint() {
        let (city, state, zip) = parse_location("Somewhere north of town", "texas");
        assert_eq!(city, "");
        assert_eq!(state, "TX");
        assert_eq!(zip, "");
    }

    #[test]
    fn location_zip_plus_four() {
        let (_, _, zip) = parse_location("Austin, TX 73301-0001", "");
        assert_eq!(zip, "73301-0001");
    }

    #[test]
    fn full_address_strict_shape() {
        let parts = split_full_address("123 Juniper Way, Frisco, TX 75034");
        assert_eq!(parts.street, "123 Juniper Way");
        assert_eq!(parts.city, "Frisco");
        assert_eq!(parts.state, "TX");
        assert_eq!(parts.zip, "75034");
    }

    #[test]
    fn full_address_loose_fallback() {
        let parts = split_full_address("123 Juniper Way, Frisco");
        assert_eq!(parts.street, "123 Juniper Way");
        assert_eq!(parts.city, "");
        assert_eq!(parts.state, "");
    }

    #[rstest]
    #[case("Beautiful townhome with 3 beds", HouseType::Townhome)]
    #[case("Luxury CONDO downtown", HouseType::Condominium)]
    #[case("Spacious single family home", HouseType::SingleFamily)]
    #[case("3 bd 2 ba ranch", HouseType::SingleFamily)]
    fn house_type_inference(#[case] text: &str, #[case] expected: HouseType) {
        assert_eq!(infer_house_type(text), expected);
    }

    #[test]
    fn explicit_house_type_unknown_without_signal() {
        assert_eq!(parse_house_type("Duplex"), HouseType::Unknown);
        assert_eq!(parse_house_type("Single Family"), HouseType::SingleFamily);
    }

    #[rstest]
    #[case("Move-In Ready", ListingStatus::MoveInReady)]
    #[case("Quick Move-In", ListingStatus::MoveInReady)]
    #[case("Under Construction", ListingStatus::UnderConstruction)]
    #[case("Coming Soon!", ListingStatus::ComingSoon)]
    #[case("", ListingStatus::Unknown)]
    fn status_parsing(#[case] text: &str, #[case] expected: ListingStatus) {
        assert_eq!(parse_status(text), expected);
    }
}
