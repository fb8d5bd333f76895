//! Source definitions.
//!
//! A source spec describes where a source's hierarchy starts, what its link
//! shapes look like per level, and how its listing cards are read. Selector
//! and pattern literals are data here, not code: they track the sites'
//! markup and change with every redesign.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::domain::{ListingStatus, TargetLevel};
use crate::infrastructure::config::ConfigError;
use crate::infrastructure::extraction::{
    AnchorHeuristic, ExtractionPlan, FieldRecipe, FieldStrategy, ListingField, ScriptRecovery,
    SectionStatus, compile_selectors, selector,
};

/// One level of a source's navigation hierarchy. The last level in a spec is
/// the leaf where listing cards are extracted.
#[derive(Debug, Clone)]
pub struct LevelSpec {
    pub level: TargetLevel,
    /// Href path shape for discovering children of the level above;
    /// `{parent}` is replaced with the parent slug before matching and
    /// capture group 1 is the child slug.
    pub link_pattern: String,
    /// An optional level may be skipped: its children can be discovered
    /// directly on the grandparent document.
    pub optional: bool,
}

/// How the root targets of a source are obtained.
#[derive(Debug, Clone)]
pub enum RootSpec {
    /// Fetch a root document and discover region links, with a static
    /// fallback list when discovery yields nothing.
    Discover {
        url: String,
        link_pattern: String,
        fallback_slugs: Vec<String>,
        /// Builds a region URL from `{base}` and `{slug}`.
        url_template: String,
    },
    /// Static market list resolved from the region hint; unknown hints are
    /// treated as a single literal market location.
    Markets {
        /// Builds a market URL from `{base}` and `{slug}`.
        url_template: String,
    },
}

/// Complete definition of one crawlable source.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub name: String,
    pub base_url: String,
    pub root: RootSpec,
    pub levels: Vec<LevelSpec>,
    pub plan: ExtractionPlan,
    /// Whether leaf pages reveal content incrementally.
    pub paginate: bool,
    /// Query parameter driving incremental reveals.
    pub page_param: String,
    /// Cheap substring that approximates the card count in raw markup.
    pub card_marker: String,
    /// When set, records whose card text and builder field both lack this
    /// token are dropped.
    pub builder_filter: Option<String>,
}

impl SourceSpec {
    pub fn leaf_level(&self) -> TargetLevel {
        self.levels.last().map(|l| l.level).unwrap_or(TargetLevel::Community)
    }
}

/// Resolve a seed source name to its spec. Unknown names are fatal: the run
/// refuses to start rather than silently skipping a requested source.
pub fn resolve(name: &str) -> Result<SourceSpec, ConfigError> {
    let spec = match name {
        "lennar" => lennar(),
        "zillow" => zillow(),
        other => {
            return Err(ConfigError::MissingSource {
                name: other.to_string(),
            });
        }
    };
    spec.map_err(|e| ConfigError::Invalid {
        reason: format!("source '{name}': {e}"),
    })
}

/// Builder-direct source: region -> (metro) -> community -> listing cards.
fn lennar() -> anyhow::Result<SourceSpec> {
    let card_selectors = compile_selectors(&[
        ".home-card",
        ".plan-card",
        ".qmi-card",
        "[data-home]",
        "[data-plan]",
        "[data-qmi]",
        ".inventory-home",
        ".floorplan-card",
        ".home-listing",
    ])?;

    let recipes = vec![
        FieldRecipe::new(
            ListingField::Name,
            vec![
                FieldStrategy::Primary(selector(".plan-name, .home-name")?),
                FieldStrategy::Secondary(selector("h2, h3, .title, .name")?),
            ],
        ),
        FieldRecipe::new(
            ListingField::Price,
            vec![
                FieldStrategy::Primary(selector(".price, .home-price, .plan-price, [data-price]")?),
                FieldStrategy::Pattern(Regex::new(r"\$[\d,]+")?),
            ],
        ),
        FieldRecipe::new(
            ListingField::Address,
            vec![FieldStrategy::Primary(selector(".address, .location, .home-address")?)],
        ),
        FieldRecipe::new(
            ListingField::Bedrooms,
            vec![
                FieldStrategy::Primary(selector(".beds, .bedrooms, [data-beds]")?),
                FieldStrategy::Pattern(Regex::new(r"(?i)(\d+)\s*(?:bd|br|bed|beds|bedroom)")?),
            ],
        ),
        FieldRecipe::new(
            ListingField::Bathrooms,
            vec![
                FieldStrategy::Primary(selector(".baths, .bathrooms, [data-baths]")?),
                FieldStrategy::Pattern(Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:ba|bath|baths|bathroom)")?),
            ],
        ),
        FieldRecipe::new(
            ListingField::SquareFeet,
            vec![
                FieldStrategy::Primary(selector(".sqft, .square-feet, [data-sqft]")?),
                FieldStrategy::Pattern(Regex::new(r"(?i)([\d,]+)\s*(?:sq\s*ft|sqft|sf)")?),
            ],
        ),
        FieldRecipe::new(
            ListingField::HouseType,
            vec![
                FieldStrategy::Primary(selector(".home-type, .type, .property-type")?),
                FieldStrategy::Pattern(Regex::new(r"(?i)(townhome|townhouse|condo|single[\s-]family)")?),
                FieldStrategy::Default("Single Family".to_string()),
            ],
        ),
        FieldRecipe::new(
            ListingField::Status,
            vec![FieldStrategy::Primary(selector(".status, .availability, .home-status")?)],
        ),
        FieldRecipe::new(
            ListingField::DetailUrl,
            vec![FieldStrategy::Attribute {
                selector: selector("a[href]")?,
                attribute: "href".to_string(),
            }],
        ),
    ];

    let plan = ExtractionPlan::new(card_selectors, recipes)
        .with_anchor_heuristic(AnchorHeuristic {
            leaf_pattern: Regex::new(r"^\$[\d,]+$")?,
            max_climb: 4,
        })
        .with_section_statuses(vec![
            SectionStatus {
                selector: selector(".qmi-homes")?,
                status: ListingStatus::MoveInReady,
            },
            SectionStatus {
                selector: selector(".move-in-ready")?,
                status: ListingStatus::MoveInReady,
            },
            SectionStatus {
                selector: selector(".inventory")?,
                status: ListingStatus::MoveInReady,
            },
        ]);

    Ok(SourceSpec {
        name: "lennar".to_string(),
        base_url: "https://www.lennar.com".to_string(),
        root: RootSpec::Discover {
            url: "https://www.lennar.com/new-homes".to_string(),
            link_pattern: r"^/new-homes/([a-z-]+)/?$".to_string(),
            fallback_slugs: [
                "arizona",
                "california",
                "colorado",
                "florida",
                "georgia",
                "idaho",
                "indiana",
                "maryland",
                "minnesota",
                "nevada",
                "new-jersey",
                "north-carolina",
                "oregon",
                "south-carolina",
                "tennessee",
                "texas",
                "utah",
                "virginia",
                "washington",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            url_template: "{base}/new-homes/{slug}".to_string(),
        },
        levels: vec![
            LevelSpec {
                level: TargetLevel::Region,
                link_pattern: r"^/new-homes/([a-z-]+)/?$".to_string(),
                optional: false,
            },
            LevelSpec {
                level: TargetLevel::SubRegion,
                link_pattern: r"^/new-homes/{parent}/([a-z-]+)/?$".to_string(),
                optional: true,
            },
            LevelSpec {
                level: TargetLevel::Community,
                link_pattern: r"/community/([a-z0-9-]+)".to_string(),
                optional: false,
            },
        ],
        plan,
        paginate: false,
        page_param: "page".to_string(),
        card_marker: "home-card".to_string(),
        builder_filter: None,
    })
}

/// Portal source: market search pages with incrementally revealed listing
/// cards, filtered down to one builder's inventory.
fn zillow() -> anyhow::Result<SourceSpec> {
    let card_selectors = compile_selectors(&[
        r#"[data-test="property-card"]"#,
        ".list-card",
        ".property-card",
    ])?;

    let recipes = vec![
        FieldRecipe::new(
            ListingField::Address,
            vec![
                FieldStrategy::Primary(selector(r#"[data-test="property-card-addr"]"#)?),
                FieldStrategy::Secondary(selector("address")?),
            ],
        ),
        FieldRecipe::new(
            ListingField::Price,
            vec![
                FieldStrategy::Primary(selector(r#"[data-test="property-card-price"]"#)?),
                FieldStrategy::Secondary(selector(".list-card-price")?),
                FieldStrategy::Pattern(Regex::new(r"\$[\d,]+")?),
            ],
        ),
        FieldRecipe::new(
            ListingField::Bedrooms,
            vec![FieldStrategy::Pattern(Regex::new(r"(?i)(\d+)\s*(?:bd|bds|bed|beds)")?)],
        ),
        FieldRecipe::new(
            ListingField::Bathrooms,
            vec![FieldStrategy::Pattern(Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:ba|bath|baths)")?)],
        ),
        FieldRecipe::new(
            ListingField::SquareFeet,
            vec![FieldStrategy::Pattern(Regex::new(r"(?i)([\d,]+)\s*(?:sqft|sq\s*ft)")?)],
        ),
        FieldRecipe::new(
            ListingField::HouseType,
            vec![
                FieldStrategy::Pattern(Regex::new(r"(?i)(townhouse|townhome|condo|single[\s-]family|house)")?),
                FieldStrategy::Default("Single Family".to_string()),
            ],
        ),
        FieldRecipe::new(
            ListingField::DetailUrl,
            vec![FieldStrategy::Attribute {
                selector: selector(r#"a[href*="/homedetails/"]"#)?,
                attribute: "href".to_string(),
            }],
        ),
    ];

    let plan = ExtractionPlan::new(card_selectors, recipes).with_script_recovery(ScriptRecovery {
        marker: "listResults".to_string(),
        array_paths: vec![
            "/cat1/searchResults/listResults".to_string(),
            "/searchResults/listResults".to_string(),
        ],
    });

    Ok(SourceSpec {
        name: "zillow".to_string(),
        base_url: "https://www.zillow.com".to_string(),
        root: RootSpec::Markets {
            url_template: "{base}/{slug}/new-construction/".to_string(),
        },
        levels: vec![LevelSpec {
            level: TargetLevel::Market,
            link_pattern: String::new(),
            optional: false,
        }],
        plan,
        paginate: true,
        page_param: "page".to_string(),
        card_marker: "property-card".to_string(),
        builder_filter: Some("lennar".to_string()),
    })
}

/// Major markets per region slug, used when a portal source is seeded with a
/// region instead of explicit locations.
static DEFAULT_MARKETS: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("arizona", vec!["Phoenix, AZ", "Tucson, AZ", "Mesa, AZ"]),
        (
            "california",
            vec![
                "Los Angeles, CA",
                "San Diego, CA",
                "Sacramento, CA",
                "San Francisco, CA",
                "Riverside, CA",
                "Fresno, CA",
            ],
        ),
        ("colorado", vec!["Denver, CO", "Colorado Springs, CO", "Aurora, CO"]),
        (
            "florida",
            vec![
                "Miami, FL",
                "Orlando, FL",
                "Tampa, FL",
                "Jacksonville, FL",
                "Fort Lauderdale, FL",
                "West Palm Beach, FL",
                "Naples, FL",
            ],
        ),
        ("georgia", vec!["Atlanta, GA", "Savannah, GA"]),
        ("idaho", vec!["Boise, ID"]),
        ("indiana", vec!["Indianapolis, IN"]),
        ("maryland", vec!["Baltimore, MD"]),
        ("minnesota", vec!["Minneapolis, MN"]),
        ("nevada", vec!["Las Vegas, NV", "Reno, NV", "Henderson, NV"]),
        ("new-jersey", vec!["Newark, NJ", "Jersey City, NJ"]),
        ("north-carolina", vec!["Charlotte, NC", "Raleigh, NC", "Durham, NC"]),
        ("oregon", vec!["Portland, OR"]),
        (
            "south-carolina",
            vec!["Charleston, SC", "Columbia, SC", "Myrtle Beach, SC"],
        ),
        ("tennessee", vec!["Nashville, TN", "Memphis, TN"]),
        (
            "texas",
            vec![
                "Dallas, TX",
                "Houston, TX",
                "Austin, TX",
                "San Antonio, TX",
                "Fort Worth, TX",
                "El Paso, TX",
            ],
        ),
        ("utah", vec!["Salt Lake City, UT"]),
        ("virginia", vec!["Richmond, VA", "Virginia Beach, VA"]),
        ("washington", vec!["Seattle, WA", "Tacoma, WA"]),
    ])
});

/// Markets for a region hint. An unrecognized, non-empty hint is treated as
/// a single literal market location; an empty hint means every market.
pub fn markets_for_hint(hint: &str) -> Vec<String> {
    let key = hint.trim().to_ascii_lowercase();
    if key.is_empty() {
        let mut all: Vec<String> = DEFAULT_MARKETS
            .values()
            .flat_map(|markets| markets.iter().map(|m| m.to_string()))
            .collect();
        all.sort();
        return all;
    }
    match DEFAULT_MARKETS.get(key.as_str()) {
        Some(markets) => markets.iter().map(|m| m.to_string()).collect(),
        None => vec![hint.trim().to_string()],
    }
}

/// URL slug for a market display name: "Fort Worth, TX" -> "fort-worth-tx".
pub fn market_slug(display: &str) -> String {
    display
        .to_ascii_lowercase()
        .replace(',', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_sources_resolve() {
        assert_eq!(resolve("lennar").unwrap().name, "lennar");
        assert_eq!(resolve("zillow").unwrap().name, "zillow");
    }

    #[test]
    fn unknown_source_is_missing() {
        let err = resolve("redfin").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSource { .. }));
    }

    #[test]
    fn market_slugs_match_url_shape() {
        assert_eq!(market_slug("Dallas, TX"), "dallas-tx");
        assert_eq!(market_slug("Salt Lake City, UT"), "salt-lake-city-ut");
    }

    #[test]
    fn hint_resolution() {
        assert_eq!(markets_for_hint("texas").len(), 6);
        assert_eq!(markets_for_hint("Boise, ID"), vec!["Boise, ID"]);
        assert!(markets_for_hint("").len() > 30);
    }
}
