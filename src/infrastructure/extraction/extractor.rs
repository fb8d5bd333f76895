//! Card discovery and field-cascade evaluation.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, trace};
use url::Url;

use super::error::{ExtractionError, ExtractionResult};
use super::plan::{ExtractionPlan, FieldStrategy, ListingField};
use super::{RawRecord, script_json};

static ANY_ELEMENT: Lazy<Selector> = Lazy::new(|| Selector::parse("*").unwrap());
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// Extract raw listing records from a rendered document.
///
/// Structural card discovery runs first; when it yields nothing and the plan
/// carries a script recovery, the embedded payload is tried. Cards that
/// recover no meaningful field are dropped silently.
pub fn extract(body: &str, plan: &ExtractionPlan, url: &str) -> ExtractionResult<Vec<RawRecord>> {
    if body.trim().is_empty() {
        return Err(ExtractionError::MalformedDocument {
            url: url.to_string(),
            reason: "empty document body".to_string(),
        });
    }

    let html = Html::parse_document(body);
    let cards = discover_cards(&html, plan);
    debug!(url, cards = cards.len(), "Card discovery finished");

    let sections: Vec<_> = plan
        .section_statuses
        .iter()
        .flat_map(|section| {
            html.select(&section.selector)
                .map(|el| (el.id(), section.status))
                .collect::<Vec<_>>()
        })
        .collect();

    let mut records: Vec<RawRecord> = Vec::new();
    for card in &cards {
        let mut record = extract_card(*card, plan, url);
        if !record.is_meaningful() {
            trace!(url, "Dropping empty card shell");
            continue;
        }
        record.status_override = sections
            .iter()
            .find(|(id, _)| *id == card.id() || card.ancestors().any(|n| n.id() == *id))
            .map(|(_, status)| *status);
        records.push(record);
    }

    if records.is_empty() {
        if let Some(recovery) = &plan.script_recovery {
            records = script_json::recover(&html, recovery);
        }
    }

    Ok(records)
}

/// Union of structural queries plus the price-leaf ancestor climb.
/// Redundancy is deliberate: templates differ across pages of one source.
fn discover_cards<'a>(html: &'a Html, plan: &ExtractionPlan) -> Vec<ElementRef<'a>> {
    let mut seen = HashSet::new();
    let mut cards = Vec::new();

    for selector in &plan.card_selectors {
        for element in html.select(selector) {
            if seen.insert(element.id()) {
                cards.push(element);
            }
        }
    }

    if let Some(heuristic) = &plan.anchor_heuristic {
        for element in html.select(&ANY_ELEMENT) {
            if !heuristic.leaf_pattern.is_match(&own_text(element)) {
                continue;
            }
            let Some(container) = climb_to_card(element, heuristic.max_climb) else {
                continue;
            };
            // Skip containers already covered by a discovered card.
            let covered = seen.contains(&container.id())
                || container.ancestors().any(|n| seen.contains(&n.id()));
            if !covered && seen.insert(container.id()) {
                cards.push(container);
            }
        }
    }

    cards
}

/// Climb from a recognizable leaf toward the enclosing card container:
/// the nearest ancestor (within the bound) that carries a link, falling
/// back to the highest climbed ancestor below the page chrome.
fn climb_to_card(leaf: ElementRef<'_>, max_climb: usize) -> Option<ElementRef<'_>> {
    let mut current = leaf;
    for _ in 0..max_climb {
        let Some(parent) = current.parent().and_then(ElementRef::wrap) else {
            break;
        };
        if matches!(parent.value().name(), "body" | "html") {
            break;
        }
        current = parent;
        if current.select(&ANCHOR).next().is_some() {
            return Some(current);
        }
    }
    (current.id() != leaf.id()).then_some(current)
}

fn extract_card(card: ElementRef<'_>, plan: &ExtractionPlan, base_url: &str) -> RawRecord {
    let card_text = normalized_text(card);
    let mut record = RawRecord {
        card_text: card_text.clone(),
        ..Default::default()
    };

    for recipe in &plan.recipes {
        let value = recipe
            .strategies
            .iter()
            .find_map(|strategy| apply_strategy(card, strategy, &card_text));
        let Some(value) = value else { continue };

        match recipe.field {
            ListingField::Name => record.name = Some(value),
            ListingField::Price => record.price = Some(value),
            ListingField::Address => record.address = Some(value),
            ListingField::Bedrooms => record.bedrooms = Some(value),
            ListingField::Bathrooms => record.bathrooms = Some(value),
            ListingField::SquareFeet => record.square_feet = Some(value),
            ListingField::HouseType => record.house_type = Some(value),
            ListingField::Status => record.status = Some(value),
            ListingField::DetailUrl => record.detail_url = Some(resolve_url(base_url, &value)),
        }
    }

    record
}

/// Evaluate one cascade step. Each step either yields a non-empty value or
/// passes to the next; order is fixed, so extraction is reproducible.
fn apply_strategy(
    card: ElementRef<'_>,
    strategy: &FieldStrategy,
    card_text: &str,
) -> Option<String> {
    match strategy {
        FieldStrategy::Primary(selector) | FieldStrategy::Secondary(selector) => card
            .select(selector)
            .next()
            .map(normalized_text)
            .filter(|s| !s.is_empty()),
        FieldStrategy::Attribute { selector, attribute } => card
            .select(selector)
            .next()
            .and_then(|el| el.value().attr(attribute))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        FieldStrategy::Pattern(pattern) => pattern.captures(card_text).map(|captures| {
            captures
                .get(1)
                .or_else(|| captures.get(0))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default()
        })
        .filter(|s| !s.is_empty()),
        FieldStrategy::Default(value) => Some(value.clone()),
    }
}

/// Whitespace-normalized text of an element's subtree.
fn normalized_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text directly under an element, excluding descendants.
fn own_text(element: ElementRef<'_>) -> String {
    element
        .children()
        .filter_map(|node| node.value().as_text().map(|t| t.trim().to_string()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve_url(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ListingStatus;
    use crate::infrastructure::extraction::plan::{
        AnchorHeuristic, FieldRecipe, ScriptRecovery, SectionStatus, compile_selectors, selector,
    };
    use regex::Regex;

    fn test_plan() -> ExtractionPlan {
        let card_selectors =
            compile_selectors(&[".home-card", "[data-home]", ".qmi-card"]).unwrap();
        let recipes = vec![
            FieldRecipe::new(
                ListingField::Name,
                vec![
                    FieldStrategy::Primary(selector(".plan-name").unwrap()),
                    FieldStrategy::Secondary(selector("h3, .title").unwrap()),
                ],
            ),
            FieldRecipe::new(
                ListingField::Price,
                vec![
                    FieldStrategy::Primary(selector(".price").unwrap()),
                    FieldStrategy::Pattern(Regex::new(r"\$[\d,]+").unwrap()),
                ],
            ),
            FieldRecipe::new(
                ListingField::Bedrooms,
                vec![
                    FieldStrategy::Primary(selector(".beds").unwrap()),
                    FieldStrategy::Pattern(Regex::new(r"(?i)(\d+)\s*(?:bd|bed|beds|bedroom)").unwrap()),
                ],
            ),
            FieldRecipe::new(
                ListingField::HouseType,
                vec![
                    FieldStrategy::Primary(selector(".home-type").unwrap()),
                    FieldStrategy::Default("Single Family".to_string()),
                ],
            ),
            FieldRecipe::new(
                ListingField::DetailUrl,
                vec![FieldStrategy::Attribute {
                    selector: selector("a[href]").unwrap(),
                    attribute: "href".to_string(),
                }],
            ),
        ];
        ExtractionPlan::new(card_selectors, recipes)
    }

    #[test]
    fn primary_selector_wins_when_present() {
        let body = r#"<div class="home-card">
            <span class="plan-name">The Aspen</span>
            <span class="price">$399,990</span>
            <span class="beds">4</span>
        </div>"#;
        let records = extract(body, &test_plan(), "https://example.com/c").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name.as_deref(), Some("The Aspen"));
        assert_eq!(records[0].price.as_deref(), Some("$399,990"));
        assert_eq!(records[0].bedrooms.as_deref(), Some("4"));
    }

    #[test]
    fn regex_fallback_when_selectors_miss() {
        let body = r#"<div class="home-card">
            <h3>The Birch</h3>
            <p>From $425,000 - 3 bd, 2 ba</p>
        </div>"#;
        let records = extract(body, &test_plan(), "https://example.com/c").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price.as_deref(), Some("$425,000"));
        assert_eq!(records[0].bedrooms.as_deref(), Some("3"));
    }

    #[test]
    fn default_applies_when_all_strategies_miss() {
        let body = r#"<div class="home-card"><h3>The Cedar</h3></div>"#;
        let records = extract(body, &test_plan(), "https://example.com/c").unwrap();
        assert_eq!(records[0].house_type.as_deref(), Some("Single Family"));
        assert!(records[0].price.is_none());
    }

    #[test]
    fn empty_shells_are_discarded_silently() {
        let body = r#"<div class="home-card"><img src="x.jpg"></div>
                      <div class="home-card"><h3>Kept</h3></div>"#;
        let records = extract(body, &test_plan(), "https://example.com/c").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name.as_deref(), Some("Kept"));
    }

    #[test]
    fn card_discovery_unions_selector_variants() {
        let body = r#"
            <div class="home-card"><h3>A</h3></div>
            <div data-home="1"><h3>B</h3></div>
            <div class="qmi-card home-card"><h3>C</h3></div>"#;
        let records = extract(body, &test_plan(), "https://example.com/c").unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn anchor_heuristic_finds_unclassed_cards() {
        let plan = test_plan().with_anchor_heuristic(AnchorHeuristic {
            leaf_pattern: Regex::new(r"^\$[\d,]+$").unwrap(),
            max_climb: 3,
        });
        let body = r#"<div><section>
            <span>$512,000</span>
            <a href="/homes/512-elm">512 Elm</a>
        </section></div>"#;
        let records = extract(body, &plan, "https://example.com/c").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price.as_deref(), Some("$512,000"));
        assert_eq!(
            records[0].detail_url.as_deref(),
            Some("https://example.com/homes/512-elm")
        );
    }

    #[test]
    fn section_membership_overrides_status() {
        let plan = test_plan().with_section_statuses(vec![SectionStatus {
            selector: selector(".qmi-homes").unwrap(),
            status: ListingStatus::MoveInReady,
        }]);
        let body = r#"
            <div class="qmi-homes">
                <div class="home-card"><h3>Quick</h3></div>
            </div>
            <div class="home-card"><h3>Plain</h3></div>"#;
        let records = extract(body, &plan, "https://example.com/c").unwrap();
        assert_eq!(records.len(), 2);
        let quick = records.iter().find(|r| r.name.as_deref() == Some("Quick")).unwrap();
        let plain = records.iter().find(|r| r.name.as_deref() == Some("Plain")).unwrap();
        assert_eq!(quick.status_override, Some(ListingStatus::MoveInReady));
        assert_eq!(plain.status_override, None);
    }

    #[test]
    fn script_recovery_used_when_structure_yields_nothing() {
        let plan = test_plan().with_script_recovery(ScriptRecovery {
            marker: "listResults".to_string(),
            array_paths: vec!["/searchResults/listResults".to_string()],
        });
        let body = r#"<html><body><div id="app"></div>
            <script>{"searchResults":{"listResults":[
                {"address":"9 Fir Ct","price":"$350,000"}]}}</script>
        </body></html>"#;
        let records = extract(body, &plan, "https://example.com/c").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address.as_deref(), Some("9 Fir Ct"));
    }

    #[test]
    fn empty_document_is_malformed() {
        let err = extract("   ", &test_plan(), "https://example.com/c").unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedDocument { .. }));
    }

    #[test]
    fn relative_detail_urls_resolve_against_base() {
        let body = r#"<div class="home-card"><h3>D</h3><a href="/community/d/plan">D</a></div>"#;
        let records = extract(body, &test_plan(), "https://www.lennar.com/new-homes/texas").unwrap();
        assert_eq!(
            records[0].detail_url.as_deref(),
            Some("https://www.lennar.com/community/d/plan")
        );
    }
}
