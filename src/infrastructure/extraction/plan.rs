//! Data-driven extraction plans.
//!
//! A plan describes how to recover listing cards and fields from one
//! source's markup: card discovery queries, per-field strategy cascades and
//! optional embedded-script recovery. Selector and regex literals live in
//! the source definitions, not in extraction code, because they change with
//! every site redesign.

use regex::Regex;
use scraper::Selector;

use crate::domain::ListingStatus;

/// Fields a recipe can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListingField {
    /// Plan or home name.
    Name,
    Price,
    Address,
    Bedrooms,
    Bathrooms,
    SquareFeet,
    HouseType,
    Status,
    DetailUrl,
}

/// One step of a field cascade. Steps are evaluated in order; the first
/// non-empty result wins, which keeps extraction deterministic and lets each
/// strategy be tested on its own.
#[derive(Debug, Clone)]
pub enum FieldStrategy {
    /// Most specific structural match for the currently known markup.
    Primary(Selector),
    /// Looser class/attribute match, broader net.
    Secondary(Selector),
    /// Attribute value of the first matching element (e.g. an anchor href).
    Attribute { selector: Selector, attribute: String },
    /// Regex over the card's full text; capture group 1 if present, whole
    /// match otherwise.
    Pattern(Regex),
    /// Field-specific constant fallback.
    Default(String),
}

/// Ordered cascade of strategies for one field.
#[derive(Debug, Clone)]
pub struct FieldRecipe {
    pub field: ListingField,
    pub strategies: Vec<FieldStrategy>,
}

impl FieldRecipe {
    pub fn new(field: ListingField, strategies: Vec<FieldStrategy>) -> Self {
        Self { field, strategies }
    }
}

/// Bounded ancestor climb from a recognizable leaf element (typically a
/// price string) up to the enclosing card container.
#[derive(Debug, Clone)]
pub struct AnchorHeuristic {
    /// Lexical shape of the leaf's own text.
    pub leaf_pattern: Regex,
    /// Maximum ancestor levels to climb from the leaf.
    pub max_climb: usize,
}

/// Section queries that imply a status for every card inside them, e.g.
/// quick-move-in / inventory sections.
#[derive(Debug, Clone)]
pub struct SectionStatus {
    pub selector: Selector,
    pub status: ListingStatus,
}

/// Recovery of listings from JSON embedded in `<script>` bodies, for pages
/// that render cards client-side from an inlined result payload.
#[derive(Debug, Clone)]
pub struct ScriptRecovery {
    /// Cheap substring that identifies the interesting script body.
    pub marker: String,
    /// JSON pointer paths tried in order to reach the result array.
    pub array_paths: Vec<String>,
}

/// Complete per-source extraction plan.
#[derive(Debug, Clone)]
pub struct ExtractionPlan {
    /// Union of structural card queries: explicit data attributes plus the
    /// class-name variants in circulation across the source's templates.
    pub card_selectors: Vec<Selector>,
    /// Card discovery fallback climbing from price-like leaves.
    pub anchor_heuristic: Option<AnchorHeuristic>,
    /// Per-field cascades.
    pub recipes: Vec<FieldRecipe>,
    /// Sections whose membership overrides card status.
    pub section_statuses: Vec<SectionStatus>,
    /// Embedded-script fallback when structural discovery finds nothing.
    pub script_recovery: Option<ScriptRecovery>,
}

impl ExtractionPlan {
    pub fn new(card_selectors: Vec<Selector>, recipes: Vec<FieldRecipe>) -> Self {
        Self {
            card_selectors,
            anchor_heuristic: None,
            recipes,
            section_statuses: Vec::new(),
            script_recovery: None,
        }
    }

    pub fn with_anchor_heuristic(mut self, heuristic: AnchorHeuristic) -> Self {
        self.anchor_heuristic = Some(heuristic);
        self
    }

    pub fn with_section_statuses(mut self, sections: Vec<SectionStatus>) -> Self {
        self.section_statuses = sections;
        self
    }

    pub fn with_script_recovery(mut self, recovery: ScriptRecovery) -> Self {
        self.script_recovery = Some(recovery);
        self
    }
}

/// Parse a list of selector strings, skipping any that fail to compile.
/// At least one selector must survive; selector lists are authored per
/// source and a fully broken list is a source-definition bug.
pub fn compile_selectors(selectors: &[&str]) -> anyhow::Result<Vec<Selector>> {
    let mut compiled = Vec::new();
    let mut failed = Vec::new();
    for raw in selectors {
        match Selector::parse(raw) {
            Ok(sel) => compiled.push(sel),
            Err(e) => failed.push(format!("'{raw}': {e}")),
        }
    }
    if compiled.is_empty() {
        anyhow::bail!("no valid selectors compiled: {}", failed.join(", "));
    }
    if !failed.is_empty() {
        tracing::warn!("Skipped invalid selectors: {}", failed.join(", "));
    }
    Ok(compiled)
}

/// Single-selector convenience for recipe construction.
pub fn selector(raw: &str) -> anyhow::Result<Selector> {
    Selector::parse(raw).map_err(|e| anyhow::anyhow!("invalid selector '{raw}': {e}"))
}
