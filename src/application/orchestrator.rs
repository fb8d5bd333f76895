//! Per-source crawl orchestration.
//!
//! Walks a source's hierarchy (region -> optional sub-region -> community /
//! market), discovering children by link shape, and extracts listing cards
//! at the leaves. Failure at one node is isolated: it is logged, counted
//! and the sibling traversal continues. Only cancellation stops the walk.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::normalize::{
    infer_house_type, parse_house_type, parse_location, parse_price, parse_status,
    split_full_address, to_bathrooms, to_bedrooms, to_square_feet,
};
use crate::domain::states::{is_state_abbrev, slug_to_abbrev};
use crate::domain::{CrawlTarget, ListingRecord, TargetLevel};
use crate::infrastructure::config::{CrawlConfig, PaginationConfig, SearchFilters};
use crate::infrastructure::extraction::{self, ExtractionError, RawRecord};
use crate::infrastructure::fetcher::{FetchError, FetchMethod, FetchSession};
use crate::infrastructure::paginator::{LoadMoreDriver, Paginator, PaginatorState};

use super::sources::{LevelSpec, RootSpec, SourceSpec, market_slug, markets_for_hint};
use super::stats::RunStats;

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// Everything that can go wrong at one node. All variants downgrade to
/// statistics; none abort the crawl.
#[derive(Debug)]
enum NodeError {
    Fetch(FetchError),
    Extract(ExtractionError),
}

impl From<FetchError> for NodeError {
    fn from(e: FetchError) -> Self {
        Self::Fetch(e)
    }
}

impl From<ExtractionError> for NodeError {
    fn from(e: ExtractionError) -> Self {
        Self::Extract(e)
    }
}

/// Drives one source over one fetch session, emitting normalized records
/// into the run's stream.
pub struct CrawlOrchestrator {
    spec: SourceSpec,
    crawl: CrawlConfig,
    pagination: PaginationConfig,
    filters: SearchFilters,
    session: FetchSession,
    stats: RunStats,
    seen_urls: HashSet<String>,
}

impl CrawlOrchestrator {
    pub fn new(
        spec: SourceSpec,
        crawl: CrawlConfig,
        pagination: PaginationConfig,
        filters: SearchFilters,
        session: FetchSession,
    ) -> Self {
        let stats = RunStats::new(spec.name.clone());
        Self {
            spec,
            crawl,
            pagination,
            filters,
            session,
            stats,
            seen_urls: HashSet::new(),
        }
    }

    /// Walk the source to completion (or cancellation) and return its run
    /// statistics. Records flow through `tx` in discovery order.
    pub async fn run(mut self, region_hint: String, tx: mpsc::Sender<ListingRecord>) -> RunStats {
        let roots = self.initial_targets(&region_hint).await;
        info!(
            source = %self.spec.name,
            roots = roots.len(),
            region_hint = %region_hint,
            "Starting crawl"
        );

        let mut queue: VecDeque<(CrawlTarget, String)> = VecDeque::new();
        for entry in roots {
            if self.seen_urls.insert(entry.0.url.clone()) {
                queue.push_back(entry);
            }
        }

        while let Some((target, state_hint)) = queue.pop_front() {
            if self.session.cancel_token().is_cancelled() {
                info!(source = %self.spec.name, "Crawl cancelled");
                break;
            }

            // Politeness delay between node visits.
            if self.crawl.request_delay_ms > 0 {
                let delay = std::time::Duration::from_millis(self.crawl.request_delay_ms);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.session.cancel_token().cancelled() => break,
                }
            }

            self.stats.nodes_visited += 1;
            debug!(
                source = %self.spec.name,
                level = target.level.as_str(),
                url = %target.url,
                "Visiting node"
            );

            let result = self.visit(&target, &state_hint, &tx, &mut queue).await;
            match result {
                Ok(()) => {}
                Err(NodeError::Fetch(FetchError::Cancelled { .. })) => break,
                Err(NodeError::Fetch(FetchError::ExhaustedRetries { url, attempts, .. })) => {
                    self.stats.nodes_skipped += 1;
                    warn!(
                        source = %self.spec.name,
                        attempts,
                        "No data for node after retries: {url}"
                    );
                }
                Err(NodeError::Fetch(e)) => {
                    self.stats.nodes_failed += 1;
                    warn!(source = %self.spec.name, "Node failed: {e}");
                }
                Err(NodeError::Extract(e)) => {
                    self.stats.malformed_documents += 1;
                    warn!(source = %self.spec.name, "Document unusable: {e}");
                }
            }
        }

        info!(
            source = %self.spec.name,
            visited = self.stats.nodes_visited,
            skipped = self.stats.nodes_skipped,
            failed = self.stats.nodes_failed,
            records = self.stats.records_emitted,
            "Crawl finished"
        );
        self.stats
    }

    /// Root targets for the walk, each paired with the state hint its
    /// subtree inherits.
    async fn initial_targets(&mut self, region_hint: &str) -> Vec<(CrawlTarget, String)> {
        let hint = region_hint.trim().to_ascii_lowercase();
        match self.spec.root.clone() {
            RootSpec::Discover {
                url,
                link_pattern,
                fallback_slugs,
                url_template,
            } => {
                let mut targets = match self.session.fetch(&url, FetchMethod::Get, &[]).await {
                    Ok(doc) => self.parse_root_links(&doc.body, &link_pattern),
                    Err(e) => {
                        warn!(source = %self.spec.name, "Region discovery failed: {e}");
                        Vec::new()
                    }
                };
                if targets.is_empty() {
                    info!(source = %self.spec.name, "Using fallback region list");
                    targets = fallback_slugs
                        .iter()
                        .map(|slug| self.region_from_slug(slug, &url_template))
                        .collect();
                }
                if !hint.is_empty() {
                    targets.retain(|t| t.slug == hint);
                    if targets.is_empty() {
                        targets = vec![self.region_from_slug(&hint, &url_template)];
                    }
                }
                targets
                    .into_iter()
                    .map(|t| {
                        let slug = t.slug.clone();
                        (t, slug)
                    })
                    .collect()
            }
            RootSpec::Markets { url_template } => markets_for_hint(region_hint)
                .into_iter()
                .map(|display| {
                    let slug = market_slug(&display);
                    let url = url_template
                        .replace("{base}", &self.spec.base_url)
                        .replace("{slug}", &slug);
                    // "Dallas, TX" carries its own state token; bare location
                    // hints fall back to the seed hint.
                    let state_hint = display
                        .rsplit(',')
                        .next()
                        .map(str::trim)
                        .filter(|token| token.len() == 2)
                        .map(str::to_ascii_lowercase)
                        .unwrap_or_else(|| hint.clone());
                    let target =
                        CrawlTarget::new(TargetLevel::Market, slug, display, url, String::new());
                    (target, state_hint)
                })
                .collect(),
        }
    }

    fn region_from_slug(&self, slug: &str, url_template: &str) -> CrawlTarget {
        let url = url_template
            .replace("{base}", &self.spec.base_url)
            .replace("{slug}", slug);
        CrawlTarget::new(TargetLevel::Region, slug, title_from_slug(slug), url, String::new())
    }

    fn parse_root_links(&self, body: &str, pattern_src: &str) -> Vec<CrawlTarget> {
        let Ok(pattern) = Regex::new(pattern_src) else {
            warn!("Invalid root link pattern: {pattern_src}");
            return Vec::new();
        };
        let html = Html::parse_document(body);
        let mut targets = Vec::new();
        for anchor in html.select(&ANCHOR) {
            let Some(href) = anchor.value().attr("href") else { continue };
            let path = href_path(href);
            let Some(captures) = pattern.captures(&path) else { continue };
            let slug = captures
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| path.trim_matches('/').to_string());
            targets.push(CrawlTarget::new(
                TargetLevel::Region,
                slug.clone(),
                anchor_display_name(anchor, &slug),
                resolve_href(&self.spec.base_url, href),
                String::new(),
            ));
        }
        targets
    }

    async fn visit(
        &mut self,
        target: &CrawlTarget,
        state_hint: &str,
        tx: &mpsc::Sender<ListingRecord>,
        queue: &mut VecDeque<(CrawlTarget, String)>,
    ) -> Result<(), NodeError> {
        if target.level == self.spec.leaf_level() {
            self.visit_leaf(target, state_hint, tx).await
        } else {
            self.visit_branch(target, state_hint, queue).await
        }
    }

    /// Fetch a branch node and queue its children, deduplicated by URL and
    /// truncated to the configured bound.
    async fn visit_branch(
        &mut self,
        target: &CrawlTarget,
        state_hint: &str,
        queue: &mut VecDeque<(CrawlTarget, String)>,
    ) -> Result<(), NodeError> {
        let doc = self.session.fetch(&target.url, FetchMethod::Get, &[]).await?;
        let children = self.discover_children(&doc.body, target, state_hint);

        let mut queued: u32 = 0;
        let mut truncated: u32 = 0;
        for (child, hint) in children {
            if !self.seen_urls.insert(child.url.clone()) {
                continue;
            }
            if let Some(max) = self.crawl.max_children {
                if queued as usize >= max {
                    truncated += 1;
                    continue;
                }
            }
            queued += 1;
            queue.push_back((child, hint));
        }

        if truncated > 0 {
            self.stats.children_truncated += truncated;
            info!(
                source = %self.spec.name,
                parent = %target.slug,
                queued,
                truncated,
                "Child bound reached, remaining children dropped"
            );
        }
        debug!(source = %self.spec.name, parent = %target.slug, queued, "Discovered children");
        Ok(())
    }

    /// Fetch (and, where configured, paginate) a leaf page, extract its
    /// cards and emit normalized records.
    async fn visit_leaf(
        &mut self,
        target: &CrawlTarget,
        state_hint: &str,
        tx: &mpsc::Sender<ListingRecord>,
    ) -> Result<(), NodeError> {
        let body = self.fetch_leaf(target).await?;
        let records = extraction::extract(&body, &self.spec.plan, &target.url)?;
        debug!(
            source = %self.spec.name,
            community = %target.display_name,
            cards = records.len(),
            "Extracted listing cards"
        );

        for raw in records {
            if !self.passes_builder_filter(&raw) {
                self.stats.filtered_out += 1;
                continue;
            }
            let record = self.build_record(raw, target, state_hint);
            self.stats.records_emitted += 1;
            if tx.send(record).await.is_err() {
                // Receiver dropped; nothing left to emit to.
                break;
            }
        }
        Ok(())
    }

    async fn fetch_leaf(&mut self, target: &CrawlTarget) -> Result<String, FetchError> {
        let params = self.filters.to_query_params();
        let doc = self.session.fetch(&target.url, FetchMethod::Get, &params).await?;
        if !self.spec.paginate {
            return Ok(doc.body);
        }

        let mut driver = LoadMoreDriver::new(
            &self.session,
            &target.url,
            &self.spec.page_param,
            doc.body.clone(),
            &self.spec.card_marker,
        );
        match Paginator::new(self.pagination.clone()).run(&mut driver).await {
            Ok(outcome) => {
                if outcome.capped {
                    self.stats.pagination_capped += 1;
                }
                if outcome.state == PaginatorState::Blocked {
                    self.stats.pagination_blocked += 1;
                }
                Ok(outcome.snapshot.content)
            }
            Err(e) => {
                warn!(source = %self.spec.name, "Pagination gave up: {e}");
                self.stats.pagination_blocked += 1;
                Ok(doc.body)
            }
        }
    }

    fn discover_children(
        &self,
        body: &str,
        parent: &CrawlTarget,
        state_hint: &str,
    ) -> Vec<(CrawlTarget, String)> {
        let Some(index) = self.level_index(parent.level) else {
            return Vec::new();
        };

        // The next level, plus the one below it when the next is optional:
        // e.g. communities can be linked directly from a region page even
        // when the source also has metro pages.
        let mut level_specs: Vec<&LevelSpec> = Vec::new();
        if let Some(next) = self.spec.levels.get(index + 1) {
            level_specs.push(next);
            if next.optional {
                if let Some(after) = self.spec.levels.get(index + 2) {
                    level_specs.push(after);
                }
            }
        }

        let html = Html::parse_document(body);
        let mut children = Vec::new();
        for level_spec in level_specs {
            let pattern_src = level_spec
                .link_pattern
                .replace("{parent}", &regex::escape(&parent.slug));
            let Ok(pattern) = Regex::new(&pattern_src) else {
                warn!("Invalid link pattern for {}: {pattern_src}", level_spec.level.as_str());
                continue;
            };

            for anchor in html.select(&ANCHOR) {
                let Some(href) = anchor.value().attr("href") else { continue };
                let path = href_path(href);
                let Some(captures) = pattern.captures(&path) else { continue };
                let slug = captures
                    .get(1)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| path.trim_matches('/').to_string());

                let hint = if level_spec.level == TargetLevel::Region {
                    slug.clone()
                } else {
                    state_hint.to_string()
                };
                let child = CrawlTarget::new(
                    level_spec.level,
                    slug.clone(),
                    anchor_display_name(anchor, &slug),
                    resolve_href(&self.spec.base_url, href),
                    parent.slug.clone(),
                );
                children.push((child, hint));
            }
        }
        children
    }

    fn level_index(&self, level: TargetLevel) -> Option<usize> {
        self.spec.levels.iter().position(|l| l.level == level)
    }

    fn passes_builder_filter(&self, raw: &RawRecord) -> bool {
        let Some(token) = &self.spec.builder_filter else {
            return true;
        };
        let token = token.to_lowercase();
        raw.builder
            .as_deref()
            .is_some_and(|b| b.to_lowercase().contains(&token))
            || raw.card_text.to_lowercase().contains(&token)
    }

    /// Assemble the canonical record from raw fields plus crawl context.
    fn build_record(&self, raw: RawRecord, target: &CrawlTarget, state_hint: &str) -> ListingRecord {
        // Location, most reliable source first: split fields from script
        // payloads, then the address line, then the region hint.
        let mut address = raw.address.clone();
        let mut city = raw.city.clone().unwrap_or_default();
        let mut state = raw.state.clone().unwrap_or_default();
        let mut zip = raw.zip.clone().unwrap_or_default();

        if city.is_empty() && state.is_empty() {
            if let Some(addr) = &raw.address {
                let parts = split_full_address(addr);
                if !parts.state.is_empty() {
                    address = Some(parts.street);
                    city = parts.city;
                    state = parts.state;
                    zip = parts.zip;
                } else {
                    let (c, s, z) = parse_location(addr, state_hint);
                    city = c;
                    state = s;
                    zip = z;
                }
            } else if !state_hint.is_empty() {
                state = slug_to_abbrev(state_hint);
            }
        }

        // stateCode is a 2-letter token or empty, never free-form. Script
        // payloads occasionally carry full state names.
        if !state.is_empty() && !is_state_abbrev(&state) {
            state = slug_to_abbrev(&state);
        }

        let price_numeric = raw.price.as_deref().and_then(parse_price);
        let house_type = match raw.house_type.as_deref() {
            Some(explicit) => parse_house_type(explicit),
            None => infer_house_type(&raw.card_text),
        };
        let status = raw
            .status_override
            .unwrap_or_else(|| raw.status.as_deref().map(parse_status).unwrap_or_default());

        let (community_name, market_name, market_code) = match target.level {
            TargetLevel::Community => (
                target.display_name.clone(),
                title_from_slug(&target.parent_key),
                target.parent_key.clone(),
            ),
            TargetLevel::Market => (
                raw.community.clone().unwrap_or_default(),
                target.display_name.clone(),
                target.slug.clone(),
            ),
            _ => (
                raw.community.clone().unwrap_or_default(),
                String::new(),
                String::new(),
            ),
        };

        ListingRecord {
            address: address.filter(|a| !a.trim().is_empty()),
            city,
            state_code: state,
            zip_code: (!zip.is_empty()).then_some(zip),
            price_display: raw.price.unwrap_or_default(),
            price_numeric,
            bedrooms: raw.bedrooms.as_deref().and_then(to_bedrooms),
            bathrooms: raw.bathrooms.as_deref().and_then(to_bathrooms),
            square_feet: raw.square_feet.as_deref().and_then(to_square_feet),
            community_name,
            market_name,
            market_code,
            house_type,
            plan_name: raw.name,
            status,
            source_name: self.spec.name.clone(),
            source_url: raw.detail_url.unwrap_or_else(|| target.url.clone()),
            scraped_at: Utc::now(),
        }
    }
}

/// Path component of an href, host and query stripped, for shape matching.
fn href_path(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Url::parse(href).map(|u| u.path().to_string()).unwrap_or_default();
    }
    href.split(['?', '#']).next().unwrap_or("").to_string()
}

fn resolve_href(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Anchor text when usable, else a title-cased slug. Very long anchor text
/// means the link wraps a whole card, not a name.
fn anchor_display_name(anchor: ElementRef<'_>, slug: &str) -> String {
    let text: String = anchor
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() || text.len() > 200 {
        title_from_slug(slug)
    } else {
        text
    }
}

fn title_from_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
