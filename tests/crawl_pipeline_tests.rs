//! End-to-end pipeline tests: scripted transport, two sources, one
//! reconciled record set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use homecrawl::application::CrawlRun;
use homecrawl::domain::ListingStatus;
use homecrawl::infrastructure::config::{AppConfig, ConfigError, SeedConfig, SearchFilters};
use homecrawl::infrastructure::fetcher::{
    FetchTransport, TransportError, TransportRequest, TransportResponse,
};

/// Serves a fixed set of pages; any `page=N` load-more request 404s so
/// pagination settles on the first page.
struct SiteTransport {
    pages: HashMap<String, String>,
}

#[async_trait]
impl FetchTransport for SiteTransport {
    async fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        if request.params.iter().any(|(k, _)| k == "page") {
            return Ok(TransportResponse {
                status: 404,
                body: String::new(),
            });
        }
        match self.pages.get(&request.url) {
            Some(body) => Ok(TransportResponse {
                status: 200,
                body: body.clone(),
            }),
            None => Ok(TransportResponse {
                status: 404,
                body: String::new(),
            }),
        }
    }
}

fn two_source_site() -> SiteTransport {
    let mut pages = HashMap::new();

    // Builder-direct hierarchy: root -> texas -> one community.
    pages.insert(
        "https://www.lennar.com/new-homes".to_string(),
        r#"<a href="/new-homes/texas">Texas</a>"#.to_string(),
    );
    pages.insert(
        "https://www.lennar.com/new-homes/texas".to_string(),
        r#"<a href="/community/juniper-hills">Juniper Hills</a>"#.to_string(),
    );
    pages.insert(
        "https://www.lennar.com/community/juniper-hills".to_string(),
        r#"<html><body>
        <div class="home-card">
            <span class="plan-name">The Aspen</span>
            <span class="price">$400,000</span>
            <span class="beds">3</span><span class="baths">2.5</span>
            <div class="address">401 Oak Trl, Frisco, TX 75034</div>
            <a href="/community/juniper-hills/aspen">view</a>
        </div>
        </body></html>"#
            .to_string(),
    );

    // Portal market page carrying the same physical listing plus one more,
    // and a third card from another builder that the filter must drop.
    pages.insert(
        "https://www.zillow.com/dallas-tx/new-construction/".to_string(),
        r#"<html><body>
        <div data-test="property-card">
            <span data-test="property-card-addr">401 Oak Trl, Frisco, TX 75034</span>
            <span data-test="property-card-price">$400,000</span>
            <span>3 bds 2.5 ba 2,105 sqft - New construction by Lennar</span>
            <a href="/homedetails/401-oak-trl">view</a>
        </div>
        <div data-test="property-card">
            <span data-test="property-card-addr">77 Pine Ln, Plano, TX 75074</span>
            <span data-test="property-card-price">$512,345</span>
            <span>4 bds 3 ba - Lennar at Pine Creek</span>
            <a href="/homedetails/77-pine-ln">view</a>
        </div>
        <div data-test="property-card">
            <span data-test="property-card-addr">9 Birch Rd, Allen, TX 75002</span>
            <span data-test="property-card-price">$475,000</span>
            <span>3 bds - New construction by Horton</span>
        </div>
        </body></html>"#
            .to_string(),
    );

    SiteTransport { pages }
}

fn config(seeds: Vec<SeedConfig>) -> AppConfig {
    let mut config = AppConfig {
        seeds,
        ..Default::default()
    };
    config.fetch.max_requests_per_second = 1_000;
    config.crawl.request_delay_ms = 5;
    config.pagination.settle_delay_ms = 10;
    config
}

fn seed(source: &str, hint: &str) -> SeedConfig {
    SeedConfig {
        source: source.to_string(),
        region_hint: hint.to_string(),
        filters: SearchFilters::default(),
    }
}

#[tokio::test(start_paused = true)]
async fn two_sources_reconcile_to_one_set() {
    let report = CrawlRun::new(config(vec![
        seed("lennar", "texas"),
        seed("zillow", "Dallas, TX"),
    ]))
    .with_transport(Arc::new(two_source_site()))
    .execute()
    .await
    .unwrap();

    // Two distinct physical listings survive: the shared one collapses to
    // the first-seen (lennar) rendition, the Horton card is filtered out.
    assert_eq!(report.records.len(), 2);
    let shared = report
        .records
        .iter()
        .find(|r| r.price_numeric == Some(400_000))
        .unwrap();
    assert_eq!(shared.source_name, "lennar");
    assert_eq!(shared.plan_name.as_deref(), Some("The Aspen"));
    assert_eq!(shared.community_name, "Juniper Hills");

    let unique = report
        .records
        .iter()
        .find(|r| r.price_numeric == Some(512_345))
        .unwrap();
    assert_eq!(unique.source_name, "zillow");
    assert_eq!(unique.city, "Plano");
    assert_eq!(unique.state_code, "TX");
    assert_eq!(unique.bedrooms, Some(4));
    assert_eq!(unique.market_name, "Dallas, TX");

    let zillow_stats = report
        .source_stats
        .iter()
        .find(|s| s.source == "zillow")
        .unwrap();
    assert_eq!(zillow_stats.filtered_out, 1);
    assert_eq!(zillow_stats.records_emitted, 2);
}

#[tokio::test(start_paused = true)]
async fn unknown_seed_source_is_fatal_before_any_fetch() {
    let err = CrawlRun::new(config(vec![seed("redfin", "texas")]))
        .with_transport(Arc::new(two_source_site()))
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::MissingSource { .. }));
}

#[tokio::test(start_paused = true)]
async fn empty_seed_list_completes_with_zero_records() {
    let report = CrawlRun::new(config(vec![]))
        .with_transport(Arc::new(two_source_site()))
        .execute()
        .await
        .unwrap();
    assert!(report.records.is_empty());
    assert!(report.source_stats.is_empty());
}

#[tokio::test(start_paused = true)]
async fn listing_statuses_default_to_unknown_without_signal() {
    let report = CrawlRun::new(config(vec![seed("lennar", "texas")]))
        .with_transport(Arc::new(two_source_site()))
        .execute()
        .await
        .unwrap();
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].status, ListingStatus::Unknown);
}
