//! Incremental content loading ("load more" / infinite scroll) modeled as an
//! explicit state machine.
//!
//! The loop drives a `PageDriver` until the rendered content stops growing:
//! `Idle -> Loading` on a trigger action, `Loading -> Idle` while content
//! keeps growing, `Loading -> Stable` once it stops, `* -> Blocked` when the
//! trigger control cannot be located. Blocked is a terminal state, not an
//! error: whatever content has loaded is treated as final.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::config::PaginationConfig;
use super::fetcher::{FetchError, FetchMethod, FetchSession};

/// Pagination failures. Only raised when the driver cannot produce any
/// content at all; a missing trigger control is the `Blocked` *state*, which
/// terminates the loop normally.
#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("pagination blocked: {reason}")]
    Blocked { reason: String },
}

/// States of the pagination loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginatorState {
    Idle,
    Loading,
    Stable,
    Blocked,
}

/// Observed page content at one point of the loop.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub content: String,
    pub item_count: usize,
}

impl PageSnapshot {
    /// Growth is detected on content identity, not length: a fingerprint of
    /// the rendered content plus the reported item count.
    fn fingerprint(&self) -> (blake3::Hash, usize) {
        (blake3::hash(self.content.as_bytes()), self.item_count)
    }
}

/// Driver for one incrementally-loading page. Production drivers issue
/// fetches through the session; tests script growth.
#[async_trait]
pub trait PageDriver: Send {
    /// Locate the load-more control. `false` means absent or not
    /// interactable right now.
    async fn locate_trigger(&mut self) -> bool;

    /// Issue one trigger action (simulated click or scroll-to-bottom).
    async fn trigger(&mut self) -> Result<(), PaginationError>;

    /// Current rendered content.
    async fn snapshot(&mut self) -> Result<PageSnapshot, PaginationError>;
}

/// Result of a completed pagination loop.
#[derive(Debug)]
pub struct PaginationOutcome {
    /// Terminal state: `Stable` or `Blocked`.
    pub state: PaginatorState,
    pub triggers_issued: u32,
    /// Whether the hard trigger cap ended the loop.
    pub capped: bool,
    pub snapshot: PageSnapshot,
}

/// The pagination state machine.
pub struct Paginator {
    config: PaginationConfig,
}

impl Paginator {
    pub fn new(config: PaginationConfig) -> Self {
        Self { config }
    }

    /// Drive the page until content stabilizes, the trigger disappears, or
    /// the hard cap is reached. Always ends with a settle delay and a final
    /// snapshot so late-rendering content is included.
    pub async fn run<D: PageDriver>(&self, driver: &mut D) -> Result<PaginationOutcome, PaginationError> {
        let mut snapshot = driver.snapshot().await?;
        let mut last_fingerprint = snapshot.fingerprint();
        let mut unchanged: u32 = 0;
        let mut locate_failures: u32 = 0;
        let mut triggers: u32 = 0;
        let mut capped = false;

        let terminal = loop {
            if triggers >= self.config.max_triggers {
                warn!(
                    triggers,
                    "Pagination trigger cap reached before content stabilized, treating as stable"
                );
                capped = true;
                break PaginatorState::Stable;
            }

            if !driver.locate_trigger().await {
                locate_failures += 1;
                debug!(locate_failures, "Load-more trigger not found");
                if locate_failures >= self.config.max_locate_failures {
                    break PaginatorState::Blocked;
                }
                continue;
            }
            locate_failures = 0;

            // Idle -> Loading
            driver.trigger().await?;
            triggers += 1;

            let next = driver.snapshot().await?;
            let fingerprint = next.fingerprint();
            if fingerprint == last_fingerprint {
                unchanged += 1;
                // Unchanged across `stability_threshold` consecutive trigger
                // attempts: the previous observation plus `unchanged` equal ones.
                if unchanged + 1 >= self.config.stability_threshold {
                    snapshot = next;
                    break PaginatorState::Stable;
                }
            } else {
                // Loading -> Idle: content grew, keep going.
                unchanged = 0;
                last_fingerprint = fingerprint;
                snapshot = next;
            }
        };

        // Settle: let asynchronous rendering finish, then take the content
        // that will actually be handed to extraction.
        tokio::time::sleep(std::time::Duration::from_millis(self.config.settle_delay_ms)).await;
        if let Ok(settled) = driver.snapshot().await {
            snapshot = settled;
        }

        debug!(?terminal, triggers, items = snapshot.item_count, "Pagination finished");
        Ok(PaginationOutcome {
            state: terminal,
            triggers_issued: triggers,
            capped,
            snapshot,
        })
    }
}

/// Production driver: reveals further content by fetching successive page
/// offsets through the owning session and appending them to the rendered
/// content, mirroring what a load-more button does to the DOM.
pub struct LoadMoreDriver<'a> {
    session: &'a FetchSession,
    url: String,
    page_param: String,
    next_page: u32,
    content: String,
    card_marker: String,
    exhausted: bool,
}

impl<'a> LoadMoreDriver<'a> {
    /// `initial_body` is the already-fetched first page; `card_marker` is a
    /// cheap substring whose occurrence count approximates the card count.
    pub fn new(
        session: &'a FetchSession,
        url: impl Into<String>,
        page_param: impl Into<String>,
        initial_body: String,
        card_marker: impl Into<String>,
    ) -> Self {
        Self {
            session,
            url: url.into(),
            page_param: page_param.into(),
            next_page: 1,
            content: initial_body,
            card_marker: card_marker.into(),
            exhausted: false,
        }
    }
}

#[async_trait]
impl PageDriver for LoadMoreDriver<'_> {
    async fn locate_trigger(&mut self) -> bool {
        !self.exhausted
    }

    async fn trigger(&mut self) -> Result<(), PaginationError> {
        self.next_page += 1;
        let params = [(self.page_param.clone(), self.next_page.to_string())];
        match self.session.fetch(&self.url, FetchMethod::Get, &params).await {
            Ok(doc) if !doc.body.trim().is_empty() => {
                self.content.push_str(&doc.body);
                Ok(())
            }
            Ok(_) => {
                // Empty page: nothing more to reveal.
                self.exhausted = true;
                Ok(())
            }
            Err(FetchError::PermanentFailure { status, .. }) => {
                debug!(?status, "No further pages at {}", self.url);
                self.exhausted = true;
                Ok(())
            }
            Err(e) => {
                // Exhausted retries or cancellation: currently-loaded content
                // is final for this target.
                warn!("Pagination fetch gave up: {e}");
                self.exhausted = true;
                Ok(())
            }
        }
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, PaginationError> {
        Ok(PageSnapshot {
            item_count: self.content.matches(&self.card_marker).count(),
            content: self.content.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Content grows by one chunk per trigger for the first `grow_until`
    /// triggers, then stays constant.
    struct GrowingDriver {
        triggers: u32,
        grow_until: u32,
        content: String,
        trigger_present: bool,
    }

    impl GrowingDriver {
        fn new(grow_until: u32) -> Self {
            Self {
                triggers: 0,
                grow_until,
                content: "card-1".to_string(),
                trigger_present: true,
            }
        }
    }

    #[async_trait]
    impl PageDriver for GrowingDriver {
        async fn locate_trigger(&mut self) -> bool {
            self.trigger_present
        }

        async fn trigger(&mut self) -> Result<(), PaginationError> {
            self.triggers += 1;
            if self.triggers <= self.grow_until {
                self.content.push_str(&format!(" card-{}", self.triggers + 1));
            }
            Ok(())
        }

        async fn snapshot(&mut self) -> Result<PageSnapshot, PaginationError> {
            Ok(PageSnapshot {
                item_count: self.content.matches("card-").count(),
                content: self.content.clone(),
            })
        }
    }

    fn paginator() -> Paginator {
        Paginator::new(PaginationConfig {
            settle_delay_ms: 0,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn stability_reached_when_growth_stops() {
        // Growth on the first two triggers; the third observes no change,
        // which is "unchanged across two consecutive trigger attempts".
        let mut driver = GrowingDriver::new(2);
        let outcome = paginator().run(&mut driver).await.unwrap();

        assert_eq!(outcome.state, PaginatorState::Stable);
        assert_eq!(outcome.triggers_issued, 3);
        assert!(!outcome.capped);
        assert_eq!(outcome.snapshot.item_count, 3);
    }

    #[tokio::test]
    async fn missing_trigger_blocks_with_content_kept() {
        let mut driver = GrowingDriver::new(10);
        driver.trigger_present = false;
        let outcome = paginator().run(&mut driver).await.unwrap();

        assert_eq!(outcome.state, PaginatorState::Blocked);
        assert_eq!(outcome.triggers_issued, 0);
        // Initial content survives as the final snapshot.
        assert_eq!(outcome.snapshot.item_count, 1);
    }

    #[tokio::test]
    async fn trigger_cap_terminates_as_stable() {
        // Never stops growing; the hard cap must end the loop.
        let mut driver = GrowingDriver::new(u32::MAX);
        let paginator = Paginator::new(PaginationConfig {
            max_triggers: 7,
            settle_delay_ms: 0,
            ..Default::default()
        });
        let outcome = paginator.run(&mut driver).await.unwrap();

        assert_eq!(outcome.state, PaginatorState::Stable);
        assert!(outcome.capped);
        assert_eq!(outcome.triggers_issued, 7);
    }

    #[tokio::test]
    async fn higher_threshold_requires_more_confirmation() {
        let mut driver = GrowingDriver::new(1);
        let paginator = Paginator::new(PaginationConfig {
            stability_threshold: 3,
            settle_delay_ms: 0,
            ..Default::default()
        });
        let outcome = paginator.run(&mut driver).await.unwrap();

        // One growth trigger, then two unchanged observations.
        assert_eq!(outcome.triggers_issued, 3);
        assert_eq!(outcome.state, PaginatorState::Stable);
    }
}
