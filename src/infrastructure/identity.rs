//! Outbound identity pool for fingerprint-correlation reduction.
//!
//! An identity is a user-agent string plus the headers that have to stay
//! consistent with it. The pool is read-only shared configuration: sessions
//! take identities round-robin from a shared cursor, so concurrent source
//! tasks never coordinate beyond one atomic increment.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One outbound identity: a user agent and its correlated headers.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub referer: Option<String>,
}

/// Shared, read-only pool of outbound identities.
#[derive(Debug)]
pub struct IdentityPool {
    identities: Vec<Identity>,
    cursor: AtomicUsize,
}

impl IdentityPool {
    /// Build a pool from explicit identities. Empty input falls back to the
    /// built-in pool so a session always has at least one identity.
    pub fn new(identities: Vec<Identity>) -> Arc<Self> {
        if identities.is_empty() {
            return Self::builtin();
        }
        let start = fastrand::usize(..identities.len());
        Arc::new(Self {
            identities,
            cursor: AtomicUsize::new(start),
        })
    }

    /// Built-in desktop-browser identities.
    pub fn builtin() -> Arc<Self> {
        let identities = vec![
            Identity {
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                    .to_string(),
                accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
                accept_language: "en-US,en;q=0.9".to_string(),
                referer: Some("https://www.google.com/".to_string()),
            },
            Identity {
                user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36"
                    .to_string(),
                accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
                    .to_string(),
                accept_language: "en-US,en;q=0.8".to_string(),
                referer: None,
            },
            Identity {
                user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0"
                    .to_string(),
                accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
                accept_language: "en-US,en;q=0.5".to_string(),
                referer: None,
            },
            Identity {
                user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
                             (KHTML, like Gecko) Version/17.4 Safari/605.1.15"
                    .to_string(),
                accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
                accept_language: "en-US,en;q=0.9".to_string(),
                referer: Some("https://www.bing.com/".to_string()),
            },
        ];
        let start = fastrand::usize(..identities.len());
        Arc::new(Self {
            identities,
            cursor: AtomicUsize::new(start),
        })
    }

    /// Next identity, round-robin. Safe for concurrent callers.
    pub fn next(&self) -> Identity {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.identities.len();
        self.identities[idx].clone()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_cycles_through_pool() {
        let pool = IdentityPool::builtin();
        let n = pool.len();
        let first = pool.next().user_agent;
        for _ in 1..n {
            assert_ne!(pool.next().user_agent, first);
        }
        // Full cycle returns to the starting identity.
        assert_eq!(pool.next().user_agent, first);
    }

    #[test]
    fn empty_pool_falls_back_to_builtin() {
        let pool = IdentityPool::new(Vec::new());
        assert!(!pool.is_empty());
    }
}
