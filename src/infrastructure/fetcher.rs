//! Resilient fetch layer.
//!
//! A `FetchSession` owns all per-source-run transport state: the HTTP client
//! with its cookie store, the rate limiter, the identity cursor and the
//! cancellation token. Retries with exponential backoff cover transient
//! failures only; identity rotation happens on every retry to reduce
//! fingerprint correlation across attempts.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::config::FetchConfig;
use super::identity::{Identity, IdentityPool};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// HTTP method subset the crawl needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    Get,
    Post,
}

/// A fetched document: final URL plus raw markup.
#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub body: String,
}

/// Fetch failure taxonomy.
///
/// `Transient` never escapes the fetch loop; callers only ever see the other
/// three. `ExhaustedRetries` means "no data for this target"; the crawl
/// continues.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient failure fetching {url}: {reason}")]
    Transient {
        url: String,
        reason: String,
        status: Option<u16>,
    },

    #[error("permanent failure fetching {url}: {reason}")]
    PermanentFailure {
        url: String,
        reason: String,
        status: Option<u16>,
    },

    #[error("exhausted {attempts} attempts fetching {url}: {last_error}")]
    ExhaustedRetries {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("fetch cancelled: {url}")]
    Cancelled { url: String },
}

/// Transport-level failures, classified by the fetch loop.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Request handed to the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub method: FetchMethod,
    pub params: Vec<(String, String)>,
    pub identity: Identity,
}

/// Raw transport response. Non-2xx statuses come back as `Ok` and are
/// classified by the fetch loop, not the transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Document fetch transport: given URL, method and params, return raw markup
/// or an error. Production uses reqwest; tests script responses.
#[async_trait]
pub trait FetchTransport: Send + Sync {
    async fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport. The cookie store preserves consent and TLS
/// session state across calls within one session.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetchTransport for HttpTransport {
    async fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut headers = HeaderMap::new();
        let identity = &request.identity;
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&identity.user_agent)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_str(&identity.accept)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&identity.accept_language)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?,
        );
        if let Some(referer) = &identity.referer {
            headers.insert(
                REFERER,
                HeaderValue::from_str(referer)
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?,
            );
        }

        let builder = match request.method {
            FetchMethod::Get => self.client.get(&request.url),
            FetchMethod::Post => self.client.post(&request.url),
        };

        let response = builder
            .headers(headers)
            .query(&request.params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else if e.is_connect() {
                    TransportError::Connect(e.to_string())
                } else if e.is_builder() || e.is_request() {
                    TransportError::InvalidRequest(e.to_string())
                } else {
                    TransportError::Other(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(TransportResponse { status, body })
    }
}

/// Per-source-run fetch session.
///
/// Exclusively owned by the orchestrator task driving it; never shared
/// across concurrent targets. Dropping the session releases the connection
/// pool and cookie state.
pub struct FetchSession {
    id: Uuid,
    transport: Arc<dyn FetchTransport>,
    identities: Arc<IdentityPool>,
    limiter: DirectLimiter,
    config: FetchConfig,
    cancel: CancellationToken,
}

impl FetchSession {
    pub fn new(
        config: FetchConfig,
        identities: Arc<IdentityPool>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(Self::with_transport(config, identities, cancel, transport))
    }

    /// Build a session over an explicit transport. Test seam, also useful
    /// for proxied deployments.
    pub fn with_transport(
        config: FetchConfig,
        identities: Arc<IdentityPool>,
        cancel: CancellationToken,
        transport: Arc<dyn FetchTransport>,
    ) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN),
        );
        Self {
            id: Uuid::new_v4(),
            transport,
            identities,
            limiter: RateLimiter::direct(quota),
            config,
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fetch a document with retry, backoff and identity rotation.
    ///
    /// Transient failures (connect/timeout, 5xx, 429) are retried up to the
    /// configured bound with exponentially growing, jittered delays; any
    /// other failure surfaces immediately as `PermanentFailure`.
    pub async fn fetch(
        &self,
        url: &str,
        method: FetchMethod,
        params: &[(String, String)],
    ) -> Result<Document, FetchError> {
        // Structural failure, never retried.
        let parsed = Url::parse(url).map_err(|e| FetchError::PermanentFailure {
            url: url.to_string(),
            reason: format!("malformed URL: {e}"),
            status: None,
        })?;

        let attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.backoff_delay(attempt - 1);
                debug!(
                    session = %self.id,
                    attempt,
                    ?delay,
                    "Retrying {url} after backoff"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancel.cancelled() => {
                        return Err(FetchError::Cancelled { url: url.to_string() });
                    }
                }
            }

            tokio::select! {
                _ = self.limiter.until_ready() => {}
                _ = self.cancel.cancelled() => {
                    return Err(FetchError::Cancelled { url: url.to_string() });
                }
            }

            let request = TransportRequest {
                url: parsed.to_string(),
                method,
                params: params.to_vec(),
                identity: self.identities.next(),
            };

            let outcome = tokio::select! {
                result = self.transport.execute(&request) => result,
                _ = self.cancel.cancelled() => {
                    return Err(FetchError::Cancelled { url: url.to_string() });
                }
            };

            match Self::classify(url, outcome) {
                Ok(document) => {
                    if attempt > 1 {
                        debug!(session = %self.id, attempt, "Fetch recovered: {url}");
                    }
                    return Ok(document);
                }
                Err(FetchError::Transient { reason, status, .. }) => {
                    warn!(
                        session = %self.id,
                        attempt,
                        attempts,
                        status,
                        "Transient failure fetching {url}: {reason}"
                    );
                    last_error = reason;
                }
                Err(other) => return Err(other),
            }
        }

        Err(FetchError::ExhaustedRetries {
            url: url.to_string(),
            attempts,
            last_error,
        })
    }

    /// Exponential backoff for the nth retry (1-based), capped at the
    /// configured ceiling, with jitter bounded to a quarter of the base so
    /// consecutive delays stay strictly increasing.
    fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = backoff_exponential(
            retry,
            self.config.backoff_base_ms,
            self.config.backoff_ceiling_ms,
        );
        let jitter = fastrand::u64(0..=self.config.backoff_base_ms / 4);
        Duration::from_millis(exp + jitter)
    }

    fn classify(
        url: &str,
        outcome: Result<TransportResponse, TransportError>,
    ) -> Result<Document, FetchError> {
        match outcome {
            Ok(response) if (200..300).contains(&response.status) => Ok(Document {
                url: url.to_string(),
                body: response.body,
            }),
            Ok(response) if response.status == 429 || response.status >= 500 => {
                Err(FetchError::Transient {
                    url: url.to_string(),
                    reason: format!("HTTP {}", response.status),
                    status: Some(response.status),
                })
            }
            Ok(response) => Err(FetchError::PermanentFailure {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status),
                status: Some(response.status),
            }),
            Err(TransportError::Timeout) => Err(FetchError::Transient {
                url: url.to_string(),
                reason: "timeout".to_string(),
                status: None,
            }),
            Err(TransportError::Connect(reason)) => Err(FetchError::Transient {
                url: url.to_string(),
                reason,
                status: None,
            }),
            Err(TransportError::InvalidRequest(reason)) => Err(FetchError::PermanentFailure {
                url: url.to_string(),
                reason,
                status: None,
            }),
            Err(TransportError::Other(reason)) => Err(FetchError::Transient {
                url: url.to_string(),
                reason,
                status: None,
            }),
        }
    }
}

/// Un-jittered exponential backoff: base * 2^(retry-1), capped.
pub(crate) fn backoff_exponential(retry: u32, base_ms: u64, ceiling_ms: u64) -> u64 {
    let factor = 2_u64.saturating_pow(retry.saturating_sub(1));
    base_ms.saturating_mul(factor).min(ceiling_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Transport that replays a scripted sequence of outcomes and records
    /// when each attempt happened.
    struct ScriptedTransport {
        script: Mutex<Vec<Result<TransportResponse, TransportError>>>,
        attempt_times: Mutex<Vec<Instant>>,
        seen_agents: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                attempt_times: Mutex::new(Vec::new()),
                seen_agents: Mutex::new(Vec::new()),
            })
        }

        fn ok(body: &str) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status: 200,
                body: body.to_string(),
            })
        }

        fn status(code: u16) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status: code,
                body: String::new(),
            })
        }
    }

    #[async_trait]
    impl FetchTransport for ScriptedTransport {
        async fn execute(
            &self,
            request: &TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.attempt_times.lock().unwrap().push(Instant::now());
            self.seen_agents
                .lock()
                .unwrap()
                .push(request.identity.user_agent.clone());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Ok(TransportResponse {
                    status: 200,
                    body: String::new(),
                });
            }
            script.remove(0)
        }
    }

    fn session(transport: Arc<dyn FetchTransport>) -> FetchSession {
        let config = FetchConfig {
            max_requests_per_second: 1_000,
            ..Default::default()
        };
        FetchSession::with_transport(
            config,
            IdentityPool::builtin(),
            CancellationToken::new(),
            transport,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_then_succeed() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            ScriptedTransport::status(503),
            Err(TransportError::Connect("reset".to_string())),
            ScriptedTransport::ok("<html>ok</html>"),
        ]);
        let session = session(transport.clone());

        let doc = session
            .fetch("https://example.com/a", FetchMethod::Get, &[])
            .await
            .unwrap();
        assert_eq!(doc.body, "<html>ok</html>");

        // Exactly one success after three failures, with strictly increasing
        // backoff delays between the four attempts.
        let times = transport.attempt_times.lock().unwrap();
        assert_eq!(times.len(), 4);
        let d1 = times[1] - times[0];
        let d2 = times[2] - times[1];
        let d3 = times[3] - times[2];
        assert!(d2 > d1, "second delay {d2:?} not above first {d1:?}");
        assert!(d3 > d2, "third delay {d3:?} not above second {d2:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn identity_rotates_on_each_retry() {
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::status(500),
            ScriptedTransport::status(500),
            ScriptedTransport::ok(""),
        ]);
        let session = session(transport.clone());
        session
            .fetch("https://example.com/a", FetchMethod::Get, &[])
            .await
            .unwrap();

        let agents = transport.seen_agents.lock().unwrap();
        assert_eq!(agents.len(), 3);
        assert_ne!(agents[0], agents[1]);
        assert_ne!(agents[1], agents[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_after_all_attempts_fail() {
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::status(502),
            ScriptedTransport::status(502),
            ScriptedTransport::status(502),
            ScriptedTransport::status(502),
        ]);
        let session = session(transport.clone());

        let err = session
            .fetch("https://example.com/a", FetchMethod::Get, &[])
            .await
            .unwrap_err();
        match err {
            FetchError::ExhaustedRetries { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }
        assert_eq!(transport.attempt_times.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn non_retryable_status_fails_immediately() {
        let transport = ScriptedTransport::new(vec![ScriptedTransport::status(404)]);
        let session = session(transport.clone());

        let err = session
            .fetch("https://example.com/missing", FetchMethod::Get, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::PermanentFailure { status: Some(404), .. }));
        assert_eq!(transport.attempt_times.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rate_limited_status_is_transient() {
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::status(429),
            ScriptedTransport::ok("ok"),
        ]);
        let session = session(transport.clone());
        let doc = session
            .fetch("https://example.com/a", FetchMethod::Get, &[])
            .await
            .unwrap();
        assert_eq!(doc.body, "ok");
    }

    #[tokio::test]
    async fn malformed_url_is_permanent() {
        let transport = ScriptedTransport::new(vec![]);
        let session = session(transport);
        let err = session
            .fetch("not a url", FetchMethod::Get, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::PermanentFailure { .. }));
    }

    #[tokio::test]
    async fn cancellation_aborts_fetch() {
        let transport =
            ScriptedTransport::new((0..4).map(|_| ScriptedTransport::status(500)).collect());
        let config = FetchConfig {
            max_requests_per_second: 1_000,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let session = FetchSession::with_transport(
            config,
            IdentityPool::builtin(),
            cancel.clone(),
            transport,
        );

        cancel.cancel();
        let err = session
            .fetch("https://example.com/a", FetchMethod::Get, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled { .. }));
    }

    #[test]
    fn backoff_sequence_doubles_until_ceiling() {
        let delays: Vec<u64> = (1..=6).map(|r| backoff_exponential(r, 1_000, 8_000)).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 8_000, 8_000]);
    }
}
