//! Retrying fetch client.
//!
//! `fetch_json` runs a bounded attempt loop over the [`Transport`], deciding per
//! failure whether to retry on the same path, switch the process-wide egress to the
//! routed path, or give up. Plain fetches (`fetch_bytes`, `download_to`) are
//! single-shot.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use crate::egress::{EgressController, EgressMode};
use crate::error::{Result, ScrapeError};
use crate::transport::{AttemptFailure, FailureKind, Transport};

/// What the retry loop does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    SwitchEgress,
    Abort,
}

/// Bookkeeping for one failed physical attempt.
#[derive(Debug, Clone, Copy)]
struct RetryAttempt {
    /// 1-based attempt index.
    attempt: u32,
    kind: FailureKind,
    decision: RetryDecision,
}

#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    egress: EgressController,
    max_attempts: u32,
    has_routed_path: bool,
    force_routed: bool,
}

impl FetchClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        egress: EgressController,
        max_attempts: u32,
        has_routed_path: bool,
        force_routed: bool,
    ) -> Self {
        Self {
            transport,
            egress,
            max_attempts: max_attempts.max(1),
            has_routed_path,
            force_routed,
        }
    }

    pub fn egress(&self) -> &EgressController {
        &self.egress
    }

    fn current_mode(&self) -> EgressMode {
        if self.force_routed && self.has_routed_path {
            EgressMode::Routed
        } else {
            self.egress.current_mode()
        }
    }

    fn decide(&self, kind: FailureKind, mode: EgressMode) -> RetryDecision {
        match kind {
            FailureKind::Forbidden | FailureKind::ConnectionReset => RetryDecision::Retry,
            FailureKind::RateLimited if mode == EgressMode::Direct && self.has_routed_path => {
                RetryDecision::SwitchEgress
            }
            FailureKind::RateLimited => RetryDecision::Retry,
            FailureKind::NotFound | FailureKind::Other => RetryDecision::Abort,
        }
    }

    /// GET `url` and parse it as JSON, retrying transient blocks.
    pub async fn fetch_json(&self, url: &str) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mode = self.current_mode();
            debug!(url, attempt, %mode, "Fetching JSON");

            let failure = match self.transport.get_json(url, mode).await {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            let decision = self.decide(failure.kind, mode);
            let record = RetryAttempt {
                attempt,
                kind: failure.kind,
                decision,
            };

            if decision == RetryDecision::Abort {
                debug!(?record, "Attempt failed with a non-retryable error");
                return Err(self.terminal_error(failure, attempt));
            }
            // The switch outlives this call, even when no attempts remain.
            if decision == RetryDecision::SwitchEgress {
                self.egress.activate();
            }
            if attempt >= self.max_attempts {
                warn!(url, attempts = attempt, kind = ?failure.kind, "Giving up after exhausting attempts");
                return Err(self.terminal_error(failure, attempt));
            }

            warn!(
                url,
                attempt = record.attempt,
                max = self.max_attempts,
                kind = ?record.kind,
                decision = ?record.decision,
                "Retrying after blocked request"
            );
        }
    }

    fn terminal_error(&self, failure: AttemptFailure, attempts: u32) -> ScrapeError {
        let url = failure.url;
        match failure.kind {
            FailureKind::Forbidden => ScrapeError::AuthRejected { url, attempts },
            FailureKind::RateLimited => ScrapeError::RateLimited { url, attempts },
            FailureKind::ConnectionReset => ScrapeError::TransportReset { url, attempts },
            FailureKind::NotFound => ScrapeError::NotFound { url },
            FailureKind::Other => match failure.status {
                Some(status) => ScrapeError::HttpStatus { status, url },
                None => ScrapeError::Request {
                    url,
                    reason: failure.message,
                },
            },
        }
    }

    /// Single-shot GET of raw bytes over the current egress path.
    pub async fn fetch_bytes(&self, url: &str) -> std::result::Result<Bytes, AttemptFailure> {
        self.transport.get_bytes(url, self.current_mode()).await
    }

    pub async fn fetch_text(&self, url: &str) -> std::result::Result<String, AttemptFailure> {
        let bytes = self.fetch_bytes(url).await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            AttemptFailure::new(FailureKind::Other, url, format!("body is not UTF-8: {e}"))
        })
    }

    /// Single-shot streaming download into `dest`.
    pub async fn download_to(
        &self,
        url: &str,
        dest: &Path,
    ) -> std::result::Result<u64, AttemptFailure> {
        self.transport.download(url, dest, self.current_mode()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::ManualClock;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Transport that replays scripted JSON outcomes and records the egress per call.
    struct ScriptedTransport {
        script: Mutex<VecDeque<std::result::Result<Value, FailureKind>>>,
        modes: Mutex<Vec<EgressMode>>,
    }

    impl ScriptedTransport {
        fn new(
            script: impl IntoIterator<Item = std::result::Result<Value, FailureKind>>,
        ) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                modes: Mutex::new(Vec::new()),
            }
        }

        fn modes(&self) -> Vec<EgressMode> {
            self.modes.lock().clone()
        }
    }

    fn failure(kind: FailureKind, url: &str) -> AttemptFailure {
        let status = match kind {
            FailureKind::Forbidden => Some(StatusCode::FORBIDDEN),
            FailureKind::RateLimited => Some(StatusCode::TOO_MANY_REQUESTS),
            FailureKind::NotFound => Some(StatusCode::NOT_FOUND),
            FailureKind::Other => Some(StatusCode::INTERNAL_SERVER_ERROR),
            FailureKind::ConnectionReset => None,
        };
        match status {
            Some(status) => AttemptFailure::status(status, url),
            None => AttemptFailure::new(kind, url, "connection reset by peer"),
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get_json(
            &self,
            url: &str,
            mode: EgressMode,
        ) -> std::result::Result<Value, AttemptFailure> {
            self.modes.lock().push(mode);
            match self.script.lock().pop_front() {
                Some(Ok(value)) => Ok(value),
                Some(Err(kind)) => Err(failure(kind, url)),
                None => Ok(Value::Null),
            }
        }

        async fn get_bytes(
            &self,
            url: &str,
            mode: EgressMode,
        ) -> std::result::Result<Bytes, AttemptFailure> {
            self.modes.lock().push(mode);
            Err(failure(FailureKind::NotFound, url))
        }

        async fn download(
            &self,
            url: &str,
            _dest: &Path,
            mode: EgressMode,
        ) -> std::result::Result<u64, AttemptFailure> {
            self.modes.lock().push(mode);
            Err(failure(FailureKind::NotFound, url))
        }
    }

    const URL: &str = "https://www.reddit.com/r/rust/comments/abc/post.json";

    fn client_with(
        transport: Arc<ScriptedTransport>,
        has_routed_path: bool,
    ) -> (FetchClient, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let egress = EgressController::with_clock(Duration::from_secs(300), clock.clone());
        let client = FetchClient::new(transport, egress, 5, has_routed_path, false);
        (client, clock)
    }

    fn forbidden_then_ok(forbidden: usize) -> Vec<std::result::Result<Value, FailureKind>> {
        let mut script: Vec<_> = (0..forbidden).map(|_| Err(FailureKind::Forbidden)).collect();
        script.push(Ok(serde_json::json!({ "ok": true })));
        script
    }

    #[tokio::test]
    async fn succeeds_when_forbidden_fewer_than_five_times() {
        for forbidden in 0..=4 {
            let transport = Arc::new(ScriptedTransport::new(forbidden_then_ok(forbidden)));
            let (client, _) = client_with(transport.clone(), false);

            let value = client.fetch_json(URL).await.unwrap();
            assert_eq!(value["ok"], true);
            assert_eq!(transport.modes().len(), forbidden + 1);
        }
    }

    #[tokio::test]
    async fn five_forbidden_responses_are_auth_rejected() {
        let transport = Arc::new(ScriptedTransport::new(forbidden_then_ok(5)));
        let (client, _) = client_with(transport.clone(), false);

        let err = client.fetch_json(URL).await.unwrap_err();
        assert!(matches!(err, ScrapeError::AuthRejected { attempts: 5, .. }));
        assert_eq!(transport.modes().len(), 5);
    }

    #[tokio::test]
    async fn rate_limit_switches_to_routed_for_cooldown() {
        let transport = Arc::new(ScriptedTransport::new([
            Err(FailureKind::RateLimited),
            Ok(serde_json::json!({})),
            Ok(serde_json::json!({})),
            Ok(serde_json::json!({})),
        ]));
        let (client, clock) = client_with(transport.clone(), true);

        client.fetch_json(URL).await.unwrap();
        assert_eq!(client.egress().current_mode(), EgressMode::Routed);

        clock.advance(Duration::from_secs(299));
        client.fetch_json(URL).await.unwrap();

        clock.advance(Duration::from_secs(1));
        client.fetch_json(URL).await.unwrap();

        assert_eq!(
            transport.modes(),
            vec![
                EgressMode::Direct,
                EgressMode::Routed,
                EgressMode::Routed,
                EgressMode::Direct,
            ]
        );
    }

    #[tokio::test]
    async fn rate_limit_on_last_attempt_still_switches_egress() {
        let mut script: Vec<_> = (0..4).map(|_| Err(FailureKind::Forbidden)).collect();
        script.push(Err(FailureKind::RateLimited));
        script.push(Ok(serde_json::json!({})));
        let transport = Arc::new(ScriptedTransport::new(script));
        let (client, _) = client_with(transport.clone(), true);

        let err = client.fetch_json(URL).await.unwrap_err();
        assert!(matches!(err, ScrapeError::RateLimited { attempts: 5, .. }));
        assert_eq!(client.egress().current_mode(), EgressMode::Routed);

        client.fetch_json(URL).await.unwrap();
        assert_eq!(transport.modes().last(), Some(&EgressMode::Routed));
    }

    #[tokio::test]
    async fn rate_limit_without_routed_path_stays_direct() {
        let transport = Arc::new(ScriptedTransport::new(
            (0..5).map(|_| Err(FailureKind::RateLimited)),
        ));
        let (client, _) = client_with(transport.clone(), false);

        let err = client.fetch_json(URL).await.unwrap_err();
        assert!(matches!(err, ScrapeError::RateLimited { attempts: 5, .. }));
        assert!(transport.modes().iter().all(|m| *m == EgressMode::Direct));
    }

    #[tokio::test]
    async fn connection_reset_retries_on_same_path() {
        let transport = Arc::new(ScriptedTransport::new([
            Err(FailureKind::ConnectionReset),
            Err(FailureKind::ConnectionReset),
            Ok(serde_json::json!([])),
        ]));
        let (client, _) = client_with(transport.clone(), true);

        client.fetch_json(URL).await.unwrap();
        assert_eq!(transport.modes(), vec![EgressMode::Direct; 3]);
    }

    #[tokio::test]
    async fn other_errors_abort_immediately() {
        let transport = Arc::new(ScriptedTransport::new([
            Err(FailureKind::Other),
            Ok(serde_json::json!({})),
        ]));
        let (client, _) = client_with(transport.clone(), true);

        let err = client.fetch_json(URL).await.unwrap_err();
        assert!(matches!(
            err,
            ScrapeError::HttpStatus {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                ..
            }
        ));
        assert_eq!(transport.modes().len(), 1);
    }

    #[tokio::test]
    async fn not_found_is_surfaced_without_retry() {
        let transport = Arc::new(ScriptedTransport::new([Err(FailureKind::NotFound)]));
        let (client, _) = client_with(transport.clone(), false);

        let err = client.fetch_json(URL).await.unwrap_err();
        assert!(matches!(err, ScrapeError::NotFound { .. }));
        assert_eq!(transport.modes().len(), 1);
    }

    #[tokio::test]
    async fn forced_routing_uses_proxy_from_the_first_attempt() {
        let transport = Arc::new(ScriptedTransport::new([Ok(serde_json::json!({}))]));
        let egress = EgressController::with_clock(
            Duration::from_secs(300),
            Arc::new(ManualClock::new()),
        );
        let client = FetchClient::new(transport.clone(), egress, 5, true, true);

        client.fetch_json(URL).await.unwrap();
        assert_eq!(transport.modes(), vec![EgressMode::Routed]);
        assert_eq!(client.egress().current_mode(), EgressMode::Direct);
    }
}
