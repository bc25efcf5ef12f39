//! Protection Client
//!
//! Turns raw gatekeeper replies into a closed set of verdicts and runs the
//! bounded sleep-then-retry loop for throttled requests. [`SessionChannel`]
//! adds the session id bookkeeping every component shares: attach the
//! scenario's id, count successful calls, drop the id on a terminal verdict.

use crate::error::DialogueError;
use crate::generation::{
    BackendReply, ChatMessage, GenerationBackend, GenerationRequest, GenerationResponse,
    RequestPurpose,
};
use crate::session_store::SessionStore;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Classification of one gatekeeper reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Success(GenerationResponse),
    /// Wait `retry_after` and resubmit the same request.
    Throttled { retry_after: Duration },
    /// Message quota exhausted; terminal.
    LimitReached,
    /// Session time-to-live exceeded; terminal.
    Expired,
    /// Any other non-success status.
    Failed { status: u16, message: String },
    /// A success status whose body is not a generation response.
    Malformed(String),
}

/// Maps a raw reply onto a [`Verdict`].
pub fn classify(reply: BackendReply) -> Verdict {
    let BackendReply { status, body } = reply;
    match status {
        200..=299 => match serde_json::from_value::<GenerationResponse>(body) {
            Ok(response) => Verdict::Success(response),
            Err(e) => Verdict::Malformed(format!("unreadable success payload: {e}")),
        },
        429 => {
            if let Some(secs) = body.get("retryAfter").and_then(Value::as_f64) {
                let secs = if secs.is_nan() { 0.0 } else { secs.max(0.0) };
                Verdict::Throttled {
                    retry_after: Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX),
                }
            } else if body.get("limitReached").and_then(Value::as_bool) == Some(true) {
                Verdict::LimitReached
            } else {
                Verdict::Failed {
                    status,
                    message: error_message(&body),
                }
            }
        }
        410 if body.get("expired").and_then(Value::as_bool) == Some(true) => Verdict::Expired,
        _ => Verdict::Failed {
            status,
            message: error_message(&body),
        },
    }
}

/// Best human-readable message in an error body.
fn error_message(body: &Value) -> String {
    body.pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| body.get("error").and_then(Value::as_str))
        .or_else(|| body.get("message").and_then(Value::as_str))
        .or_else(|| body.as_str().filter(|s| !s.is_empty()))
        .unwrap_or("API request failed")
        .to_string()
}

/// Bounds on the throttle retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleeps allowed before giving up.
    pub max_retries: u32,
    /// Ceiling on the summed sleep time.
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_total_wait: Duration::from_secs(30),
        }
    }
}

/// Sends requests and resolves throttling transparently within a [`RetryPolicy`].
pub struct ProtectionClient {
    backend: Arc<dyn GenerationBackend>,
    policy: RetryPolicy,
}

impl ProtectionClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Issues `request`, sleeping and resubmitting on throttle verdicts.
    ///
    /// Terminal verdicts are returned as errors without retrying. Cancelling
    /// `cancel` aborts both the in-flight request and a pending sleep.
    pub async fn call(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse, DialogueError> {
        let mut retries = 0u32;
        let mut waited = Duration::ZERO;

        loop {
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DialogueError::Cancelled),
                reply = self.backend.send(request) => reply?,
            };

            match classify(reply) {
                Verdict::Success(response) => {
                    debug!(purpose = ?request.purpose, retries, "Request succeeded");
                    return Ok(response);
                }
                Verdict::Throttled { retry_after } => {
                    if retries >= self.policy.max_retries
                        || waited.saturating_add(retry_after) > self.policy.max_total_wait
                    {
                        warn!(purpose = ?request.purpose, retries, ?waited, ?retry_after, "Retry budget exhausted");
                        return Err(DialogueError::RetryableThrottle {
                            attempts: retries + 1,
                            waited,
                            retry_after,
                        });
                    }
                    warn!(purpose = ?request.purpose, attempt = retries + 1, ?retry_after, "Throttled; waiting before retry");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(DialogueError::Cancelled),
                        _ = tokio::time::sleep(retry_after) => {}
                    }
                    retries += 1;
                    waited += retry_after;
                }
                Verdict::LimitReached => return Err(DialogueError::MessageLimitExceeded),
                Verdict::Expired => return Err(DialogueError::SessionExpired),
                Verdict::Failed { status, message } => {
                    return Err(DialogueError::Transport {
                        status: Some(status),
                        message,
                    });
                }
                Verdict::Malformed(reason) => return Err(DialogueError::InvalidResponse(reason)),
            }
        }
    }
}

/// A [`ProtectionClient`] bound to a session store and model.
#[derive(Clone)]
pub struct SessionChannel {
    client: Arc<ProtectionClient>,
    store: Arc<dyn SessionStore>,
    model: String,
}

impl SessionChannel {
    pub fn new(
        client: Arc<ProtectionClient>,
        store: Arc<dyn SessionStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            model: model.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Sends `messages` under the scenario's session and returns the reply text.
    ///
    /// On a terminal verdict the session id used for the call is cleared
    /// before the error is returned.
    pub async fn complete(
        &self,
        scenario_key: &str,
        purpose: RequestPurpose,
        messages: Vec<ChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<String, DialogueError> {
        let session_id = self.store.get_or_create(scenario_key);
        let request = GenerationRequest::new(&self.model, &session_id, purpose, messages);

        match self.client.call(&request, cancel).await {
            Ok(response) => {
                self.store.record_message(scenario_key);
                response
                    .content()
                    .map(str::to_owned)
                    .ok_or_else(|| DialogueError::InvalidResponse("reply had no message content".into()))
            }
            Err(e) if e.is_terminal() => {
                let still_live = self
                    .store
                    .session(scenario_key)
                    .is_some_and(|s| s.id == session_id);
                if still_live {
                    self.store.clear(scenario_key);
                }
                warn!(scenario_key, %session_id, error = %e, "Terminal verdict; session cleared");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::MockGenerationBackend;
    use crate::session_store::MemorySessionStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn throttle(secs: u64) -> BackendReply {
        BackendReply {
            status: 429,
            body: json!({ "retryAfter": secs }),
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("m", "s", RequestPurpose::Dialogue, vec![ChatMessage::user("hi")])
    }

    #[test]
    fn test_classify_covers_every_verdict() {
        assert_eq!(
            classify(BackendReply::ok("Hallo")),
            Verdict::Success(GenerationResponse::from_text("Hallo"))
        );
        assert_eq!(
            classify(throttle(2)),
            Verdict::Throttled {
                retry_after: Duration::from_secs(2)
            }
        );
        assert_eq!(
            classify(BackendReply {
                status: 429,
                body: json!({ "limitReached": true })
            }),
            Verdict::LimitReached
        );
        assert_eq!(
            classify(BackendReply {
                status: 410,
                body: json!({ "expired": true })
            }),
            Verdict::Expired
        );
        assert_eq!(
            classify(BackendReply {
                status: 500,
                body: json!({ "error": { "message": "upstream down" } })
            }),
            Verdict::Failed {
                status: 500,
                message: "upstream down".into()
            }
        );
    }

    #[test]
    fn test_classify_unrecognized_throttle_and_gone_are_generic() {
        assert_eq!(
            classify(BackendReply {
                status: 429,
                body: json!({ "error": "slow down" })
            }),
            Verdict::Failed {
                status: 429,
                message: "slow down".into()
            }
        );
        assert_eq!(
            classify(BackendReply {
                status: 410,
                body: json!({})
            }),
            Verdict::Failed {
                status: 410,
                message: "API request failed".into()
            }
        );
    }

    #[tokio::test]
    async fn test_oversized_retry_after_is_surfaced_not_slept() {
        let huge = BackendReply {
            status: 429,
            body: json!({ "retryAfter": 1e20 }),
        };
        assert_eq!(
            classify(huge.clone()),
            Verdict::Throttled {
                retry_after: Duration::MAX
            }
        );

        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(1).returning(move |_| Ok(huge.clone()));
        let client = ProtectionClient::new(Arc::new(backend), RetryPolicy::default());
        let err = client.call(&request(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DialogueError::RetryableThrottle { attempts: 1, .. }));
    }

    #[test]
    fn test_classify_success_without_choices_is_malformed() {
        let verdict = classify(BackendReply {
            status: 200,
            body: json!({ "unexpected": true }),
        });
        assert!(matches!(verdict, Verdict::Malformed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success_sleeping_each_retry_after() {
        let mut backend = MockGenerationBackend::new();
        let mut calls = 0;
        backend.expect_send().times(4).returning(move |_| {
            calls += 1;
            Ok(if calls <= 3 { throttle(2) } else { BackendReply::ok("ok") })
        });
        let client = ProtectionClient::new(Arc::new(backend), RetryPolicy::default());

        let start = tokio::time::Instant::now();
        let response = client.call(&request(), &CancellationToken::new()).await.unwrap();
        assert_eq!(response.content(), Some("ok"));
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let mut backend = MockGenerationBackend::new();
        let mut calls = 0u64;
        backend.expect_send().times(4).returning(move |_| {
            calls += 1;
            Ok(throttle(calls))
        });
        let client = ProtectionClient::new(Arc::new(backend), RetryPolicy::default());

        let start = tokio::time::Instant::now();
        let err = client.call(&request(), &CancellationToken::new()).await.unwrap_err();
        // Three sleeps of 1 + 2 + 3 seconds, then the fourth throttle is surfaced.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        match err {
            DialogueError::RetryableThrottle {
                attempts,
                waited,
                retry_after,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(waited, Duration::from_secs(6));
                assert_eq!(retry_after, Duration::from_secs(4));
            }
            other => panic!("expected RetryableThrottle, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_wait_ceiling_stops_early() {
        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(2).returning(|_| Ok(throttle(20)));
        let policy = RetryPolicy {
            max_retries: 3,
            max_total_wait: Duration::from_secs(30),
        };
        let client = ProtectionClient::new(Arc::new(backend), policy);

        let err = client.call(&request(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DialogueError::RetryableThrottle { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_terminal_verdicts_are_not_retried() {
        for (body, status) in [(json!({ "limitReached": true }), 429), (json!({ "expired": true }), 410)] {
            let mut backend = MockGenerationBackend::new();
            backend.expect_send().times(1).returning(move |_| {
                Ok(BackendReply {
                    status,
                    body: body.clone(),
                })
            });
            let client = ProtectionClient::new(Arc::new(backend), RetryPolicy::default());
            let err = client.call(&request(), &CancellationToken::new()).await.unwrap_err();
            assert!(err.is_terminal());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_pending_retry_sleep() {
        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(1).returning(|_| Ok(throttle(10)));
        let client = ProtectionClient::new(Arc::new(backend), RetryPolicy::default());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let start = tokio::time::Instant::now();
        let err = client.call(&request(), &cancel).await.unwrap_err();
        assert!(matches!(err, DialogueError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    struct StalledBackend;

    #[async_trait::async_trait]
    impl GenerationBackend for StalledBackend {
        async fn send(&self, _request: &GenerationRequest) -> Result<BackendReply, DialogueError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_request() {
        let client = ProtectionClient::new(Arc::new(StalledBackend), RetryPolicy::default());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = client.call(&request(), &cancel).await.unwrap_err();
        assert!(matches!(err, DialogueError::Cancelled));
    }

    #[tokio::test]
    async fn test_channel_clears_session_on_terminal_verdict() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let used = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = used.clone();

        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(1).returning(move |req| {
            seen.lock().unwrap().push(req.session_id.clone());
            Ok(BackendReply {
                status: 429,
                body: json!({ "limitReached": true }),
            })
        });
        let client = Arc::new(ProtectionClient::new(Arc::new(backend), RetryPolicy::default()));
        let channel = SessionChannel::new(client, store.clone(), "m");

        let err = channel
            .complete("hochzeit", RequestPurpose::Dialogue, vec![], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::MessageLimitExceeded));

        let failed_id = used.lock().unwrap()[0].clone();
        assert!(store.session("hochzeit").is_none());
        assert_ne!(store.get_or_create("hochzeit"), failed_id);
    }

    #[tokio::test]
    async fn test_channel_keeps_session_on_transport_error_and_counts_successes() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(BackendReply::ok("Hallo"))
            } else {
                Ok(BackendReply {
                    status: 500,
                    body: json!({ "error": "boom" }),
                })
            }
        });
        let client = Arc::new(ProtectionClient::new(Arc::new(backend), RetryPolicy::default()));
        let channel = SessionChannel::new(client, store.clone(), "m");
        let cancel = CancellationToken::new();

        let text = channel
            .complete("k", RequestPurpose::Dialogue, vec![], &cancel)
            .await
            .unwrap();
        assert_eq!(text, "Hallo");
        let id = store.get_or_create("k");

        let err = channel
            .complete("k", RequestPurpose::Dialogue, vec![], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::Transport { status: Some(500), .. }));
        let session = store.session("k").unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.message_count, 1);
    }
}
