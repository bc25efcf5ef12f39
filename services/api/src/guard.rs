//! Per-session request admission.
//!
//! Every request names a session id. The [`Gatekeeper`] decides whether it
//! may be forwarded: one request per rate window, a fixed message budget,
//! and a lifetime counted from the session's first request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardLimits {
    pub rate_window: Duration,
    pub message_limit: u32,
    pub session_ttl: Duration,
}

impl Default for GuardLimits {
    fn default() -> Self {
        Self {
            rate_window: Duration::from_secs(2),
            message_limit: 30,
            session_ttl: Duration::from_secs(20 * 60),
        }
    }
}

/// Outcome of [`Gatekeeper::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Forward the request; `message_count` includes it.
    Allowed { message_count: u32 },
    /// Too soon after the previous request.
    Throttled { retry_after: Duration },
    /// Message budget exhausted. The usage record is reset.
    LimitReached,
    /// The session outlived its TTL. The usage record is dropped.
    Expired,
}

#[derive(Debug, Clone, Copy)]
struct Usage {
    first_seen: Instant,
    last_request: Instant,
    count: u32,
}

#[derive(Debug, Default)]
pub struct Gatekeeper {
    limits: GuardLimits,
    usage: Mutex<HashMap<String, Usage>>,
}

impl Gatekeeper {
    pub fn new(limits: GuardLimits) -> Self {
        Self {
            limits,
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> GuardLimits {
        self.limits
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Usage>> {
        self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decides the fate of a request for `session_id` arriving at `now`.
    ///
    /// Throttled requests are not counted against the message budget.
    pub fn admit(&self, session_id: &str, now: Instant) -> Admission {
        let mut usage = self.lock();
        let Some(record) = usage.get_mut(session_id) else {
            usage.insert(
                session_id.to_string(),
                Usage {
                    first_seen: now,
                    last_request: now,
                    count: 1,
                },
            );
            return Admission::Allowed { message_count: 1 };
        };

        if now.saturating_duration_since(record.first_seen) > self.limits.session_ttl {
            usage.remove(session_id);
            return Admission::Expired;
        }

        let since_last = now.saturating_duration_since(record.last_request);
        if since_last < self.limits.rate_window {
            return Admission::Throttled {
                retry_after: self.limits.rate_window - since_last,
            };
        }

        if record.count >= self.limits.message_limit {
            usage.remove(session_id);
            return Admission::LimitReached;
        }

        record.count += 1;
        record.last_request = now;
        Admission::Allowed {
            message_count: record.count,
        }
    }

    /// Drops records idle for longer than the session TTL. Returns how many went.
    pub fn purge(&self, now: Instant) -> usize {
        let ttl = self.limits.session_ttl;
        let mut usage = self.lock();
        let before = usage.len();
        usage.retain(|_, record| now.saturating_duration_since(record.last_request) <= ttl);
        before - usage.len()
    }

    pub fn tracked_sessions(&self) -> usize {
        self.lock().len()
    }

    /// Runs [`Gatekeeper::purge`] every `every` until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let purged = self.purge(Instant::now());
                if purged > 0 {
                    info!(purged, remaining = self.tracked_sessions(), "Purged idle sessions");
                } else {
                    debug!("Sweep found no idle sessions");
                }
            }
        })
    }
}
