//! Coverage Analyzer
//!
//! Estimates which discussion points a conversation has addressed. Purely
//! advisory: every failure degrades to the empty set.

use crate::generation::{ChatMessage, RequestPurpose};
use crate::parse::{self, Parsed};
use crate::prompts::{self, PromptSet};
use crate::protection::SessionChannel;
use crate::scenario::Scenario;
use crate::transcript::Transcript;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Indices of the discussion points judged as addressed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverageSet(BTreeSet<usize>);

impl CoverageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        Self(indices.into_iter().collect())
    }

    pub fn insert(&mut self, index: usize) -> bool {
        self.0.insert(index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Adds every index of `other`. Coverage only ever grows.
    pub fn union(&mut self, other: &CoverageSet) {
        self.0.extend(other.iter());
    }

    /// True once every index in `0..point_count` is present.
    pub fn is_complete(&self, point_count: usize) -> bool {
        (0..point_count).all(|i| self.contains(i))
    }

    /// Indices in `0..point_count` not yet covered, in order.
    pub fn uncovered(&self, point_count: usize) -> Vec<usize> {
        (0..point_count).filter(|i| !self.contains(*i)).collect()
    }
}

/// Asks the model which discussion points the transcript has addressed.
#[derive(Clone)]
pub struct CoverageAnalyzer {
    channel: SessionChannel,
    prompts: Arc<PromptSet>,
}

impl CoverageAnalyzer {
    pub fn new(channel: SessionChannel, prompts: Arc<PromptSet>) -> Self {
        Self { channel, prompts }
    }

    /// Returns the covered set, or the empty set on any failure. Never errors.
    pub async fn analyze(
        &self,
        scenario: &Scenario,
        transcript: &Transcript,
        cancel: &CancellationToken,
    ) -> CoverageSet {
        if transcript.len() < 2 || scenario.point_count() == 0 {
            return CoverageSet::new();
        }

        let points = prompts::numbered_from_zero(&scenario.discussion_points);
        let conversation = transcript.render_labeled();
        let prompt = prompts::render(
            &self.prompts.coverage_analysis,
            &[("points", points.as_str()), ("conversation", conversation.as_str())],
        );
        let reply = match self
            .channel
            .complete(
                &scenario.key,
                RequestPurpose::Coverage,
                vec![ChatMessage::user(prompt)],
                cancel,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(scenario = %scenario.key, error = %e, "Coverage analysis failed; assuming nothing covered");
                return CoverageSet::new();
            }
        };

        match parse::parse_coverage(&reply, scenario.point_count()) {
            Parsed::Parsed(set) => {
                debug!(scenario = %scenario.key, covered = ?set, "Coverage analysed");
                set
            }
            Parsed::Malformed(reason) => {
                warn!(scenario = %scenario.key, %reason, "Unusable coverage reply");
                CoverageSet::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{BackendReply, MockGenerationBackend};
    use crate::protection::{ProtectionClient, RetryPolicy};
    use crate::session_store::{MemorySessionStore, SessionStore};
    use crate::transcript::Turn;
    use serde_json::json;

    fn scenario() -> Scenario {
        Scenario::new(
            "party",
            "Plant eine Party.",
            "Feiern",
            vec!["Wann?".into(), "Wo?".into(), "Was?".into()],
        )
    }

    fn transcript() -> Transcript {
        let mut t = Transcript::new();
        t.push(Turn::tutor("Wann hast du Zeit?"));
        t.push(Turn::learner("Am Samstag."));
        t
    }

    fn analyzer(backend: MockGenerationBackend) -> (CoverageAnalyzer, Arc<dyn SessionStore>) {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let client = Arc::new(ProtectionClient::new(Arc::new(backend), RetryPolicy::default()));
        let channel = SessionChannel::new(client, store.clone(), "m");
        (CoverageAnalyzer::new(channel, Arc::new(PromptSet::default())), store)
    }

    #[test]
    fn test_set_operations() {
        let mut set = CoverageSet::from_indices([0]);
        set.union(&CoverageSet::from_indices([2]));
        assert_eq!(set.uncovered(3), vec![1]);
        assert!(!set.is_complete(3));
        set.insert(1);
        assert!(set.is_complete(3));
        assert!(CoverageSet::new().is_complete(0));
    }

    #[tokio::test]
    async fn test_analyze_parses_reply() {
        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(1).returning(|req| {
            assert_eq!(req.purpose, RequestPurpose::Coverage);
            assert!(req.messages[0].content.contains("0. Wann?"));
            Ok(BackendReply::ok("[0]"))
        });
        let (analyzer, _) = analyzer(backend);
        let set = analyzer
            .analyze(&scenario(), &transcript(), &CancellationToken::new())
            .await;
        assert_eq!(set, CoverageSet::from_indices([0]));
    }

    #[tokio::test]
    async fn test_analyze_is_fail_soft() {
        for reply in [
            BackendReply {
                status: 500,
                body: json!({ "error": "down" }),
            },
            BackendReply::ok("Punkt eins und zwei"),
            BackendReply::ok("[5]"),
        ] {
            let mut backend = MockGenerationBackend::new();
            backend
                .expect_send()
                .times(1)
                .returning(move |_| Ok(reply.clone()));
            let (analyzer, _) = analyzer(backend);
            let set = analyzer
                .analyze(&scenario(), &transcript(), &CancellationToken::new())
                .await;
            assert!(set.is_empty());
        }
    }

    #[tokio::test]
    async fn test_terminal_verdict_clears_session_and_yields_empty() {
        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(1).returning(|_| {
            Ok(BackendReply {
                status: 410,
                body: json!({ "expired": true }),
            })
        });
        let (analyzer, store) = analyzer(backend);
        let before = store.get_or_create("party");
        let set = analyzer
            .analyze(&scenario(), &transcript(), &CancellationToken::new())
            .await;
        assert!(set.is_empty());
        assert_ne!(store.get_or_create("party"), before);
    }

    #[tokio::test]
    async fn test_short_transcript_skips_request() {
        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(0);
        let (analyzer, _) = analyzer(backend);
        let mut t = Transcript::new();
        t.push(Turn::tutor("Hallo!"));
        let set = analyzer
            .analyze(&scenario(), &t, &CancellationToken::new())
            .await;
        assert!(set.is_empty());
    }
}
