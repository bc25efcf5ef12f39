//! Dialogue Orchestrator
//!
//! Builds the tutor requests on the critical path: the opening turn, each
//! continuation with its coverage reminder, and the closing turn. Errors here
//! are fail-hard and typed; terminal verdicts have already cleared the
//! scenario's session by the time they reach the caller.

use crate::coverage::CoverageSet;
use crate::error::DialogueError;
use crate::generation::{ChatMessage, RequestPurpose};
use crate::prompts::{self, CLOSING_CUE, PromptSet, START_UTTERANCE};
use crate::protection::SessionChannel;
use crate::scenario::Scenario;
use crate::transcript::{Transcript, Turn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Learner exchanges required before the tutor may close the conversation.
pub const DEFAULT_MIN_EXCHANGES: usize = 3;

/// Steering note attached to a continuation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reminder {
    /// Indices of the points still to be discussed.
    Remaining(Vec<usize>),
    /// Everything is covered but the conversation is too short to close.
    AllCovered,
    /// Close the conversation now.
    Close,
}

/// Picks the reminder for the next tutor turn.
///
/// `exchanges` counts learner turns including the one being answered.
pub fn select_reminder(
    point_count: usize,
    covered: &CoverageSet,
    exchanges: usize,
    min_exchanges: usize,
) -> Reminder {
    let remaining = covered.uncovered(point_count);
    if !remaining.is_empty() {
        Reminder::Remaining(remaining)
    } else if exchanges >= min_exchanges {
        Reminder::Close
    } else {
        Reminder::AllCovered
    }
}

/// The tutor's answer to a learner turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TutorReply {
    pub turn: Turn,
    /// True when the closing reminder was used; the caller moves to closing.
    pub closing: bool,
}

#[derive(Clone)]
pub struct DialogueOrchestrator {
    channel: SessionChannel,
    prompts: Arc<PromptSet>,
    min_exchanges: usize,
}

impl DialogueOrchestrator {
    pub fn new(channel: SessionChannel, prompts: Arc<PromptSet>) -> Self {
        Self {
            channel,
            prompts,
            min_exchanges: DEFAULT_MIN_EXCHANGES,
        }
    }

    pub fn with_min_exchanges(mut self, min_exchanges: usize) -> Self {
        self.min_exchanges = min_exchanges;
        self
    }

    fn persona(&self, scenario: &Scenario) -> ChatMessage {
        let points = prompts::numbered_from_one(&scenario.discussion_points);
        ChatMessage::system(prompts::render(
            &self.prompts.tutor_persona,
            &[
                ("task", scenario.task.as_str()),
                ("theme", scenario.theme.as_str()),
                ("points", points.as_str()),
            ],
        ))
    }

    fn reminder_text(&self, scenario: &Scenario, reminder: &Reminder) -> String {
        match reminder {
            Reminder::Remaining(indices) => {
                let points: Vec<&str> = indices
                    .iter()
                    .filter_map(|i| scenario.discussion_points.get(*i))
                    .map(String::as_str)
                    .collect();
                let points = prompts::bulleted(&points);
                prompts::render(&self.prompts.reminder_remaining, &[("points", points.as_str())])
            }
            Reminder::AllCovered => self.prompts.reminder_all_covered.clone(),
            Reminder::Close => self.prompts.reminder_closing.clone(),
        }
    }

    /// Requests the tutor's opening turn.
    #[instrument(skip_all, fields(scenario = %scenario.key))]
    pub async fn start(
        &self,
        scenario: &Scenario,
        cancel: &CancellationToken,
    ) -> Result<Turn, DialogueError> {
        let messages = vec![self.persona(scenario), ChatMessage::user(START_UTTERANCE)];
        let text = self
            .channel
            .complete(&scenario.key, RequestPurpose::Dialogue, messages, cancel)
            .await?;
        info!("Opening turn received");
        Ok(Turn::tutor(text))
    }

    /// Requests the tutor's answer to `utterance`.
    ///
    /// `transcript` is the conversation before `utterance`; `covered` is the
    /// coverage known so far.
    #[instrument(skip_all, fields(scenario = %scenario.key, turns = transcript.len()))]
    pub async fn continue_dialogue(
        &self,
        scenario: &Scenario,
        transcript: &Transcript,
        utterance: &str,
        covered: &CoverageSet,
        cancel: &CancellationToken,
    ) -> Result<TutorReply, DialogueError> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(DialogueError::Validation(
                "Bitte schreibe eine Antwort.".into(),
            ));
        }

        let exchanges = transcript.learner_turns() + 1;
        let reminder = select_reminder(
            scenario.point_count(),
            covered,
            exchanges,
            self.min_exchanges,
        );

        let mut messages = vec![self.persona(scenario)];
        messages.extend(transcript.to_chat_messages());
        messages.push(ChatMessage::system(self.reminder_text(scenario, &reminder)));
        messages.push(ChatMessage::user(utterance));

        let text = self
            .channel
            .complete(&scenario.key, RequestPurpose::Dialogue, messages, cancel)
            .await?;
        let closing = reminder == Reminder::Close;
        info!(exchanges, ?reminder, closing, "Tutor turn received");
        Ok(TutorReply {
            turn: Turn::tutor(text),
            closing,
        })
    }

    /// Requests a closing turn for a conversation whose points are all covered.
    #[instrument(skip_all, fields(scenario = %scenario.key, turns = transcript.len()))]
    pub async fn close(
        &self,
        scenario: &Scenario,
        transcript: &Transcript,
        cancel: &CancellationToken,
    ) -> Result<Turn, DialogueError> {
        let mut messages = vec![self.persona(scenario)];
        messages.extend(transcript.to_chat_messages());
        messages.push(ChatMessage::system(self.prompts.reminder_closing.clone()));
        messages.push(ChatMessage::user(CLOSING_CUE));

        let text = self
            .channel
            .complete(&scenario.key, RequestPurpose::Dialogue, messages, cancel)
            .await?;
        info!("Closing turn received");
        Ok(Turn::tutor(text))
    }

    /// Drops the scenario's session id so the next call starts a fresh session.
    pub fn reset(&self, scenario_key: &str) {
        self.channel.store().clear(scenario_key);
        info!(scenario_key, "Session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{BackendReply, ChatRole, MockGenerationBackend};
    use crate::protection::{ProtectionClient, RetryPolicy};
    use crate::session_store::{MemorySessionStore, SessionStore};
    use serde_json::json;

    fn scenario() -> Scenario {
        Scenario::new(
            "grillfest",
            "Plant ein Grillfest mit Max.",
            "Freizeit",
            vec!["Wann?".into(), "Wo?".into(), "Was?".into()],
        )
    }

    fn orchestrator(backend: MockGenerationBackend) -> (DialogueOrchestrator, Arc<dyn SessionStore>) {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let client = Arc::new(ProtectionClient::new(Arc::new(backend), RetryPolicy::default()));
        let channel = SessionChannel::new(client, store.clone(), "m");
        (
            DialogueOrchestrator::new(channel, Arc::new(PromptSet::default())),
            store,
        )
    }

    fn transcript() -> Transcript {
        let mut t = Transcript::new();
        t.push(Turn::tutor("Hallo! Wann hast du Zeit?"));
        t
    }

    #[test]
    fn test_select_reminder() {
        let none = CoverageSet::new();
        let all = CoverageSet::from_indices([0, 1, 2]);
        assert_eq!(
            select_reminder(3, &CoverageSet::from_indices([1]), 5, 3),
            Reminder::Remaining(vec![0, 2])
        );
        assert_eq!(select_reminder(3, &none, 1, 3), Reminder::Remaining(vec![0, 1, 2]));
        assert_eq!(select_reminder(3, &all, 2, 3), Reminder::AllCovered);
        assert_eq!(select_reminder(3, &all, 3, 3), Reminder::Close);
    }

    #[tokio::test]
    async fn test_start_embeds_task_points_and_seed() {
        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(1).returning(|req| {
            assert_eq!(req.messages.len(), 2);
            let system = &req.messages[0];
            assert_eq!(system.role, ChatRole::System);
            assert!(system.content.contains("Plant ein Grillfest mit Max."));
            assert!(system.content.contains("THEMA: Freizeit"));
            assert!(system.content.contains("3. Was?"));
            assert_eq!(req.messages[1].content, START_UTTERANCE);
            assert_eq!(req.temperature, 0.7);
            Ok(BackendReply::ok("Hallo! Wann hast du Zeit?"))
        });
        let (orchestrator, store) = orchestrator(backend);

        let turn = orchestrator
            .start(&scenario(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(turn, Turn::tutor("Hallo! Wann hast du Zeit?"));
        assert_eq!(store.session("grillfest").unwrap().message_count, 1);
    }

    #[tokio::test]
    async fn test_continue_reminds_only_uncovered_points() {
        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(1).returning(|req| {
            let n = req.messages.len();
            assert_eq!(req.messages[1].role, ChatRole::Assistant);
            let reminder = &req.messages[n - 2];
            assert_eq!(reminder.role, ChatRole::System);
            assert!(reminder.content.contains("- Was?"));
            assert!(!reminder.content.contains("Wann?"));
            assert_eq!(req.messages[n - 1].content, "Am Samstag im Park.");
            Ok(BackendReply::ok("Super! Was bringen wir mit?"))
        });
        let (orchestrator, _) = orchestrator(backend);

        let reply = orchestrator
            .continue_dialogue(
                &scenario(),
                &transcript(),
                "Am Samstag im Park.",
                &CoverageSet::from_indices([0, 1]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!reply.closing);
        assert_eq!(reply.turn.content, "Super! Was bringen wir mit?");
    }

    #[tokio::test]
    async fn test_continue_uses_closing_reminder_when_ready() {
        let closing_text = PromptSet::default().reminder_closing;
        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(1).returning(move |req| {
            let n = req.messages.len();
            assert_eq!(req.messages[n - 2].content, closing_text);
            Ok(BackendReply::ok("Toll, bis Samstag!"))
        });
        let (orchestrator, _) = orchestrator(backend);
        let orchestrator = orchestrator.with_min_exchanges(1);

        let reply = orchestrator
            .continue_dialogue(
                &scenario(),
                &transcript(),
                "Ich bringe Salat mit.",
                &CoverageSet::from_indices([0, 1, 2]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(reply.closing);
    }

    #[tokio::test]
    async fn test_close_sends_cue() {
        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(1).returning(|req| {
            assert_eq!(req.messages.last().unwrap().content, CLOSING_CUE);
            Ok(BackendReply::ok("Also: Samstag, Park, Salat. Bis dann!"))
        });
        let (orchestrator, _) = orchestrator(backend);
        let turn = orchestrator
            .close(&scenario(), &transcript(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(turn.content, "Also: Samstag, Park, Salat. Bis dann!");
    }

    #[tokio::test]
    async fn test_terminal_error_clears_session() {
        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(1).returning(|_| {
            Ok(BackendReply {
                status: 429,
                body: json!({ "limitReached": true }),
            })
        });
        let (orchestrator, store) = orchestrator(backend);
        let id = store.get_or_create("grillfest");

        let err = orchestrator
            .continue_dialogue(
                &scenario(),
                &transcript(),
                "Am Sonntag.",
                &CoverageSet::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::MessageLimitExceeded));
        assert_ne!(store.get_or_create("grillfest"), id);
    }

    #[tokio::test]
    async fn test_empty_utterance_is_rejected() {
        let mut backend = MockGenerationBackend::new();
        backend.expect_send().times(0);
        let (orchestrator, _) = orchestrator(backend);
        let err = orchestrator
            .continue_dialogue(
                &scenario(),
                &transcript(),
                "  ",
                &CoverageSet::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::Validation(_)));
    }

    #[test]
    fn test_reset_clears_store() {
        let (orchestrator, store) = orchestrator(MockGenerationBackend::new());
        let id = store.get_or_create("grillfest");
        orchestrator.reset("grillfest");
        assert!(store.session("grillfest").is_none());
        assert_ne!(store.get_or_create("grillfest"), id);
    }
}
