//! Feedback Synthesizer: the end-of-session report.

use crate::generation::{ChatMessage, RequestPurpose};
use crate::parse::{self, Parsed};
use crate::prompts::{self, PromptSet};
use crate::protection::SessionChannel;
use crate::scenario::Scenario;
use crate::transcript::{FeedbackReport, Transcript};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Learner turns needed before a report is worth requesting.
const MIN_LEARNER_TURNS: usize = 2;

#[derive(Clone)]
pub struct FeedbackSynthesizer {
    channel: SessionChannel,
    prompts: Arc<PromptSet>,
}

impl FeedbackSynthesizer {
    pub fn new(channel: SessionChannel, prompts: Arc<PromptSet>) -> Self {
        Self { channel, prompts }
    }

    /// Produces the report. Never errors: a short conversation yields
    /// [`FeedbackReport::too_short`] without a request, any failure yields
    /// [`FeedbackReport::unavailable`].
    pub async fn synthesize(
        &self,
        scenario: &Scenario,
        transcript: &Transcript,
        cancel: &CancellationToken,
    ) -> FeedbackReport {
        if transcript.learner_turns() < MIN_LEARNER_TURNS {
            info!(scenario = %scenario.key, learner_turns = transcript.learner_turns(), "Conversation too short for feedback");
            return FeedbackReport::too_short();
        }

        let points = prompts::numbered_from_one(&scenario.discussion_points);
        let conversation = transcript.render_labeled();
        let prompt = prompts::render(
            &self.prompts.feedback,
            &[("points", points.as_str()), ("conversation", conversation.as_str())],
        );
        let reply = match self
            .channel
            .complete(
                &scenario.key,
                RequestPurpose::Feedback,
                vec![ChatMessage::user(prompt)],
                cancel,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(scenario = %scenario.key, error = %e, "Feedback request failed");
                return FeedbackReport::unavailable();
            }
        };

        match parse::parse_feedback(&reply) {
            Parsed::Parsed(report) => report,
            Parsed::Malformed(reason) => {
                warn!(scenario = %scenario.key, %reason, "Unusable feedback reply");
                FeedbackReport::unavailable()
            }
        }
    }
}
