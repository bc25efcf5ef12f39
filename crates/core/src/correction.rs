//! Correction Pipeline
//!
//! Checks a single learner utterance and returns a corrected version with a
//! list of mistakes. Independent of the dialogue transcript.

use crate::error::DialogueError;
use crate::generation::{ChatMessage, RequestPurpose};
use crate::parse::{self, Parsed};
use crate::prompts::PromptSet;
use crate::protection::SessionChannel;
use crate::transcript::CorrectionResult;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct CorrectionPipeline {
    channel: SessionChannel,
    prompts: Arc<PromptSet>,
    min_words: usize,
}

impl CorrectionPipeline {
    pub fn new(channel: SessionChannel, prompts: Arc<PromptSet>) -> Self {
        Self {
            channel,
            prompts,
            min_words: 0,
        }
    }

    /// Rejects utterances shorter than `min_words` before any remote call.
    pub fn with_min_words(mut self, min_words: usize) -> Self {
        self.min_words = min_words;
        self
    }

    /// Corrects `utterance`.
    ///
    /// Only input validation fails. Remote errors and unreadable replies yield
    /// [`CorrectionResult::clean`].
    pub async fn correct(
        &self,
        scenario_key: &str,
        utterance: &str,
        cancel: &CancellationToken,
    ) -> Result<CorrectionResult, DialogueError> {
        let text = utterance.trim();
        if text.is_empty() {
            return Err(DialogueError::Validation(
                "Bitte schreibe zuerst einen Satz.".into(),
            ));
        }
        let words = text.split_whitespace().count();
        if words < self.min_words {
            return Err(DialogueError::Validation(format!(
                "Der Satz ist zu kurz ({words} Wörter, mindestens {}).",
                self.min_words
            )));
        }

        let messages = vec![
            ChatMessage::system(self.prompts.correction.clone()),
            ChatMessage::user(text),
        ];
        let reply = match self
            .channel
            .complete(scenario_key, RequestPurpose::Correction, messages, cancel)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(scenario_key, error = %e, "Correction failed; treating utterance as correct");
                return Ok(CorrectionResult::clean(utterance));
            }
        };

        Ok(match parse::parse_correction(&reply, utterance) {
            Parsed::Parsed(result) => {
                debug!(scenario_key, has_errors = result.has_errors, mistakes = result.mistakes.len(), "Correction parsed");
                result
            }
            Parsed::Malformed(reason) => {
                warn!(scenario_key, %reason, "Unusable correction reply");
                CorrectionResult::clean(utterance)
            }
        })
    }
}
