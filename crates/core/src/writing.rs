//! Written letter evaluation.
//!
//! A user-submitted, fail-hard operation: validation and protection errors
//! propagate, and a reply that is not the requested JSON is an
//! [`DialogueError::InvalidResponse`].

use crate::error::DialogueError;
use crate::generation::{ChatMessage, RequestPurpose};
use crate::prompts::{self, PromptSet};
use crate::protection::SessionChannel;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Session scope shared by all letter submissions.
pub const LETTER_SESSION_KEY: &str = "schreiben";
pub const MIN_LETTER_WORDS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Register {
    Formal,
    Informal,
}

impl Register {
    fn adjective(self) -> &'static str {
        match self {
            Register::Formal => "formellen",
            Register::Informal => "informellen",
        }
    }
}

impl FromStr for Register {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "formal" | "formell" => Ok(Register::Formal),
            "informal" | "informell" => Ok(Register::Informal),
            other => Err(format!("unknown register '{other}'")),
        }
    }
}

/// The writing task a letter answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterPrompt {
    #[serde(default)]
    pub title: String,
    pub situation: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(alias = "inhaltspunkte")]
    pub content_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterError {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub original: String,
    pub corrected: String,
    #[serde(default)]
    pub explanation: String,
}

/// Sub-scores of 0 to 5 each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterScore {
    pub content: u8,
    pub communication: u8,
    pub accuracy: u8,
    pub total: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterFeedback {
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterEvaluation {
    pub corrected: String,
    #[serde(default)]
    pub errors: Vec<LetterError>,
    pub score: LetterScore,
    /// Per content point, whether the letter addressed it.
    #[serde(default)]
    pub content_points: Vec<bool>,
    #[serde(default)]
    pub feedback: LetterFeedback,
    #[serde(default)]
    pub word_count: usize,
    #[serde(default)]
    pub missing_points: Vec<String>,
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Strips a Markdown code fence some models wrap JSON in.
fn strip_fence(text: &str) -> &str {
    let text = text.trim();
    match text.strip_prefix("```") {
        Some(rest) => rest
            .trim_start_matches("json")
            .trim_end()
            .trim_end_matches("```")
            .trim(),
        None => text,
    }
}

#[derive(Clone)]
pub struct LetterEvaluator {
    channel: SessionChannel,
    prompts: Arc<PromptSet>,
}

impl LetterEvaluator {
    pub fn new(channel: SessionChannel, prompts: Arc<PromptSet>) -> Self {
        Self { channel, prompts }
    }

    #[instrument(skip_all, fields(register = ?register))]
    pub async fn evaluate(
        &self,
        text: &str,
        prompt: &LetterPrompt,
        register: Register,
        cancel: &CancellationToken,
    ) -> Result<LetterEvaluation, DialogueError> {
        if text.trim().is_empty() {
            return Err(DialogueError::Validation(
                "Der Text darf nicht leer sein.".into(),
            ));
        }
        let words = word_count(text);
        if words < MIN_LETTER_WORDS {
            return Err(DialogueError::Validation(format!(
                "Der Text ist zu kurz. Du hast {words} Wörter, aber mindestens {MIN_LETTER_WORDS} Wörter sind erforderlich."
            )));
        }

        let points = prompts::numbered_from_one(&prompt.content_points);
        let system = prompts::render(
            &self.prompts.letter_evaluation,
            &[
                ("register", register.adjective()),
                ("situation", prompt.situation.as_str()),
                ("recipient", prompt.recipient.as_str()),
                ("points", points.as_str()),
            ],
        );
        let messages = vec![ChatMessage::system(system), ChatMessage::user(text.trim())];

        let reply = self
            .channel
            .complete(LETTER_SESSION_KEY, RequestPurpose::Letter, messages, cancel)
            .await?;
        let mut evaluation: LetterEvaluation = serde_json::from_str(strip_fence(&reply))
            .map_err(|e| DialogueError::InvalidResponse(format!("letter evaluation: {e}")))?;

        evaluation.word_count = words;
        evaluation.missing_points = prompt
            .content_points
            .iter()
            .enumerate()
            .filter(|(i, _)| !evaluation.content_points.get(*i).copied().unwrap_or(false))
            .map(|(_, point)| point.clone())
            .collect();
        info!(
            words,
            total = evaluation.score.total,
            errors = evaluation.errors.len(),
            missing = evaluation.missing_points.len(),
            "Letter evaluated"
        );
        Ok(evaluation)
    }
}
