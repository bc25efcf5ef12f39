//! Conversation records: turns, the append-only transcript, and the
//! per-turn and per-session annotations produced by the advisory components.

use crate::generation::ChatMessage;
use crate::prompts::{LEARNER_LABEL, TUTOR_LABEL};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tutor,
    Learner,
}

/// Outcome of checking one learner utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub has_errors: bool,
    pub original: String,
    pub corrected: String,
    pub mistakes: Vec<String>,
}

impl CorrectionResult {
    /// The "no errors found" result, also used whenever correction fails.
    pub fn clean(original: &str) -> Self {
        Self {
            has_errors: false,
            original: original.to_string(),
            corrected: original.to_string(),
            mistakes: Vec::new(),
        }
    }
}

/// End-of-session report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackReport {
    /// Full feedback text, or a short notice when no report could be produced.
    pub summary: String,
    pub coverage: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
}

impl FeedbackReport {
    pub fn too_short() -> Self {
        Self {
            summary: "Gespräch zu kurz für Feedback.".to_string(),
            coverage: "Nicht genug Austausch".to_string(),
            strengths: Vec::new(),
            improvements: Vec::new(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            summary: "Feedback konnte nicht generiert werden.".to_string(),
            coverage: String::new(),
            strengths: Vec::new(),
            improvements: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<CorrectionResult>,
}

impl Turn {
    pub fn tutor(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tutor,
            content: content.into(),
            correction: None,
        }
    }

    pub fn learner(content: impl Into<String>) -> Self {
        Self {
            role: Role::Learner,
            content: content.into(),
            correction: None,
        }
    }
}

/// Ordered, append-only sequence of turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn and returns its index.
    pub fn push(&mut self, turn: Turn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn learner_turns(&self) -> usize {
        self.turns.iter().filter(|t| t.role == Role::Learner).count()
    }

    /// Attaches a correction to the learner turn at `index`.
    ///
    /// Returns false, leaving the transcript untouched, if the turn does not
    /// exist, is not a learner turn, or already carries a correction.
    pub fn attach_correction(&mut self, index: usize, correction: CorrectionResult) -> bool {
        match self.turns.get_mut(index) {
            Some(turn) if turn.role == Role::Learner && turn.correction.is_none() => {
                turn.correction = Some(correction);
                true
            }
            _ => false,
        }
    }

    /// The transcript as chat messages (tutor = assistant, learner = user).
    pub fn to_chat_messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .map(|turn| match turn.role {
                Role::Tutor => ChatMessage::assistant(turn.content.clone()),
                Role::Learner => ChatMessage::user(turn.content.clone()),
            })
            .collect()
    }

    /// One `Label: content` line per turn, for embedding in analysis prompts.
    pub fn render_labeled(&self) -> String {
        self.turns
            .iter()
            .map(|turn| {
                let label = match turn.role {
                    Role::Tutor => TUTOR_LABEL,
                    Role::Learner => LEARNER_LABEL,
                };
                format!("{label} {}", turn.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
