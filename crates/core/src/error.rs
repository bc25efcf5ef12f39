//! Error taxonomy for remote-backed dialogue operations.
//!
//! Every remote outcome is classified exactly once, at the protection boundary
//! (see [`crate::protection`]). Downstream code matches on these variants and
//! never looks at raw status codes again.

use crate::session::SessionPhase;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the dialogue core.
#[derive(Debug, Error)]
pub enum DialogueError {
    /// The gatekeeper kept throttling past the retry budget.
    #[error("Rate limited: gave up after {attempts} attempts ({waited:?} waited, last retry-after {retry_after:?})")]
    RetryableThrottle {
        attempts: u32,
        waited: Duration,
        retry_after: Duration,
    },

    /// The session's message quota is exhausted. The session id has been cleared.
    #[error("Message limit reached for this session")]
    MessageLimitExceeded,

    /// The session outlived its time-to-live. The session id has been cleared.
    #[error("Session expired")]
    SessionExpired,

    /// Input rejected before any remote call was made.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Any other remote failure. The session is left intact.
    #[error("Transport error{}: {message}", status.map(|s| format!(" {s}")).unwrap_or_default())]
    Transport { status: Option<u16>, message: String },

    /// The remote call succeeded but the payload was unusable.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The caller abandoned the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// A turn was submitted to a session that does not accept turns.
    #[error("Session is not active (phase: {0:?})")]
    NotActive(SessionPhase),
}

impl DialogueError {
    /// True for the verdicts that end a session and require a new one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DialogueError::MessageLimitExceeded | DialogueError::SessionExpired
        )
    }

    /// Learner-facing explanation with the remedy, in the tutoring language.
    pub fn user_message(&self) -> String {
        match self {
            DialogueError::RetryableThrottle { retry_after, .. } => format!(
                "Zu schnell! Bitte warten Sie {} Sekunden.",
                retry_after.as_secs().max(1)
            ),
            DialogueError::MessageLimitExceeded => {
                "Sie haben das Nachrichten-Limit erreicht. Bitte starten Sie ein neues Gespräch."
                    .to_string()
            }
            DialogueError::SessionExpired => {
                "Ihre Sitzung ist abgelaufen. Bitte starten Sie ein neues Gespräch.".to_string()
            }
            DialogueError::Validation(reason) => reason.clone(),
            DialogueError::Transport { .. } | DialogueError::InvalidResponse(_) => {
                "Fehler bei der Kommunikation. Bitte versuche es erneut.".to_string()
            }
            DialogueError::Cancelled => "Die Anfrage wurde abgebrochen.".to_string(),
            DialogueError::NotActive(_) => {
                "Das Gespräch ist beendet. Bitte starten Sie ein neues Gespräch.".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for DialogueError {
    fn from(err: reqwest::Error) -> Self {
        DialogueError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}
