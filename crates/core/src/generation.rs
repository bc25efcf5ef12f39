//! Remote text-generation boundary.
//!
//! Wire types for the chat-completion style request/response contract, the
//! [`GenerationBackend`] seam, an HTTP implementation and an offline one.

use crate::error::DialogueError;
use crate::prompts::LEARNER_LABEL;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// What a request is for. Never sent over the wire; used for logging and by
/// backends that answer differently per purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestPurpose {
    #[default]
    Dialogue,
    Coverage,
    Correction,
    Feedback,
    Letter,
}

/// Sampling parameters attached to a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingProfile {
    pub temperature: f32,
    pub max_tokens: u32,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub json_mode: bool,
}

impl SamplingProfile {
    pub const DIALOGUE: Self = Self {
        temperature: 0.7,
        max_tokens: 250,
        presence_penalty: Some(0.3),
        frequency_penalty: Some(0.3),
        json_mode: false,
    };
    pub const COVERAGE: Self = Self {
        temperature: 0.1,
        max_tokens: 50,
        presence_penalty: None,
        frequency_penalty: None,
        json_mode: false,
    };
    pub const CORRECTION: Self = Self {
        temperature: 0.3,
        max_tokens: 300,
        presence_penalty: None,
        frequency_penalty: None,
        json_mode: false,
    };
    pub const FEEDBACK: Self = Self {
        temperature: 0.5,
        max_tokens: 400,
        presence_penalty: None,
        frequency_penalty: None,
        json_mode: false,
    };
    pub const LETTER: Self = Self {
        temperature: 0.3,
        max_tokens: 3000,
        presence_penalty: None,
        frequency_penalty: None,
        json_mode: true,
    };

    pub fn for_purpose(purpose: RequestPurpose) -> Self {
        match purpose {
            RequestPurpose::Dialogue => Self::DIALOGUE,
            RequestPurpose::Coverage => Self::COVERAGE,
            RequestPurpose::Correction => Self::CORRECTION,
            RequestPurpose::Feedback => Self::FEEDBACK,
            RequestPurpose::Letter => Self::LETTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

/// The request record sent to the gatekeeper.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub model: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip)]
    pub purpose: RequestPurpose,
}

impl GenerationRequest {
    pub fn new(
        model: impl Into<String>,
        session_id: impl Into<String>,
        purpose: RequestPurpose,
        messages: Vec<ChatMessage>,
    ) -> Self {
        let profile = SamplingProfile::for_purpose(purpose);
        Self {
            model: model.into(),
            session_id: session_id.into(),
            messages,
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            presence_penalty: profile.presence_penalty,
            frequency_penalty: profile.frequency_penalty,
            response_format: profile.json_mode.then(|| ResponseFormat {
                kind: "json_object".to_string(),
            }),
            purpose,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl GenerationResponse {
    /// Text of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: ChoiceMessage {
                    content: Some(text.into()),
                },
            }],
        }
    }
}

/// Raw outcome of one remote call, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendReply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl BackendReply {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: serde_json::to_value(GenerationResponse::from_text(text))
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Sends a single generation request and returns the raw reply.
///
/// Implementations report network-level failures as [`DialogueError::Transport`]
/// and return every HTTP-level outcome, successful or not, as a [`BackendReply`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn send(&self, request: &GenerationRequest) -> Result<BackendReply, DialogueError>;
}

/// Backend that POSTs JSON to a gatekeeper endpoint such as `/api/chat`.
pub struct HttpGenerationBackend {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpGenerationBackend {
    /// Creates a backend for `endpoint` with a per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, DialogueError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn send(&self, request: &GenerationRequest) -> Result<BackendReply, DialogueError> {
        debug!(endpoint = %self.endpoint, purpose = ?request.purpose, messages = request.messages.len(), "Sending generation request");
        let response = self.http.post(&self.endpoint).json(request).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
        debug!(status, "Generation reply received");
        Ok(BackendReply { status, body })
    }
}

/// A backend that answers locally with well-formed canned replies.
///
/// Useful for exercising a host without network access or API costs.
#[derive(Debug, Default)]
pub struct OfflineBackend;

impl OfflineBackend {
    const TUTOR_LINES: [&'static str; 4] = [
        "Hallo! Wie geht's? Wir müssen zusammen etwas planen. Was denkst du, wann hast du Zeit?",
        "Super, das ist eine gute Idee! Und was meinst du, wo sollen wir das machen?",
        "Prima! Ich denke, wir könnten auch etwas mitbringen. Was hältst du davon?",
        "Sehr gut! Dann ist alles geplant. Ich freue mich schon. Bis dann!",
    ];

    fn reply_for(&self, request: &GenerationRequest) -> String {
        let prompt_text = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        match request.purpose {
            RequestPurpose::Dialogue => {
                let turn = request
                    .messages
                    .iter()
                    .filter(|m| m.role == ChatRole::Assistant)
                    .count();
                Self::TUTOR_LINES[turn.min(Self::TUTOR_LINES.len() - 1)].to_string()
            }
            RequestPurpose::Coverage => {
                let learner_lines = prompt_text
                    .lines()
                    .filter(|l| l.starts_with(LEARNER_LABEL))
                    .count();
                let points = prompt_text
                    .lines()
                    .filter(|l| {
                        l.split_once(". ")
                            .is_some_and(|(n, _)| n.parse::<usize>().is_ok())
                    })
                    .count();
                let indices: Vec<String> = (0..learner_lines.min(points))
                    .map(|i| i.to_string())
                    .collect();
                format!("[{}]", indices.join(", "))
            }
            RequestPurpose::Correction => "FEHLER: nein".to_string(),
            RequestPurpose::Feedback => "ABDECKUNG: Alle Punkte wurden besprochen.\n\nSTÄRKEN:\n- Du hast klare Vorschläge gemacht.\n- Du hast gut nachgefragt.\n\nVERBESSERUNGEN:\n- Achte auf die Wortstellung im Nebensatz.".to_string(),
            RequestPurpose::Letter => serde_json::json!({
                "corrected": "",
                "errors": [],
                "score": { "content": 3, "communication": 3, "accuracy": 3, "total": 9 },
                "contentPoints": [],
                "feedback": { "strengths": [], "improvements": [], "suggestions": [] }
            })
            .to_string(),
        }
    }
}

#[async_trait]
impl GenerationBackend for OfflineBackend {
    async fn send(&self, request: &GenerationRequest) -> Result<BackendReply, DialogueError> {
        debug!(purpose = ?request.purpose, "Answering offline");
        Ok(BackendReply::ok(self.reply_for(request)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dialogue_request_serializes_wire_contract() {
        let request = GenerationRequest::new(
            DEFAULT_MODEL,
            "session_1_abc",
            RequestPurpose::Dialogue,
            vec![ChatMessage::system("sys"), ChatMessage::user("hallo")],
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "gpt-4o-mini",
                "sessionId": "session_1_abc",
                "messages": [
                    { "role": "system", "content": "sys" },
                    { "role": "user", "content": "hallo" }
                ],
                "temperature": 0.7f32,
                "max_tokens": 250,
                "presence_penalty": 0.3f32,
                "frequency_penalty": 0.3f32
            })
        );
    }

    #[test]
    fn test_advisory_requests_omit_penalties() {
        let request = GenerationRequest::new("m", "s", RequestPurpose::Coverage, vec![]);
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("presence_penalty").is_none());
        assert!(value.get("response_format").is_none());
        assert_eq!(value["max_tokens"], 50);
    }

    #[test]
    fn test_letter_request_asks_for_json() {
        let request = GenerationRequest::new("m", "s", RequestPurpose::Letter, vec![]);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"], json!({ "type": "json_object" }));
    }

    #[test]
    fn test_response_content_reads_first_choice() {
        let response: GenerationResponse = serde_json::from_value(json!({
            "id": "x",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": "Hallo!" } },
                { "index": 1, "message": { "role": "assistant", "content": "ignored" } }
            ]
        }))
        .unwrap();
        assert_eq!(response.content(), Some("Hallo!"));

        let empty: GenerationResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert_eq!(empty.content(), None);
    }

    #[tokio::test]
    async fn test_offline_coverage_tracks_learner_lines() {
        let prompt = format!(
            "0. Wann?\n1. Wo?\n2. Was?\nKONVERSATION:\n{LEARNER_LABEL} a\nPrüfer: b\n{LEARNER_LABEL} c"
        );
        let request = GenerationRequest::new(
            "m",
            "s",
            RequestPurpose::Coverage,
            vec![ChatMessage::user(prompt)],
        );
        let reply = OfflineBackend.send(&request).await.unwrap();
        let response: GenerationResponse = serde_json::from_value(reply.body).unwrap();
        assert_eq!(response.content(), Some("[0, 1]"));
    }
}
