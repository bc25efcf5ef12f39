//! Dialogue core for B1 speaking and writing practice.
//!
//! A [`PracticeSession`] drives a tutoring conversation through the
//! [`DialogueOrchestrator`], with coverage analysis, per-turn correction and an
//! end-of-session report running beside it. Every remote call goes through a
//! [`SessionChannel`], which attaches the scenario's session id and applies the
//! gatekeeper's throttle and termination verdicts.

pub mod correction;
pub mod coverage;
pub mod error;
pub mod feedback;
pub mod generation;
pub mod orchestrator;
pub mod parse;
pub mod prompts;
pub mod protection;
pub mod scenario;
pub mod session;
pub mod session_store;
pub mod transcript;
pub mod writing;

pub use correction::CorrectionPipeline;
pub use coverage::{CoverageAnalyzer, CoverageSet};
pub use error::DialogueError;
pub use feedback::FeedbackSynthesizer;
pub use generation::{GenerationBackend, HttpGenerationBackend, OfflineBackend};
pub use orchestrator::DialogueOrchestrator;
pub use prompts::PromptSet;
pub use protection::{ProtectionClient, RetryPolicy, SessionChannel};
pub use scenario::Scenario;
pub use session::{DialogueServices, PracticeSession, SessionEvent, SessionLimits, SessionPhase};
pub use session_store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use transcript::{CorrectionResult, FeedbackReport, Transcript, Turn};
pub use writing::{LetterEvaluator, LetterPrompt, Register};
