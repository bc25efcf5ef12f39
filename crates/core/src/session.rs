//! Practice session lifecycle.
//!
//! [`PracticeSession`] owns the transcript and coverage of one conversation
//! and moves it through `NotStarted → Active → Closing → Completed`. Turns
//! are serialized by `&mut self`; the correction for a learner turn runs
//! concurrently with the tutor's answer to it. Both share the scenario's
//! session id, so under a gatekeeper rate window one of the pair waits out
//! the window, exactly as it would if the two were sent one after the other.

use crate::correction::CorrectionPipeline;
use crate::coverage::{CoverageAnalyzer, CoverageSet};
use crate::error::DialogueError;
use crate::feedback::FeedbackSynthesizer;
use crate::orchestrator::DialogueOrchestrator;
use crate::prompts::PromptSet;
use crate::protection::SessionChannel;
use crate::scenario::Scenario;
use crate::transcript::{CorrectionResult, FeedbackReport, Transcript, Turn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    NotStarted,
    Active,
    Closing,
    Completed,
}

/// Pacing thresholds for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Learner turns required before the tutor may close.
    pub min_exchanges: usize,
    /// Learner turns after which the session ends regardless of coverage.
    pub max_learner_turns: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            min_exchanges: 3,
            max_learner_turns: 15,
        }
    }
}

/// Progress notifications for a host rendering the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    TutorTurn(Turn),
    CorrectionReady {
        turn_index: usize,
        correction: CorrectionResult,
    },
    CoverageUpdated(CoverageSet),
    Closing,
    Completed(FeedbackReport),
    /// The gatekeeper ended the session; carries the learner-facing message.
    Terminated(String),
}

/// The four dialogue components, sharing one channel and prompt set.
#[derive(Clone)]
pub struct DialogueServices {
    pub orchestrator: DialogueOrchestrator,
    pub coverage: CoverageAnalyzer,
    pub correction: CorrectionPipeline,
    pub feedback: FeedbackSynthesizer,
}

impl DialogueServices {
    pub fn new(channel: SessionChannel, prompts: Arc<PromptSet>) -> Self {
        Self {
            orchestrator: DialogueOrchestrator::new(channel.clone(), prompts.clone()),
            coverage: CoverageAnalyzer::new(channel.clone(), prompts.clone()),
            correction: CorrectionPipeline::new(channel.clone(), prompts.clone()),
            feedback: FeedbackSynthesizer::new(channel, prompts),
        }
    }
}

/// What one learner turn produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply: Turn,
    pub correction: Option<CorrectionResult>,
    /// The tutor's closing turn, when the session closed after this turn.
    pub closing: Option<Turn>,
    pub covered: CoverageSet,
    pub phase: SessionPhase,
    pub report: Option<FeedbackReport>,
}

pub struct PracticeSession {
    scenario: Scenario,
    services: DialogueServices,
    limits: SessionLimits,
    phase: SessionPhase,
    transcript: Transcript,
    covered: CoverageSet,
    report: Option<FeedbackReport>,
    events: Option<mpsc::Sender<SessionEvent>>,
    cancel: CancellationToken,
}

impl PracticeSession {
    pub fn new(scenario: Scenario, services: DialogueServices, limits: SessionLimits) -> Self {
        let mut services = services;
        services.orchestrator = services
            .orchestrator
            .with_min_exchanges(limits.min_exchanges);
        Self {
            scenario,
            services,
            limits,
            phase: SessionPhase::NotStarted,
            transcript: Transcript::new(),
            covered: CoverageSet::new(),
            report: None,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Broadcasts [`SessionEvent`]s to `events`.
    pub fn with_events(mut self, events: mpsc::Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn covered(&self) -> &CoverageSet {
        &self.covered
    }

    pub fn report(&self) -> Option<&FeedbackReport> {
        self.report.as_ref()
    }

    /// Token that aborts the in-flight call, including a pending retry sleep.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).await.is_err() {
                warn!("Failed to broadcast session event: receiver dropped.");
            }
        }
    }

    async fn terminate(&mut self, error: &DialogueError) {
        warn!(scenario = %self.scenario.key, %error, "Session terminated by gatekeeper");
        self.phase = SessionPhase::Completed;
        self.emit(SessionEvent::Terminated(error.user_message())).await;
    }

    async fn fail(&mut self, error: DialogueError) -> DialogueError {
        if error.is_terminal() {
            self.terminate(&error).await;
        }
        error
    }

    /// Fetches the tutor's opening turn.
    #[instrument(skip_all, fields(scenario = %self.scenario.key))]
    pub async fn begin(&mut self) -> Result<Turn, DialogueError> {
        if self.phase != SessionPhase::NotStarted {
            return Err(DialogueError::NotActive(self.phase));
        }
        let cancel = self.cancel.clone();
        let turn = match self.services.orchestrator.start(&self.scenario, &cancel).await {
            Ok(turn) => turn,
            Err(e) => return Err(self.fail(e).await),
        };
        self.transcript.push(turn.clone());
        self.phase = SessionPhase::Active;
        info!("Session started");
        self.emit(SessionEvent::TutorTurn(turn.clone())).await;
        Ok(turn)
    }

    /// Records a learner utterance and advances the conversation.
    ///
    /// The learner turn stays in the transcript even when the tutor request
    /// fails; a non-terminal failure leaves the session active.
    #[instrument(skip_all, fields(scenario = %self.scenario.key, learner_turns = self.transcript.learner_turns()))]
    pub async fn submit(&mut self, utterance: &str) -> Result<TurnOutcome, DialogueError> {
        if self.phase != SessionPhase::Active {
            return Err(DialogueError::NotActive(self.phase));
        }
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(DialogueError::Validation(
                "Bitte schreibe eine Antwort.".into(),
            ));
        }

        let cancel = self.cancel.clone();
        let prior = self.transcript.clone();
        let turn_index = self.transcript.push(Turn::learner(utterance));

        let (correction, reply) = tokio::join!(
            self.services
                .correction
                .correct(&self.scenario.key, utterance, &cancel),
            self.services.orchestrator.continue_dialogue(
                &self.scenario,
                &prior,
                utterance,
                &self.covered,
                &cancel,
            ),
        );

        let correction = match correction {
            // A cancelled check never ran; its clean fallback says nothing.
            Ok(_) if cancel.is_cancelled() => None,
            Ok(correction) => {
                self.transcript.attach_correction(turn_index, correction.clone());
                self.emit(SessionEvent::CorrectionReady {
                    turn_index,
                    correction: correction.clone(),
                })
                .await;
                Some(correction)
            }
            Err(e) => {
                debug!(error = %e, "No correction for this turn");
                None
            }
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => return Err(self.fail(e).await),
        };
        self.transcript.push(reply.turn.clone());
        self.emit(SessionEvent::TutorTurn(reply.turn.clone())).await;

        let mut outcome = TurnOutcome {
            reply: reply.turn,
            correction,
            closing: None,
            covered: self.covered.clone(),
            phase: self.phase,
            report: None,
        };

        if reply.closing {
            info!("Tutor closed the conversation");
            self.phase = SessionPhase::Closing;
            self.emit(SessionEvent::Closing).await;
            outcome.report = Some(self.finish().await);
        } else if self.transcript.learner_turns() >= self.limits.max_learner_turns {
            info!(max = self.limits.max_learner_turns, "Turn ceiling reached");
            outcome.report = Some(self.finish().await);
        } else {
            let analysed = self
                .services
                .coverage
                .analyze(&self.scenario, &self.transcript, &cancel)
                .await;
            self.covered.union(&analysed);
            self.emit(SessionEvent::CoverageUpdated(self.covered.clone()))
                .await;
            outcome.covered = self.covered.clone();

            if self.covered.is_complete(self.scenario.point_count())
                && self.transcript.learner_turns() >= self.limits.min_exchanges
            {
                outcome.closing = self.close().await?;
                outcome.report = Some(self.finish().await);
            }
        }

        outcome.phase = self.phase;
        Ok(outcome)
    }

    /// Issues the closing turn. A non-terminal failure skips it.
    async fn close(&mut self) -> Result<Option<Turn>, DialogueError> {
        self.phase = SessionPhase::Closing;
        self.emit(SessionEvent::Closing).await;
        let cancel = self.cancel.clone();
        match self
            .services
            .orchestrator
            .close(&self.scenario, &self.transcript, &cancel)
            .await
        {
            Ok(turn) => {
                self.transcript.push(turn.clone());
                self.emit(SessionEvent::TutorTurn(turn.clone())).await;
                Ok(Some(turn))
            }
            Err(e) if e.is_terminal() => Err(self.fail(e).await),
            Err(e) => {
                warn!(error = %e, "Closing turn failed; finishing without it");
                Ok(None)
            }
        }
    }

    async fn finish(&mut self) -> FeedbackReport {
        let cancel = self.cancel.clone();
        let report = self
            .services
            .feedback
            .synthesize(&self.scenario, &self.transcript, &cancel)
            .await;
        self.phase = SessionPhase::Completed;
        self.report = Some(report.clone());
        info!(covered = self.covered.len(), turns = self.transcript.len(), "Session completed");
        self.emit(SessionEvent::Completed(report.clone())).await;
        report
    }
}
