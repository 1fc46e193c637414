use crate::chat::ChatRequest;
use crate::error::{Error, Result};
use crate::patients::ConversationEntry;
use crate::stream::StreamEvent;
use crate::transcript::Transcript;

/// Lifecycle of one streamed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    /// Request sent, nothing received yet.
    AwaitingFirstByte,
    Streaming,
    Done,
    Failed,
}

/// What a folded record means for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    /// Transcript advanced or a checkpoint was reached; redraw.
    Progress,
    /// Terminal `done` record arrived; the turn is frozen.
    Finished,
    /// The turn failed and was rolled back.
    Failed(String),
    /// Record arrived outside an in-flight turn; nothing changed.
    Ignored,
}

/// Chat state for one patient: transcript plus the turn state machine.
///
/// One turn may be in flight at a time; a second send while streaming is
/// rejected with [`Error::TurnInProgress`]. Failure is all-or-nothing: both
/// the in-flight reply and the user message that triggered it are removed.
#[derive(Debug, Clone)]
pub struct ChatSession {
    patient_id: String,
    transcript: Transcript,
    phase: StreamPhase,
}

impl ChatSession {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            transcript: Transcript::new(),
            phase: StreamPhase::Idle,
        }
    }

    /// Session seeded with the history stored on the patient record.
    pub fn with_history(patient_id: impl Into<String>, entries: &[ConversationEntry]) -> Self {
        Self {
            patient_id: patient_id.into(),
            transcript: Transcript::from_history(entries),
            phase: StreamPhase::Idle,
        }
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn in_flight(&self) -> bool {
        matches!(
            self.phase,
            StreamPhase::AwaitingFirstByte | StreamPhase::Streaming
        )
    }

    /// Push the user message and the streaming placeholder, returning the
    /// request to send.
    pub fn begin_turn(&mut self, message: &str) -> Result<ChatRequest> {
        if self.in_flight() {
            return Err(Error::TurnInProgress);
        }
        self.transcript.push_user(message);
        self.transcript.begin_assistant();
        self.phase = StreamPhase::AwaitingFirstByte;
        Ok(ChatRequest {
            patient_id: self.patient_id.clone(),
            message: message.to_string(),
        })
    }

    /// Fold one stream record into the transcript.
    pub fn apply(&mut self, event: &StreamEvent) -> TurnUpdate {
        if !self.in_flight() {
            return TurnUpdate::Ignored;
        }
        self.phase = StreamPhase::Streaming;
        match event {
            StreamEvent::Start
            | StreamEvent::ThinkingStart
            | StreamEvent::ThinkingEnd
            | StreamEvent::ResponseStart
            | StreamEvent::ResponseEnd => TurnUpdate::Progress,
            StreamEvent::ThinkingStepStart { node, display_name } => {
                self.transcript.begin_step(node, display_name);
                TurnUpdate::Progress
            }
            StreamEvent::ThinkingChunk { node, content } => {
                self.transcript.append_thinking(node, content);
                TurnUpdate::Progress
            }
            // Step boundary; the step content is already in place.
            StreamEvent::ThinkingStepEnd { .. } => TurnUpdate::Progress,
            StreamEvent::ThinkingStep {
                node,
                display_name,
                content,
            } => {
                self.transcript.push_step(node, display_name, content);
                TurnUpdate::Progress
            }
            StreamEvent::ResponseChunk { content } => {
                self.transcript.append_response(content);
                TurnUpdate::Progress
            }
            StreamEvent::Done { response } => {
                self.transcript.finish(response);
                self.phase = StreamPhase::Done;
                TurnUpdate::Finished
            }
            StreamEvent::Error { message } => self.fail_with(message.clone()),
        }
    }

    /// Transport-level failure: roll the turn back.
    pub fn fail(&mut self, message: impl Into<String>) -> TurnUpdate {
        if !self.in_flight() {
            return TurnUpdate::Ignored;
        }
        self.fail_with(message.into())
    }

    /// User abort: roll the turn back and return to idle.
    pub fn cancel(&mut self) {
        if self.in_flight() {
            self.transcript.rollback_turn();
            self.phase = StreamPhase::Idle;
        }
    }

    fn fail_with(&mut self, message: String) -> TurnUpdate {
        self.transcript.rollback_turn();
        self.phase = StreamPhase::Failed;
        TurnUpdate::Failed(message)
    }
}
