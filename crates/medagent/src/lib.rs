pub mod chat;
pub mod client;
pub mod error;
pub mod graph;
pub mod knowledge;
pub mod patients;
pub mod session;
pub mod stream;
pub mod transcript;

pub use chat::{ChatBackend, ChatReply, ChatRequest, EventStream, chat_event_stream};
pub use client::{ApiClient, DEFAULT_BASE_URL};
pub use error::{Error, Result};
pub use graph::{GraphEdge, GraphNode, GraphView};
pub use knowledge::{
    BuildOutcome, CleanupOutcome, DeleteOptions, DeleteOutcome, DocumentDetail, DocumentSummary,
    Entity, ExtractOutcome, GraphMetadata, Relationship, SyncOutcome, UploadOutcome,
};
pub use patients::{
    ConversationEntry, DeleteConfirmation, DiagnosisInfo, ExpertConsultation, NewPatient,
    PatientRecord, PatientSummary, PatientUpdate, RecommendedTest, SubmittedTest, TriageInfo,
};
pub use session::{ChatSession, StreamPhase, TurnUpdate};
pub use stream::{EventParser, StreamEvent};
pub use transcript::{Message, Role, ThinkingStep, Transcript};
