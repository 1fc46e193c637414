use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::error::{Error, Result};
use crate::patients::PatientRecord;
use crate::stream::StreamEvent;

/// Stream of parsed reply records for one chat turn.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat_stream(&self, request: ChatRequest) -> Result<EventStream>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub patient_id: String,
    pub message: String,
}

impl ChatRequest {
    pub fn new(patient_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            message: message.into(),
        }
    }
}

/// Reply from the non-streaming chat endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub patient_data: PatientRecord,
}

pub fn chat_event_stream(
    backend: Arc<dyn ChatBackend>,
    request: ChatRequest,
) -> (impl Stream<Item = StreamEvent>, JoinHandle<Result<()>>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = tokio::spawn(run_chat_turn(backend, request, tx));
    (UnboundedReceiverStream::new(rx), handle)
}

/// Pump one reply stream into `tx`. Stops at the terminal record: `done`
/// closes the turn normally, an in-band `error` is forwarded to the consumer
/// and then surfaced as the task result.
pub async fn run_chat_turn(
    backend: Arc<dyn ChatBackend>,
    request: ChatRequest,
    tx: UnboundedSender<StreamEvent>,
) -> Result<()> {
    let mut stream = backend.chat_stream(request).await?;
    while let Some(event) = stream.next().await {
        let event = event?;
        match event {
            StreamEvent::Done { .. } => {
                tx.send(event).ok();
                break;
            }
            StreamEvent::Error { message } => {
                tx.send(StreamEvent::Error {
                    message: message.clone(),
                })
                .ok();
                return Err(Error::Stream(message));
            }
            other => {
                tx.send(other).ok();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio_stream::{self};

    struct DummyBackend {
        events: Mutex<Option<Vec<Result<StreamEvent>>>>,
    }

    impl DummyBackend {
        fn new(events: Vec<Result<StreamEvent>>) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Some(events)),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for DummyBackend {
        async fn chat_stream(&self, _request: ChatRequest) -> Result<EventStream> {
            let events = self.events.lock().unwrap().take().unwrap_or_default();
            Ok(Box::pin(tokio_stream::iter(events)))
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn forwards_records_through_done() {
        let backend = DummyBackend::new(vec![
            Ok(StreamEvent::Start),
            Ok(StreamEvent::ResponseChunk {
                content: "你好".into(),
            }),
            Ok(StreamEvent::Done {
                response: "你好".into(),
            }),
        ]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        run_chat_turn(backend, ChatRequest::new("p1", "hi"), tx)
            .await
            .unwrap();
        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn in_band_error_is_forwarded_then_fails_the_task() {
        let backend = DummyBackend::new(vec![
            Ok(StreamEvent::Start),
            Ok(StreamEvent::Error {
                message: "患者不存在".into(),
            }),
            Ok(StreamEvent::ResponseChunk {
                content: "never".into(),
            }),
        ]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let result = run_chat_turn(backend, ChatRequest::new("missing", "hi"), tx).await;
        match result {
            Err(Error::Stream(message)) => assert_eq!(message, "患者不存在"),
            other => panic!("expected stream error, got {other:?}"),
        }
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
    }

    #[tokio::test]
    async fn transport_error_stops_the_pump() {
        let backend = DummyBackend::new(vec![
            Ok(StreamEvent::Start),
            Err(Error::Stream("connection reset".into())),
            Ok(StreamEvent::Done {
                response: String::new(),
            }),
        ]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let result = run_chat_turn(backend, ChatRequest::new("p1", "hi"), tx).await;
        assert!(result.is_err());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn records_after_done_are_not_forwarded() {
        let backend = DummyBackend::new(vec![
            Ok(StreamEvent::Done {
                response: "ok".into(),
            }),
            Ok(StreamEvent::ResponseChunk {
                content: "stale".into(),
            }),
        ]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        run_chat_turn(backend, ChatRequest::new("p1", "hi"), tx)
            .await
            .unwrap();
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn spawned_stream_yields_the_same_sequence() {
        let backend = DummyBackend::new(vec![
            Ok(StreamEvent::Start),
            Ok(StreamEvent::ThinkingStart),
            Ok(StreamEvent::ThinkingEnd),
            Ok(StreamEvent::Done {
                response: "done".into(),
            }),
        ]);
        let (stream, handle) = chat_event_stream(backend, ChatRequest::new("p1", "hi"));
        let events: Vec<StreamEvent> = stream.collect().await;
        handle.await.unwrap().unwrap();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[1], StreamEvent::ThinkingStart));
    }
}
