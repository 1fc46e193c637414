use serde::{Deserialize, Serialize};
use tracing::warn;

/// One record of the chat stream, as the backend emits it.
///
/// The backend speaks newline-delimited `data: <json>` records. Most carry a
/// `type` discriminator; the unknown-patient path emits a bare
/// `{"error": ...}` object, which [`EventParser`] folds into [`StreamEvent::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start,
    ThinkingStart,
    ThinkingStepStart {
        node: String,
        display_name: String,
    },
    ThinkingChunk {
        node: String,
        content: String,
    },
    ThinkingStepEnd {
        node: String,
    },
    /// Non-incremental step, kept for servers that do not stream step content.
    ThinkingStep {
        node: String,
        display_name: String,
        #[serde(default)]
        content: String,
    },
    ThinkingEnd,
    ResponseStart,
    ResponseChunk {
        content: String,
    },
    ResponseEnd,
    Done {
        #[serde(default)]
        response: String,
    },
    Error {
        message: String,
    },
}

#[derive(Deserialize)]
struct BareError {
    error: String,
}

/// Incremental frame parser for the chat byte stream.
///
/// Transport chunks split records at arbitrary byte offsets, including inside
/// the `data:` prefix and inside multi-byte UTF-8 sequences. The parser
/// buffers bytes until a newline completes a record, so any chunking of the
/// same bytes yields the same events.
#[derive(Debug, Default)]
pub struct EventParser {
    pending: Vec<u8>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk, returning every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut start = 0;
        while let Some(rel) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + rel;
            if let Some(event) = parse_record(&self.pending[start..end]) {
                events.push(event);
            }
            start = end + 1;
        }
        self.pending.drain(..start);
        events
    }
}

fn parse_record(line: &[u8]) -> Option<StreamEvent> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.is_empty() {
        return None;
    }
    let Ok(text) = std::str::from_utf8(line) else {
        warn!("skipping non-utf8 stream record");
        return None;
    };
    // Blank separators, comments and other SSE fields are not data records.
    let payload = text.trim().strip_prefix("data:")?.trim_start();
    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Some(event),
        Err(err) => match serde_json::from_str::<BareError>(payload) {
            Ok(bare) => Some(StreamEvent::Error {
                message: bare.error,
            }),
            Err(_) => {
                warn!("skipping malformed stream record: {err}");
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(parser: &mut EventParser, input: &str) -> Vec<StreamEvent> {
        parser.push(input.as_bytes())
    }

    #[test]
    fn parses_every_record_type() {
        let mut parser = EventParser::new();
        let input = concat!(
            "data: {\"type\": \"start\", \"message\": \"开始处理...\"}\n",
            "data: {\"type\": \"thinking_start\", \"message\": \"正在分析...\"}\n",
            "data: {\"type\": \"thinking_step_start\", \"node\": \"triage_node\", \"display_name\": \"🏥 分诊评估\"}\n",
            "data: {\"type\": \"thinking_chunk\", \"node\": \"triage_node\", \"content\": \"评估中\"}\n",
            "data: {\"type\": \"thinking_step_end\", \"node\": \"triage_node\"}\n",
            "data: {\"type\": \"thinking_step\", \"node\": \"router\", \"display_name\": \"🔀 路由分析\", \"content\": \"\"}\n",
            "data: {\"type\": \"thinking_end\", \"steps\": [{\"node\": \"triage_node\"}]}\n",
            "data: {\"type\": \"response_start\"}\n",
            "data: {\"type\": \"response_chunk\", \"content\": \"您好\"}\n",
            "data: {\"type\": \"response_end\"}\n",
            "data: {\"type\": \"done\", \"response\": \"您好\"}\n",
        );
        let events = parse_all(&mut parser, input);
        assert_eq!(events.len(), 11);
        assert_eq!(events[0], StreamEvent::Start);
        assert_eq!(events[1], StreamEvent::ThinkingStart);
        assert_eq!(
            events[2],
            StreamEvent::ThinkingStepStart {
                node: "triage_node".into(),
                display_name: "🏥 分诊评估".into(),
            }
        );
        assert_eq!(
            events[3],
            StreamEvent::ThinkingChunk {
                node: "triage_node".into(),
                content: "评估中".into(),
            }
        );
        assert_eq!(
            events[4],
            StreamEvent::ThinkingStepEnd {
                node: "triage_node".into(),
            }
        );
        assert_eq!(
            events[5],
            StreamEvent::ThinkingStep {
                node: "router".into(),
                display_name: "🔀 路由分析".into(),
                content: String::new(),
            }
        );
        assert_eq!(events[6], StreamEvent::ThinkingEnd);
        assert_eq!(events[7], StreamEvent::ResponseStart);
        assert_eq!(
            events[8],
            StreamEvent::ResponseChunk {
                content: "您好".into(),
            }
        );
        assert_eq!(events[9], StreamEvent::ResponseEnd);
        assert_eq!(
            events[10],
            StreamEvent::Done {
                response: "您好".into(),
            }
        );
    }

    #[test]
    fn reassembles_record_split_across_chunks() {
        let mut parser = EventParser::new();
        assert!(parser.push(b"data: {\"type\":\"respons").is_empty());
        let events = parser.push(b"e_chunk\",\"content\":\"Hi\"}\n");
        assert_eq!(
            events,
            vec![StreamEvent::ResponseChunk {
                content: "Hi".into()
            }]
        );
    }

    #[test]
    fn any_split_point_yields_identical_events() {
        let line = "data: {\"type\":\"response_chunk\",\"content\":\"发热咳嗽\"}\n";
        let bytes = line.as_bytes();
        let expected = vec![StreamEvent::ResponseChunk {
            content: "发热咳嗽".into(),
        }];
        for split in 0..bytes.len() {
            let mut parser = EventParser::new();
            let mut events = parser.push(&bytes[..split]);
            events.extend(parser.push(&bytes[split..]));
            assert_eq!(events, expected, "split at byte {split}");
        }
    }

    #[test]
    fn bare_error_object_parses_as_error() {
        let mut parser = EventParser::new();
        let events = parse_all(&mut parser, "data: {\"error\": \"患者不存在\"}\n");
        assert_eq!(
            events,
            vec![StreamEvent::Error {
                message: "患者不存在".into()
            }]
        );
    }

    #[test]
    fn malformed_record_is_skipped() {
        let mut parser = EventParser::new();
        let input = "data: {not json}\ndata: {\"type\":\"response_chunk\",\"content\":\"ok\"}\n";
        let events = parse_all(&mut parser, input);
        assert_eq!(
            events,
            vec![StreamEvent::ResponseChunk {
                content: "ok".into()
            }]
        );
    }

    #[test]
    fn blank_lines_and_comments_are_skipped() {
        let mut parser = EventParser::new();
        let input = "\n\n: keep-alive\nevent: message\ndata: {\"type\":\"done\"}\n";
        let events = parse_all(&mut parser, input);
        assert_eq!(
            events,
            vec![StreamEvent::Done {
                response: String::new()
            }]
        );
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let mut parser = EventParser::new();
        let events = parse_all(&mut parser, "data: {\"type\":\"response_start\"}\r\n");
        assert_eq!(events, vec![StreamEvent::ResponseStart]);
    }

    #[test]
    fn partial_line_is_retained_until_newline() {
        let mut parser = EventParser::new();
        assert!(parser.push(b"data: {\"type\":\"done\"}").is_empty());
        assert!(parser.push(b"").is_empty());
        let events = parser.push(b"\n");
        assert_eq!(
            events,
            vec![StreamEvent::Done {
                response: String::new()
            }]
        );
    }

    #[test]
    fn multiple_records_in_one_chunk() {
        let mut parser = EventParser::new();
        let input = "data: {\"type\":\"response_chunk\",\"content\":\"a\"}\n\ndata: {\"type\":\"response_chunk\",\"content\":\"b\"}\n\n";
        let events = parse_all(&mut parser, input);
        assert_eq!(events.len(), 2);
    }
}
