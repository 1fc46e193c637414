use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::patients::ConversationEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One agent node's reasoning within an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingStep {
    pub node: String,
    pub display_name: String,
    pub content: String,
}

impl ThinkingStep {
    pub fn new(
        node: impl Into<String>,
        display_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            display_name: display_name.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
    pub thinking_steps: Vec<ThinkingStep>,
    /// Still receiving chunks. At most one message per transcript.
    pub streaming: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Local::now(),
            thinking_steps: Vec::new(),
            streaming: false,
        }
    }

    fn assistant_placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            timestamp: Local::now(),
            thinking_steps: Vec::new(),
            streaming: true,
        }
    }
}

/// Append-only conversation log for one patient.
///
/// Chunk folding only ever touches the single streaming message, so a
/// finished turn can never be mutated by late records.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the history the backend stores with the patient record.
    pub fn from_history(entries: &[ConversationEntry]) -> Self {
        let mut transcript = Self::new();
        for entry in entries {
            let role = match entry.role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                _ => continue,
            };
            transcript.messages.push(Message {
                role,
                content: entry.content.clone(),
                timestamp: parse_timestamp(&entry.timestamp),
                thinking_steps: Vec::new(),
                streaming: false,
            });
        }
        transcript
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    /// Open the streaming assistant reply for a new turn.
    pub fn begin_assistant(&mut self) {
        self.messages.push(Message::assistant_placeholder());
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.streaming)
    }

    fn streaming_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut().filter(|m| m.streaming)
    }

    /// Open an empty thinking step on the streaming reply.
    pub fn begin_step(&mut self, node: &str, display_name: &str) {
        if let Some(message) = self.streaming_mut() {
            message
                .thinking_steps
                .push(ThinkingStep::new(node, display_name, ""));
        }
    }

    /// Append step text. Chunks whose node does not match the open step are
    /// dropped rather than appended to the wrong step.
    pub fn append_thinking(&mut self, node: &str, content: &str) -> bool {
        if let Some(message) = self.streaming_mut() {
            if let Some(step) = message.thinking_steps.last_mut() {
                if step.node == node {
                    step.content.push_str(content);
                    return true;
                }
            }
        }
        false
    }

    /// Append an already-complete step (non-incremental servers).
    pub fn push_step(&mut self, node: &str, display_name: &str, content: &str) {
        if let Some(message) = self.streaming_mut() {
            message
                .thinking_steps
                .push(ThinkingStep::new(node, display_name, content));
        }
    }

    pub fn append_response(&mut self, content: &str) {
        if let Some(message) = self.streaming_mut() {
            message.content.push_str(content);
        }
    }

    /// Close the streaming reply. A final response text fills the message only
    /// when no chunks arrived for it, matching servers that send the whole
    /// reply in the terminal record.
    pub fn finish(&mut self, response: &str) {
        if let Some(message) = self.streaming_mut() {
            if message.content.is_empty() && !response.is_empty() {
                message.content.push_str(response);
            }
            message.streaming = false;
        }
    }

    /// Drop the in-flight reply and the user message that started the turn.
    /// Leaves earlier turns untouched.
    pub fn rollback_turn(&mut self) {
        if self.messages.last().is_some_and(|m| m.streaming) {
            self.messages.pop();
            if self
                .messages
                .last()
                .is_some_and(|m| m.role == Role::User)
            {
                self.messages.pop();
            }
        }
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Local> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return stamp.with_timezone(&Local);
    }
    // The backend writes naive `datetime.now().isoformat()` strings.
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        if let Some(stamp) = naive.and_local_timezone(Local).earliest() {
            return stamp;
        }
    }
    Local::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(role: &str, content: &str, timestamp: &str) -> ConversationEntry {
        ConversationEntry {
            role: role.into(),
            content: content.into(),
            timestamp: timestamp.into(),
        }
    }

    #[test]
    fn begin_turn_pushes_user_and_placeholder() {
        let mut transcript = Transcript::new();
        transcript.push_user("头疼两天了");
        transcript.begin_assistant();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].role, Role::User);
        assert!(transcript.streaming_message().is_some());
    }

    #[test]
    fn thinking_chunks_append_only_on_matching_node() {
        let mut transcript = Transcript::new();
        transcript.push_user("hi");
        transcript.begin_assistant();
        transcript.begin_step("triage_node", "分诊评估");
        assert!(transcript.append_thinking("triage_node", "发热"));
        assert!(!transcript.append_thinking("router", "忽略"));
        assert!(transcript.append_thinking("triage_node", "咳嗽"));
        let steps = &transcript.messages()[1].thinking_steps;
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].content, "发热咳嗽");
    }

    #[test]
    fn legacy_step_is_appended_complete() {
        let mut transcript = Transcript::new();
        transcript.push_user("hi");
        transcript.begin_assistant();
        transcript.push_step("router", "路由分析", "");
        let steps = &transcript.messages()[1].thinking_steps;
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].display_name, "路由分析");
        assert!(steps[0].content.is_empty());
    }

    #[test]
    fn response_chunks_accumulate() {
        let mut transcript = Transcript::new();
        transcript.push_user("hi");
        transcript.begin_assistant();
        transcript.append_response("您好，");
        transcript.append_response("请描述症状");
        assert_eq!(transcript.messages()[1].content, "您好，请描述症状");
    }

    #[test]
    fn finished_message_ignores_late_records() {
        let mut transcript = Transcript::new();
        transcript.push_user("hi");
        transcript.begin_assistant();
        transcript.append_response("done");
        transcript.finish("");
        let before = transcript.messages()[1].clone();

        transcript.append_response("late");
        transcript.begin_step("x", "X");
        transcript.push_step("x", "X", "late");
        assert_eq!(transcript.messages()[1], before);
    }

    #[test]
    fn finish_fills_content_only_when_empty() {
        let mut transcript = Transcript::new();
        transcript.push_user("hi");
        transcript.begin_assistant();
        transcript.finish("完整回复");
        assert_eq!(transcript.messages()[1].content, "完整回复");

        let mut transcript = Transcript::new();
        transcript.push_user("hi");
        transcript.begin_assistant();
        transcript.append_response("分段");
        transcript.finish("其他");
        assert_eq!(transcript.messages()[1].content, "分段");
    }

    #[test]
    fn rollback_removes_reply_and_triggering_user_message() {
        let mut transcript = Transcript::from_history(&[
            entry("user", "早上好", "2025-10-20T10:00:00.000001"),
            entry("assistant", "您好", "2025-10-20T10:00:05.000001"),
        ]);
        transcript.push_user("新问题");
        transcript.begin_assistant();
        transcript.append_response("partial");

        transcript.rollback_turn();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[1].content, "您好");
    }

    #[test]
    fn rollback_without_streaming_message_is_a_no_op() {
        let mut transcript = Transcript::new();
        transcript.push_user("hi");
        transcript.rollback_turn();
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn history_seeding_skips_unknown_roles() {
        let transcript = Transcript::from_history(&[
            entry("user", "a", "2025-10-20T10:00:00"),
            entry("system", "b", "2025-10-20T10:00:01"),
            entry("assistant", "c", "2025-10-20T10:00:02"),
        ]);
        assert_eq!(transcript.len(), 2);
        assert!(transcript.streaming_message().is_none());
        assert_eq!(transcript.messages()[1].role, Role::Assistant);
    }

    #[test]
    fn naive_backend_timestamps_parse() {
        let transcript =
            Transcript::from_history(&[entry("user", "a", "2025-10-20T10:30:00.123456")]);
        let stamp = transcript.messages()[0].timestamp;
        assert_eq!(stamp.format("%H:%M").to_string(), "10:30");
    }
}
