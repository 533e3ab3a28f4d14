use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::delegation::Delegation;
use super::tools::ToolCall;
use crate::agent::{AgentId, Speaker};

/// Shown in place of an empty assistant turn that ended in an error.
pub const ERROR_FALLBACK_TEXT: &str = "Sorry, an error occurred. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Parses a wire role. Roles this engine does not render yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Contiguous span of one speaker's text plus the tool calls issued while
/// they were active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub speaker: Speaker,
    pub text: String,
    pub tools: Vec<ToolCall>,
}

impl Segment {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            tools: Vec::new(),
        }
    }
}

/// Structured tool result rendered as a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolData {
    pub tool: String,
    pub data: Value,
    pub category: Option<String>,
    pub agent: Option<AgentId>,
}

impl ToolData {
    /// Dedup key: tool name plus the serialized payload.
    pub(crate) fn dedup_key(&self) -> (String, String) {
        (self.tool.clone(), self.data.to_string())
    }
}

/// One turn of a conversation.
///
/// For assistant turns `content` always equals the concatenation of every
/// segment's text. User turns carry their text in `content` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub segments: Vec<Segment>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_data: Vec<ToolData>,
    pub delegations: Vec<Delegation>,
    pub active_agent: Option<AgentId>,
    pub is_streaming: bool,
    pub thread_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(
        id: impl Into<String>,
        thread_id: Option<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: content.into(),
            segments: Vec::new(),
            tool_calls: Vec::new(),
            tool_data: Vec::new(),
            delegations: Vec::new(),
            active_agent: None,
            is_streaming: false,
            thread_id,
            created_at,
        }
    }

    /// An empty assistant turn that is about to receive stream events.
    pub fn streaming_assistant(
        id: impl Into<String>,
        thread_id: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            is_streaming: true,
            ..Self::user(id, thread_id, "", created_at)
        }
    }

    /// A finished assistant turn rebuilt from stored history.
    ///
    /// Replay cannot recover multi-agent segmentation, so the whole text is
    /// attributed to the orchestrator.
    pub fn replayed_assistant(
        id: impl Into<String>,
        thread_id: Option<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let content = content.into();
        Self {
            role: Role::Assistant,
            segments: vec![Segment::new(Speaker::Orchestrator, content.clone())],
            content,
            ..Self::user(id, thread_id, "", created_at)
        }
    }

    /// Text of all segments joined in order.
    pub fn segment_text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    /// Index of the most recent segment owned by `speaker`.
    pub(crate) fn last_segment_of(&self, speaker: &Speaker) -> Option<usize> {
        self.segments.iter().rposition(|s| &s.speaker == speaker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("Assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse(" user "), Some(Role::User));
        assert_eq!(Role::parse("system"), None);
    }

    #[test]
    fn test_replayed_assistant_is_single_orchestrator_segment() {
        let msg = ChatMessage::replayed_assistant("m1", Some("t1".into()), "hello", Utc::now());
        assert_eq!(msg.segments.len(), 1);
        assert_eq!(msg.segments[0].speaker, Speaker::Orchestrator);
        assert_eq!(msg.content, msg.segment_text());
        assert!(!msg.is_streaming);
    }

    #[test]
    fn test_streaming_assistant_starts_empty() {
        let msg = ChatMessage::streaming_assistant("m1", None, Utc::now());
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.is_streaming);
        assert!(msg.segments.is_empty());
        assert!(msg.content.is_empty());
    }
}
