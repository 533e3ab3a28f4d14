//! Chat stream interpretation.
//!
//! The backend streams Server-Sent Events; each frame resolves to at most one
//! [`StreamEvent`]. [`SseInterpreter`] does the frame-level decoding and
//! [`interpret`] turns it into the finite, ordered event sequence the
//! transcript reducer consumes.

use std::fmt;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentId;
use crate::error::{EngineResult, ErrorKind};

mod interpreter;
mod sse;

pub use interpreter::interpret;
pub use sse::{SseInterpreter, parse_frame};

/// Raw transport bytes of one chat stream.
pub type ByteStream = BoxStream<'static, EngineResult<Bytes>>;

/// Why a stream ended with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// A frame could not be decoded
    Decode,
    /// The connection dropped, idled out, or closed before `End`
    Connection,
    /// The backend reported an error frame
    Backend,
}

impl ErrorReason {
    /// Whether resending the turn might succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorReason::Connection)
    }
}

impl From<ErrorKind> for ErrorReason {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Decode => ErrorReason::Decode,
            _ => ErrorReason::Connection,
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorReason::Decode => write!(f, "decode"),
            ErrorReason::Connection => write!(f, "connection"),
            ErrorReason::Backend => write!(f, "backend"),
        }
    }
}

/// One interpreted unit of the chat stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Text delta, optionally tagged with the agent that produced it.
    Token {
        text: String,
        agent: Option<AgentId>,
    },
    /// A tool call started.
    ToolStart {
        call_id: String,
        name: String,
        args: Value,
        agent: Option<AgentId>,
    },
    /// A tool call finished.
    ToolEnd {
        call_id: String,
        name: Option<String>,
        result: Value,
        is_error: bool,
    },
    /// Structured tool result meant for a result card.
    ToolData {
        tool: String,
        data: Value,
        category: Option<String>,
        agent: Option<AgentId>,
    },
    /// Orchestrator handed off to an agent.
    Delegate { to_agent: AgentId },
    /// The speaking agent changed.
    AgentSwitch { agent: AgentId },
    /// Canonical thread id for this conversation.
    ThreadId { value: String },
    /// Terminal error.
    Error { message: String, reason: ErrorReason },
    /// Terminal success.
    End,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::End | StreamEvent::Error { .. })
    }

    pub fn connection_error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
            reason: ErrorReason::Connection,
        }
    }
}
