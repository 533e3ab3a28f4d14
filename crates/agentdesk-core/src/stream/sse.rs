use std::pin::Pin;
use std::task::{Context, Poll};

use eventsource_stream::{EventStream, EventStreamError, Eventsource};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::Value;

use super::{ErrorReason, StreamEvent};
use crate::agent::AgentId;
use crate::error::{EngineError, EngineResult};

/// Terminal sentinel some backends send instead of a `finish` frame.
const DONE_SENTINEL: &str = "[DONE]";

/// SSE parser that converts a byte stream into `StreamEvent`s.
///
/// Yields one item per SSE frame. Lifecycle frames that carry nothing for the
/// transcript yield `Ok(None)`.
pub struct SseInterpreter<S> {
    inner: EventStream<S>,
}

impl<S> SseInterpreter<S> {
    pub fn new(stream: S) -> Self
    where
        S: Eventsource,
    {
        Self {
            inner: stream.eventsource(),
        }
    }
}

impl<S, E> Stream for SseInterpreter<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = EngineResult<Option<StreamEvent>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => Poll::Ready(Some(parse_frame(&event.data))),
            Poll::Ready(Some(Err(EventStreamError::Transport(e)))) => Poll::Ready(Some(Err(
                EngineError::connection(format!("Stream transport error: {e}")),
            ))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(EngineError::decode(format!(
                "SSE stream error: {e}"
            ))))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Parses the `data:` payload of a single SSE frame.
///
/// # Errors
/// Returns a decode error for invalid JSON, unknown frame types, or frames
/// missing required fields.
pub fn parse_frame(data: &str) -> EngineResult<Option<StreamEvent>> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == DONE_SENTINEL {
        return Ok(Some(StreamEvent::End));
    }

    let frame: WireFrame = serde_json::from_str(data)
        .map_err(|err| EngineError::decode(format!("Failed to parse stream frame: {err}")))?;

    let event = match frame {
        WireFrame::TextDelta { delta, agent } => StreamEvent::Token {
            // An empty delta is valid; only an absent one is malformed.
            text: delta
                .ok_or_else(|| EngineError::decode("Missing delta in text-delta frame"))?,
            agent: AgentId::parse_opt(agent.as_deref()),
        },
        WireFrame::ToolCallStart {
            tool_call_id,
            tool_name,
            args,
            agent,
        } => StreamEvent::ToolStart {
            call_id: required("tool-call-start", "toolCallId", tool_call_id)?,
            name: required("tool-call-start", "toolName", tool_name)?,
            args,
            agent: AgentId::parse_opt(agent.as_deref()),
        },
        WireFrame::ToolCallResult {
            tool_call_id,
            tool_name,
            result,
            is_error,
        } => StreamEvent::ToolEnd {
            call_id: required("tool-call-result", "toolCallId", tool_call_id)?,
            name: tool_name.filter(|name| !name.trim().is_empty()),
            result,
            is_error,
        },
        WireFrame::ToolData {
            tool,
            data,
            category,
            agent,
        } => StreamEvent::ToolData {
            tool: required("tool-data", "tool", tool)?,
            data,
            category,
            agent: AgentId::parse_opt(agent.as_deref()),
        },
        WireFrame::Delegate { to_agent } => StreamEvent::Delegate {
            to_agent: required_agent("delegate", "toAgent", to_agent.as_deref())?,
        },
        WireFrame::AgentSwitch { agent } => StreamEvent::AgentSwitch {
            agent: required_agent("agent-switch", "agent", agent.as_deref())?,
        },
        WireFrame::Annotation { thread_id } => StreamEvent::ThreadId {
            value: required("annotation", "threadId", thread_id)?,
        },
        WireFrame::Error { error_text } => StreamEvent::Error {
            message: error_text.unwrap_or_else(|| "Unknown backend error".to_string()),
            reason: ErrorReason::Backend,
        },
        WireFrame::Finish => StreamEvent::End,
        WireFrame::Start
        | WireFrame::StartStep
        | WireFrame::FinishStep
        | WireFrame::TextStart
        | WireFrame::TextEnd
        | WireFrame::Ping => {
            tracing::trace!(frame = data, "skipping lifecycle frame");
            return Ok(None);
        }
    };

    Ok(Some(event))
}

fn required(frame: &str, field: &str, value: Option<String>) -> EngineResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| EngineError::decode(format!("Missing {field} in {frame} frame")))
}

fn required_agent(frame: &str, field: &str, value: Option<&str>) -> EngineResult<AgentId> {
    AgentId::parse_opt(value)
        .ok_or_else(|| EngineError::decode(format!("Missing {field} in {frame} frame")))
}

// === Wire Frame Structures ===

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WireFrame {
    #[serde(rename_all = "camelCase")]
    TextDelta {
        #[serde(default)]
        delta: Option<String>,
        #[serde(default)]
        agent: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolCallStart {
        #[serde(default)]
        tool_call_id: Option<String>,
        #[serde(default)]
        tool_name: Option<String>,
        #[serde(default)]
        args: Value,
        #[serde(default)]
        agent: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolCallResult {
        #[serde(default)]
        tool_call_id: Option<String>,
        #[serde(default)]
        tool_name: Option<String>,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(rename_all = "camelCase")]
    ToolData {
        #[serde(default)]
        tool: Option<String>,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        agent: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Delegate {
        #[serde(default)]
        to_agent: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AgentSwitch {
        #[serde(default)]
        agent: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Annotation {
        #[serde(default)]
        thread_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default)]
        error_text: Option<String>,
    },
    Finish,
    Start,
    StartStep,
    FinishStep,
    TextStart,
    TextEnd,
    Ping,
}
