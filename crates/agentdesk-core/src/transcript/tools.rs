//! Tool call lifecycle tracking.
//!
//! Each call moves `Pending -> Running -> {Complete | Error}` exactly once.
//! Anomalies (duplicate starts, ends for unknown calls) are reported as
//! [`ToolTrackError`] for the caller to log; they never fail a turn.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ToolStatus::Complete | ToolStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolStatus::Pending => "pending",
            ToolStatus::Running => "running",
            ToolStatus::Complete => "complete",
            ToolStatus::Error => "error",
        }
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tool invocation within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub args: Value,
    pub status: ToolStatus,
    pub result: Option<Value>,
    /// Invocation index within the turn
    pub position: usize,
}

impl ToolCall {
    pub fn is_running(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolTrackError {
    /// `tool_start` for a call id already tracked in this turn
    DuplicateCall { call_id: String },
    /// `tool_end` for a call id that never started
    UnknownCall { call_id: String },
}

impl fmt::Display for ToolTrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolTrackError::DuplicateCall { call_id } => {
                write!(f, "tool call {call_id} already started")
            }
            ToolTrackError::UnknownCall { call_id } => {
                write!(f, "tool call {call_id} was never started")
            }
        }
    }
}

impl std::error::Error for ToolTrackError {}

/// Outcome of delivering a `tool_end`.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEnd {
    /// The call reached its terminal state now.
    Finished(ToolCall),
    /// The call was already terminal; nothing changed.
    AlreadyTerminal(ToolCall),
}

/// Tracks every tool call of one turn in invocation order.
#[derive(Debug, Clone, Default)]
pub struct ToolTracker {
    calls: Vec<ToolCall>,
}

impl ToolTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(
        &mut self,
        call_id: &str,
        name: &str,
        args: Value,
    ) -> Result<ToolCall, ToolTrackError> {
        if self.get(call_id).is_some() {
            return Err(ToolTrackError::DuplicateCall {
                call_id: call_id.to_string(),
            });
        }

        // Calls are only announced once the backend is executing them, so
        // `Pending` is never observed from the stream.
        let call = ToolCall {
            call_id: call_id.to_string(),
            name: name.to_string(),
            args,
            status: ToolStatus::Running,
            result: None,
            position: self.calls.len(),
        };
        self.calls.push(call.clone());
        Ok(call)
    }

    pub fn on_end(
        &mut self,
        call_id: &str,
        result: Value,
        is_error: bool,
    ) -> Result<ToolEnd, ToolTrackError> {
        let Some(call) = self.calls.iter_mut().find(|c| c.call_id == call_id) else {
            return Err(ToolTrackError::UnknownCall {
                call_id: call_id.to_string(),
            });
        };

        if call.status.is_terminal() {
            return Ok(ToolEnd::AlreadyTerminal(call.clone()));
        }

        call.status = if is_error {
            ToolStatus::Error
        } else {
            ToolStatus::Complete
        };
        call.result = Some(result);
        Ok(ToolEnd::Finished(call.clone()))
    }

    pub fn get(&self, call_id: &str) -> Option<&ToolCall> {
        self.calls.iter().find(|c| c.call_id == call_id)
    }

    /// Calls without a terminal state, in invocation order.
    pub fn running(&self) -> Vec<ToolCall> {
        self.calls.iter().filter(|c| c.is_running()).cloned().collect()
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_start_assigns_positions_in_order() {
        let mut tracker = ToolTracker::new();
        let a = tracker.on_start("c1", "search", json!({})).unwrap();
        let b = tracker.on_start("c2", "search", json!({})).unwrap();

        assert_eq!(a.position, 0);
        assert_eq!(b.position, 1);
        assert_eq!(a.status, ToolStatus::Running);
    }

    #[test]
    fn test_duplicate_start_is_rejected() {
        let mut tracker = ToolTracker::new();
        tracker.on_start("c1", "search", json!({})).unwrap();

        let err = tracker.on_start("c1", "search", json!({})).unwrap_err();
        assert_eq!(
            err,
            ToolTrackError::DuplicateCall {
                call_id: "c1".to_string()
            }
        );
        assert_eq!(tracker.calls().len(), 1);
    }

    #[test]
    fn test_end_for_unknown_call() {
        let mut tracker = ToolTracker::new();
        let err = tracker.on_end("ghost", json!(null), false).unwrap_err();
        assert!(matches!(err, ToolTrackError::UnknownCall { .. }));
    }

    #[test]
    fn test_second_end_is_noop() {
        let mut tracker = ToolTracker::new();
        tracker.on_start("c1", "crawl", json!({})).unwrap();

        let first = tracker.on_end("c1", json!({"pages": 3}), false).unwrap();
        assert!(matches!(first, ToolEnd::Finished(ref c) if c.status == ToolStatus::Complete));

        let second = tracker.on_end("c1", json!("late failure"), true).unwrap();
        let ToolEnd::AlreadyTerminal(call) = second else {
            panic!("expected AlreadyTerminal");
        };
        assert_eq!(call.status, ToolStatus::Complete);
        assert_eq!(call.result, Some(json!({"pages": 3})));
    }

    #[test]
    fn test_running_lists_unfinished_calls() {
        let mut tracker = ToolTracker::new();
        tracker.on_start("c1", "a", json!({})).unwrap();
        tracker.on_start("c2", "b", json!({})).unwrap();
        tracker.on_end("c1", json!(null), true).unwrap();

        let running = tracker.running();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].call_id, "c2");
        assert_eq!(tracker.get("c1").unwrap().status, ToolStatus::Error);
    }
}
