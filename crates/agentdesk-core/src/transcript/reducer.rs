//! Folds stream events into one assistant turn.
//!
//! The reducer owns the turn plus its tool and delegation trackers. Every
//! mutation keeps `content == concat(segments[*].text)`; the only way a
//! segment's text grows is a token whose speaker matches the last segment.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::delegation::{Attribution, DelegationTracker};
use super::tools::{ToolCall, ToolEnd, ToolTracker};
use super::turn::{ChatMessage, ERROR_FALLBACK_TEXT, Segment, ToolData};
use crate::agent::{AgentId, Speaker};
use crate::stream::{ErrorReason, StreamEvent};

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    Failed { message: String, reason: ErrorReason },
}

impl TurnOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, TurnOutcome::Failed { .. })
    }
}

/// Summary produced when a turn is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// Tool calls that never reached a terminal state
    pub unfinished_tools: Vec<ToolCall>,
    /// Canonical thread id announced by the stream, if any
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TurnReducer {
    turn: ChatMessage,
    tools: ToolTracker,
    delegations: DelegationTracker,
    canonical_thread_id: Option<String>,
    report: Option<TurnReport>,
}

impl TurnReducer {
    pub fn new(turn: ChatMessage) -> Self {
        Self {
            turn,
            tools: ToolTracker::new(),
            delegations: DelegationTracker::new(),
            canonical_thread_id: None,
            report: None,
        }
    }

    pub fn turn(&self) -> &ChatMessage {
        &self.turn
    }

    pub fn into_turn(self) -> ChatMessage {
        self.turn
    }

    pub fn turn_mut(&mut self) -> &mut ChatMessage {
        &mut self.turn
    }

    pub fn is_finalized(&self) -> bool {
        self.report.is_some()
    }

    /// Applies one event. Returns the report when the event is terminal.
    pub fn apply(&mut self, event: StreamEvent) -> Option<TurnReport> {
        if self.is_finalized() {
            tracing::debug!(turn = %self.turn.id, ?event, "ignoring event after finalize");
            return None;
        }

        match event {
            StreamEvent::Token { text, agent } => self.apply_token(&text, agent),
            StreamEvent::ToolStart {
                call_id,
                name,
                args,
                agent,
            } => self.apply_tool_start(&call_id, &name, args, agent),
            StreamEvent::ToolEnd {
                call_id,
                name,
                result,
                is_error,
            } => self.apply_tool_end(&call_id, name.as_deref(), result, is_error),
            StreamEvent::ToolData {
                tool,
                data,
                category,
                agent,
            } => self.apply_tool_data(ToolData {
                tool,
                data,
                category,
                agent,
            }),
            StreamEvent::Delegate { to_agent } => self.apply_delegate(to_agent),
            StreamEvent::AgentSwitch { agent } => self.apply_agent_switch(agent),
            StreamEvent::ThreadId { value } => self.apply_thread_id(value),
            StreamEvent::Error { message, reason } => {
                return Some(self.finalize(TurnOutcome::Failed { message, reason }));
            }
            StreamEvent::End => return Some(self.finalize(TurnOutcome::Completed)),
        }
        None
    }

    pub fn apply_token(&mut self, text: &str, agent: Option<AgentId>) {
        if self.is_finalized() {
            return;
        }

        let current = agent
            .or_else(|| self.turn.active_agent.clone())
            .unwrap_or(AgentId::Orchestrator);
        let speaker = Speaker::from(&current);
        self.turn.active_agent = Some(current);

        if text.is_empty() {
            return;
        }

        match self.turn.segments.last_mut() {
            Some(last) if last.speaker == speaker => last.text.push_str(text),
            _ => self.turn.segments.push(Segment::new(speaker, text)),
        }
        self.turn.content.push_str(text);
    }

    pub fn apply_tool_start(
        &mut self,
        call_id: &str,
        name: &str,
        args: Value,
        agent: Option<AgentId>,
    ) {
        if self.is_finalized() {
            return;
        }

        let attribution = self.delegations.resolve_specialist(
            agent.as_ref(),
            self.turn.active_agent.as_ref(),
            &self.turn.segments,
        );
        if attribution == Attribution::Unattributed {
            tracing::debug!(call_id, tool = name, "tool call not attributable, using tools bucket");
        }

        let call = match self.tools.on_start(call_id, name, args) {
            Ok(call) => call,
            Err(err) => {
                tracing::warn!(turn = %self.turn.id, "{err}");
                return;
            }
        };

        let speaker = attribution.speaker();
        let index = match self.turn.last_segment_of(&speaker) {
            Some(index) => index,
            None => {
                self.turn.segments.push(Segment::new(speaker, ""));
                self.turn.segments.len() - 1
            }
        };
        self.turn.segments[index].tools.push(call.clone());
        self.turn.tool_calls.push(call);
    }

    /// Ends a tool call.
    ///
    /// `call_id` is the primary key. When it is unknown, the most recent
    /// running call named `name` (newest segment first) is ended instead.
    pub fn apply_tool_end(
        &mut self,
        call_id: &str,
        name: Option<&str>,
        result: Value,
        is_error: bool,
    ) {
        if self.is_finalized() {
            return;
        }

        let target = if self.tools.get(call_id).is_some() {
            call_id.to_string()
        } else if let Some(found) = name.and_then(|name| self.running_call_named(name)) {
            tracing::debug!(call_id, resolved = %found, "matched tool end by name");
            found
        } else {
            call_id.to_string()
        };

        match self.tools.on_end(&target, result, is_error) {
            Ok(ToolEnd::Finished(call)) => self.store_tool_call(&call),
            Ok(ToolEnd::AlreadyTerminal(_)) => {
                tracing::debug!(call_id = %target, "duplicate tool end ignored");
            }
            Err(err) => tracing::warn!(turn = %self.turn.id, "{err}"),
        }
    }

    pub fn apply_tool_data(&mut self, data: ToolData) {
        if self.is_finalized() {
            return;
        }

        let key = data.dedup_key();
        if self.turn.tool_data.iter().any(|d| d.dedup_key() == key) {
            tracing::debug!(tool = %data.tool, "duplicate tool data skipped");
            return;
        }
        self.turn.tool_data.push(data);
    }

    pub fn apply_delegate(&mut self, to_agent: AgentId) {
        if self.is_finalized() {
            return;
        }

        if self.delegations.on_delegate(to_agent).is_some() {
            self.ensure_current_segment();
        }
        self.sync_delegations();
    }

    pub fn apply_agent_switch(&mut self, agent: AgentId) {
        if self.is_finalized() {
            return;
        }

        let specialist = !agent.is_orchestrator();
        self.delegations.on_agent_switch(agent);
        if specialist {
            self.ensure_current_segment();
        }
        self.sync_delegations();
    }

    pub fn apply_thread_id(&mut self, value: String) {
        if self.is_finalized() {
            return;
        }

        self.turn.thread_id = Some(value.clone());
        self.canonical_thread_id = Some(value);
    }

    /// Freezes the turn. Calling it again returns the first report.
    pub fn finalize(&mut self, outcome: TurnOutcome) -> TurnReport {
        if let Some(report) = &self.report {
            tracing::debug!(turn = %self.turn.id, "turn already finalized");
            return report.clone();
        }

        self.turn.is_streaming = false;
        if outcome.is_error() && self.turn.content.is_empty() {
            self.turn
                .segments
                .push(Segment::new(Speaker::Orchestrator, ERROR_FALLBACK_TEXT));
            self.turn.content.push_str(ERROR_FALLBACK_TEXT);
        }

        let report = TurnReport {
            outcome,
            unfinished_tools: self.tools.running(),
            thread_id: self.canonical_thread_id.clone(),
        };
        if !report.unfinished_tools.is_empty() {
            tracing::warn!(
                turn = %self.turn.id,
                count = report.unfinished_tools.len(),
                "turn ended with unfinished tool calls"
            );
        }
        self.report = Some(report.clone());
        report
    }

    fn running_call_named(&self, name: &str) -> Option<String> {
        self.turn.segments.iter().rev().find_map(|segment| {
            segment
                .tools
                .iter()
                .rev()
                .find(|c| c.name == name && c.is_running())
                .map(|c| c.call_id.clone())
        })
    }

    fn store_tool_call(&mut self, call: &ToolCall) {
        for segment in &mut self.turn.segments {
            for slot in &mut segment.tools {
                if slot.call_id == call.call_id {
                    *slot = call.clone();
                }
            }
        }
        for slot in &mut self.turn.tool_calls {
            if slot.call_id == call.call_id {
                *slot = call.clone();
            }
        }
    }

    /// Makes sure the newly active agent owns the last segment so tool
    /// events have somewhere to attach.
    fn ensure_current_segment(&mut self) {
        let Some(agent) = self.delegations.current_agent().cloned() else {
            return;
        };
        let speaker = Speaker::from(&agent);
        if self.turn.segments.last().map(|s| &s.speaker) != Some(&speaker) {
            self.turn.segments.push(Segment::new(speaker, ""));
        }
        self.turn.active_agent = Some(agent);
    }

    fn sync_delegations(&mut self) {
        self.turn.delegations = self.delegations.records().to_vec();
        if let Some(agent) = self.delegations.current_agent() {
            self.turn.active_agent = Some(agent.clone());
        }
    }
}
