//! Orchestrator-to-specialist handoff tracking.

use serde::{Deserialize, Serialize};

use super::turn::Segment;
use crate::agent::{AgentId, Speaker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Active,
    /// Another delegation started before this one was completed
    Superseded,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub to_agent: AgentId,
    pub status: DelegationStatus,
}

/// Who a tool event belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribution {
    Agent(AgentId),
    Unattributed,
}

impl Attribution {
    pub fn speaker(&self) -> Speaker {
        match self {
            Attribution::Agent(agent) => Speaker::from(agent),
            Attribution::Unattributed => Speaker::Tools,
        }
    }
}

/// Delegation records of one turn. At most one record is `Active`.
#[derive(Debug, Clone, Default)]
pub struct DelegationTracker {
    records: Vec<Delegation>,
    current_agent: Option<AgentId>,
}

impl DelegationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a delegation to `to_agent`.
    ///
    /// Re-delegating to the agent that is already active returns the existing
    /// record and only makes that agent current again. Any other active delegation is marked `Superseded`. Handing
    /// off to the orchestrator is an agent switch and opens no record, in
    /// which case `None` is returned.
    pub fn on_delegate(&mut self, to_agent: AgentId) -> Option<Delegation> {
        if to_agent.is_orchestrator() {
            self.on_agent_switch(to_agent);
            return None;
        }

        if let Some(active) = self.active().filter(|d| d.to_agent == to_agent).cloned() {
            self.current_agent = Some(to_agent);
            return Some(active);
        }

        for record in &mut self.records {
            if record.status == DelegationStatus::Active {
                record.status = DelegationStatus::Superseded;
            }
        }

        let record = Delegation {
            to_agent: to_agent.clone(),
            status: DelegationStatus::Active,
        };
        self.records.push(record.clone());
        self.current_agent = Some(to_agent);
        Some(record)
    }

    /// Records a change of speaking agent.
    ///
    /// Switching back to the orchestrator completes every delegation,
    /// superseded ones included.
    pub fn on_agent_switch(&mut self, agent: AgentId) {
        if agent.is_orchestrator() {
            for record in &mut self.records {
                record.status = DelegationStatus::Complete;
            }
        }
        self.current_agent = Some(agent);
    }

    /// Attributes a tool event.
    ///
    /// An explicit agent tag always wins. Otherwise the first of these that
    /// yields an agent is used:
    /// (a) the active delegation's target,
    /// (b) the most recent delegation's target whatever its status,
    /// (c) the turn's active agent unless it is the orchestrator,
    /// (d) the owner of the most recent specialist segment.
    ///
    /// When two specialists interleave without an `agent_switch` this can
    /// pick the wrong one. Only explicit per-event tags avoid that.
    pub fn resolve_specialist(
        &self,
        explicit: Option<&AgentId>,
        turn_active_agent: Option<&AgentId>,
        segments: &[Segment],
    ) -> Attribution {
        if let Some(agent) = explicit {
            return Attribution::Agent(agent.clone());
        }

        let resolved = self
            .active()
            .or_else(|| self.records.last())
            .map(|d| d.to_agent.clone())
            .or_else(|| turn_active_agent.filter(|a| !a.is_orchestrator()).cloned())
            .or_else(|| {
                segments.iter().rev().find_map(|s| match &s.speaker {
                    Speaker::Specialist { id } => Some(AgentId::specialist(id.clone())),
                    Speaker::Orchestrator | Speaker::Tools => None,
                })
            });

        match resolved {
            Some(agent) => Attribution::Agent(agent),
            None => Attribution::Unattributed,
        }
    }

    pub fn active(&self) -> Option<&Delegation> {
        self.records
            .iter()
            .find(|d| d.status == DelegationStatus::Active)
    }

    pub fn records(&self) -> &[Delegation] {
        &self.records
    }

    pub fn current_agent(&self) -> Option<&AgentId> {
        self.current_agent.as_ref()
    }
}
