//! Speaker identity for multi-agent turns.
//!
//! Agent identity arrives on the wire as a bare string. It is parsed once at
//! the edge into a closed union so the reducer never compares raw strings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire name of the top-level agent.
pub const ORCHESTRATOR: &str = "orchestrator";

/// Identity of an agent taking part in a turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentId {
    /// The top-level agent that may delegate to specialists.
    Orchestrator,
    /// A delegated sub-agent, identified by its slug.
    Specialist { id: String },
}

impl AgentId {
    pub fn specialist(id: impl Into<String>) -> Self {
        AgentId::Specialist { id: id.into() }
    }

    /// Parses a wire agent name.
    ///
    /// Blank names carry no attribution and return `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.eq_ignore_ascii_case(ORCHESTRATOR) {
            Some(AgentId::Orchestrator)
        } else {
            Some(AgentId::specialist(trimmed))
        }
    }

    /// Parses an optional wire agent name.
    pub fn parse_opt(raw: Option<&str>) -> Option<Self> {
        raw.and_then(Self::parse)
    }

    pub fn is_orchestrator(&self) -> bool {
        matches!(self, AgentId::Orchestrator)
    }

    /// Wire/display name of the agent.
    pub fn as_str(&self) -> &str {
        match self {
            AgentId::Orchestrator => ORCHESTRATOR,
            AgentId::Specialist { id } => id,
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of a transcript segment.
///
/// `Tools` is the synthetic bucket for tool activity that could not be
/// attributed to any agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Speaker {
    Orchestrator,
    Specialist { id: String },
    Tools,
}

impl Speaker {
    pub fn label(&self) -> &str {
        match self {
            Speaker::Orchestrator => ORCHESTRATOR,
            Speaker::Specialist { id } => id,
            Speaker::Tools => "tools",
        }
    }
}

impl From<AgentId> for Speaker {
    fn from(agent: AgentId) -> Self {
        match agent {
            AgentId::Orchestrator => Speaker::Orchestrator,
            AgentId::Specialist { id } => Speaker::Specialist { id },
        }
    }
}

impl From<&AgentId> for Speaker {
    fn from(agent: &AgentId) -> Self {
        Speaker::from(agent.clone())
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_orchestrator_is_case_insensitive() {
        assert_eq!(AgentId::parse("Orchestrator"), Some(AgentId::Orchestrator));
        assert_eq!(AgentId::parse(" orchestrator "), Some(AgentId::Orchestrator));
    }

    #[test]
    fn test_parse_blank_is_none() {
        assert_eq!(AgentId::parse(""), None);
        assert_eq!(AgentId::parse("   "), None);
        assert_eq!(AgentId::parse_opt(None), None);
    }

    #[test]
    fn test_parse_specialist() {
        assert_eq!(
            AgentId::parse("seo_tech"),
            Some(AgentId::specialist("seo_tech"))
        );
    }

    #[test]
    fn test_speaker_from_agent() {
        let speaker = Speaker::from(AgentId::specialist("seo_tech"));
        assert_eq!(speaker.label(), "seo_tech");
        assert_ne!(speaker, Speaker::from(AgentId::specialist("copywriter")));
        assert_eq!(Speaker::from(&AgentId::Orchestrator), Speaker::Orchestrator);
        assert_eq!(Speaker::Tools.label(), "tools");
    }

    #[test]
    fn test_agent_id_serializes_as_tagged_union() {
        let json = serde_json::to_value(AgentId::specialist("seo_tech")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "specialist", "id": "seo_tech"}));
        let json = serde_json::to_value(AgentId::Orchestrator).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "orchestrator"}));
    }
}
