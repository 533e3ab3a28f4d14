//! Write-ahead queue of messages awaiting backend acknowledgement.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::store::KeyValueStore;
use super::threads::is_provisional;
use crate::config::OutboundConfig;
use crate::transcript::Role;

const QUEUE_KEY: &str = "queue";

/// A message that has been written locally but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundQueueEntry {
    pub local_id: String,
    pub thread_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls_summary: Option<Value>,
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub agent_slug: String,
}

impl OutboundQueueEntry {
    /// Held entries wait for their thread to be reconciled.
    pub fn is_held(&self) -> bool {
        is_provisional(&self.thread_id)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_none_or(|at| at <= now)
    }
}

/// Exponential retry delay: `base * 2^(attempts - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn from_config(config: &OutboundConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_secs(config.backoff_max_secs),
        }
    }

    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&OutboundConfig::default())
    }
}

/// Queue contents mirrored to a [`KeyValueStore`].
///
/// Every mutation is written through. When a write fails the in-memory state
/// is kept, the queue is marked dirty and the next mutation or
/// [`OutboundQueue::retry_persist`] writes it again. Entries are never
/// dropped except by [`OutboundQueue::remove`].
pub struct OutboundQueue {
    store: Arc<dyn KeyValueStore>,
    entries: Vec<OutboundQueueEntry>,
    backoff: Backoff,
    dirty: bool,
}

impl OutboundQueue {
    pub fn load(store: Arc<dyn KeyValueStore>, backoff: Backoff) -> Result<Self> {
        let entries = match store.get(QUEUE_KEY)? {
            Some(raw) => serde_json::from_str(&raw).context("Failed to parse outbound queue")?,
            None => Vec::new(),
        };
        Ok(Self {
            store,
            entries,
            backoff,
            dirty: false,
        })
    }

    /// Entries in creation order.
    pub fn entries(&self) -> &[OutboundQueueEntry] {
        &self.entries
    }

    pub fn get(&self, local_id: &str) -> Option<&OutboundQueueEntry> {
        self.entries.iter().find(|e| e.local_id == local_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Appends an entry. Returns whether it reached durable storage.
    pub fn push(&mut self, entry: OutboundQueueEntry) -> bool {
        self.entries.push(entry);
        self.write_through()
    }

    /// Removes an acknowledged entry.
    pub fn remove(&mut self, local_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.local_id != local_id);
        if self.entries.len() == before {
            return false;
        }
        self.write_through();
        true
    }

    /// Records a failed delivery and schedules the next attempt.
    pub fn record_failure(&mut self, local_id: &str, error: &str, now: DateTime<Utc>) {
        let backoff = self.backoff;
        let Some(entry) = self.entries.iter_mut().find(|e| e.local_id == local_id) else {
            return;
        };
        entry.attempts = entry.attempts.saturating_add(1);
        let delay = TimeDelta::from_std(backoff.delay(entry.attempts)).unwrap_or(TimeDelta::zero());
        entry.next_attempt_at = Some(now + delay);
        entry.last_error = Some(error.to_string());
        self.write_through();
    }

    /// Points every entry of `from` at `to`. Returns how many were changed.
    pub fn rewrite_thread(&mut self, from: &str, to: &str) -> usize {
        let mut changed = 0;
        for entry in &mut self.entries {
            if entry.thread_id == from {
                entry.thread_id = to.to_string();
                changed += 1;
            }
        }
        if changed > 0 {
            self.write_through();
        }
        changed
    }

    /// Writes the queue again if an earlier write failed.
    pub fn retry_persist(&mut self) -> bool {
        if !self.dirty {
            return true;
        }
        self.write_through()
    }

    fn write_through(&mut self) -> bool {
        match self.persist() {
            Ok(()) => {
                self.dirty = false;
                true
            }
            Err(err) => {
                tracing::warn!("Outbound queue not persisted, will retry: {err:#}");
                self.dirty = true;
                false
            }
        }
    }

    fn persist(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.entries).context("Failed to serialize queue")?;
        self.store.set(QUEUE_KEY, &raw)
    }
}
