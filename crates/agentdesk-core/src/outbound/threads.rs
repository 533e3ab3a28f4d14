//! Thread identity: provisional ids and their canonical replacements.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::store::KeyValueStore;

/// Prefix of locally generated thread ids.
pub const PROVISIONAL_PREFIX: &str = "local-";

const ALIASES_KEY: &str = "thread_aliases";

/// Generates a provisional thread id.
pub fn new_provisional_id() -> String {
    format!("{PROVISIONAL_PREFIX}{}", uuid::Uuid::new_v4())
}

/// Whether `thread_id` was generated locally and is not yet known to the backend.
pub fn is_provisional(thread_id: &str) -> bool {
    thread_id.starts_with(PROVISIONAL_PREFIX)
}

/// Provisional -> canonical id table, persisted next to the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadAliases {
    aliases: HashMap<String, String>,
}

impl ThreadAliases {
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        match store.get(ALIASES_KEY)? {
            Some(raw) => serde_json::from_str(&raw).context("Failed to parse thread aliases"),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        let raw = serde_json::to_string(self).context("Failed to serialize thread aliases")?;
        store.set(ALIASES_KEY, &raw)
    }

    pub fn record(&mut self, provisional: &str, canonical: &str) {
        // Earlier aliases that pointed at `provisional` now point at `canonical`.
        for target in self.aliases.values_mut() {
            if target == provisional {
                *target = canonical.to_string();
            }
        }
        self.aliases
            .insert(provisional.to_string(), canonical.to_string());
    }

    /// Returns the canonical id for `thread_id`, or `thread_id` itself.
    pub fn resolve(&self, thread_id: &str) -> String {
        self.aliases
            .get(thread_id)
            .cloned()
            .unwrap_or_else(|| thread_id.to_string())
    }
}
