//! Queue command handler.

use agentdesk_core::config::Config;
use anyhow::Result;

use crate::cli::build_pipeline;

pub async fn run(config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let pending = pipeline.pending().await;

    if pending.is_empty() {
        println!("No pending messages.");
        return Ok(());
    }

    for entry in pending {
        let next = entry
            .next_attempt_at
            .map_or_else(|| "now".to_string(), |at| at.format("%Y-%m-%d %H:%M:%S").to_string());
        println!(
            "{}  {}  {}  attempts={}  next={}",
            entry.local_id,
            entry.thread_id,
            entry.role.as_str(),
            entry.attempts,
            next
        );
        if let Some(error) = entry.last_error {
            println!("    last error: {error}");
        }
    }
    Ok(())
}
