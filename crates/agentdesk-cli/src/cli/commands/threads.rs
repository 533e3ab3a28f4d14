//! Thread command handlers.

use agentdesk_core::api::ThreadApi;
use agentdesk_core::config::Config;
use anyhow::{Context, Result};

use crate::cli::{build_pipeline, render, thread_api};

pub async fn list(config: &Config) -> Result<()> {
    let api = thread_api(config)?;
    let threads = api.list_threads().await.context("list threads")?;

    if threads.is_empty() {
        println!("No threads found.");
        return Ok(());
    }

    for thread in threads {
        let title = thread.title.as_deref().unwrap_or("(untitled)");
        let updated = thread.updated_at.map_or_else(
            || "unknown".to_string(),
            |at| at.format("%Y-%m-%d %H:%M").to_string(),
        );
        println!(
            "{}  {}  {}  {} messages",
            title, thread.thread_id, updated, thread.message_count
        );
    }
    Ok(())
}

pub async fn show(config: &Config, id: &str) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let messages = pipeline
        .load_thread(id)
        .await
        .with_context(|| format!("load thread '{id}'"))?;

    if messages.is_empty() {
        println!("Thread '{id}' is empty or not found.");
    } else {
        print!("{}", render::format_transcript(&messages));
    }
    Ok(())
}
