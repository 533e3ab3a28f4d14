//! Send command handler.

use agentdesk_core::auth::{EnvToken, require_token};
use agentdesk_core::config::Config;
use agentdesk_core::outbound::TurnRequest;
use agentdesk_core::transcript::TurnOutcome;
use anyhow::{Context, Result};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::cli::{build_pipeline, render};

pub struct SendOptions<'a> {
    pub config: &'a Config,
    pub message: String,
    pub thread: Option<String>,
    pub agent: Option<String>,
    pub json: bool,
}

pub async fn run(opts: SendOptions<'_>) -> Result<()> {
    require_token(&EnvToken::default())?;

    let pipeline = build_pipeline(opts.config)?;

    // Messages left over from earlier runs go out before the new one.
    let leftover = pipeline.flush_queue().await;
    if leftover.delivered > 0 {
        tracing::info!(delivered = leftover.delivered, "delivered queued messages");
    }

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = pipeline
        .run_turn(TurnRequest {
            thread_id: opts.thread,
            message: opts.message,
            agent_slug: opts.agent,
            cancel,
        })
        .await;
    ctrl_c.abort();
    let turn = result.context("send message")?;

    if opts.json {
        let out = json!({
            "thread_id": turn.thread_id,
            "turn": turn.assistant,
            "report": turn.report,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print!("{}", render::format_message(&turn.assistant));
        println!();
        println!("thread: {}", turn.thread_id);
    }

    if let TurnOutcome::Failed { message, reason } = &turn.report.outcome {
        eprintln!("Stream ended with a {reason} error: {message}");
        if reason.is_retryable() {
            eprintln!(
                "This error is transient; retry with `agentdesk send --thread {}`.",
                turn.thread_id
            );
        }
    }
    if !turn.report.unfinished_tools.is_empty() {
        eprintln!(
            "{} tool call(s) did not finish",
            turn.report.unfinished_tools.len()
        );
    }

    let pending = pipeline.pending().await.len();
    if pending > 0 {
        eprintln!("{pending} message(s) queued for delivery; run `agentdesk flush` to retry.");
    }
    Ok(())
}
