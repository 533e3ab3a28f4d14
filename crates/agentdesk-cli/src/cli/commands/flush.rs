//! Flush command handler.

use agentdesk_core::config::Config;
use anyhow::Result;

use crate::cli::build_pipeline;

pub async fn run(config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let report = pipeline.flush_queue().await;

    println!(
        "Delivered {}, pending {}",
        report.delivered, report.remaining
    );
    if report.held > 0 {
        println!(
            "{} message(s) waiting for the backend to assign a thread id",
            report.held
        );
    }
    if report.failed > 0 {
        eprintln!("{} message(s) failed and will be retried", report.failed);
    }
    Ok(())
}
