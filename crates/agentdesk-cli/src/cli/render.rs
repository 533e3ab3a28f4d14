//! Plain-text transcript output.

use std::fmt::Write as _;

use agentdesk_core::transcript::{ChatMessage, Role};

/// Formats one message: user turns as `> text`, assistant turns as one
/// `[speaker] text` block per segment with its tool calls underneath.
pub fn format_message(message: &ChatMessage) -> String {
    let mut out = String::new();
    match message.role {
        Role::User => {
            let _ = writeln!(out, "> {}", message.content);
        }
        Role::Assistant => {
            for segment in &message.segments {
                let text = segment.text.trim();
                if text.is_empty() {
                    let _ = writeln!(out, "[{}]", segment.speaker);
                } else {
                    let _ = writeln!(out, "[{}] {}", segment.speaker, text);
                }
                for call in &segment.tools {
                    let _ = writeln!(out, "  ⚙ {} ({})", call.name, call.status);
                }
            }
        }
    }
    out
}

pub fn format_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(format_message)
        .collect::<Vec<_>>()
        .join("\n")
}
