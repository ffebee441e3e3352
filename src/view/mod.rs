use crate::models::{ Message, MessageId };
use crate::sync::SyncView;
use chrono::Local;
use std::collections::HashSet;
use std::io::{ self, Write };

pub const EMPTY_PLACEHOLDER: &str = "No messages yet. Start the conversation!";

pub fn format_message(message: &Message) -> String {
    let time = message.created_at
        .map(|at| at.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    let badge = if message.is_author_privileged { " [HOST]" } else { "" };
    format!("[{}] {}{}: {}", time, message.author_name, badge, message.content)
}

/// Prints snapshots as a scrolling log: each message once, plus error banner
/// transitions.
#[derive(Default)]
pub struct TerminalView {
    shown: HashSet<MessageId>,
    placeholder_shown: bool,
    last_error: Option<String>,
}

impl TerminalView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines produced by moving from the previously rendered state to `view`.
    pub fn render(&mut self, view: &SyncView) -> Vec<String> {
        let mut lines = Vec::new();

        let empty = !view.loading && view.messages.is_empty() && self.shown.is_empty();
        if empty && !self.placeholder_shown {
            lines.push(EMPTY_PLACEHOLDER.to_string());
            self.placeholder_shown = true;
        }

        for message in view.messages.iter() {
            if self.shown.insert(message.id.clone()) {
                lines.push(format_message(message));
            }
        }

        if view.error != self.last_error {
            if let Some(error) = &view.error {
                lines.push(format!("✗ {}", error));
            }
            self.last_error = view.error.clone();
        }

        lines
    }

    pub fn print(&mut self, view: &SyncView) -> io::Result<()> {
        let lines = self.render(view);
        if lines.is_empty() {
            return Ok(());
        }
        let mut out = io::stdout().lock();
        for line in lines {
            writeln!(out, "{}", line)?;
        }
        out.flush()
    }
}
