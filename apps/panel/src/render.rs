//! Turns controller events into terminal lines.

use client_core::{ControllerEvent, LogEntry, SessionView};
use shared::domain::SystemStatus;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

pub fn describe(event: &ControllerEvent) -> Option<String> {
    let line = match event {
        ControllerEvent::SessionChanged(SessionView::LoggedIn { username }) => {
            format!("[session] signed in as {username}")
        }
        ControllerEvent::SessionChanged(SessionView::LoggedOut) => "[session] signed out".into(),
        ControllerEvent::StatusUpdated(status) => format!("[status] {}", status_line(status)),
        ControllerEvent::LogEntry(entry) => format!("[log] {}", log_line(entry)),
        ControllerEvent::Toast { message, severity } => format!("[{severity}] {message}"),
        ControllerEvent::BusyChanged { action, busy: true } => format!("[busy] {action} in progress"),
        ControllerEvent::BusyChanged { busy: false, .. } => return None,
    };
    Some(line)
}

pub fn status_line(status: &SystemStatus) -> String {
    format!("alarm={} sprinkler={}", status.alarm, status.sprinkler)
}

pub fn log_line(entry: &LogEntry) -> String {
    format!(
        "{} {:<7} {}",
        entry.at.format("%H:%M:%S"),
        entry.severity.to_string(),
        entry.message
    )
}

/// Prints every event until the controller goes away.
pub async fn run(mut events: broadcast::Receiver<ControllerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = describe(&event) {
                    println!("{line}");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Prints a full activity log dump, newest first.
pub fn print_activity(entries: &[LogEntry]) {
    if entries.is_empty() {
        println!("(activity log is empty)");
        return;
    }
    for entry in entries {
        println!("  {}", log_line(entry));
    }
}
