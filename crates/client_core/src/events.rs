//! Notifications the controller publishes to the presentation layer.

use std::fmt;

use shared::domain::{Severity, SystemStatus};
use thiserror::Error;

use crate::activity::LogEntry;

/// Operator actions that hold the busy flag while their request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Login,
    TriggerProtocol,
    Reset,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Login, Action::TriggerProtocol, Action::Reset];

    pub(crate) fn index(self) -> usize {
        match self {
            Action::Login => 0,
            Action::TriggerProtocol => 1,
            Action::Reset => 2,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Login => "login",
            Action::TriggerProtocol => "trigger_protocol",
            Action::Reset => "reset",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionView {
    LoggedIn { username: String },
    LoggedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    SessionChanged(SessionView),
    StatusUpdated(SystemStatus),
    LogEntry(LogEntry),
    Toast { message: String, severity: Severity },
    BusyChanged { action: Action, busy: bool },
}

/// Calls rejected before any request is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("already signed in as {username}")]
    AlreadyLoggedIn { username: String },
    #[error("not signed in")]
    NotLoggedIn,
    #[error("{0} is already in progress")]
    Busy(Action),
}
