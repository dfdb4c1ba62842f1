use std::fmt;

use serde::{Deserialize, Serialize};

/// Authenticated identity held by the client: the bearer token handed out by
/// the login endpoint and the username the server echoed back with it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub username: String,
}

impl Session {
    pub fn new(token: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            username: username.into(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("username", &self.username)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemState {
    #[default]
    Ready,
    /// Anything the server reports other than "ready" counts as active.
    #[serde(other)]
    Active,
}

impl SubsystemState {
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

impl fmt::Display for SubsystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::Active => f.write_str("active"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemStatus {
    pub alarm: SubsystemState,
    pub sprinkler: SubsystemState,
}

impl SystemStatus {
    /// Applies a partial report on top of `self`. Subsystems missing from the
    /// report keep their previous state.
    pub fn merged(self, alarm: Option<SubsystemState>, sprinkler: Option<SubsystemState>) -> Self {
        Self {
            alarm: alarm.unwrap_or(self.alarm),
            sprinkler: sprinkler.unwrap_or(self.sprinkler),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}
