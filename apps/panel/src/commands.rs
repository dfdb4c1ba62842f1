//! Operator input parsed into panel commands.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCommand {
    Login { username: String, password: String },
    Trigger { source: String },
    Reset,
    Logout,
    Status,
    Refresh,
    Log,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ParseError(String);

pub const HELP: &str = "\
commands:
  login <username> <password>   sign in
  trigger [source]              start the fire protocol (source defaults to Unknown_Sensor)
  reset                         reset alarm and sprinkler
  status                        show the last known system status
  refresh                       fetch system status now
  log                           show the activity log
  logout                        sign out
  help                          show this text
  quit                          exit";

/// `Ok(None)` for a blank line.
pub fn parse(line: &str) -> Result<Option<PanelCommand>, ParseError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "login" => {
            let (Some(username), Some(password), None) = (words.next(), words.next(), words.next())
            else {
                return Err(ParseError("usage: login <username> <password>".into()));
            };
            PanelCommand::Login {
                username: username.to_string(),
                password: password.to_string(),
            }
        }
        "trigger" => PanelCommand::Trigger {
            source: words.collect::<Vec<_>>().join(" "),
        },
        "reset" => PanelCommand::Reset,
        "logout" => PanelCommand::Logout,
        "status" => PanelCommand::Status,
        "refresh" => PanelCommand::Refresh,
        "log" => PanelCommand::Log,
        "help" | "?" => PanelCommand::Help,
        "quit" | "exit" => PanelCommand::Quit,
        other => return Err(ParseError(format!("unknown command '{other}'; try 'help'"))),
    };
    Ok(Some(command))
}
