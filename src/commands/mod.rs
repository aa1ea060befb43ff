pub mod call_api;

use std::str::FromStr;

/// Строка, которую пользователь вводит в консоли
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Call(String),
    Accept,
    Reject,
    End,
    Dismiss,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("`call` needs a remote identity")]
    MissingTarget,
    #[error("unknown command `{0}`")]
    Unknown(String),
}

impl FromStr for UserCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ParseCommandError::Empty);
        };

        match verb.to_ascii_lowercase().as_str() {
            "call" => words
                .next()
                .map(|remote| UserCommand::Call(remote.to_owned()))
                .ok_or(ParseCommandError::MissingTarget),
            "accept" | "a" => Ok(UserCommand::Accept),
            "reject" | "r" => Ok(UserCommand::Reject),
            "end" | "hangup" => Ok(UserCommand::End),
            "dismiss" | "ok" => Ok(UserCommand::Dismiss),
            "status" | "s" => Ok(UserCommand::Status),
            "help" | "?" => Ok(UserCommand::Help),
            "quit" | "exit" | "q" => Ok(UserCommand::Quit),
            other => Err(ParseCommandError::Unknown(other.to_owned())),
        }
    }
}

pub const HELP: &str = "commands: call <id> | accept | reject | end | dismiss | status | quit";
