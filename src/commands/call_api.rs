use crate::call::controller::CallHandle;
use crate::call::state::CallSnapshot;
use crate::commands::{UserCommand, HELP};
use crate::error::CallError;
use crate::utils::format_duration;
use log::info;

/// Что делать консоли после команды
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue(Option<String>),
    Quit,
}

/// Выполняет одну команду пользователя над контроллером
pub async fn execute(handle: &CallHandle, command: UserCommand) -> Result<Outcome, CallError> {
    info!("execute {command:?}");
    match command {
        UserCommand::Call(remote) => handle.start_call(remote).await?,
        UserCommand::Accept => handle.accept_call().await?,
        UserCommand::Reject => handle.reject_call().await?,
        UserCommand::End => handle.end_call().await?,
        UserCommand::Dismiss => handle.dismiss().await?,
        UserCommand::Status => {
            return Ok(Outcome::Continue(Some(describe(&handle.snapshot()))));
        }
        UserCommand::Help => return Ok(Outcome::Continue(Some(HELP.to_owned()))),
        UserCommand::Quit => {
            handle.shutdown().await;
            return Ok(Outcome::Quit);
        }
    }
    Ok(Outcome::Continue(None))
}

/// Одна строка для консоли
pub fn describe(snapshot: &CallSnapshot) -> String {
    let mut line = snapshot.state.to_string();
    if let Some(remote) = &snapshot.remote {
        line.push_str(&format!(" with {remote}"));
    }
    if snapshot.state == crate::call::state::CallState::Connected {
        line.push_str(&format!(" [{}]", format_duration(snapshot.duration_secs)));
    }
    if let Some(err) = &snapshot.last_error {
        line.push_str(&format!(" ({err})"));
    }
    line
}
