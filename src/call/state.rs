use crate::session::Role;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Состояние звонка
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum CallState {
    #[default]
    Idle,
    Incoming,
    Connecting,
    Connected,
    Ended,
    Error,
}

impl CallState {
    /// В этих состояниях существует ровно одна сессия
    pub fn has_session(self) -> bool {
        matches!(
            self,
            CallState::Incoming | CallState::Connecting | CallState::Connected
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, CallState::Ended | CallState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Incoming => "incoming",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
            CallState::Error => "error",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// То, что показывается пользователю
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    pub state: CallState,
    pub remote: Option<String>,
    pub role: Option<Role>,
    pub duration_secs: u64,
    pub last_error: Option<String>,
    pub remote_track: Option<String>,
    /// Когда создана сессия (исходящий звонок или входящий offer)
    pub created_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
}
