use crate::call::state::CallState;
use thiserror::Error;

/// Ошибки звонка, которые видит вызывающий команду код
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Микрофон недоступен или доступ запрещён
    #[error("microphone unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("no active call session: {0}")]
    NoActiveSession(String),

    /// Транспорт отверг создание или применение description
    #[error("negotiation failed: {0}")]
    NegotiationFailure(String),

    #[error("transport lost: {0}")]
    TransportLost(String),

    #[error("relay failure: {0}")]
    Relay(#[from] RelayError),

    #[error("command not allowed while {0}")]
    InvalidState(CallState),

    #[error("cannot call own identity {0}")]
    InvalidTarget(String),

    #[error("call controller stopped")]
    ControllerStopped,
}

impl CallError {
    /// Завершает ли ошибка текущую сессию
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            CallError::InvalidState(_) | CallError::InvalidTarget(_) | CallError::ControllerStopped
        )
    }

    pub fn negotiation(err: impl std::fmt::Display) -> Self {
        CallError::NegotiationFailure(err.to_string())
    }
}

/// Ошибки канала до relay
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("relay channel is not connected")]
    NotConnected,

    #[error("relay channel closed")]
    Closed,

    #[error("relay frame codec error: {0}")]
    Codec(String),

    #[error("relay connect failed: {0}")]
    Connect(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Codec(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
