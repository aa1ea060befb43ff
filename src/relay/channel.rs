use crate::error::RelayError;
use crate::relay::types::RelayMessage;
use async_trait::async_trait;

/// Что приходит из канала relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Канал (пере)подключён; регистрация должна быть отправлена заново
    Connected,
    Disconnected,
    /// Сырой текстовый кадр, разбирает его роутер
    Message(String),
}

/// Канал публикации сообщений адресату через relay
#[async_trait]
pub trait RelayChannel: Send + Sync {
    async fn send(&self, message: RelayMessage) -> Result<(), RelayError>;
}
