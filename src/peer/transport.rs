use crate::error::CallError;
use crate::peer::media::LocalAudioTrack;
use crate::peer::types::{IceCandidate, ServerConfig, SessionDescription, TransportEvent};
use async_trait::async_trait;
use std::sync::Arc;

/// Куда транспорт отдаёт свои уведомления; подписка одна на сессию
pub type TransportEventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub ice_candidate_pool_size: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: crate::config::DEFAULT_ICE_SERVERS.clone(),
            ice_candidate_pool_size: 10,
        }
    }
}

/// Одна транспортная сессия с удалённой стороной
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, CallError>;

    async fn create_answer(&self) -> Result<SessionDescription, CallError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError>;

    async fn add_track(&self, track: Arc<LocalAudioTrack>) -> Result<(), CallError>;

    /// Закрытие снимает все подписки транспорта
    async fn close(&self) -> Result<(), CallError>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        config: &TransportConfig,
        events: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>, CallError>;
}
