use crate::error::CallError;
use crate::peer::media::LocalAudioTrack;
use crate::peer::transport::{PeerTransport, TransportConfig, TransportEventSink, TransportFactory};
use log::{debug, info, warn};
use std::sync::Arc;

/// Владеет не более чем одной транспортной сессией и захваченными треками.
/// `reset` единственная точка освобождения ресурсов звонка.
pub struct TransportSessionHolder {
    factory: Arc<dyn TransportFactory>,
    handle: Option<Arc<dyn PeerTransport>>,
    tracks: Vec<Arc<LocalAudioTrack>>,
}

impl TransportSessionHolder {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            handle: None,
            tracks: Vec::new(),
        }
    }

    pub fn handle(&self) -> Option<Arc<dyn PeerTransport>> {
        self.handle.clone()
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    /// Возвращает существующий транспорт или создаёт новый.
    /// Второй параллельный транспорт не создаётся никогда.
    pub async fn get_or_create(
        &mut self,
        config: &TransportConfig,
        events: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>, CallError> {
        if let Some(handle) = &self.handle {
            debug!("Reusing existing transport session");
            return Ok(handle.clone());
        }

        info!(
            "Creating transport session with {} ICE servers",
            config.ice_servers.len()
        );
        let handle = self.factory.create(config, events).await?;
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Привязывает треки к транспорту. Треки запоминаются до привязки,
    /// чтобы `reset` остановил их даже при ошибке.
    pub async fn attach_tracks(&mut self, tracks: Vec<Arc<LocalAudioTrack>>) -> Result<(), CallError> {
        self.tracks.extend(tracks.iter().cloned());

        let handle = self
            .handle
            .clone()
            .ok_or_else(|| CallError::NoActiveSession("transport session not initialized".into()))?;

        for track in tracks {
            debug!("Adding local track {} to transport", track.id());
            handle.add_track(track).await?;
        }
        Ok(())
    }

    /// Останавливает треки, закрывает транспорт, отпускает handle.
    /// Без транспорта ничего не делает.
    pub async fn reset(&mut self) {
        let tracks = std::mem::take(&mut self.tracks);
        for track in &tracks {
            track.stop();
        }

        // извлекаем транспорт и закрываем его
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.close().await {
                warn!("Failed to close transport session: {e}");
            }
            info!("Transport session released ({} tracks stopped)", tracks.len());
        } else if !tracks.is_empty() {
            info!("Released {} tracks without transport session", tracks.len());
        }
    }
}
