use crate::error::CallError;
use crate::utils::random_id;
use async_trait::async_trait;
use log::debug;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Захваченный локальный аудиотрек. Пока он live, микрофон занят.
pub struct LocalAudioTrack {
    id: String,
    live: AtomicBool,
    rtp: Option<Arc<TrackLocalStaticSample>>,
}

impl LocalAudioTrack {
    /// Трек без RTP-приёмника (для тестов и loopback)
    pub fn detached(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            live: AtomicBool::new(true),
            rtp: None,
        }
    }

    pub fn with_rtp(rtp: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            id: rtp.id().to_string(),
            live: AtomicBool::new(true),
            rtp: Some(rtp),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rtp(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.rtp.clone()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Останавливает трек и отпускает устройство
    pub fn stop(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            debug!("Local audio track {} stopped", self.id);
        }
    }
}

impl fmt::Debug for LocalAudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAudioTrack")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .field("rtp", &self.rtp.is_some())
            .finish()
    }
}

/// Источник аудиотреков (микрофон)
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire_audio(&self) -> Result<Vec<Arc<LocalAudioTrack>>, CallError>;
}

/// Микрофон в виде Opus-трека; сэмплы в него пишет внешний источник звука
#[derive(Debug, Default)]
pub struct OpusMicrophone;

#[async_trait]
impl MediaCapture for OpusMicrophone {
    async fn acquire_audio(&self) -> Result<Vec<Arc<LocalAudioTrack>>, CallError> {
        let stream_id = format!("callin-{}", random_id());
        let rtp = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            format!("audio-{}", random_id()),
            stream_id,
        ));
        debug!("Acquired Opus microphone track {}", rtp.id());
        Ok(vec![Arc::new(LocalAudioTrack::with_rtp(rtp))])
    }
}
