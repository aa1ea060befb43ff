use crate::error::CallError;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::media::LocalAudioTrack;
use crate::peer::transport::{PeerTransport, TransportConfig, TransportEventSink, TransportFactory};
use crate::peer::types::{ConnectionState, IceCandidate, SdpKind, SessionDescription, TransportEvent};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::{Arc, Weak};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Фабрика peer connection на базе webrtc-rs
pub struct WebRtcTransportFactory {
    api: API,
}

impl WebRtcTransportFactory {
    pub fn new() -> Result<Self, CallError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(CallError::negotiation)?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(CallError::negotiation)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        config: &TransportConfig,
        events: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>, CallError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config(config))
                .await
                .map_err(CallError::negotiation)?,
        );
        subscribe(&pc, events);
        let transport: Arc<dyn PeerTransport> = Arc::new(WebRtcTransport { pc });
        Ok(transport)
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(config: &TransportConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: vec![server.url.clone()],
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
            })
            .collect(),
        ice_candidate_pool_size: config.ice_candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Единственная подписка на события peer connection за всю сессию
fn subscribe(pc: &Arc<RTCPeerConnection>, events: TransportEventSink) {
    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let sink = sink.clone();
        Box::pin(async move {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate::from(init);
                        dump_candidate("LOCAL", &candidate);
                        sink(TransportEvent::CandidateDiscovered(candidate));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {e}"),
                },
                // cand == None означает конец сбора
                None => debug!("ICE candidate gathering completed"),
            }
        })
    }));

    let sink = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
            let track_id = track.id().to_string();
            info!("Remote track available: {track_id}");
            sink(TransportEvent::RemoteTrack { track_id });
            Box::pin(async {})
        },
    ));

    // слабая ссылка, чтобы обработчик не держал соединение живым
    let weak: Weak<RTCPeerConnection> = Arc::downgrade(pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!("Peer connection state changed to: {st:?}");
        let state = match st {
            RTCPeerConnectionState::New => ConnectionState::New,
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
            RTCPeerConnectionState::Unspecified => {
                debug!("Peer connection state unspecified - ignoring");
                return Box::pin(async {});
            }
        };

        if state == ConnectionState::Failed {
            if let Some(pc) = weak.upgrade() {
                tokio::spawn(async move {
                    dump_selected_pair(&pc, "BEFORE-FAIL").await;
                });
            }
        }

        events(TransportEvent::ConnectionStateChanged(state));
        Box::pin(async {})
    }));
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        debug!("Creating offer...");
        let offer = self.pc.create_offer(None).await.map_err(CallError::negotiation)?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        debug!("Creating answer...");
        let answer = self.pc.create_answer(None).await.map_err(CallError::negotiation)?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        debug!("Setting local description ({:?})...", desc.kind);
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(CallError::negotiation)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        debug!("Setting remote description ({:?})...", desc.kind);
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(CallError::negotiation)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(CallError::negotiation)
    }

    async fn add_track(&self, track: Arc<LocalAudioTrack>) -> Result<(), CallError> {
        let Some(rtp) = track.rtp() else {
            debug!("Track {} has no RTP source, not attaching", track.id());
            return Ok(());
        };
        let rtp: Arc<dyn TrackLocal + Send + Sync> = rtp;
        self.pc
            .add_track(rtp)
            .await
            .map_err(|e| CallError::ResourceUnavailable(format!("failed to add audio track: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), CallError> {
        self.pc.close().await.map_err(CallError::negotiation)
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, CallError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(CallError::negotiation)
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, CallError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(CallError::NegotiationFailure(format!(
            "unsupported description type {other:?}"
        ))),
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}
