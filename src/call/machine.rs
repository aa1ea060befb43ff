use crate::call::controller::ControlEvent;
use crate::call::state::{CallSnapshot, CallState};
use crate::call::CallOptions;
use crate::error::CallError;
use crate::peer::holder::TransportSessionHolder;
use crate::peer::media::{LocalAudioTrack, MediaCapture};
use crate::peer::transport::{PeerTransport, TransportEventSink, TransportFactory};
use crate::peer::types::{ConnectionState, IceCandidate, SessionDescription, TransportEvent};
use crate::relay::channel::RelayChannel;
use crate::relay::types::{RelayMessage, BUSY_REASON};
use crate::session::{Role, Session, SessionId};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Единственный владелец состояния звонка и единственный, кто командует транспортом.
///
/// Все методы вызываются из одной очереди событий (`CallController`), поэтому
/// каждый обработчик выполняется до конца, прежде чем начнётся следующий.
pub struct CallStateMachine {
    local_identity: String,
    relay: Arc<dyn RelayChannel>,
    media: Arc<dyn MediaCapture>,
    holder: TransportSessionHolder,
    options: CallOptions,
    events: mpsc::WeakUnboundedSender<ControlEvent>,

    state: CallState,
    session: Option<Session>,
    next_session_id: SessionId,
    timer: Option<JoinHandle<()>>,

    // то, что видит пользователь
    remote: Option<String>,
    role: Option<Role>,
    duration_secs: u64,
    created_at: Option<DateTime<Utc>>,
    connected_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    remote_track: Option<String>,
}

impl CallStateMachine {
    pub fn new(
        local_identity: impl Into<String>,
        relay: Arc<dyn RelayChannel>,
        media: Arc<dyn MediaCapture>,
        transports: Arc<dyn TransportFactory>,
        options: CallOptions,
        events: mpsc::WeakUnboundedSender<ControlEvent>,
    ) -> Self {
        Self {
            local_identity: local_identity.into(),
            relay,
            media,
            holder: TransportSessionHolder::new(transports),
            options,
            events,
            state: CallState::Idle,
            session: None,
            next_session_id: 0,
            timer: None,
            remote: None,
            role: None,
            duration_secs: 0,
            created_at: None,
            connected_at: None,
            last_error: None,
            remote_track: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn remote_identity(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.remote_identity.as_str())
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            state: self.state,
            remote: self.remote.clone(),
            role: self.role,
            duration_secs: self.duration_secs,
            last_error: self.last_error.clone(),
            remote_track: self.remote_track.clone(),
            created_at: self.created_at,
            connected_at: self.connected_at,
        }
    }

    // ========== USER COMMANDS ==========

    pub async fn start_call(&mut self, remote: &str) -> Result<(), CallError> {
        if self.state != CallState::Idle {
            return Err(CallError::InvalidState(self.state));
        }
        if remote == self.local_identity {
            return Err(CallError::InvalidTarget(remote.to_owned()));
        }

        let session = Session::caller(self.allocate_session_id(), self.local_identity.clone(), remote);
        let id = self.open_session(session);
        info!("Starting call {id} to {remote}");
        self.transition(CallState::Connecting);

        if let Err(e) = self.place_offer(id).await {
            return Err(self.fail(e).await);
        }
        Ok(())
    }

    pub async fn accept_call(&mut self) -> Result<(), CallError> {
        match self.state {
            CallState::Incoming => {}
            state if state.has_session() => return Err(CallError::InvalidState(state)),
            _ => {
                let err = CallError::NoActiveSession("no incoming call to accept".into());
                return Err(self.fail(err).await);
            }
        }

        self.transition(CallState::Connecting);
        if let Err(e) = self.answer_offer().await {
            return Err(self.fail(e).await);
        }
        Ok(())
    }

    pub async fn reject_call(&mut self) -> Result<(), CallError> {
        match self.state {
            CallState::Incoming => {
                info!("Rejecting incoming call");
                self.hang_up().await;
                Ok(())
            }
            state if state.has_session() => Err(CallError::InvalidState(state)),
            _ => {
                let err = CallError::NoActiveSession("no incoming call to reject".into());
                Err(self.fail(err).await)
            }
        }
    }

    pub async fn end_call(&mut self) -> Result<(), CallError> {
        if self.state.has_session() {
            info!("Ending call while {}", self.state);
            self.hang_up().await;
            return Ok(());
        }
        let err = CallError::NoActiveSession("no call to end".into());
        Err(self.fail(err).await)
    }

    /// Выход с экрана звонка: Ended/Error → Idle
    pub async fn dismiss(&mut self) -> Result<(), CallError> {
        match self.state {
            CallState::Idle => Ok(()),
            state if state.is_finished() => {
                self.release().await;
                self.clear_presentation();
                self.transition(CallState::Idle);
                Ok(())
            }
            state => Err(CallError::InvalidState(state)),
        }
    }

    /// Экран уничтожен: безусловное освобождение из любого состояния
    pub async fn shutdown(&mut self) {
        if self.state.has_session() {
            self.notify_hangup(None).await;
        }
        self.release().await;
        self.clear_presentation();
        self.transition(CallState::Idle);
    }

    // ========== INBOUND SIGNALS ==========

    /// Входящий offer, уже прошедший фильтры роутера
    pub fn on_offer(&mut self, from: &str, offer: SessionDescription) -> bool {
        if self.state != CallState::Idle {
            debug!("Offer from {from} ignored while {}", self.state);
            return false;
        }

        let session = Session::callee(
            self.allocate_session_id(),
            self.local_identity.clone(),
            from,
            offer,
        );
        let id = self.open_session(session);
        info!("Incoming call {id} from {from}");
        self.transition(CallState::Incoming);
        true
    }

    pub async fn on_answer(&mut self, from: &str, answer: SessionDescription) {
        if self.state != CallState::Connecting {
            debug!("Answer from {from} ignored while {}", self.state);
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.role != Role::Caller || !session.is_from_remote(Some(from)) {
            debug!("Answer from {from} does not belong to the active session");
            return;
        }
        if session.has_remote_description() {
            warn!("Remote description already applied, ignoring duplicate answer from {from}");
            return;
        }

        let Some(transport) = self.holder.handle() else {
            self.fail(CallError::NoActiveSession("transport session missing".into()))
                .await;
            return;
        };

        if let Err(e) = transport.set_remote_description(answer.clone()).await {
            self.fail(e).await;
            return;
        }
        if let Err(e) = self.record_remote_and_drain(transport.as_ref(), answer).await {
            self.fail(e).await;
            return;
        }
        info!("Answer from {from} applied, waiting for transport");
    }

    pub async fn on_remote_candidate(&mut self, from: Option<&str>, candidate: IceCandidate) {
        let transport = self.holder.handle();
        let Some(session) = self.session.as_mut() else {
            debug!("No active session, dropping remote candidate");
            return;
        };
        if !session.is_from_remote(from) {
            debug!("Candidate from {from:?} does not belong to the active session");
            return;
        }

        let disposition = session.candidates.add(candidate, transport.as_deref()).await;
        debug!("Remote candidate {disposition:?} for session {}", session.id);
    }

    pub async fn on_remote_end(&mut self, from: Option<&str>, reason: Option<&str>) {
        let Some(session) = self.session.as_ref() else {
            debug!("end-call without active session ignored");
            return;
        };
        if !session.is_from_remote(from) {
            debug!("end-call from {from:?} does not belong to the active session");
            return;
        }

        let remote = session.remote_identity.clone();
        info!("{remote} ended the call while {}", self.state);
        self.release().await;
        if reason == Some(BUSY_REASON) {
            self.last_error = Some(format!("{remote} is busy"));
        }
        self.transition(CallState::Ended);
    }

    // ========== TRANSPORT EVENTS ==========

    pub async fn on_transport_event(&mut self, id: SessionId, event: TransportEvent) {
        if !self.is_current(id) {
            debug!("Dropping transport event for stale session {id}");
            return;
        }

        match event {
            TransportEvent::CandidateDiscovered(candidate) => {
                let Some(session) = self.session.as_ref() else {
                    return;
                };
                let message = RelayMessage::candidate(
                    candidate,
                    &session.local_identity,
                    &session.remote_identity,
                );
                if let Err(e) = self.relay.send(message).await {
                    warn!("Failed to send local candidate: {e}");
                }
            }
            TransportEvent::RemoteTrack { track_id } => {
                self.remote_track = Some(track_id);
            }
            TransportEvent::ConnectionStateChanged(state) => {
                self.on_connection_state(id, state).await;
            }
        }
    }

    async fn on_connection_state(&mut self, id: SessionId, state: ConnectionState) {
        match state {
            ConnectionState::Connected if self.state == CallState::Connecting => {
                self.transition(CallState::Connected);
                self.connected_at = Some(Utc::now());
                self.duration_secs = 0;
                self.start_timer(id);
            }
            lost if lost.is_lost() && self.state.has_session() => {
                let err = CallError::TransportLost(format!("connection {lost}"));
                warn!("{err}");
                self.release().await;
                self.last_error = Some(err.to_string());
                self.transition(CallState::Ended);
            }
            other => debug!("Transport state {other} while {}", self.state),
        }
    }

    pub fn on_tick(&mut self, id: SessionId) {
        if self.is_current(id) && self.state == CallState::Connected {
            self.duration_secs += 1;
        }
    }

    // ========== INTERNALS ==========

    fn transition(&mut self, next: CallState) {
        if self.state != next {
            info!("Call state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn allocate_session_id(&mut self) -> SessionId {
        self.next_session_id += 1;
        self.next_session_id
    }

    fn open_session(&mut self, session: Session) -> SessionId {
        let id = session.id;
        self.clear_presentation();
        self.remote = Some(session.remote_identity.clone());
        self.role = Some(session.role);
        self.created_at = Some(session.created_at);
        self.session = Some(session);
        id
    }

    fn clear_presentation(&mut self) {
        self.remote = None;
        self.role = None;
        self.duration_secs = 0;
        self.created_at = None;
        self.connected_at = None;
        self.last_error = None;
        self.remote_track = None;
    }

    fn is_current(&self, id: SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == id)
    }

    fn transport_sink(&self, id: SessionId) -> TransportEventSink {
        let events = self.events.clone();
        Arc::new(move |event| {
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(ControlEvent::Transport(id, event));
            }
        })
    }

    async fn acquire_microphone(&self) -> Result<Vec<Arc<LocalAudioTrack>>, CallError> {
        let tracks = tokio::time::timeout(self.options.media_timeout, self.media.acquire_audio())
            .await
            .map_err(|_| {
                CallError::ResourceUnavailable(format!(
                    "microphone not granted within {} s",
                    self.options.media_timeout.as_secs()
                ))
            })??;

        if tracks.is_empty() {
            return Err(CallError::ResourceUnavailable("no audio tracks captured".into()));
        }
        debug!("Acquired {} local audio tracks", tracks.len());
        Ok(tracks)
    }

    async fn place_offer(&mut self, id: SessionId) -> Result<(), CallError> {
        let sink = self.transport_sink(id);
        let transport = self.holder.get_or_create(&self.options.transport, sink).await?;

        let tracks = self.acquire_microphone().await?;
        self.holder.attach_tracks(tracks).await?;

        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;

        let (local, remote) = {
            let session = self.active_session()?;
            session.record_local_description(offer.clone())?;
            (session.local_identity.clone(), session.remote_identity.clone())
        };
        self.relay
            .send(RelayMessage::offer(offer, &local, &remote))
            .await?;
        info!("Offer sent to {remote}");
        Ok(())
    }

    async fn answer_offer(&mut self) -> Result<(), CallError> {
        let (id, offer) = {
            let session = self.active_session()?;
            let offer = session
                .take_offer()
                .ok_or_else(|| CallError::NoActiveSession("no offer to accept".into()))?;
            (session.id, offer)
        };

        let sink = self.transport_sink(id);
        let transport = self.holder.get_or_create(&self.options.transport, sink).await?;
        transport.set_remote_description(offer.clone()).await?;
        self.record_remote_and_drain(transport.as_ref(), offer).await?;

        let tracks = self.acquire_microphone().await?;
        self.holder.attach_tracks(tracks).await?;

        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;

        let (local, remote) = {
            let session = self.active_session()?;
            session.record_local_description(answer.clone())?;
            (session.local_identity.clone(), session.remote_identity.clone())
        };
        self.relay
            .send(RelayMessage::answer(answer, &local, &remote))
            .await?;
        info!("Answer sent to {remote}");
        Ok(())
    }

    async fn record_remote_and_drain(
        &mut self,
        transport: &dyn PeerTransport,
        desc: SessionDescription,
    ) -> Result<(), CallError> {
        let session = self.active_session()?;
        session.record_remote_description(desc)?;
        session.candidates.drain(transport).await;
        Ok(())
    }

    fn active_session(&mut self) -> Result<&mut Session, CallError> {
        self.session
            .as_mut()
            .ok_or_else(|| CallError::NoActiveSession("session discarded".into()))
    }

    fn start_timer(&mut self, id: SessionId) {
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(tx) = events.upgrade() else {
                    return;
                };
                if tx.send(ControlEvent::Tick(id)).is_err() {
                    return;
                }
            }
        });
        if let Some(previous) = self.timer.replace(handle) {
            previous.abort();
        }
    }

    async fn notify_hangup(&self, reason: Option<&str>) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let message = RelayMessage::end_call(&session.local_identity, &session.remote_identity, reason);
        if let Err(e) = self.relay.send(message).await {
            warn!("Failed to send end-call to {}: {e}", session.remote_identity);
        }
    }

    async fn hang_up(&mut self) {
        self.notify_hangup(None).await;
        self.release().await;
        self.transition(CallState::Ended);
    }

    async fn fail(&mut self, err: CallError) -> CallError {
        error!("Call failed: {err}");
        self.notify_hangup(None).await;
        self.release().await;
        self.last_error = Some(err.to_string());
        self.transition(CallState::Error);
        err
    }

    /// Таймер, транспорт, микрофон и сессия освобождаются на каждом выходе из звонка
    async fn release(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.holder.reset().await;
        if let Some(session) = self.session.take() {
            debug!(
                "Session {} discarded ({} candidates never applied)",
                session.id,
                session.candidates.len()
            );
        }
    }
}

impl Drop for CallStateMachine {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
