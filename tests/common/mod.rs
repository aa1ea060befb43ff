#![allow(dead_code)]

use async_trait::async_trait;
use callin_lib::call::{CallController, CallDeps, CallHandle, CallOptions};
use callin_lib::error::CallError;
use callin_lib::peer::{
    IceCandidate, LocalAudioTrack, MediaCapture, PeerTransport, SdpKind, SessionDescription,
    TransportConfig, TransportEvent, TransportEventSink, TransportFactory,
};
use callin_lib::relay::LocalRelayHub;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    AddTrack(String),
    Close,
}

#[derive(Default)]
pub struct FakeTransport {
    ops: Mutex<Vec<Op>>,
    fail_offer: AtomicBool,
}

impl FakeTransport {
    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::AddCandidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, op: &Op) -> usize {
        self.ops().iter().filter(|o| *o == op).count()
    }

    pub fn close_count(&self) -> usize {
        self.count(&Op::Close)
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        self.record(Op::CreateOffer);
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(CallError::NegotiationFailure("offer refused".into()));
        }
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        self.record(Op::CreateAnswer);
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.record(Op::SetLocal(desc.kind));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.record(Op::SetRemote(desc.kind));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.record(Op::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, track: Arc<LocalAudioTrack>) -> Result<(), CallError> {
        self.record(Op::AddTrack(track.id().to_owned()));
        Ok(())
    }

    async fn close(&self) -> Result<(), CallError> {
        self.record(Op::Close);
        Ok(())
    }
}

/// Записывает созданные транспорты и их подписки
#[derive(Default)]
pub struct FakeTransportFactory {
    created: Mutex<Vec<Arc<FakeTransport>>>,
    sinks: Mutex<Vec<TransportEventSink>>,
    pub fail_offer: AtomicBool,
}

impl FakeTransportFactory {
    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        self.created.lock().unwrap()[index].clone()
    }

    pub fn last(&self) -> Arc<FakeTransport> {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport created")
    }

    /// Событие от транспорта с номером `index`
    pub fn emit_on(&self, index: usize, event: TransportEvent) {
        let sink = self.sinks.lock().unwrap()[index].clone();
        sink(event);
    }

    pub fn emit(&self, event: TransportEvent) {
        let sink = self
            .sinks
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport created");
        sink(event);
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        _config: &TransportConfig,
        events: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>, CallError> {
        let transport = Arc::new(FakeTransport::default());
        transport
            .fail_offer
            .store(self.fail_offer.load(Ordering::SeqCst), Ordering::SeqCst);
        self.created.lock().unwrap().push(transport.clone());
        self.sinks.lock().unwrap().push(events);
        let handle: Arc<dyn PeerTransport> = transport;
        Ok(handle)
    }
}

/// Микрофон, которым управляет тест
#[derive(Default)]
pub struct FakeMicrophone {
    pub deny: AtomicBool,
    pub never_answer: AtomicBool,
    acquired: Mutex<Vec<Arc<LocalAudioTrack>>>,
    counter: AtomicUsize,
}

impl FakeMicrophone {
    pub fn acquisitions(&self) -> usize {
        self.acquired.lock().unwrap().len()
    }

    pub fn live_tracks(&self) -> usize {
        self.acquired
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_live())
            .count()
    }
}

#[async_trait]
impl MediaCapture for FakeMicrophone {
    async fn acquire_audio(&self) -> Result<Vec<Arc<LocalAudioTrack>>, CallError> {
        if self.never_answer.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(CallError::ResourceUnavailable("microphone denied".into()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let track = Arc::new(LocalAudioTrack::detached(format!("mic-{n}")));
        self.acquired.lock().unwrap().push(track.clone());
        Ok(vec![track])
    }
}

pub struct Phone {
    pub handle: CallHandle,
    pub transports: Arc<FakeTransportFactory>,
    pub mic: Arc<FakeMicrophone>,
}

pub fn options() -> CallOptions {
    CallOptions {
        heartbeat: None,
        ..CallOptions::default()
    }
}

pub fn phone(hub: &LocalRelayHub, identity: &str) -> Phone {
    phone_with(hub, identity, options())
}

pub fn phone_with(hub: &LocalRelayHub, identity: &str, options: CallOptions) -> Phone {
    let (client, events) = hub.connect();
    let transports = Arc::new(FakeTransportFactory::default());
    let mic = Arc::new(FakeMicrophone::default());
    let handle = CallController::spawn(
        CallDeps {
            identity: identity.to_owned(),
            relay: client,
            media: mic.clone(),
            transports: transports.clone(),
            options,
        },
        events,
    );
    Phone {
        handle,
        transports,
        mic,
    }
}

/// Даёт всем задачам отработать (время на паузе продвигается само)
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition was not reached");
}

pub async fn registered(hub: &LocalRelayHub, identity: &str) {
    eventually(|| hub.is_registered(identity)).await;
}
