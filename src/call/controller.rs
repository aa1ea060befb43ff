use crate::call::machine::CallStateMachine;
use crate::call::state::{CallSnapshot, CallState};
use crate::call::CallOptions;
use crate::error::CallError;
use crate::peer::media::MediaCapture;
use crate::peer::transport::TransportFactory;
use crate::peer::types::TransportEvent;
use crate::relay::channel::{RelayChannel, RelayEvent};
use crate::relay::registry::SessionRegistry;
use crate::session::SessionId;
use crate::signaling::SignalingRouter;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Всё, что попадает в машину состояний, проходит через одну очередь
#[derive(Debug)]
pub enum ControlEvent {
    Command(Command, oneshot::Sender<Result<(), CallError>>),
    Relay(RelayEvent),
    Transport(SessionId, TransportEvent),
    Tick(SessionId),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(String),
    Accept,
    Reject,
    End,
    Dismiss,
}

/// Внешние возможности, которые получает контроллер
pub struct CallDeps {
    pub identity: String,
    pub relay: Arc<dyn RelayChannel>,
    pub media: Arc<dyn MediaCapture>,
    pub transports: Arc<dyn TransportFactory>,
    pub options: CallOptions,
}

pub struct CallController {
    identity: String,
    heartbeat: Option<Duration>,
    machine: CallStateMachine,
    router: SignalingRouter,
    registry: Arc<SessionRegistry>,
    rx: mpsc::UnboundedReceiver<ControlEvent>,
    snapshot: watch::Sender<CallSnapshot>,
}

impl CallController {
    /// Запускает цикл событий и возвращает handle для команд
    pub fn spawn(deps: CallDeps, relay_events: mpsc::UnboundedReceiver<RelayEvent>) -> CallHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let registry = Arc::new(SessionRegistry::new(deps.relay.clone()));
        let router = SignalingRouter::new(
            deps.identity.clone(),
            deps.relay.clone(),
            deps.options.reply_busy,
        );
        let heartbeat = deps.options.heartbeat;
        let machine = CallStateMachine::new(
            deps.identity.clone(),
            deps.relay,
            deps.media,
            deps.transports,
            deps.options,
            tx.downgrade(),
        );
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());

        tokio::spawn(pump_relay(relay_events, tx.downgrade()));

        let controller = CallController {
            identity: deps.identity.clone(),
            heartbeat,
            machine,
            router,
            registry,
            rx,
            snapshot: snapshot_tx,
        };
        tokio::spawn(controller.run());

        CallHandle {
            identity: deps.identity,
            tx,
            snapshot: snapshot_rx,
        }
    }

    async fn run(mut self) {
        info!("Call controller started for {}", self.identity);
        if let Err(e) = self.registry.register(&self.identity).await {
            warn!("Initial registration failed: {e}");
        }
        if let Some(every) = self.heartbeat {
            self.registry.start_heartbeat(every);
        }

        let mut shutdown_ack = None;
        while let Some(event) = self.rx.recv().await {
            match event {
                ControlEvent::Command(command, reply) => {
                    let result = self.execute(command).await;
                    // снимок публикуется до ответа: вызывающий сразу видит новое состояние
                    self.publish();
                    let _ = reply.send(result);
                    continue;
                }
                ControlEvent::Relay(RelayEvent::Connected) => {
                    if let Err(e) = self.registry.reregister().await {
                        warn!("Re-registration failed: {e}");
                    }
                }
                ControlEvent::Relay(RelayEvent::Disconnected) => {
                    warn!("Relay channel disconnected");
                }
                ControlEvent::Relay(RelayEvent::Message(text)) => {
                    self.router.route(&text, &mut self.machine).await;
                }
                ControlEvent::Transport(id, event) => {
                    self.machine.on_transport_event(id, event).await;
                }
                ControlEvent::Tick(id) => self.machine.on_tick(id),
                ControlEvent::Shutdown(ack) => {
                    shutdown_ack = Some(ack);
                    break;
                }
            }
            self.publish();
        }

        self.registry.stop_heartbeat();
        self.machine.shutdown().await;
        self.publish();
        info!("Call controller for {} stopped", self.identity);
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    async fn execute(&mut self, command: Command) -> Result<(), CallError> {
        debug!("Command {command:?} while {}", self.machine.state());
        match command {
            Command::Start(remote) => self.machine.start_call(&remote).await,
            Command::Accept => self.machine.accept_call().await,
            Command::Reject => self.machine.reject_call().await,
            Command::End => self.machine.end_call().await,
            Command::Dismiss => self.machine.dismiss().await,
        }
    }

    fn publish(&self) {
        let next = self.machine.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn pump_relay(
    mut relay_events: mpsc::UnboundedReceiver<RelayEvent>,
    control: mpsc::WeakUnboundedSender<ControlEvent>,
) {
    while let Some(event) = relay_events.recv().await {
        let Some(tx) = control.upgrade() else {
            return;
        };
        if tx.send(ControlEvent::Relay(event)).is_err() {
            return;
        }
    }
    debug!("Relay event stream finished");
}

/// Дешёвый клонируемый доступ к контроллеру
#[derive(Clone)]
pub struct CallHandle {
    identity: String,
    tx: mpsc::UnboundedSender<ControlEvent>,
    snapshot: watch::Receiver<CallSnapshot>,
}

impl CallHandle {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    async fn command(&self, command: Command) -> Result<(), CallError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(ControlEvent::Command(command, reply))
            .map_err(|_| CallError::ControllerStopped)?;
        response.await.map_err(|_| CallError::ControllerStopped)?
    }

    pub async fn start_call(&self, remote: impl Into<String>) -> Result<(), CallError> {
        self.command(Command::Start(remote.into())).await
    }

    pub async fn accept_call(&self) -> Result<(), CallError> {
        self.command(Command::Accept).await
    }

    pub async fn reject_call(&self) -> Result<(), CallError> {
        self.command(Command::Reject).await
    }

    pub async fn end_call(&self) -> Result<(), CallError> {
        self.command(Command::End).await
    }

    pub async fn dismiss(&self) -> Result<(), CallError> {
        self.command(Command::Dismiss).await
    }

    /// Освобождает всё и останавливает контроллер; повторный вызов безвреден
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(ControlEvent::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> CallState {
        self.snapshot.borrow().state
    }

    pub fn duration_secs(&self) -> u64 {
        self.snapshot.borrow().duration_secs
    }

    pub fn last_error(&self) -> Option<String> {
        self.snapshot.borrow().last_error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    /// Ждёт снимок, удовлетворяющий условию
    pub async fn wait_for(
        &self,
        condition: impl FnMut(&CallSnapshot) -> bool,
    ) -> Result<CallSnapshot, CallError> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(condition)
            .await
            .map_err(|_| CallError::ControllerStopped)?;
        Ok((*snapshot).clone())
    }
}
