use crate::error::RelayError;
use crate::relay::channel::{RelayChannel, RelayEvent};
use crate::relay::types::RelayMessage;
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Relay в памяти процесса: маршрутизирует кадры по `to` между клиентами,
/// зарегистрированными под своими identity.
#[derive(Clone, Default)]
pub struct LocalRelayHub {
    inner: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
    routes: HashMap<String, mpsc::UnboundedSender<RelayEvent>>,
    published: Vec<RelayMessage>,
    echo: bool,
}

impl LocalRelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Режим, в котором каждое сообщение возвращается и отправителю
    pub fn with_echo() -> Self {
        let hub = Self::default();
        hub.state().echo = true;
        hub
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Новый клиент; сразу получает `Connected`
    pub fn connect(&self) -> (Arc<LocalRelayClient>, mpsc::UnboundedReceiver<RelayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(RelayEvent::Connected);
        let client = Arc::new(LocalRelayClient {
            hub: self.clone(),
            events: tx,
            identity: Mutex::new(None),
        });
        (client, rx)
    }

    /// Все опубликованные сообщения, кроме register, в порядке отправки
    pub fn published(&self) -> Vec<RelayMessage> {
        self.state().published.clone()
    }

    pub fn published_to(&self, identity: &str) -> Vec<RelayMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.recipient() == Some(identity))
            .collect()
    }

    pub fn is_registered(&self, identity: &str) -> bool {
        self.state().routes.contains_key(identity)
    }

    /// Доставляет кадр напрямую, минуя отправителя
    pub fn deliver_raw(&self, identity: &str, text: impl Into<String>) -> bool {
        match self.state().routes.get(identity) {
            Some(route) => route.send(RelayEvent::Message(text.into())).is_ok(),
            None => false,
        }
    }

    pub fn deliver(&self, identity: &str, message: &RelayMessage) -> bool {
        match message.encode() {
            Ok(text) => self.deliver_raw(identity, text),
            Err(_) => false,
        }
    }

    /// Имитирует обрыв канала: регистрация теряется, клиент получает
    /// `Disconnected` и затем `Connected`
    pub fn bounce(&self, identity: &str) {
        if let Some(route) = self.state().routes.remove(identity) {
            let _ = route.send(RelayEvent::Disconnected);
            let _ = route.send(RelayEvent::Connected);
        }
    }

    fn publish(&self, sender: &mpsc::UnboundedSender<RelayEvent>, message: RelayMessage) -> Result<(), RelayError> {
        let mut state = self.state();

        if let RelayMessage::Register(payload) = &message {
            debug!("hub: register {}", payload.identity);
            state.routes.insert(payload.identity.clone(), sender.clone());
            return Ok(());
        }

        let text = message.encode()?;
        let route = message
            .recipient()
            .and_then(|to| state.routes.get(to))
            .cloned();
        let echo = state.echo;
        state.published.push(message);
        drop(state);

        match route {
            Some(route) => {
                let _ = route.send(RelayEvent::Message(text.clone()));
            }
            None => debug!("hub: recipient not registered, frame dropped"),
        }
        if echo {
            let _ = sender.send(RelayEvent::Message(text));
        }
        Ok(())
    }
}

pub struct LocalRelayClient {
    hub: LocalRelayHub,
    events: mpsc::UnboundedSender<RelayEvent>,
    identity: Mutex<Option<String>>,
}

impl LocalRelayClient {
    pub fn identity(&self) -> Option<String> {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RelayChannel for LocalRelayClient {
    async fn send(&self, message: RelayMessage) -> Result<(), RelayError> {
        if self.events.is_closed() {
            return Err(RelayError::Closed);
        }
        if let RelayMessage::Register(payload) = &message {
            *self.identity.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(payload.identity.clone());
        }
        self.hub.publish(&self.events, message)
    }
}
