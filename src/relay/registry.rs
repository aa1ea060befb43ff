use crate::error::RelayError;
use crate::relay::channel::RelayChannel;
use crate::relay::types::RelayMessage;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Связывает локальную identity с каналом relay.
/// Регистрация идемпотентна и повторяется после каждого переподключения.
pub struct SessionRegistry {
    channel: Arc<dyn RelayChannel>,
    identity: Mutex<Option<String>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    pub fn new(channel: Arc<dyn RelayChannel>) -> Self {
        Self {
            channel,
            identity: Mutex::new(None),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> Option<String> {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Запоминает identity и регистрирует её в relay.
    /// Если канал ещё не подключён, регистрация уйдёт при `Connected`.
    pub async fn register(&self, identity: &str) -> Result<(), RelayError> {
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity.to_owned());
        match self.channel.send(RelayMessage::register(identity)).await {
            Ok(()) => {
                info!("Registered as {identity}");
                Ok(())
            }
            Err(RelayError::NotConnected) => {
                debug!("Relay not connected yet, {identity} will register on connect");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Повторная регистрация после переподключения канала
    pub async fn reregister(&self) -> Result<(), RelayError> {
        let Some(identity) = self.identity() else {
            debug!("No identity to re-register");
            return Ok(());
        };
        self.channel.send(RelayMessage::register(&identity)).await?;
        debug!("Re-registered as {identity}");
        Ok(())
    }

    /// Периодически повторяет регистрацию
    pub fn start_heartbeat(self: &Arc<Self>, every: Duration) {
        let registry = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    return;
                };
                if let Err(e) = registry.reregister().await {
                    warn!("Heartbeat registration failed: {e}");
                }
            }
        });

        let previous = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn stop_heartbeat(&self) {
        if let Some(handle) = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}
