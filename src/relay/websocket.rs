use crate::error::RelayError;
use crate::relay::channel::{RelayChannel, RelayEvent};
use crate::relay::types::RelayMessage;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Кадр и подтверждение его записи в сокет
type Outbound = (String, oneshot::Sender<Result<(), RelayError>>);

/// Клиент relay поверх WebSocket с автоматическим переподключением
pub struct WebSocketRelay {
    outbound: mpsc::UnboundedSender<Outbound>,
    connected: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl WebSocketRelay {
    /// Запускает фоновое подключение. События (подключение, кадры) идут в возвращаемый приёмник.
    pub fn connect(
        url: impl Into<String>,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<RelayEvent>) {
        let url = url.into();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(false);

        let task = tokio::spawn(drive(url, reconnect_delay, out_rx, events_tx, connected_tx));

        (
            Self {
                outbound: out_tx,
                connected: connected_rx,
                task,
            },
            events_rx,
        )
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

impl Drop for WebSocketRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl RelayChannel for WebSocketRelay {
    /// `Ok` только после записи кадра в сокет
    async fn send(&self, message: RelayMessage) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }
        let text = message.encode()?;
        debug!("relay <- {}", message.event_name());

        let (ack, written) = oneshot::channel();
        self.outbound
            .send((text, ack))
            .map_err(|_| RelayError::Closed)?;
        written.await.map_err(|_| RelayError::Closed)?
    }
}

/// Ждёт `fut`, отвечая `NotConnected` на все кадры, пришедшие тем временем.
/// `None`, если отправителей больше нет.
async fn wait_rejecting<F: Future>(
    fut: F,
    out_rx: &mut mpsc::UnboundedReceiver<Outbound>,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            output = &mut fut => return Some(output),
            frame = out_rx.recv() => match frame {
                Some((_, ack)) => {
                    let _ = ack.send(Err(RelayError::NotConnected));
                }
                None => return None,
            },
        }
    }
}

/// Отвечает `NotConnected` на всё, что осталось в очереди
fn reject_pending(out_rx: &mut mpsc::UnboundedReceiver<Outbound>) -> usize {
    let mut rejected = 0;
    while let Ok((_, ack)) = out_rx.try_recv() {
        let _ = ack.send(Err(RelayError::NotConnected));
        rejected += 1;
    }
    rejected
}

async fn drive(
    url: String,
    reconnect_delay: Duration,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<RelayEvent>,
    connected: watch::Sender<bool>,
) {
    loop {
        let Some(attempt) = wait_rejecting(connect_async(url.as_str()), &mut out_rx).await else {
            return;
        };

        match attempt {
            Ok((ws_stream, _)) => {
                info!("Relay websocket connected: {url}");
                let (mut ws_write, mut ws_read) = ws_stream.split();

                let stale = reject_pending(&mut out_rx);
                if stale > 0 {
                    warn!("Rejected {stale} relay frames queued before connect");
                }

                let _ = connected.send(true);
                if events.send(RelayEvent::Connected).is_err() {
                    return;
                }

                loop {
                    tokio::select! {
                        outgoing = out_rx.recv() => match outgoing {
                            Some((text, ack)) => {
                                match ws_write.send(Message::Text(text.into())).await {
                                    Ok(()) => {
                                        let _ = ack.send(Ok(()));
                                    }
                                    Err(e) => {
                                        warn!("Relay websocket write failed: {e}");
                                        let _ = ack.send(Err(RelayError::NotConnected));
                                        break;
                                    }
                                }
                            }
                            None => {
                                let _ = ws_write.close().await;
                                let _ = connected.send(false);
                                return;
                            }
                        },
                        incoming = ws_read.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if events.send(RelayEvent::Message(text.as_str().to_owned())).is_err() {
                                    return;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("Relay websocket closed by server: {frame:?}");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("Relay websocket read failed: {e}");
                                break;
                            }
                            None => break,
                        },
                    }
                }

                let _ = connected.send(false);
                let lost = reject_pending(&mut out_rx);
                if lost > 0 {
                    warn!("Relay connection lost with {lost} frames unsent");
                }
                if events.send(RelayEvent::Disconnected).is_err() {
                    return;
                }
            }
            Err(e) => warn!("Relay websocket connect to {url} failed: {e}"),
        }

        if events.is_closed() {
            return;
        }
        debug!("Reconnecting to relay in {} ms", reconnect_delay.as_millis());
        if wait_rejecting(sleep(reconnect_delay), &mut out_rx).await.is_none() {
            return;
        }
    }
}
