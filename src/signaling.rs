use crate::call::machine::CallStateMachine;
use crate::call::state::CallState;
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};
use crate::relay::channel::RelayChannel;
use crate::relay::types::{RelayMessage, BUSY_REASON};
use log::{debug, info, warn};
use std::sync::Arc;

/// Входящий кадр relay, который касается звонка
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundSignal {
    Offer {
        from: String,
        offer: SessionDescription,
    },
    Answer {
        from: String,
        answer: SessionDescription,
    },
    Candidate {
        from: Option<String>,
        candidate: IceCandidate,
    },
    EndCall {
        from: Option<String>,
        reason: Option<String>,
    },
}

/// Разбирает кадры relay и раздаёт их машине состояний
pub struct SignalingRouter {
    local_identity: String,
    relay: Arc<dyn RelayChannel>,
    reply_busy: bool,
}

impl SignalingRouter {
    pub fn new(local_identity: impl Into<String>, relay: Arc<dyn RelayChannel>, reply_busy: bool) -> Self {
        Self {
            local_identity: local_identity.into(),
            relay,
            reply_busy,
        }
    }

    /// Нераспознанные кадры логируются и отбрасываются
    pub fn classify(&self, text: &str) -> Option<InboundSignal> {
        let message = match RelayMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping unrecognized relay frame: {e}");
                return None;
            }
        };
        debug!("relay -> {}", message.event_name());

        match message {
            RelayMessage::Register(payload) => {
                debug!("Ignoring inbound register for {}", payload.identity);
                None
            }
            RelayMessage::Offer(payload) if payload.offer.kind != SdpKind::Offer => {
                warn!("Offer from {} carries a non-offer description", payload.from);
                None
            }
            RelayMessage::Offer(payload) => Some(InboundSignal::Offer {
                from: payload.from,
                offer: payload.offer,
            }),
            RelayMessage::Answer(payload) if payload.answer.kind != SdpKind::Answer => {
                warn!("Answer from {} carries a non-answer description", payload.from);
                None
            }
            RelayMessage::Answer(payload) => Some(InboundSignal::Answer {
                from: payload.from,
                answer: payload.answer,
            }),
            RelayMessage::IceCandidate(payload) => Some(InboundSignal::Candidate {
                from: payload.from,
                candidate: payload.candidate,
            }),
            RelayMessage::EndCall(payload) => Some(InboundSignal::EndCall {
                from: payload.from,
                reason: payload.reason,
            }),
        }
    }

    pub async fn dispatch(&self, signal: InboundSignal, machine: &mut CallStateMachine) {
        match signal {
            InboundSignal::Offer { from, offer } => {
                if from == self.local_identity {
                    debug!("Dropping self-originated offer");
                    return;
                }
                let state = machine.state();
                if state != CallState::Idle {
                    // повторная доставка offer от текущего собеседника не означает занятость
                    if machine.remote_identity() == Some(from.as_str()) {
                        debug!("Duplicate offer from {from} ignored");
                        return;
                    }
                    info!("Busy ({state}), dropping offer from {from}");
                    if self.reply_busy {
                        self.send_busy(&from).await;
                    }
                    return;
                }
                machine.on_offer(&from, offer);
            }
            InboundSignal::Answer { from, answer } => {
                if machine.state() != CallState::Connecting {
                    debug!("Ignoring answer from {from} while {}", machine.state());
                    return;
                }
                machine.on_answer(&from, answer).await;
            }
            InboundSignal::Candidate { from, candidate } => {
                machine.on_remote_candidate(from.as_deref(), candidate).await;
            }
            InboundSignal::EndCall { from, reason } => {
                machine.on_remote_end(from.as_deref(), reason.as_deref()).await;
            }
        }
    }

    pub async fn route(&self, text: &str, machine: &mut CallStateMachine) {
        if let Some(signal) = self.classify(text) {
            self.dispatch(signal, machine).await;
        }
    }

    async fn send_busy(&self, to: &str) {
        let message = RelayMessage::end_call(&self.local_identity, to, Some(BUSY_REASON));
        if let Err(e) = self.relay.send(message).await {
            warn!("Failed to send busy reply to {to}: {e}");
        }
    }
}
