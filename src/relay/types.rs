use crate::error::RelayError;
use crate::peer::types::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegisterPayload {
    pub identity: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OfferPayload {
    pub offer: SessionDescription,
    pub from: String,
    pub to: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AnswerPayload {
    pub answer: SessionDescription,
    pub from: String,
    pub to: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CandidatePayload {
    pub candidate: IceCandidate,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Входящий end-call может прийти пустым: `{}`
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct EndCallPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub const BUSY_REASON: &str = "busy";

/// Кадр relay: `{"event": "...", "data": {...}}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RelayMessage {
    Register(RegisterPayload),
    Offer(OfferPayload),
    Answer(AnswerPayload),
    IceCandidate(CandidatePayload),
    EndCall(EndCallPayload),
}

impl RelayMessage {
    pub fn register(identity: &str) -> Self {
        RelayMessage::Register(RegisterPayload {
            identity: identity.to_owned(),
        })
    }

    pub fn offer(offer: SessionDescription, from: &str, to: &str) -> Self {
        RelayMessage::Offer(OfferPayload {
            offer,
            from: from.to_owned(),
            to: to.to_owned(),
        })
    }

    pub fn answer(answer: SessionDescription, from: &str, to: &str) -> Self {
        RelayMessage::Answer(AnswerPayload {
            answer,
            from: from.to_owned(),
            to: to.to_owned(),
        })
    }

    pub fn candidate(candidate: IceCandidate, from: &str, to: &str) -> Self {
        RelayMessage::IceCandidate(CandidatePayload {
            candidate,
            to: to.to_owned(),
            from: Some(from.to_owned()),
        })
    }

    pub fn end_call(from: &str, to: &str, reason: Option<&str>) -> Self {
        RelayMessage::EndCall(EndCallPayload {
            to: Some(to.to_owned()),
            from: Some(from.to_owned()),
            reason: reason.map(str::to_owned),
        })
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            RelayMessage::Register(_) => "register",
            RelayMessage::Offer(_) => "offer",
            RelayMessage::Answer(_) => "answer",
            RelayMessage::IceCandidate(_) => "ice-candidate",
            RelayMessage::EndCall(_) => "end-call",
        }
    }

    /// Кому relay доставит сообщение
    pub fn recipient(&self) -> Option<&str> {
        match self {
            RelayMessage::Register(_) => None,
            RelayMessage::Offer(p) => Some(&p.to),
            RelayMessage::Answer(p) => Some(&p.to),
            RelayMessage::IceCandidate(p) => Some(&p.to),
            RelayMessage::EndCall(p) => p.to.as_deref(),
        }
    }

    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(text)?)
    }
}
