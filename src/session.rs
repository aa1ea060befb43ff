use crate::error::CallError;
use crate::peer::ice::CandidateBuffer;
use crate::peer::types::SessionDescription;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Номер попытки звонка; растёт монотонно, события чужих сессий отбрасываются
pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Caller,
    Callee,
}

/// Контекст одной попытки звонка
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub local_identity: String,
    pub remote_identity: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub candidates: CandidateBuffer,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    // offer вызывающего, пока вызываемый не ответил
    stored_offer: Option<SessionDescription>,
}

impl Session {
    pub fn caller(id: SessionId, local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self::new(id, local.into(), remote.into(), Role::Caller, None)
    }

    pub fn callee(
        id: SessionId,
        local: impl Into<String>,
        remote: impl Into<String>,
        offer: SessionDescription,
    ) -> Self {
        Self::new(id, local.into(), remote.into(), Role::Callee, Some(offer))
    }

    fn new(
        id: SessionId,
        local_identity: String,
        remote_identity: String,
        role: Role,
        stored_offer: Option<SessionDescription>,
    ) -> Self {
        Self {
            id,
            local_identity,
            remote_identity,
            role,
            created_at: Utc::now(),
            candidates: CandidateBuffer::new(),
            local_description: None,
            remote_description: None,
            stored_offer,
        }
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description.is_some()
    }

    pub fn take_offer(&mut self) -> Option<SessionDescription> {
        self.stored_offer.take()
    }

    /// Совпадает ли отправитель с удалённой стороной (неизвестный отправитель допускается)
    pub fn is_from_remote(&self, from: Option<&str>) -> bool {
        match from {
            Some(sender) => sender == self.remote_identity,
            None => true,
        }
    }

    pub fn record_local_description(&mut self, desc: SessionDescription) -> Result<(), CallError> {
        if self.local_description.is_some() {
            return Err(CallError::NegotiationFailure(
                "local description already set for this session".into(),
            ));
        }
        self.local_description = Some(desc);
        Ok(())
    }

    /// Remote description задаётся ровно один раз: renegotiation не поддерживается
    pub fn record_remote_description(&mut self, desc: SessionDescription) -> Result<(), CallError> {
        if self.remote_description.is_some() {
            return Err(CallError::NegotiationFailure(
                "remote description already applied for this session".into(),
            ));
        }
        self.remote_description = Some(desc);
        Ok(())
    }
}
