use crate::logger::dump_candidate;
use crate::peer::transport::PeerTransport;
use crate::peer::types::IceCandidate;
use log::{debug, warn};

/// Что стало с удалённым кандидатом
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Buffered,
    Applied,
    /// Транспорт отверг кандидат; сессия продолжается
    Rejected,
}

/// Кандидаты, полученные до установки remote description.
///
/// Пока remote description не применён, кандидаты копятся в порядке прихода.
/// `drain` отдаёт их транспорту ровно один раз, после чего буфер пропускает
/// новые кандидаты напрямую.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: Vec<IceCandidate>,
    remote_applied: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Был ли уже выполнен drain
    pub fn is_open(&self) -> bool {
        self.remote_applied
    }

    pub async fn add(
        &mut self,
        candidate: IceCandidate,
        transport: Option<&dyn PeerTransport>,
    ) -> CandidateDisposition {
        let transport = match transport {
            Some(t) if self.remote_applied => t,
            _ => {
                // Если remote description еще не установлен, сохраняем кандидат
                debug!(
                    "Remote description not set yet, queuing candidate ({} pending)",
                    self.pending.len() + 1
                );
                self.pending.push(candidate);
                return CandidateDisposition::Buffered;
            }
        };

        dump_candidate("REMOTE", &candidate);
        match transport.add_ice_candidate(candidate).await {
            Ok(()) => CandidateDisposition::Applied,
            Err(e) => {
                warn!("Failed to add ICE candidate: {e}");
                CandidateDisposition::Rejected
            }
        }
    }

    /// Применяет все отложенные кандидаты после установки remote description
    pub async fn drain(&mut self, transport: &dyn PeerTransport) -> usize {
        self.remote_applied = true;
        let candidates = std::mem::take(&mut self.pending);
        let count = candidates.len();

        for candidate in candidates {
            dump_candidate("PENDING", &candidate);
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                warn!("Failed to apply pending candidate: {e}");
            }
        }

        if count > 0 {
            debug!("Applied {count} pending remote candidates");
        }
        count
    }
}
