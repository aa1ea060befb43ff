pub mod connection;
pub mod holder;
pub mod ice;
pub mod media;
pub mod transport;
pub mod types;

pub use connection::{WebRtcTransport, WebRtcTransportFactory};
pub use holder::TransportSessionHolder;
pub use ice::{CandidateBuffer, CandidateDisposition};
pub use media::{LocalAudioTrack, MediaCapture, OpusMicrophone};
pub use transport::{PeerTransport, TransportConfig, TransportEventSink, TransportFactory};
pub use types::{
    ConnectionState, IceCandidate, SdpKind, ServerConfig, SessionDescription, TransportEvent,
};
