pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod loopback;
pub mod negotiation;
pub mod transport;
pub mod types;

pub use connection::RtcTransport;
pub use loopback::LoopbackTransport;
pub use negotiation::{Negotiation, SignalingState};
pub use transport::{DataLink, EventQueue, LinkState, PeerEvent, PeerLink, PeerTransport};
pub use types::{CandidateSet, ConnectionDescription, GatheringState, Payload, SdpKind, ServerConfig};
