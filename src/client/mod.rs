//! Client side of a stranger session: matchmaking, the signaling relay and
//! per-room WebRTC negotiation, driven against any [`Backend`].

mod backend;
mod call;
mod dedup;
mod http;
mod negotiation;
mod peer;
mod poller;
mod relay;

pub use backend::{Backend, ClientError, ClientResult, LocalBackend, Subscription};
pub use call::{Call, CallStatus};
pub use dedup::{EventQueue, Keyed};
pub use http::HttpBackend;
pub use negotiation::{NegotiationError, NegotiationEvent, NegotiationPhase, Negotiator, Role};
pub use peer::{
    next_signaling_state, ConnectionState, IceCandidate, LocalStream, LocalTrack, MediaDevices, MediaError,
    PeerConnection, PeerError, PeerEvent, PeerFactory, SdpType, SessionDescription, SignalingState,
    StateChangeOp, TrackKind,
};
pub use poller::{ClientConfig, ClientEvent, MatchClient, PollerState};
pub use relay::SignalRelay;
