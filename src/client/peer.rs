//! Capability traits for the WebRTC stack and local media capture, plus the
//! signaling-state transition table every implementation must follow.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Answer, sdp: sdp.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

/// Offer/answer progress of one peer connection.
///
/// Provisional answers are never produced here, so only the states reachable
/// with full offers and answers exist.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    /// No exchange in progress. Also the initial state.
    #[default]
    Stable,
    /// A local offer has been applied and an answer is awaited.
    HaveLocalOffer,
    /// A remote offer has been applied and a local answer is owed.
    HaveRemoteOffer,
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::Closed => "closed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeOp {
    SetLocal,
    SetRemote,
}

/// The state applying a description of `sdp_type` with `op` would lead to,
/// or `None` if that is not allowed from `cur`.
pub fn next_signaling_state(cur: SignalingState, op: StateChangeOp, sdp_type: SdpType) -> Option<SignalingState> {
    use SdpType::*;
    use SignalingState::*;
    use StateChangeOp::*;

    match (cur, op, sdp_type) {
        // stable->SetLocal(offer)->have-local-offer
        (Stable, SetLocal, Offer) => Some(HaveLocalOffer),
        // stable->SetRemote(offer)->have-remote-offer
        (Stable, SetRemote, Offer) => Some(HaveRemoteOffer),
        // have-local-offer->SetLocal(offer)->have-local-offer
        (HaveLocalOffer, SetLocal, Offer) => Some(HaveLocalOffer),
        // have-local-offer->SetRemote(answer)->stable
        (HaveLocalOffer, SetRemote, Answer) => Some(Stable),
        // have-remote-offer->SetLocal(answer)->stable
        (HaveRemoteOffer, SetLocal, Answer) => Some(Stable),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Things a peer connection reports on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    IceCandidate(IceCandidate),
    NegotiationNeeded,
    ConnectionStateChanged(ConnectionState),
}

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("cannot {op:?}({sdp_type:?}) in signaling state {state}")]
    InvalidState {
        state: SignalingState,
        op: StateChangeOp,
        sdp_type: SdpType,
    },
    #[error("peer connection is closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait PeerConnection: Send {
    fn signaling_state(&self) -> SignalingState;
    fn has_remote_description(&self) -> bool;

    async fn add_stream(&mut self, stream: &LocalStream) -> Result<(), PeerError>;
    async fn create_offer(&mut self) -> Result<SessionDescription, PeerError>;
    async fn create_answer(&mut self) -> Result<SessionDescription, PeerError>;
    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), PeerError>;
    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), PeerError>;
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), PeerError>;
    async fn close(&mut self);
}

/// Builds one peer connection per room, together with its event stream.
pub trait PeerFactory: Send + Sync {
    fn create(&self) -> Result<(Box<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>), PeerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("media permission denied")]
    PermissionDenied,
    #[error("no capture device: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, video: bool, audio: bool) -> Result<LocalStream, MediaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A captured track. Clones share the same flags.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    id: Uuid,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct LocalStream {
    id: Uuid,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self { id: Uuid::now_v7(), tracks }
    }

    /// One audio and one video track.
    pub fn camera_and_microphone() -> Self {
        Self::new(vec![LocalTrack::new(TrackKind::Audio), LocalTrack::new(TrackKind::Video)])
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        self.tracks.iter().filter(|t| t.kind == kind).for_each(|t| t.set_enabled(enabled));
    }

    pub fn stop(&self) {
        self.tracks.iter().for_each(LocalTrack::stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_answer_round_returns_to_stable() {
        use SignalingState::*;
        use StateChangeOp::*;

        let s = next_signaling_state(Stable, SetLocal, SdpType::Offer).unwrap();
        assert_eq!(s, HaveLocalOffer);
        assert_eq!(next_signaling_state(s, SetRemote, SdpType::Answer), Some(Stable));

        let s = next_signaling_state(Stable, SetRemote, SdpType::Offer).unwrap();
        assert_eq!(s, HaveRemoteOffer);
        assert_eq!(next_signaling_state(s, SetLocal, SdpType::Answer), Some(Stable));
    }

    #[test]
    fn out_of_order_descriptions_are_refused() {
        use SignalingState::*;
        use StateChangeOp::*;

        assert_eq!(next_signaling_state(Stable, SetRemote, SdpType::Answer), None);
        assert_eq!(next_signaling_state(HaveLocalOffer, SetRemote, SdpType::Offer), None);
        assert_eq!(next_signaling_state(HaveRemoteOffer, SetLocal, SdpType::Offer), None);
        assert_eq!(next_signaling_state(Closed, SetLocal, SdpType::Offer), None);
    }

    #[test]
    fn toggling_tracks_touches_only_that_kind() {
        let stream = LocalStream::camera_and_microphone();
        let clone = stream.clone();
        stream.set_enabled(TrackKind::Video, false);

        for track in clone.tracks() {
            assert_eq!(track.is_enabled(), track.kind() == TrackKind::Audio);
        }
        stream.stop();
        assert!(clone.tracks().iter().all(LocalTrack::is_stopped));
    }

    #[test]
    fn descriptions_use_browser_field_names() {
        let value = serde_json::to_value(SessionDescription::offer("v=0")).unwrap();
        assert_eq!(value, serde_json::json!({"type": "offer", "sdp": "v=0"}));

        let candidate: IceCandidate = serde_json::from_value(serde_json::json!({
            "candidate": "candidate:1 1 udp 1 127.0.0.1 9 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        }))
        .unwrap();
        assert_eq!(candidate.sdp_m_line_index, Some(0));
    }
}
