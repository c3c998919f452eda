//! Per-room offer/answer negotiation.
//!
//! Exactly one side ([`Role::Initiator`]) ever creates offers, so the two
//! peers can never both be offering at once. Everything received is funneled
//! through one deduplicating inbox, and nothing in it is applied before local
//! media is attached.

use std::sync::Arc;

use uuid::Uuid;

use super::{
    dedup::EventQueue,
    peer::{
        next_signaling_state, ConnectionState, IceCandidate, LocalStream, MediaDevices, MediaError, PeerConnection,
        PeerError, PeerEvent, SdpType, SessionDescription, SignalingState, StateChangeOp, TrackKind,
    },
    relay::SignalRelay,
    ClientError,
};
use crate::model::{Room, SignalType, SignalingEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    /// The participant who was already waiting when the room formed (`user1`)
    /// makes the offer.
    pub fn for_participant(room: &Room, user_id: &str) -> Option<Role> {
        if room.user1_id == user_id {
            Some(Role::Initiator)
        } else if room.user2_id == user_id {
            Some(Role::Responder)
        } else {
            None
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    #[default]
    Idle,
    AwaitingPermission,
    /// Local media is attached; offers and answers may flow.
    Ready,
    Offering,
    Answering,
    Connected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationEvent {
    RequestMedia,
    MediaGranted,
    MediaDenied,
    CreateOffer,
    RemoteOffer,
    PeerConnected,
    PeerFailed,
    Close,
}

impl NegotiationPhase {
    pub fn on(self, event: NegotiationEvent, role: Role) -> Result<NegotiationPhase, NegotiationError> {
        use NegotiationEvent as E;
        use NegotiationPhase as P;

        match (self, event) {
            (_, E::Close) => Ok(P::Closed),
            (P::Closed, _) => Err(NegotiationError::Closed),
            (_, E::CreateOffer) if role != Role::Initiator => Err(NegotiationError::NotInitiator),
            (_, E::RemoteOffer) if role != Role::Responder => Err(NegotiationError::NotResponder),

            (P::Idle, E::RequestMedia) => Ok(P::AwaitingPermission),
            (P::AwaitingPermission, E::MediaGranted) => Ok(P::Ready),
            (P::AwaitingPermission, E::MediaDenied) => Ok(P::Idle),

            // renegotiating an established call keeps it connected
            (P::Connected, E::CreateOffer | E::RemoteOffer) => Ok(P::Connected),
            (P::Ready | P::Offering, E::CreateOffer) => Ok(P::Offering),
            (P::Ready | P::Answering, E::RemoteOffer) => Ok(P::Answering),

            (P::Offering | P::Answering | P::Connected | P::Failed, E::PeerConnected) => Ok(P::Connected),
            (P::Offering | P::Answering | P::Connected, E::PeerFailed) => Ok(P::Failed),

            (phase, event) => Err(NegotiationError::InvalidTransition { phase, event }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("{event:?} is not allowed while {phase:?}")]
    InvalidTransition {
        phase: NegotiationPhase,
        event: NegotiationEvent,
    },
    #[error("only the initiator creates offers")]
    NotInitiator,
    #[error("only the responder answers offers")]
    NotResponder,
    #[error("negotiation is closed")]
    Closed,
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("malformed signal payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub struct Negotiator {
    role: Role,
    relay: SignalRelay,
    peer: Box<dyn PeerConnection>,
    media: Arc<dyn MediaDevices>,
    phase: NegotiationPhase,
    permission_granted: bool,
    local_stream: Option<LocalStream>,
    has_created_offer: bool,
    negotiating: bool,
    inbox: EventQueue<SignalingEnvelope>,
    pending_candidates: Vec<IceCandidate>,
}

impl Negotiator {
    pub fn new(role: Role, relay: SignalRelay, peer: Box<dyn PeerConnection>, media: Arc<dyn MediaDevices>) -> Self {
        Self {
            role,
            relay,
            peer,
            media,
            phase: NegotiationPhase::Idle,
            permission_granted: false,
            local_stream: None,
            has_created_offer: false,
            negotiating: false,
            inbox: EventQueue::new(),
            pending_candidates: Vec::new(),
        }
    }

    /// Reuses a stream captured for an earlier room instead of prompting again.
    pub fn with_stream(mut self, stream: LocalStream) -> Self {
        self.local_stream = Some(stream);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn room_id(&self) -> Uuid {
        self.relay.room_id()
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    pub fn permission_granted(&self) -> bool {
        self.permission_granted
    }

    pub fn has_created_offer(&self) -> bool {
        self.has_created_offer
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.peer.signaling_state()
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.local_stream.as_ref()
    }

    pub fn buffered_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Whether offers and answers may be processed.
    pub fn is_ready(&self) -> bool {
        self.permission_granted && self.local_stream.is_some() && self.phase != NegotiationPhase::Closed
    }

    /// Captures camera and microphone (or reuses the retained stream), attaches
    /// it, and then applies whatever arrived while waiting.
    pub async fn acquire_media(&mut self) -> Result<(), NegotiationError> {
        if self.is_ready() {
            return Ok(());
        }
        self.phase = self.phase.on(NegotiationEvent::RequestMedia, self.role)?;

        let stream = match self.local_stream.take() {
            Some(stream) => stream,
            None => match self.media.get_user_media(true, true).await {
                Ok(stream) => stream,
                Err(err) => {
                    self.permission_granted = false;
                    self.phase = self.phase.on(NegotiationEvent::MediaDenied, self.role)?;
                    tracing::warn!(room_id = %self.room_id(), error = %err, "local media unavailable");
                    return Err(err.into());
                }
            },
        };
        let attached = self.peer.add_stream(&stream).await;
        self.local_stream = Some(stream);
        if let Err(err) = attached {
            // back to idle so the user can retry
            self.permission_granted = false;
            self.phase = self.phase.on(NegotiationEvent::MediaDenied, self.role)?;
            tracing::warn!(room_id = %self.room_id(), error = %err, "attaching local media failed");
            return Err(err.into());
        }

        self.permission_granted = true;
        self.phase = self.phase.on(NegotiationEvent::MediaGranted, self.role)?;
        tracing::debug!(room_id = %self.room_id(), role = ?self.role, "local media attached");

        self.drain_inbox().await
    }

    /// Queues an envelope from the room feed. Returns false for envelopes not
    /// addressed to us and for ones already seen.
    pub fn enqueue(&mut self, envelope: SignalingEnvelope) -> bool {
        if !self.relay.accepts(&envelope) {
            return false;
        }
        let id = envelope.id;
        let queued = self.inbox.push(envelope);
        if !queued {
            tracing::debug!(room_id = %self.room_id(), envelope_id = %id, "duplicate signal ignored");
        }
        queued
    }

    pub async fn deliver(&mut self, envelope: SignalingEnvelope) -> Result<(), NegotiationError> {
        if self.enqueue(envelope) {
            self.drain_inbox().await?;
        }
        Ok(())
    }

    /// Pulls envelopes stored before the live feed was up. Returns how many
    /// were new.
    pub async fn catch_up(&mut self) -> Result<usize, NegotiationError> {
        let mut queued = 0;
        for envelope in self.relay.fetch_pending().await? {
            if self.enqueue(envelope) {
                queued += 1;
            }
        }
        tracing::debug!(room_id = %self.room_id(), queued, "signal catch-up");
        self.drain_inbox().await?;
        Ok(queued)
    }

    async fn drain_inbox(&mut self) -> Result<(), NegotiationError> {
        if !self.is_ready() {
            return Ok(());
        }
        while let Some(envelope) = self.inbox.pop() {
            self.apply(envelope).await?;
        }
        Ok(())
    }

    async fn apply(&mut self, envelope: SignalingEnvelope) -> Result<(), NegotiationError> {
        let room_id = envelope.room_id;
        match envelope.signal_type {
            SignalType::Offer | SignalType::Answer => {
                let desc: SessionDescription = match serde_json::from_value(envelope.signal_data) {
                    Ok(desc) => desc,
                    Err(err) => {
                        tracing::warn!(room_id = %room_id, error = %err, "dropping malformed description");
                        return Ok(());
                    }
                };
                match (envelope.signal_type, desc.sdp_type) {
                    (SignalType::Offer, SdpType::Offer) => self.on_remote_offer(desc).await,
                    (SignalType::Answer, SdpType::Answer) => self.on_remote_answer(desc).await,
                    (signal_type, sdp_type) => {
                        tracing::warn!(room_id = %room_id, %signal_type, ?sdp_type, "dropping mislabeled description");
                        Ok(())
                    }
                }
            }
            SignalType::IceCandidate => match serde_json::from_value(envelope.signal_data) {
                Ok(candidate) => self.on_remote_candidate(candidate).await,
                Err(err) => {
                    tracing::warn!(room_id = %room_id, error = %err, "dropping malformed candidate");
                    Ok(())
                }
            },
        }
    }

    async fn on_remote_offer(&mut self, offer: SessionDescription) -> Result<(), NegotiationError> {
        let phase = match self.phase.on(NegotiationEvent::RemoteOffer, self.role) {
            Ok(phase) => phase,
            Err(err) => {
                tracing::warn!(room_id = %self.room_id(), error = %err, "dropping offer");
                return Ok(());
            }
        };
        let state = self.peer.signaling_state();
        if next_signaling_state(state, StateChangeOp::SetRemote, SdpType::Offer).is_none() {
            tracing::warn!(room_id = %self.room_id(), %state, "dropping offer received mid-negotiation");
            return Ok(());
        }

        self.peer.set_remote_description(offer).await?;
        self.phase = phase;
        self.flush_candidates().await;

        let answer = self.peer.create_answer().await?;
        self.peer.set_local_description(answer.clone()).await?;
        self.relay.send(SignalType::Answer, serde_json::to_value(&answer)?).await?;
        tracing::info!(room_id = %self.room_id(), "answer sent");
        Ok(())
    }

    async fn on_remote_answer(&mut self, answer: SessionDescription) -> Result<(), NegotiationError> {
        let state = self.peer.signaling_state();
        if next_signaling_state(state, StateChangeOp::SetRemote, SdpType::Answer).is_none() {
            tracing::warn!(room_id = %self.room_id(), %state, "dropping stale answer");
            return Ok(());
        }

        self.peer.set_remote_description(answer).await?;
        self.negotiating = false;
        self.flush_candidates().await;
        tracing::debug!(room_id = %self.room_id(), "answer applied");
        Ok(())
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        if !self.peer.has_remote_description() {
            self.pending_candidates.push(candidate);
            tracing::debug!(room_id = %self.room_id(), buffered = self.pending_candidates.len(), "candidate buffered");
            return Ok(());
        }
        if let Err(err) = self.peer.add_ice_candidate(candidate).await {
            tracing::warn!(room_id = %self.room_id(), error = %err, "remote candidate rejected");
        }
        Ok(())
    }

    async fn flush_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(err) = self.peer.add_ice_candidate(candidate).await {
                tracing::warn!(room_id = %self.room_id(), error = %err, "buffered candidate rejected");
            }
        }
    }

    /// Creates and sends an offer. Returns false when one is already in
    /// flight or the connection is mid-exchange.
    pub async fn make_offer(&mut self) -> Result<bool, NegotiationError> {
        let phase = self.phase.on(NegotiationEvent::CreateOffer, self.role)?;
        if self.negotiating {
            tracing::debug!(room_id = %self.room_id(), "negotiation already running");
            return Ok(false);
        }
        if self.peer.signaling_state() != SignalingState::Stable {
            tracing::debug!(room_id = %self.room_id(), state = %self.peer.signaling_state(), "not stable, offer skipped");
            return Ok(false);
        }

        self.negotiating = true;
        if let Err(err) = self.send_offer().await {
            self.negotiating = false;
            return Err(err);
        }
        self.phase = phase;
        self.has_created_offer = true;
        Ok(true)
    }

    async fn send_offer(&mut self) -> Result<(), NegotiationError> {
        let offer = self.peer.create_offer().await?;
        self.peer.set_local_description(offer.clone()).await?;
        self.relay.send(SignalType::Offer, serde_json::to_value(&offer)?).await?;
        tracing::info!(room_id = %self.room_id(), "offer sent");
        Ok(())
    }

    pub async fn on_peer_event(&mut self, event: PeerEvent) -> Result<(), NegotiationError> {
        match event {
            PeerEvent::IceCandidate(candidate) => {
                let data = serde_json::to_value(&candidate)?;
                if let Err(err) = self.relay.send(SignalType::IceCandidate, data).await {
                    tracing::warn!(room_id = %self.room_id(), error = %err, "local candidate not relayed");
                }
            }
            PeerEvent::NegotiationNeeded => {
                if self.role == Role::Initiator && self.has_created_offer {
                    self.make_offer().await?;
                } else {
                    tracing::debug!(room_id = %self.room_id(), role = ?self.role, "negotiationneeded ignored");
                }
            }
            PeerEvent::ConnectionStateChanged(ConnectionState::Connected) => {
                if self.advance(NegotiationEvent::PeerConnected) {
                    tracing::info!(room_id = %self.room_id(), "peer connected");
                }
            }
            PeerEvent::ConnectionStateChanged(ConnectionState::Failed) => {
                if self.advance(NegotiationEvent::PeerFailed) {
                    tracing::warn!(room_id = %self.room_id(), "peer connection failed");
                }
            }
            PeerEvent::ConnectionStateChanged(state) => {
                tracing::debug!(room_id = %self.room_id(), ?state, "connection state");
            }
        }
        Ok(())
    }

    fn advance(&mut self, event: NegotiationEvent) -> bool {
        match self.phase.on(event, self.role) {
            Ok(phase) => {
                self.phase = phase;
                true
            }
            Err(err) => {
                tracing::warn!(room_id = %self.room_id(), error = %err, "ignored peer event");
                false
            }
        }
    }

    pub fn set_camera_enabled(&self, enabled: bool) {
        if let Some(stream) = &self.local_stream {
            stream.set_enabled(TrackKind::Video, enabled);
        }
    }

    pub fn set_microphone_enabled(&self, enabled: bool) {
        if let Some(stream) = &self.local_stream {
            stream.set_enabled(TrackKind::Audio, enabled);
        }
    }

    /// Closes the connection, forgets all buffered state and deletes this
    /// side's envelopes. The local stream is handed back when `keep_stream`
    /// is set, and stopped otherwise.
    pub async fn teardown(&mut self, keep_stream: bool) -> Option<LocalStream> {
        self.phase = NegotiationPhase::Closed;
        self.peer.close().await;
        self.pending_candidates.clear();
        self.inbox.clear();
        self.has_created_offer = false;
        self.negotiating = false;
        self.relay.purge().await;
        tracing::info!(room_id = %self.room_id(), "negotiation closed");

        let stream = self.local_stream.take();
        if keep_stream {
            return stream;
        }
        if let Some(stream) = stream {
            stream.stop();
        }
        self.permission_granted = false;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{now, RoomStatus};

    use NegotiationEvent as E;
    use NegotiationPhase as P;

    #[test]
    fn initiator_is_the_waiting_user() {
        let room = Room {
            id: Uuid::now_v7(),
            user1_id: "waiting".into(),
            user2_id: "joiner".into(),
            status: RoomStatus::Active,
            created_at: now(),
            ended_at: None,
        };
        assert_eq!(Role::for_participant(&room, "waiting"), Some(Role::Initiator));
        assert_eq!(Role::for_participant(&room, "joiner"), Some(Role::Responder));
        assert_eq!(Role::for_participant(&room, "someone"), None);
    }

    #[test]
    fn media_gates_negotiation() {
        let role = Role::Initiator;
        assert!(matches!(
            P::Idle.on(E::CreateOffer, role),
            Err(NegotiationError::InvalidTransition { .. })
        ));
        let waiting = P::Idle.on(E::RequestMedia, role).unwrap();
        assert_eq!(waiting.on(E::MediaDenied, role).unwrap(), P::Idle);
        let ready = waiting.on(E::MediaGranted, role).unwrap();
        assert_eq!(ready.on(E::CreateOffer, role).unwrap(), P::Offering);
    }

    #[test]
    fn only_one_side_offers() {
        assert!(matches!(
            P::Ready.on(E::CreateOffer, Role::Responder),
            Err(NegotiationError::NotInitiator)
        ));
        assert!(matches!(
            P::Ready.on(E::RemoteOffer, Role::Initiator),
            Err(NegotiationError::NotResponder)
        ));
        assert_eq!(P::Ready.on(E::RemoteOffer, Role::Responder).unwrap(), P::Answering);
    }

    #[test]
    fn renegotiation_keeps_connected_and_close_is_final() {
        let connected = P::Offering.on(E::PeerConnected, Role::Initiator).unwrap();
        assert_eq!(connected.on(E::CreateOffer, Role::Initiator).unwrap(), P::Connected);

        let closed = connected.on(E::Close, Role::Initiator).unwrap();
        assert!(matches!(closed.on(E::PeerConnected, Role::Initiator), Err(NegotiationError::Closed)));
        assert_eq!(closed.on(E::Close, Role::Initiator).unwrap(), P::Closed);
    }
}
