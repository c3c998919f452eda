#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard,
};

use async_trait::async_trait;
use strangerlink::{
    client::{
        next_signaling_state, IceCandidate, LocalStream, MediaDevices, MediaError, PeerConnection, PeerError,
        PeerEvent, PeerFactory, SessionDescription, SignalingState, StateChangeOp,
    },
    feed::ChangeFeed,
    hub::Hub,
    matcher::MatcherConfig,
    model::{Gender, Room},
    proto::{JoinRequest, MatchOutcome},
    store::MemoryStore,
};
use tokio::sync::mpsc;

pub fn hub() -> Hub {
    Hub::new(Arc::new(MemoryStore::new()), MatcherConfig::default(), ChangeFeed::new(256))
}

/// Puts `waiting` in the queue, then matches `joiner` against it.
pub async fn pair(hub: &Hub, waiting: &str, joiner: &str) -> Room {
    hub.join_queue(JoinRequest::new(waiting, Gender::Male)).await.unwrap();
    match hub.join_queue(JoinRequest::new(joiner, Gender::Female)).await.unwrap() {
        MatchOutcome::Matched { room, .. } => room,
        MatchOutcome::Waiting => panic!("{joiner} should have matched {waiting}"),
    }
}

#[derive(Debug, Default)]
pub struct PeerLog {
    pub state: SignalingState,
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    pub remote_sets: usize,
    pub offers_created: usize,
    pub answers_created: usize,
    pub candidates: Vec<IceCandidate>,
    pub streams: usize,
    pub closed: bool,
    /// Makes `add_stream` fail while set.
    pub refuse_streams: bool,
}

/// An in-memory peer connection that refuses any description the signaling
/// state table does not allow.
pub struct FakePeer {
    name: String,
    log: Arc<Mutex<PeerLog>>,
}

impl FakePeer {
    pub fn new(name: &str) -> (Self, Arc<Mutex<PeerLog>>) {
        let log = Arc::new(Mutex::new(PeerLog::default()));
        (Self { name: name.to_owned(), log: log.clone() }, log)
    }

    fn log(&self) -> MutexGuard<'_, PeerLog> {
        self.log.lock().unwrap()
    }

    fn apply(&self, op: StateChangeOp, desc: SessionDescription) -> Result<(), PeerError> {
        let mut log = self.log();
        let state = log.state;
        let next = next_signaling_state(state, op, desc.sdp_type).ok_or(PeerError::InvalidState {
            state,
            op,
            sdp_type: desc.sdp_type,
        })?;
        log.state = next;
        match op {
            StateChangeOp::SetLocal => log.local = Some(desc),
            StateChangeOp::SetRemote => {
                log.remote_sets += 1;
                log.remote = Some(desc);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    fn signaling_state(&self) -> SignalingState {
        self.log().state
    }

    fn has_remote_description(&self) -> bool {
        self.log().remote.is_some()
    }

    async fn add_stream(&mut self, _stream: &LocalStream) -> Result<(), PeerError> {
        let mut log = self.log();
        if log.refuse_streams {
            return Err(PeerError::Other("track rejected".into()));
        }
        log.streams += 1;
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, PeerError> {
        let mut log = self.log();
        if log.closed {
            return Err(PeerError::Closed);
        }
        log.offers_created += 1;
        Ok(SessionDescription::offer(format!("offer {} #{}", self.name, log.offers_created)))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, PeerError> {
        let mut log = self.log();
        if log.state != SignalingState::HaveRemoteOffer {
            return Err(PeerError::Other(format!("no remote offer in {}", log.state)));
        }
        log.answers_created += 1;
        Ok(SessionDescription::answer(format!("answer {} #{}", self.name, log.answers_created)))
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), PeerError> {
        self.apply(StateChangeOp::SetLocal, desc)
    }

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), PeerError> {
        self.apply(StateChangeOp::SetRemote, desc)
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), PeerError> {
        let mut log = self.log();
        if log.remote.is_none() {
            return Err(PeerError::Other("candidate before remote description".into()));
        }
        log.candidates.push(candidate);
        Ok(())
    }

    async fn close(&mut self) {
        let mut log = self.log();
        log.closed = true;
        log.state = SignalingState::Closed;
    }
}

pub struct PeerHandle {
    pub log: Arc<Mutex<PeerLog>>,
    pub events: mpsc::UnboundedSender<PeerEvent>,
}

#[derive(Default)]
pub struct FakePeerFactory {
    created: Mutex<Vec<PeerHandle>>,
}

impl FakePeerFactory {
    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn log(&self, index: usize) -> Arc<Mutex<PeerLog>> {
        self.created.lock().unwrap()[index].log.clone()
    }

    pub fn emit(&self, index: usize, event: PeerEvent) {
        let _ = self.created.lock().unwrap()[index].events.send(event);
    }
}

impl PeerFactory for FakePeerFactory {
    fn create(&self) -> Result<(Box<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>), PeerError> {
        let mut created = self.created.lock().unwrap();
        let (peer, log) = FakePeer::new(&format!("peer-{}", created.len()));
        let (events, rx) = mpsc::unbounded_channel();
        created.push(PeerHandle { log, events });
        Ok((Box::new(peer), rx))
    }
}

#[derive(Default)]
pub struct FakeMedia {
    pub deny: AtomicBool,
    pub prompts: AtomicUsize,
}

impl FakeMedia {
    pub fn denying() -> Self {
        Self { deny: AtomicBool::new(true), prompts: AtomicUsize::new(0) }
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn get_user_media(&self, _video: bool, _audio: bool) -> Result<LocalStream, MediaError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }
        Ok(LocalStream::camera_and_microphone())
    }
}

pub fn candidate(n: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_m_line_index: Some(0),
    }
}
