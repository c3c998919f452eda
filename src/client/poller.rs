//! The matchmaking client: join, wait (polling), talk, leave, next.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use uuid::Uuid;

use super::{
    backend::{Backend, ClientError, ClientResult, Subscription},
    call::Call,
    dedup::EventQueue,
    negotiation::{Negotiator, Role},
    peer::{LocalStream, MediaDevices, PeerFactory},
    relay::SignalRelay,
};
use crate::{
    error::Error,
    model::{now, Message, Room, RoomStatus},
    proto::{Change, JoinRequest, MatchOutcome, NewMessage},
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How often `check_match` is called while searching.
    pub poll_interval: Duration,
    /// Pause before the initiator's first offer, so the peer's feed is up.
    pub offer_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            offer_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Searching,
    Connected,
    Disconnected,
}

#[derive(Debug)]
pub enum ClientEvent {
    Matched { room: Room, shared_interests: Vec<String> },
    /// The peer ended the room.
    PeerLeft { room_id: Uuid },
    Message(Message),
    /// Searching stopped on an error; the client is idle again.
    SearchFailed(ClientError),
}

struct Poll {
    task: JoinHandle<()>,
    rx: mpsc::Receiver<ClientResult<MatchOutcome>>,
}

impl Drop for Poll {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Next {
    Poll(Option<ClientResult<MatchOutcome>>),
    Feed(Option<Change>),
}

#[derive(Clone)]
struct Media {
    peers: Arc<dyn PeerFactory>,
    devices: Arc<dyn MediaDevices>,
}

pub struct MatchClient {
    backend: Arc<dyn Backend>,
    media: Option<Media>,
    config: ClientConfig,
    user_id: String,
    state: PollerState,
    room: Option<Room>,
    shared_interests: Vec<String>,
    last_request: Option<JoinRequest>,
    messages: Vec<Message>,
    seen_messages: EventQueue<Message>,
    poll: Option<Poll>,
    subscription: Option<Subscription>,
    call: Option<Call>,
    local_stream: Option<LocalStream>,
}

impl MatchClient {
    pub fn new(backend: Arc<dyn Backend>, user_id: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            backend,
            media: None,
            config,
            user_id: user_id.into(),
            state: PollerState::Idle,
            room: None,
            shared_interests: Vec::new(),
            last_request: None,
            messages: Vec::new(),
            seen_messages: EventQueue::new(),
            poll: None,
            subscription: None,
            call: None,
            local_stream: None,
        }
    }

    /// Enables video calls: every room gets a negotiated peer connection.
    pub fn with_media(mut self, peers: Arc<dyn PeerFactory>, devices: Arc<dyn MediaDevices>) -> Self {
        self.media = Some(Media { peers, devices });
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.room.as_ref().and_then(|room| room.peer_of(&self.user_id))
    }

    pub fn shared_interests(&self) -> &[String] {
        &self.shared_interests
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn call(&self) -> Option<&Call> {
        self.call.as_ref()
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub async fn online_count(&self) -> ClientResult<u64> {
        self.backend.online_count().await
    }

    /// Joins the queue. Matches immediately when a compatible stranger is
    /// waiting, otherwise starts polling.
    pub async fn join(&mut self, mut req: JoinRequest) -> ClientResult<PollerState> {
        if matches!(self.state, PollerState::Searching | PollerState::Connected) {
            self.leave().await?;
        }
        req.user_id = self.user_id.clone();
        self.last_request = Some(req.clone());
        self.state = PollerState::Searching;

        match self.backend.join_queue(req).await {
            Ok(MatchOutcome::Matched { room, shared_interests }) => {
                self.enter_room(room, shared_interests).await?;
            }
            Ok(MatchOutcome::Waiting) => self.start_poll(),
            Err(err) => {
                tracing::warn!(user_id = %self.user_id, error = %err, "join failed");
                self.state = PollerState::Idle;
                return Err(err);
            }
        }
        Ok(self.state)
    }

    fn start_poll(&mut self) {
        self.poll = None;

        let backend = self.backend.clone();
        let user_id = self.user_id.clone();
        let period = self.config.poll_interval;
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = backend.check_match(&user_id).await;
                if let Ok(MatchOutcome::Waiting) = outcome {
                    tracing::debug!(user_id = %user_id, "still waiting");
                    continue;
                }
                let _ = tx.send(outcome).await;
                break;
            }
        });
        self.poll = Some(Poll { task, rx });
    }

    async fn enter_room(&mut self, room: Room, shared_interests: Vec<String>) -> ClientResult<()> {
        self.poll = None;
        let subscription = match self.backend.subscribe(room.id, &self.user_id).await {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::warn!(room_id = %room.id, error = %err, "room feed unavailable, leaving");
                if let Err(err) = self.backend.leave_room(&self.user_id, room.id).await {
                    tracing::warn!(room_id = %room.id, error = %err, "leave after failed subscribe");
                }
                self.state = PollerState::Idle;
                return Err(err);
            }
        };

        self.subscription = Some(subscription);
        self.messages.clear();
        self.seen_messages.clear();
        self.shared_interests = shared_interests;
        self.call = self.start_call(&room);
        tracing::info!(user_id = %self.user_id, room_id = %room.id, "connected");
        self.room = Some(room);
        self.state = PollerState::Connected;
        Ok(())
    }

    fn start_call(&mut self, room: &Room) -> Option<Call> {
        let media = self.media.clone()?;
        let role = Role::for_participant(room, &self.user_id)?;
        let relay = SignalRelay::new(self.backend.clone(), room, &self.user_id).ok()?;
        let (peer, events) = match media.peers.create() {
            Ok(created) => created,
            Err(err) => {
                tracing::warn!(room_id = %room.id, error = %err, "no peer connection, text only");
                return None;
            }
        };

        let mut negotiator = Negotiator::new(role, relay, peer, media.devices);
        if let Some(stream) = self.local_stream.take() {
            negotiator = negotiator.with_stream(stream);
        }
        Some(Call::start(negotiator, events, self.config.offer_delay))
    }

    /// Waits for the next thing worth telling the user about. Returns `None`
    /// when there is nothing left to wait on.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        loop {
            if self.poll.is_none() && self.subscription.is_none() {
                return None;
            }

            let next = tokio::select! {
                outcome = poll_recv(self.poll.as_mut()) => Next::Poll(outcome),
                change = feed_recv(self.subscription.as_mut()) => Next::Feed(change),
            };

            match next {
                Next::Poll(Some(Ok(MatchOutcome::Matched { room, shared_interests }))) => {
                    let event = ClientEvent::Matched { room: room.clone(), shared_interests: shared_interests.clone() };
                    return Some(match self.enter_room(room, shared_interests).await {
                        Ok(()) => event,
                        Err(err) => ClientEvent::SearchFailed(err),
                    });
                }
                Next::Poll(Some(Ok(MatchOutcome::Waiting))) => {}
                Next::Poll(Some(Err(err))) => {
                    tracing::warn!(user_id = %self.user_id, error = %err, "polling stopped");
                    self.poll = None;
                    self.state = PollerState::Idle;
                    return Some(ClientEvent::SearchFailed(err));
                }
                Next::Poll(None) => self.poll = None,
                Next::Feed(Some(change)) => {
                    if let Some(event) = self.on_change(change).await {
                        return Some(event);
                    }
                }
                Next::Feed(None) => {
                    tracing::warn!(user_id = %self.user_id, "room feed closed");
                    self.subscription = None;
                }
            }
        }
    }

    async fn on_change(&mut self, change: Change) -> Option<ClientEvent> {
        let room_id = self.room.as_ref()?.id;
        match change {
            Change::RoomUpdated { room } if room.id == room_id && room.status == RoomStatus::Ended => {
                tracing::info!(user_id = %self.user_id, room_id = %room_id, "peer left");
                self.drop_room(true).await;
                self.state = PollerState::Disconnected;
                Some(ClientEvent::PeerLeft { room_id })
            }
            Change::RoomUpdated { .. } => None,
            Change::SignalInserted { signal } => {
                if let Some(call) = &self.call {
                    call.deliver(signal);
                }
                None
            }
            // our own sends are already applied
            Change::MessageInserted { message } if message.sender_id == self.user_id => None,
            Change::MessageInserted { message } => {
                if !self.seen_messages.mark_seen(message.id) {
                    return None;
                }
                self.messages.push(message.clone());
                Some(ClientEvent::Message(message))
            }
        }
    }

    /// Appends the message locally, then sends it. A failed send takes the
    /// local copy back out.
    pub async fn send_message(&mut self, content: &str) -> ClientResult<Message> {
        let room_id = self.room.as_ref().map(|room| room.id).ok_or(ClientError::NoRoom)?;
        let local_id = Uuid::now_v7();
        self.messages.push(Message {
            id: local_id,
            room_id,
            sender_id: self.user_id.clone(),
            content: content.trim().to_owned(),
            created_at: now(),
        });

        let sent = self
            .backend
            .send_message(room_id, NewMessage { sender_id: self.user_id.clone(), content: content.to_owned() })
            .await;
        let slot = self.messages.iter().position(|m| m.id == local_id);
        match (sent, slot) {
            (Ok(message), Some(slot)) => {
                self.seen_messages.mark_seen(message.id);
                self.messages[slot] = message.clone();
                Ok(message)
            }
            (Ok(message), None) => Ok(message),
            (Err(err), slot) => {
                if let Some(slot) = slot {
                    self.messages.remove(slot);
                }
                tracing::debug!(room_id = %room_id, error = %err, "message rolled back");
                Err(err)
            }
        }
    }

    pub fn set_camera_enabled(&self, enabled: bool) {
        if let Some(call) = &self.call {
            call.set_camera_enabled(enabled);
        }
    }

    pub fn set_microphone_enabled(&self, enabled: bool) {
        if let Some(call) = &self.call {
            call.set_microphone_enabled(enabled);
        }
    }

    /// Leaves the room or the queue. Local state is cleared even when the
    /// server call fails.
    pub async fn leave(&mut self) -> ClientResult<()> {
        let result = self.withdraw(false).await;
        self.state = PollerState::Idle;
        result
    }

    /// Leaves whatever we are in and joins again with the last request. The
    /// camera stream is kept so the user is not prompted again.
    pub async fn find_next(&mut self) -> ClientResult<PollerState> {
        let req = self.last_request.clone().ok_or(ClientError::NeverJoined)?;
        if let Err(err) = self.withdraw(true).await {
            tracing::warn!(user_id = %self.user_id, error = %err, "leave before next failed");
        }
        self.state = PollerState::Idle;
        self.join(req).await
    }

    /// Enters a known room with a known peer, skipping the queue.
    pub async fn connect_direct(&mut self, room: Room) -> ClientResult<()> {
        if !room.has_participant(&self.user_id) {
            return Err(Error::NotParticipant { user_id: self.user_id.clone(), room_id: room.id }.into());
        }
        if !room.is_active() {
            return Err(Error::RoomNotActive(room.id).into());
        }
        if let Err(err) = self.withdraw(true).await {
            tracing::warn!(user_id = %self.user_id, error = %err, "leave before direct connect failed");
        }

        let room_id = room.id;
        self.enter_room(room, Vec::new()).await?;
        for message in self.backend.messages(room_id, &self.user_id).await? {
            if self.seen_messages.mark_seen(message.id) {
                self.messages.push(message);
            }
        }
        Ok(())
    }

    /// Stops polling, unsubscribes, hangs up, then tells the server.
    async fn withdraw(&mut self, keep_stream: bool) -> ClientResult<()> {
        let was_searching = self.poll.take().is_some() || self.state == PollerState::Searching;
        let room = self.drop_room(keep_stream).await;

        if let Some(room) = room {
            self.backend.leave_room(&self.user_id, room.id).await?;
            tracing::info!(user_id = %self.user_id, room_id = %room.id, "left room");
        } else if was_searching {
            self.backend.leave_queue(&self.user_id).await?;
            tracing::debug!(user_id = %self.user_id, "left queue");
        }
        Ok(())
    }

    async fn drop_room(&mut self, keep_stream: bool) -> Option<Room> {
        self.subscription = None;
        if let Some(call) = self.call.take() {
            self.local_stream = call.hang_up(keep_stream).await;
        }
        if !keep_stream {
            if let Some(stream) = self.local_stream.take() {
                stream.stop();
            }
        }
        self.shared_interests.clear();
        self.room.take()
    }
}

async fn poll_recv(poll: Option<&mut Poll>) -> Option<ClientResult<MatchOutcome>> {
    match poll {
        Some(poll) => poll.rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn feed_recv(subscription: Option<&mut Subscription>) -> Option<Change> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
