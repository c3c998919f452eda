use std::time::Duration;

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{sleep, Instant},
};
use uuid::Uuid;

use super::{
    negotiation::{NegotiationPhase, Negotiator, Role},
    peer::{LocalStream, PeerEvent, SignalingState},
};
use crate::model::SignalingEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStatus {
    pub phase: NegotiationPhase,
    pub permission_granted: bool,
    pub signaling: SignalingState,
    pub has_created_offer: bool,
}

impl CallStatus {
    fn of(negotiator: &Negotiator) -> Self {
        Self {
            phase: negotiator.phase(),
            permission_granted: negotiator.permission_granted(),
            signaling: negotiator.signaling_state(),
            has_created_offer: negotiator.has_created_offer(),
        }
    }
}

enum Control {
    Signal(SignalingEnvelope),
    Camera(bool),
    Microphone(bool),
    RetryMedia,
}

/// One running negotiation, owned by a background task. Dropping the handle
/// tears the call down and stops the local tracks.
pub struct Call {
    room_id: Uuid,
    controls: mpsc::UnboundedSender<Control>,
    shutdown: oneshot::Sender<bool>,
    task: JoinHandle<Option<LocalStream>>,
    status: watch::Receiver<CallStatus>,
}

impl Call {
    /// Starts negotiating: captures media, catches up on stored envelopes and,
    /// on the initiator, sends the first offer after `offer_delay`.
    pub fn start(negotiator: Negotiator, peer_events: mpsc::UnboundedReceiver<PeerEvent>, offer_delay: Duration) -> Self {
        let room_id = negotiator.room_id();
        let (controls, controls_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let (status_tx, status) = watch::channel(CallStatus::of(&negotiator));
        let task = tokio::spawn(drive(negotiator, peer_events, controls_rx, shutdown_rx, status_tx, offer_delay));

        Self { room_id, controls, shutdown, task, status }
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    pub fn status(&self) -> CallStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<CallStatus> {
        self.status.clone()
    }

    pub fn deliver(&self, envelope: SignalingEnvelope) {
        let _ = self.controls.send(Control::Signal(envelope));
    }

    pub fn set_camera_enabled(&self, enabled: bool) {
        let _ = self.controls.send(Control::Camera(enabled));
    }

    pub fn set_microphone_enabled(&self, enabled: bool) {
        let _ = self.controls.send(Control::Microphone(enabled));
    }

    /// Prompts for media again after a denial.
    pub fn retry_media(&self) {
        let _ = self.controls.send(Control::RetryMedia);
    }

    /// Tears the call down and waits for cleanup to finish. With `keep_stream`
    /// the local stream is returned live for the next room.
    pub async fn hang_up(self, keep_stream: bool) -> Option<LocalStream> {
        let _ = self.shutdown.send(keep_stream);
        match self.task.await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(room_id = %self.room_id, error = %err, "call task ended abnormally");
                None
            }
        }
    }
}

async fn drive(
    mut negotiator: Negotiator,
    mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    mut controls: mpsc::UnboundedReceiver<Control>,
    mut shutdown: oneshot::Receiver<bool>,
    status: watch::Sender<CallStatus>,
    offer_delay: Duration,
) -> Option<LocalStream> {
    let room_id = negotiator.room_id();
    let offer_timer = sleep(offer_delay);
    tokio::pin!(offer_timer);
    let mut offer_due = false;

    // stored envelopes wait in the inbox until media is attached
    if let Err(err) = negotiator.catch_up().await {
        tracing::warn!(room_id = %room_id, error = %err, "signal catch-up failed");
    }
    match negotiator.acquire_media().await {
        Ok(()) => offer_due = negotiator.role() == Role::Initiator,
        Err(err) => tracing::warn!(room_id = %room_id, error = %err, "negotiation waiting for media"),
    }
    offer_timer.as_mut().reset(Instant::now() + offer_delay);
    status.send_replace(CallStatus::of(&negotiator));

    loop {
        tokio::select! {
            keep = &mut shutdown => {
                let stream = negotiator.teardown(keep.unwrap_or(false)).await;
                status.send_replace(CallStatus::of(&negotiator));
                return stream;
            }
            Some(control) = controls.recv() => match control {
                Control::Signal(envelope) => {
                    if let Err(err) = negotiator.deliver(envelope).await {
                        tracing::warn!(room_id = %room_id, error = %err, "signal not applied");
                    }
                }
                Control::Camera(enabled) => negotiator.set_camera_enabled(enabled),
                Control::Microphone(enabled) => negotiator.set_microphone_enabled(enabled),
                Control::RetryMedia => match negotiator.acquire_media().await {
                    Ok(()) => {
                        if negotiator.role() == Role::Initiator && !negotiator.has_created_offer() {
                            offer_due = true;
                            offer_timer.as_mut().reset(Instant::now() + offer_delay);
                        }
                    }
                    Err(err) => tracing::warn!(room_id = %room_id, error = %err, "media still unavailable"),
                },
            },
            Some(event) = peer_events.recv() => {
                if let Err(err) = negotiator.on_peer_event(event).await {
                    tracing::warn!(room_id = %room_id, error = %err, "peer event failed");
                }
            }
            () = &mut offer_timer, if offer_due => {
                offer_due = false;
                if let Err(err) = negotiator.make_offer().await {
                    tracing::warn!(room_id = %room_id, error = %err, "initial offer failed");
                }
            }
        }
        status.send_replace(CallStatus::of(&negotiator));
    }
}
