use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use dlnacontrol::{Device, DeviceId, FailureKind, PlaybackState};
use parking_lot::Mutex;

/// Événements publiés vers l'interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CastEvent {
    DevicesChanged(Vec<Device>),
    /// `code` : `codes::CONNECT_SUCCESS`
    Connected { device: DeviceId, code: i32 },
    ConnectFailed { device: DeviceId, code: i32, message: String },
    /// `code` : `codes::DISCONNECT_SUCCESS`
    Disconnected { device: DeviceId, code: i32 },
    PlaybackChanged(PlaybackState),
    MirrorStarted { url: String },
    MirrorStopped,
    /// `Length: MM:SS`
    RecordingElapsed { elapsed_ms: u64, label: String },
    Failure { kind: FailureKind, message: String },
}

#[derive(Clone, Default)]
pub struct CastEventBus {
    subscribers: Arc<Mutex<Vec<Sender<CastEvent>>>>,
}

impl CastEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<CastEvent> {
        let (tx, rx) = unbounded::<CastEvent>();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Les abonnés dont le récepteur a disparu sont retirés.
    pub fn broadcast(&self, event: CastEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
