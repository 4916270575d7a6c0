//! File bornée entre les encodeurs (producteurs) et le thread d'envoi.
//!
//! Débordement : la plus ancienne trame non-config est évincée ; si toutes
//! les trames en attente sont des configs, la plus ancienne part. Les buffers
//! évincés ou consommés reviennent dans une liste libre bornée.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::frame::{EncodedFrame, StreamKind};

/// Résultat d'un `push`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// File pleine : une trame plus ancienne de ce flux a été évincée.
    Evicted(StreamKind),
    /// Pool fermé : la trame est rejetée et son buffer recyclé.
    Closed,
}

#[derive(Debug, Default)]
struct PoolState {
    queue: VecDeque<EncodedFrame>,
    free: Vec<Vec<u8>>,
    closed: bool,
    evicted: u64,
}

#[derive(Debug)]
pub struct BoundedFramePool {
    state: Mutex<PoolState>,
    available: Condvar,
    capacity: usize,
    free_capacity: usize,
}

impl BoundedFramePool {
    /// `capacity` trames en attente au plus (au moins 1), `free_capacity`
    /// buffers conservés pour réutilisation.
    pub fn new(capacity: usize, free_capacity: usize) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
            capacity: capacity.max(1),
            free_capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Trames évincées depuis la création du pool.
    pub fn evicted(&self) -> u64 {
        self.state.lock().evicted
    }

    pub fn free_buffers(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Buffer vide, recyclé si possible.
    pub fn take_buffer(&self) -> Vec<u8> {
        self.state.lock().free.pop().unwrap_or_default()
    }

    /// Copie `payload` dans un buffer recyclé puis met la trame en file.
    pub fn push_copy(
        &self,
        kind: StreamKind,
        payload: &[u8],
        timestamp_ms: u32,
        flags: crate::frame::FrameFlags,
    ) -> PushOutcome {
        let mut data = self.take_buffer();
        data.extend_from_slice(payload);
        self.push(EncodedFrame::new(kind, data, timestamp_ms, flags))
    }

    pub fn push(&self, frame: EncodedFrame) -> PushOutcome {
        let mut state = self.state.lock();
        if state.closed {
            Self::recycle_locked(&mut state, frame.data, self.free_capacity);
            return PushOutcome::Closed;
        }

        let mut outcome = PushOutcome::Queued;
        if state.queue.len() >= self.capacity {
            let victim = state
                .queue
                .iter()
                .position(|f| !f.is_config())
                .unwrap_or(0);
            if let Some(old) = state.queue.remove(victim) {
                trace!(kind = old.kind.as_str(), ts = old.timestamp_ms, "Frame evicted");
                outcome = PushOutcome::Evicted(old.kind);
                state.evicted += 1;
                Self::recycle_locked(&mut state, old.data, self.free_capacity);
            }
        }

        state.queue.push_back(frame);
        drop(state);
        self.available.notify_one();
        outcome
    }

    /// Prochaine trame ; bloque tant que la file est vide et ouverte.
    /// `None` une fois le pool fermé et vidé.
    pub fn pop(&self) -> Option<EncodedFrame> {
        let mut state = self.state.lock();
        loop {
            if let Some(frame) = state.queue.pop_front() {
                return Some(frame);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Rend le buffer d'une trame consommée.
    pub fn recycle(&self, frame: EncodedFrame) {
        let mut state = self.state.lock();
        Self::recycle_locked(&mut state, frame.data, self.free_capacity);
    }

    /// Ferme le pool aux producteurs ; les trames en file restent à consommer.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    fn recycle_locked(state: &mut PoolState, mut data: Vec<u8>, free_capacity: usize) {
        if state.free.len() < free_capacity {
            data.clear();
            state.free.push(data);
        }
    }
}
