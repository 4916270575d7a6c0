//! Indicateur de durée d'enregistrement (« Length: MM:SS »).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dlnamux::{CaptureError, RecorderCallback};
use tracing::{debug, info, warn};

use crate::events::{CastEvent, CastEventBus};

pub trait RecordingIndicator: Send + Sync {
    /// Appelé au plus une fois par seconde d'enregistrement.
    fn recording(&self, elapsed_ms: u64);

    fn clear(&self);
}

/// `MM:SS`, ou `H:MM:SS` au-delà d'une heure.
pub fn format_elapsed(elapsed_ms: u64) -> String {
    let secs = elapsed_ms / 1000;
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

pub fn recording_label(elapsed_ms: u64) -> String {
    format!("Length: {}", format_elapsed(elapsed_ms))
}

/// Indicateur par défaut : trace + `CastEvent::RecordingElapsed`.
pub struct BusIndicator {
    bus: CastEventBus,
}

impl BusIndicator {
    pub fn new(bus: CastEventBus) -> Self {
        Self { bus }
    }
}

impl RecordingIndicator for BusIndicator {
    fn recording(&self, elapsed_ms: u64) {
        let label = recording_label(elapsed_ms);
        info!(elapsed_ms, "{label}");
        self.bus
            .broadcast(CastEvent::RecordingElapsed { elapsed_ms, label });
    }

    fn clear(&self) {
        debug!("Recording indicator cleared");
    }
}

const NOT_REPORTED: u64 = u64::MAX;

/// Relie les rappels du pipeline de capture à l'indicateur, en limitant les
/// mises à jour à une par seconde écoulée.
pub(crate) struct IndicatorCallback {
    indicator: Arc<dyn RecordingIndicator>,
    last_second: AtomicU64,
}

impl IndicatorCallback {
    pub(crate) fn new(indicator: Arc<dyn RecordingIndicator>) -> Self {
        Self {
            indicator,
            last_second: AtomicU64::new(NOT_REPORTED),
        }
    }
}

impl RecorderCallback for IndicatorCallback {
    fn on_start(&self) {
        self.last_second.store(NOT_REPORTED, Ordering::Relaxed);
    }

    fn on_recording(&self, elapsed_ms: u64) {
        let second = elapsed_ms / 1000;
        if self.last_second.swap(second, Ordering::Relaxed) != second {
            self.indicator.recording(elapsed_ms);
        }
    }

    fn on_stop(&self, error: Option<&CaptureError>) {
        if let Some(e) = error {
            warn!("Recording stopped on error: {e}");
        }
        self.last_second.store(NOT_REPORTED, Ordering::Relaxed);
        self.indicator.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Option<u64>>>);

    impl RecordingIndicator for Collect {
        fn recording(&self, elapsed_ms: u64) {
            self.0.lock().push(Some(elapsed_ms));
        }

        fn clear(&self) {
            self.0.lock().push(None);
        }
    }

    #[test]
    fn labels() {
        assert_eq!(recording_label(0), "Length: 00:00");
        assert_eq!(recording_label(61_999), "Length: 01:01");
        assert_eq!(format_elapsed(3_723_000), "1:02:03");
    }

    #[test]
    fn one_update_per_second() {
        let collect = Arc::new(Collect::default());
        let callback = IndicatorCallback::new(collect.clone());
        callback.on_start();
        for ms in [0, 16, 33, 999, 1000, 1500, 2100, 2200] {
            callback.on_recording(ms);
        }
        callback.on_stop(None);
        assert_eq!(
            *collect.0.lock(),
            vec![Some(0), Some(1000), Some(2100), None]
        );
    }
}
