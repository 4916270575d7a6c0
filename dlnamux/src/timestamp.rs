//! Index de présentation par flux.
//!
//! L'index avance de `|delta| / 1000` ms à chaque trame (division entière sur
//! le delta en microsecondes). La valeur absolue masque les pts qui reculent :
//! l'index reste croissant mais peut dériver de l'horloge réelle.

use parking_lot::Mutex;

use crate::frame::StreamKind;

#[derive(Clone, Copy, Debug, Default)]
struct TimeIndexCounter {
    last_time_us: i64,
    time_index: u32,
}

impl TimeIndexCounter {
    fn advance(&mut self, current_us: i64) -> u32 {
        // Une base nulle ou négative est considérée comme absente
        if self.last_time_us <= 0 {
            self.last_time_us = current_us;
        }
        let delta = current_us.saturating_sub(self.last_time_us);
        self.last_time_us = current_us;

        let step = u32::try_from((delta / 1000).unsigned_abs()).unwrap_or(u32::MAX);
        self.time_index = self.time_index.saturating_add(step);
        self.time_index
    }
}

/// Compteurs vidéo et audio indépendants, appelables depuis deux threads
/// d'encodeur.
#[derive(Debug, Default)]
pub struct FrameTimestampNormalizer {
    video: Mutex<TimeIndexCounter>,
    audio: Mutex<TimeIndexCounter>,
}

impl FrameTimestampNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, kind: StreamKind) -> &Mutex<TimeIndexCounter> {
        match kind {
            StreamKind::Video => &self.video,
            StreamKind::Audio => &self.audio,
        }
    }

    pub fn normalize(&self, kind: StreamKind, presentation_time_us: i64) -> u32 {
        self.counter(kind).lock().advance(presentation_time_us)
    }

    pub fn current(&self, kind: StreamKind) -> u32 {
        self.counter(kind).lock().time_index
    }

    pub fn reset(&self) {
        *self.video.lock() = TimeIndexCounter::default();
        *self.audio.lock() = TimeIndexCounter::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_index_is_zero_and_grows() {
        let n = FrameTimestampNormalizer::new();
        assert_eq!(n.normalize(StreamKind::Video, 5_000_000), 0);
        assert_eq!(n.normalize(StreamKind::Video, 5_016_666), 16);
        assert_eq!(n.normalize(StreamKind::Video, 5_033_333), 32);
        // Flux indépendants
        assert_eq!(n.normalize(StreamKind::Audio, 9_000_000), 0);
        assert_eq!(n.current(StreamKind::Video), 32);
    }

    #[test]
    fn backwards_pts_still_advances() {
        let n = FrameTimestampNormalizer::new();
        n.normalize(StreamKind::Audio, 2_000_000);
        n.normalize(StreamKind::Audio, 2_100_000);
        assert_eq!(n.normalize(StreamKind::Audio, 2_050_000), 150);
    }

    #[test]
    fn zero_baseline_is_replaced() {
        let n = FrameTimestampNormalizer::new();
        // pts 0 (config) : la trame suivante redevient la base
        assert_eq!(n.normalize(StreamKind::Video, 0), 0);
        assert_eq!(n.normalize(StreamKind::Video, 40_000), 0);
        assert_eq!(n.normalize(StreamKind::Video, 80_000), 40);
    }

    #[test]
    fn reset_zeroes_both_streams() {
        let n = FrameTimestampNormalizer::new();
        n.normalize(StreamKind::Video, 1_000_000);
        n.normalize(StreamKind::Video, 2_000_000);
        n.normalize(StreamKind::Audio, 1_000_000);
        n.normalize(StreamKind::Audio, 1_500_000);
        n.reset();
        assert_eq!(n.current(StreamKind::Video), 0);
        assert_eq!(n.current(StreamKind::Audio), 0);
        assert_eq!(n.normalize(StreamKind::Video, 7_000_000), 0);
    }

    #[test]
    fn sub_millisecond_steps_are_truncated() {
        let n = FrameTimestampNormalizer::new();
        n.normalize(StreamKind::Video, 1_000);
        let mut last = 0;
        for i in 1..10 {
            let index = n.normalize(StreamKind::Video, 1_000 + i * 999);
            assert!(index >= last);
            last = index;
        }
        assert_eq!(last, 0);
    }
}
