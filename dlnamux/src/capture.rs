//! Cycle de vie d'un enregistrement d'écran publié : source de capture
//! (affichage + encodeurs matériels), muxer et rappels d'état.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{AudioEncodeConfig, VideoEncodeConfig};
use crate::error::CaptureError;
use crate::frame::BufferInfo;
use crate::muxer::{Muxer, OpenStatus, PublishReport, StreamPublishTarget};
use crate::pool::PushOutcome;

/// Rappels de l'enregistreur. Toutes les méthodes ont un défaut vide.
pub trait RecorderCallback: Send + Sync {
    fn on_prepare(&self) {}

    fn on_start(&self) {}

    /// Temps écoulé depuis la première trame vidéo.
    fn on_recording(&self, _elapsed_ms: u64) {}

    fn on_stop(&self, _error: Option<&CaptureError>) {}

    fn on_destroy(&self) {}
}

/// Callback sans effet.
#[derive(Debug, Default)]
pub struct NoopRecorderCallback;

impl RecorderCallback for NoopRecorderCallback {}

struct RecordingClock {
    first_pts_us: Mutex<Option<i64>>,
    callback: Arc<dyn RecorderCallback>,
}

impl RecordingClock {
    fn tick(&self, pts_us: i64) {
        let first = *self.first_pts_us.lock().get_or_insert(pts_us);
        let elapsed_ms = (pts_us - first).max(0) as u64 / 1000;
        self.callback.on_recording(elapsed_ms);
    }
}

/// Sortie des encodeurs : appelée depuis les threads vidéo et audio.
#[derive(Clone)]
pub struct EncoderOutput {
    muxer: Arc<Muxer>,
    clock: Arc<RecordingClock>,
}

impl EncoderOutput {
    fn new(muxer: Arc<Muxer>, callback: Arc<dyn RecorderCallback>) -> Self {
        Self {
            muxer,
            clock: Arc::new(RecordingClock {
                first_pts_us: Mutex::new(None),
                callback,
            }),
        }
    }

    pub fn on_video(&self, buffer: &[u8], offset: usize, length: usize, info: &BufferInfo) -> PushOutcome {
        let outcome = self.muxer.write_video(buffer, offset, length, info);
        if outcome != PushOutcome::Closed && !info.flags.codec_config && !info.flags.end_of_stream {
            self.clock.tick(info.presentation_time_us);
        }
        outcome
    }

    pub fn on_audio(&self, buffer: &[u8], offset: usize, length: usize, info: &BufferInfo) -> PushOutcome {
        self.muxer.write_audio(buffer, offset, length, info)
    }
}

pub trait CaptureSource: Send {
    /// Démarre l'affichage virtuel et les encodeurs ; les trames arrivent
    /// ensuite sur `output` depuis les threads des encodeurs.
    fn start(&mut self, output: EncoderOutput) -> Result<(), CaptureError>;

    /// Arrête les encodeurs. Aucune trame ne doit plus arriver au retour.
    fn stop(&mut self);
}

pub trait CaptureSourceFactory: Send + Sync {
    fn create(
        &self,
        video: &VideoEncodeConfig,
        audio: &AudioEncodeConfig,
    ) -> Result<Box<dyn CaptureSource>, CaptureError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Prepared,
    Recording,
    Stopped,
    Destroyed,
}

pub struct CapturePipeline {
    muxer: Arc<Muxer>,
    factory: Arc<dyn CaptureSourceFactory>,
    callback: Arc<dyn RecorderCallback>,
    source: Option<Box<dyn CaptureSource>>,
    target: Option<StreamPublishTarget>,
    state: PipelineState,
}

impl CapturePipeline {
    pub fn new(
        muxer: Arc<Muxer>,
        factory: Arc<dyn CaptureSourceFactory>,
        callback: Arc<dyn RecorderCallback>,
    ) -> Self {
        Self {
            muxer,
            factory,
            callback,
            source: None,
            target: None,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == PipelineState::Recording
    }

    /// Préparé ou en cours d'enregistrement : un `stop()` est nécessaire.
    pub fn is_active(&self) -> bool {
        matches!(self.state, PipelineState::Prepared | PipelineState::Recording)
    }

    pub fn target(&self) -> Option<&StreamPublishTarget> {
        self.target.as_ref()
    }

    pub fn muxer(&self) -> &Arc<Muxer> {
        &self.muxer
    }

    /// Ouvre le muxer sur `target` et crée la source de capture. Une session
    /// précédente est d'abord arrêtée et vidée.
    pub fn prepare(&mut self, target: StreamPublishTarget) -> Result<OpenStatus, CaptureError> {
        if self.is_active() {
            self.stop();
        }

        let status = self.muxer.open(&target)?;
        let source = match self.factory.create(&target.video, &target.audio) {
            Ok(source) => source,
            Err(e) => {
                warn!("Capture source creation failed: {e}");
                self.muxer.close();
                return Err(e);
            }
        };

        debug!(url = %target.output_url, status = ?status, "Capture pipeline prepared");
        self.source = Some(source);
        self.target = Some(target);
        self.state = PipelineState::Prepared;
        self.callback.on_prepare();
        Ok(status)
    }

    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.state != PipelineState::Prepared {
            return Err(CaptureError::NotPrepared);
        }
        let Some(source) = self.source.as_mut() else {
            return Err(CaptureError::NotPrepared);
        };

        let output = EncoderOutput::new(self.muxer.clone(), self.callback.clone());
        self.callback.on_start();
        if let Err(e) = source.start(output) {
            warn!("Capture source failed to start: {e}");
            self.teardown(Some(&e));
            return Err(e);
        }

        self.state = PipelineState::Recording;
        info!("Capture started");
        Ok(())
    }

    /// Arrête la source puis ferme le muxer après vidage de la file.
    pub fn stop(&mut self) -> Option<PublishReport> {
        if !self.is_active() {
            return None;
        }
        let report = self.teardown(None);
        info!("Capture stopped");
        report
    }

    pub fn destroy(&mut self) {
        if self.state == PipelineState::Destroyed {
            return;
        }
        self.stop();
        self.target = None;
        self.state = PipelineState::Destroyed;
        self.callback.on_destroy();
    }

    fn teardown(&mut self, error: Option<&CaptureError>) -> Option<PublishReport> {
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
        let report = self.muxer.close();
        self.state = PipelineState::Stopped;
        self.callback.on_stop(error);
        report
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
