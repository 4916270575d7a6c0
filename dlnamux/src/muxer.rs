//! Muxer : reçoit les trames des encodeurs et les publie via un thread
//! d'envoi dédié.
//!
//! ```text
//! encodeur vidéo ─┐                          ┌─> RtmpPublisher
//!                 ├─> BoundedFramePool ─> sender ─┤
//! encodeur audio ─┘                          └─> FlvFileSink (optionnel)
//! ```
//!
//! Les écritures ne touchent jamais le réseau : elles copient la trame dans
//! un buffer recyclé et la mettent en file.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use dlnaconfig::Config;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::config::{AudioEncodeConfig, VideoEncodeConfig};
use crate::error::{MuxError, status};
use crate::flv::{self, FlvPackager, FlvTag, TagKind};
use crate::frame::{BufferInfo, StreamKind};
use crate::pool::{BoundedFramePool, PushOutcome};
use crate::rtmp::{PublishOptions, RtmpUrl};
use crate::sink::{FlvFileSink, FrameSink, PublishConnector, RtmpConnector};
use crate::timestamp::FrameTimestampNormalizer;

const SENDER_THREAD: &str = "dlna-frame-sender";

/// Destination d'une session de publication. Immuable une fois ouverte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamPublishTarget {
    pub output_url: String,
    /// Miroir FLV local, optionnel
    pub output_file_path: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub video: VideoEncodeConfig,
    pub audio: AudioEncodeConfig,
}

impl StreamPublishTarget {
    pub fn new(output_url: impl Into<String>) -> Self {
        let video = VideoEncodeConfig::default();
        Self {
            output_url: output_url.into(),
            output_file_path: None,
            width: video.width,
            height: video.height,
            video,
            audio: AudioEncodeConfig::default(),
        }
    }

    pub fn with_file_mirror(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file_path = Some(path.into());
        self
    }

    pub fn with_video(mut self, video: VideoEncodeConfig) -> Self {
        self.width = video.width;
        self.height = video.height;
        self.video = video;
        self
    }

    pub fn with_audio(mut self, audio: AudioEncodeConfig) -> Self {
        self.audio = audio;
        self
    }

    fn metadata(&self) -> FlvTag {
        let video = VideoEncodeConfig {
            width: self.width,
            height: self.height,
            ..self.video.clone()
        };
        FlvTag::new(TagKind::Script, 0, flv::on_metadata(&video, &self.audio))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenStatus {
    Connected,
    /// Serveur injoignable : seul le miroir fichier est alimenté.
    NotConnected,
}

impl OpenStatus {
    pub fn code(self) -> i32 {
        match self {
            OpenStatus::Connected => status::CONNECTED,
            OpenStatus::NotConnected => status::NOT_CONNECTED,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MuxerOptions {
    pub queue_capacity: usize,
    pub free_buffers: usize,
}

impl Default for MuxerOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            free_buffers: 16,
        }
    }
}

impl MuxerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue_capacity: config.get_queue_capacity(),
            free_buffers: config.get_free_buffers(),
        }
    }
}

/// Bilan d'une session, rendu par [`Muxer::close`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub frames: u64,
    pub tags: u64,
    /// Trames ignorées faute d'en-tête de séquence
    pub skipped: u64,
    pub evicted: u64,
    pub failed_sinks: Vec<String>,
}

struct ActiveSession {
    url: String,
    status: OpenStatus,
    pool: Arc<BoundedFramePool>,
    sender: JoinHandle<PublishReport>,
}

pub struct Muxer {
    options: MuxerOptions,
    connector: Arc<dyn PublishConnector>,
    normalizer: FrameTimestampNormalizer,
    active: Mutex<Option<ActiveSession>>,
    pool: RwLock<Option<Arc<BoundedFramePool>>>,
    dropped: AtomicU64,
}

impl Muxer {
    pub fn new(options: MuxerOptions, publish: PublishOptions) -> Self {
        Self::with_connector(options, Arc::new(RtmpConnector::new(publish)))
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            MuxerOptions::from_config(config),
            PublishOptions::from_config(config),
        )
    }

    pub fn with_connector(options: MuxerOptions, connector: Arc<dyn PublishConnector>) -> Self {
        Self {
            options,
            connector,
            normalizer: FrameTimestampNormalizer::new(),
            active: Mutex::new(None),
            pool: RwLock::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// Ouvre une session de publication et démarre le thread d'envoi.
    pub fn open(&self, target: &StreamPublishTarget) -> Result<OpenStatus, MuxError> {
        let mut active = self.active.lock();
        if let Some(session) = active.as_ref() {
            return Err(MuxError::AlreadyOpen(session.url.clone()));
        }

        let raw_url = target.output_url.trim();
        if raw_url.is_empty() {
            return Err(MuxError::EmptyOutputUrl);
        }
        let url = RtmpUrl::parse(raw_url)?;

        let mut sinks: Vec<Box<dyn FrameSink>> = Vec::with_capacity(2);
        let status = match self.connector.connect(&url) {
            Ok(sink) => {
                sinks.push(sink);
                OpenStatus::Connected
            }
            Err(e) if target.output_file_path.is_some() => {
                warn!(url = raw_url, "Media server unreachable, file mirror only: {e}");
                OpenStatus::NotConnected
            }
            Err(e) => return Err(e),
        };
        if let Some(path) = &target.output_file_path {
            sinks.push(Box::new(FlvFileSink::create(path)?));
        }

        self.normalizer.reset();
        let pool = Arc::new(BoundedFramePool::new(
            self.options.queue_capacity,
            self.options.free_buffers,
        ));
        let worker_pool = pool.clone();
        let metadata = target.metadata();
        let sender = thread::Builder::new()
            .name(SENDER_THREAD.into())
            .spawn(move || run_sender(worker_pool, sinks, metadata))
            .map_err(MuxError::Worker)?;

        *self.pool.write() = Some(pool.clone());
        *active = Some(ActiveSession {
            url: raw_url.to_string(),
            status,
            pool,
            sender,
        });
        info!(url = raw_url, status = ?status, "Muxer opened");
        Ok(status)
    }

    pub fn write_video(&self, buffer: &[u8], offset: usize, length: usize, info: &BufferInfo) -> PushOutcome {
        self.write(StreamKind::Video, buffer, offset, length, info)
    }

    pub fn write_audio(&self, buffer: &[u8], offset: usize, length: usize, info: &BufferInfo) -> PushOutcome {
        self.write(StreamKind::Audio, buffer, offset, length, info)
    }

    fn write(
        &self,
        kind: StreamKind,
        buffer: &[u8],
        offset: usize,
        length: usize,
        info: &BufferInfo,
    ) -> PushOutcome {
        let Some(pool) = self.pool.read().clone() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(kind = kind.as_str(), "Write while closed, frame dropped");
            return PushOutcome::Closed;
        };

        let Some(payload) = offset
            .checked_add(length)
            .and_then(|end| buffer.get(offset..end))
        else {
            warn!(kind = kind.as_str(), offset, length, len = buffer.len(), "Frame range out of buffer");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return PushOutcome::Closed;
        };

        let timestamp = self.normalizer.normalize(kind, info.presentation_time_us);
        let outcome = pool.push_copy(kind, payload, timestamp, info.flags);
        if outcome == PushOutcome::Closed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Ferme la file aux producteurs, laisse le thread d'envoi vider les
    /// trames restantes puis ferme les destinations. Sans effet si le muxer
    /// n'est pas ouvert.
    pub fn close(&self) -> Option<PublishReport> {
        let mut active = self.active.lock();
        let session = active.take()?;
        self.pool.write().take();
        session.pool.close();

        match session.sender.join() {
            Ok(mut report) => {
                report.evicted = session.pool.evicted();
                info!(
                    url = %session.url,
                    frames = report.frames,
                    tags = report.tags,
                    evicted = report.evicted,
                    "Muxer closed"
                );
                Some(report)
            }
            Err(_) => {
                error!(url = %session.url, "Frame sender thread panicked");
                None
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.active.lock().is_some()
    }

    /// URL de publication de la session ouverte.
    pub fn media_path(&self) -> Option<String> {
        self.active.lock().as_ref().map(|s| s.url.clone())
    }

    pub fn open_status(&self) -> Option<OpenStatus> {
        self.active.lock().as_ref().map(|s| s.status)
    }

    /// Trames refusées (muxer fermé ou plage invalide).
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Index de présentation courant d'un flux, en ms.
    pub fn current_timestamp(&self, kind: StreamKind) -> u32 {
        self.normalizer.current(kind)
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_sender(
    pool: Arc<BoundedFramePool>,
    mut sinks: Vec<Box<dyn FrameSink>>,
    metadata: FlvTag,
) -> PublishReport {
    let mut report = PublishReport::default();
    let mut healthy = vec![true; sinks.len()];
    let mut packager = FlvPackager::new();

    deliver(&mut sinks, &mut healthy, &metadata, &mut report);
    while let Some(frame) = pool.pop() {
        report.frames += 1;
        for tag in packager.package(&frame) {
            deliver(&mut sinks, &mut healthy, &tag, &mut report);
        }
        pool.recycle(frame);
    }
    report.skipped = packager.skipped();

    for sink in sinks.iter_mut() {
        if let Err(e) = sink.close() {
            warn!(sink = sink.name(), "Sink close failed: {e}");
        }
    }
    debug!(frames = report.frames, "Frame sender done");
    report
}

/// Une destination en erreur est écartée pour le reste de la session, les
/// autres continuent.
fn deliver(
    sinks: &mut [Box<dyn FrameSink>],
    healthy: &mut [bool],
    tag: &FlvTag,
    report: &mut PublishReport,
) {
    let mut written = false;
    for (sink, ok) in sinks.iter_mut().zip(healthy.iter_mut()) {
        if !*ok {
            continue;
        }
        match sink.write_tag(tag) {
            Ok(()) => written = true,
            Err(e) => {
                error!(sink = sink.name(), ts = tag.timestamp_ms, "Write failed, sink disabled: {e}");
                *ok = false;
                report.failed_sinks.push(sink.name().to_string());
            }
        }
    }
    if written {
        report.tags += 1;
    }
}
