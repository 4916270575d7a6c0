use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use dlnamux::{
    AudioEncodeConfig, BufferInfo, CaptureError, CapturePipeline, CaptureSource,
    CaptureSourceFactory, EncoderOutput, FlvTag, FrameFlags, FrameSink, MuxError, Muxer,
    MuxerOptions, PipelineState, PublishConnector, RecorderCallback, RtmpUrl,
    StreamPublishTarget, TagKind, VideoEncodeConfig,
};
use parking_lot::Mutex;

const URL: &str = "rtmp://192.168.1.10:9577/live/mirror";
const FRAMES: i64 = 30;

struct SharedSink(Arc<Mutex<Vec<FlvTag>>>);

impl FrameSink for SharedSink {
    fn name(&self) -> &str {
        "memory"
    }

    fn write_tag(&mut self, tag: &FlvTag) -> std::io::Result<()> {
        self.0.lock().push(tag.clone());
        Ok(())
    }

    fn close(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MemoryConnector(Arc<Mutex<Vec<FlvTag>>>);

impl PublishConnector for MemoryConnector {
    fn connect(&self, _url: &RtmpUrl) -> Result<Box<dyn FrameSink>, MuxError> {
        Ok(Box::new(SharedSink(self.0.clone())))
    }
}

/// Deux « encodeurs » qui produisent un nombre fixe de trames.
struct ScriptedSource {
    deny: bool,
    workers: Vec<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
}

impl CaptureSource for ScriptedSource {
    fn start(&mut self, output: EncoderOutput) -> Result<(), CaptureError> {
        if self.deny {
            return Err(CaptureError::PermissionDenied);
        }

        let video = output.clone();
        self.workers.push(thread::spawn(move || {
            let config = [0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1F, 0xAC, 0, 0, 0, 1, 0x68, 0xEB];
            video.on_video(&config, 0, config.len(), &BufferInfo::new(500_000, FrameFlags::config()));
            for i in 0..FRAMES {
                let frame = [0, 0, 0, 1, 0x65, i as u8];
                video.on_video(&frame, 0, frame.len(), &BufferInfo::new(500_000 + i * 40_000, FrameFlags::key()));
            }
        }));

        let audio = output;
        self.workers.push(thread::spawn(move || {
            audio.on_audio(&[0x12, 0x10], 0, 2, &BufferInfo::new(480_000, FrameFlags::config()));
            for i in 0..FRAMES {
                audio.on_audio(&[0x21, i as u8], 0, 2, &BufferInfo::new(480_000 + i * 23_000, FrameFlags::default()));
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct ScriptedFactory {
    deny: bool,
    stopped: Arc<AtomicBool>,
}

impl CaptureSourceFactory for ScriptedFactory {
    fn create(
        &self,
        video: &VideoEncodeConfig,
        _audio: &AudioEncodeConfig,
    ) -> Result<Box<dyn CaptureSource>, CaptureError> {
        assert_eq!(video.width, 720);
        Ok(Box::new(ScriptedSource {
            deny: self.deny,
            workers: Vec::new(),
            stopped: self.stopped.clone(),
        }))
    }
}

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl RecorderCallback for EventLog {
    fn on_prepare(&self) {
        self.0.lock().push("prepare".into());
    }

    fn on_start(&self) {
        self.0.lock().push("start".into());
    }

    fn on_recording(&self, elapsed_ms: u64) {
        self.0.lock().push(format!("recording {elapsed_ms}"));
    }

    fn on_stop(&self, error: Option<&CaptureError>) {
        let label = match error {
            Some(CaptureError::PermissionDenied) => "stop denied",
            Some(_) => "stop error",
            None => "stop",
        };
        self.0.lock().push(label.into());
    }

    fn on_destroy(&self) {
        self.0.lock().push("destroy".into());
    }
}

fn pipeline(deny: bool) -> (CapturePipeline, Arc<Mutex<Vec<FlvTag>>>, Arc<EventLog>, Arc<AtomicBool>) {
    let tags = Arc::new(Mutex::new(Vec::new()));
    let connector = Arc::new(MemoryConnector(tags.clone()));
    let muxer = Arc::new(Muxer::with_connector(MuxerOptions::default(), connector));
    let stopped = Arc::new(AtomicBool::new(false));
    let factory = Arc::new(ScriptedFactory {
        deny,
        stopped: stopped.clone(),
    });
    let events = Arc::new(EventLog::default());
    (
        CapturePipeline::new(muxer, factory, events.clone()),
        tags,
        events,
        stopped,
    )
}

fn target() -> StreamPublishTarget {
    StreamPublishTarget::new(URL).with_video(VideoEncodeConfig {
        width: 720,
        height: 1280,
        ..VideoEncodeConfig::default()
    })
}

#[test]
fn full_recording_lifecycle() {
    let (mut pipeline, tags, events, stopped) = pipeline(false);
    assert!(matches!(pipeline.start(), Err(CaptureError::NotPrepared)));

    pipeline.prepare(target()).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Prepared);
    pipeline.start().unwrap();
    assert!(pipeline.is_recording());

    let report = pipeline.stop().unwrap();
    assert!(stopped.load(Ordering::SeqCst));
    assert!(!pipeline.muxer().is_open());
    assert_eq!(report.frames, (FRAMES as u64 + 1) * 2);

    let tags = tags.lock();
    assert_eq!(tags[0].kind, TagKind::Script);
    let video = tags.iter().filter(|t| t.kind == TagKind::Video).count();
    let audio = tags.iter().filter(|t| t.kind == TagKind::Audio).count();
    assert_eq!(video, FRAMES as usize + 1);
    assert_eq!(audio, FRAMES as usize + 1);

    // Timestamps non décroissants par flux
    for kind in [TagKind::Video, TagKind::Audio] {
        let ts: Vec<u32> = tags.iter().filter(|t| t.kind == kind).map(|t| t.timestamp_ms).collect();
        assert!(ts.windows(2).all(|w| w[0] <= w[1]), "{kind:?} {ts:?}");
    }

    pipeline.destroy();
    assert_eq!(pipeline.state(), PipelineState::Destroyed);

    let events = events.0.lock();
    assert_eq!(events.first().map(String::as_str), Some("prepare"));
    assert_eq!(events.get(1).map(String::as_str), Some("start"));
    assert!(events.contains(&"recording 0".to_string()));
    assert!(events.contains(&format!("recording {}", (FRAMES - 1) * 40)));
    assert_eq!(&events[events.len() - 2..], &["stop".to_string(), "destroy".to_string()]);
}

#[test]
fn permission_denied_tears_down_the_muxer() {
    let (mut pipeline, _tags, events, _) = pipeline(true);
    pipeline.prepare(target()).unwrap();
    assert!(pipeline.muxer().is_open());

    assert!(matches!(pipeline.start(), Err(CaptureError::PermissionDenied)));
    assert!(!pipeline.muxer().is_open());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(events.0.lock().contains(&"stop denied".to_string()));
}

#[test]
fn preparing_again_closes_the_previous_session() {
    let (mut pipeline, _tags, events, _) = pipeline(false);
    pipeline.prepare(target()).unwrap();
    pipeline.start().unwrap();
    pipeline.prepare(target()).unwrap();

    assert_eq!(pipeline.state(), PipelineState::Prepared);
    assert!(pipeline.muxer().is_open());
    let events = events.0.lock();
    let stop = events.iter().position(|e| e == "stop").unwrap();
    let second_prepare = events.iter().rposition(|e| e == "prepare").unwrap();
    assert!(stop < second_prepare);
}
