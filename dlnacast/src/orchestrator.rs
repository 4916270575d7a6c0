//! Point d'entrée applicatif : découverte, connexion à un renderer, envoi
//! de médias et mirroring de l'écran.
//!
//! Toutes les opérations qui touchent la session de contrôle ou le pipeline
//! de capture s'exécutent sur un unique thread (`dlna-control-worker`) :
//! elles sont donc sérialisées, et un démontage se termine toujours avant la
//! mise en place suivante.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use dlnaconfig::Config;
use dlnacontrol::{
    ActionInvoker, ControlError, ControlSession, Device, DeviceId, DeviceListListener,
    DeviceRegistry, DiscoveryOptions, MediaDescriptor, MediaKind, PlaybackState,
    SoapActionInvoker, SsdpDiscovery, SubscriptionId, codes,
};
use dlnamux::{
    AudioEncodeConfig, CaptureError, CapturePipeline, CaptureSourceFactory, Muxer, MuxerOptions,
    OpenStatus, PublishConnector, PublishOptions, RtmpConnector, StreamPublishTarget,
    VideoEncodeConfig,
};
use dlnautils::MediaOrigin;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::commands::{Command, CommandOutcome, CommandResult, Payload, PendingCommand};
use crate::events::{CastEvent, CastEventBus};
use crate::indicator::{BusIndicator, IndicatorCallback, RecordingIndicator};

const WORKER_THREAD_NAME: &str = "dlna-control-worker";
const MIRROR_MEDIA_NAME: &str = "mirror";

/// Collaborateurs de l'orchestrateur.
pub struct CastContext {
    pub config: Config,
    pub registry: DeviceRegistry,
    pub invoker: Arc<dyn ActionInvoker>,
    pub origin: MediaOrigin,
    pub capture: Arc<dyn CaptureSourceFactory>,
    pub connector: Arc<dyn PublishConnector>,
    /// `None` : [`BusIndicator`]
    pub indicator: Option<Arc<dyn RecordingIndicator>>,
}

impl CastContext {
    /// Contexte de production : SOAP sur HTTP, publication RTMP réelle.
    pub fn from_config(config: Config, capture: Arc<dyn CaptureSourceFactory>) -> io::Result<Self> {
        let registry = DeviceRegistry::new(config.get_search_mx())?;
        let invoker = Arc::new(SoapActionInvoker::new(Duration::from_secs(
            config.get_control_http_timeout_secs(),
        )));
        let origin = MediaOrigin::new(
            config.get_lan_ip(),
            config.get_http_port(),
            config.get_rtmp_port(),
        )
        .with_media_root(config.get_media_root())
        .with_rtmp_app(config.get_rtmp_app());
        let connector = Arc::new(RtmpConnector::new(PublishOptions::from_config(&config)));

        Ok(Self {
            config,
            registry,
            invoker,
            origin,
            capture,
            connector,
            indicator: None,
        })
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn ActionInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn with_origin(mut self, origin: MediaOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn PublishConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_indicator(mut self, indicator: Arc<dyn RecordingIndicator>) -> Self {
        self.indicator = Some(indicator);
        self
    }
}

/// Variantes d'une session de mirroring.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MirrorOptions {
    /// Copie FLV locale du flux publié
    pub file_mirror: Option<PathBuf>,
    pub video: Option<VideoEncodeConfig>,
    pub audio: Option<AudioEncodeConfig>,
}

type Task = Box<dyn FnOnce(&Shared) + Send>;

enum Job {
    Command(Command, Sender<CommandResult>),
    Task(Task),
    Shutdown,
}

struct Shared {
    registry: DeviceRegistry,
    session: Mutex<ControlSession>,
    pipeline: Mutex<CapturePipeline>,
    events: CastEventBus,
    mirror_url: String,
    video: VideoEncodeConfig,
    audio: AudioEncodeConfig,
}

pub struct CastOrchestrator {
    shared: Arc<Shared>,
    jobs: Sender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
    discovery: Mutex<Option<SsdpDiscovery>>,
    discovery_options: DiscoveryOptions,
    device_watch: Mutex<Option<SubscriptionId>>,
    destroyed: AtomicBool,
}

impl CastOrchestrator {
    /// Démarre le thread de contrôle et relaie la liste des renderers sur
    /// le bus d'événements. La découverte réseau attend [`init`](Self::init).
    pub fn new(context: CastContext) -> io::Result<Self> {
        let CastContext {
            config,
            registry,
            invoker,
            origin,
            capture,
            connector,
            indicator,
        } = context;

        let events = CastEventBus::new();
        let indicator: Arc<dyn RecordingIndicator> = match indicator {
            Some(indicator) => indicator,
            None => Arc::new(BusIndicator::new(events.clone())),
        };
        let muxer = Arc::new(Muxer::with_connector(
            MuxerOptions::from_config(&config),
            connector,
        ));
        let pipeline = CapturePipeline::new(
            muxer,
            capture,
            Arc::new(IndicatorCallback::new(indicator)),
        );
        let mirror_url = origin.rtmp_url(&config.get_mirror_stream());

        let shared = Arc::new(Shared {
            registry: registry.clone(),
            session: Mutex::new(ControlSession::new(registry.clone(), invoker, origin)),
            pipeline: Mutex::new(pipeline),
            events: events.clone(),
            mirror_url,
            video: VideoEncodeConfig::from_config(&config),
            audio: AudioEncodeConfig::from_config(&config),
        });

        let (jobs, rx) = unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || run_worker(worker_shared, rx))?;

        let bus = events.clone();
        let device_watch = registry.subscribe(move |devices: &[Device]| {
            bus.broadcast(CastEvent::DevicesChanged(devices.to_vec()));
        });

        Ok(Self {
            shared,
            jobs,
            worker: Mutex::new(Some(worker)),
            discovery: Mutex::new(None),
            discovery_options: DiscoveryOptions::from_config(&config),
            device_watch: Mutex::new(Some(device_watch)),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Lance la découverte SSDP.
    pub fn init(&self) -> io::Result<()> {
        let mut discovery = self.discovery.lock();
        if discovery.is_none() {
            *discovery = Some(SsdpDiscovery::spawn(
                self.shared.registry.clone(),
                self.discovery_options.clone(),
            )?);
            self.shared.registry.search(None);
        }
        Ok(())
    }

    /// Arrête le mirroring, libère le renderer, puis la découverte et le
    /// registre. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down cast orchestrator");

        if let Err(e) = self.run(|shared| shared.teardown()) {
            debug!("Control worker already gone: {e}");
        }
        if let Some(mut discovery) = self.discovery.lock().take() {
            discovery.stop();
        }
        if let Some(id) = self.device_watch.lock().take() {
            self.shared.registry.unsubscribe(id);
        }
        self.shared.registry.shutdown();

        let _ = self.jobs.send(Job::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("Control worker thread panicked");
            }
        }
    }

    pub fn events(&self) -> Receiver<CastEvent> {
        self.shared.events.subscribe()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.shared.registry.devices()
    }

    pub fn subscribe_devices<L>(&self, listener: L) -> SubscriptionId
    where
        L: DeviceListListener + 'static,
    {
        self.shared.registry.subscribe(listener)
    }

    pub fn unsubscribe_devices(&self, id: SubscriptionId) {
        self.shared.registry.unsubscribe(id);
    }

    /// `timeout_secs` devient le MX du M-SEARCH.
    pub fn search(&self, timeout_secs: Option<u32>) {
        self.shared.registry.search(timeout_secs);
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.session.lock().state()
    }

    pub fn connected_device(&self) -> Option<Device> {
        self.shared.session.lock().device().cloned()
    }

    pub fn is_mirroring(&self) -> bool {
        self.shared.pipeline.lock().is_recording()
    }

    pub fn mirror_url(&self) -> &str {
        &self.shared.mirror_url
    }

    pub fn connect(&self, id: &DeviceId) -> Result<(), ControlError> {
        let id = id.clone();
        self.run_reporting(move |shared| shared.connect(&id))
    }

    pub fn disconnect(&self) -> Result<(), ControlError> {
        self.run_reporting(|shared| shared.disconnect())
    }

    /// Envoie un média local ou distant au renderer et lance la lecture.
    pub fn cast(&self, media: MediaDescriptor) -> Result<(), ControlError> {
        self.run_reporting(move |shared| shared.cast(media))
    }

    pub fn start_mirror(&self) -> Result<(), ControlError> {
        self.start_mirror_with(MirrorOptions::default())
    }

    pub fn start_mirror_with(&self, options: MirrorOptions) -> Result<(), ControlError> {
        self.run_reporting(move |shared| shared.start_mirror(&options))
    }

    pub fn stop_mirror(&self) -> Result<(), ControlError> {
        self.run_reporting(|shared| shared.stop_mirror())
    }

    /// Met une commande de lecture en file sur le thread de contrôle.
    pub fn submit(&self, command: Command) -> PendingCommand {
        let (tx, rx) = bounded(1);
        let name = command.name();
        if self.jobs.send(Job::Command(command, tx)).is_err() {
            // Thread arrêté : le récepteur rendra NotReady
            debug!(command = name, "Control worker stopped, command dropped");
        }
        PendingCommand::new(rx)
    }

    fn run<T, F>(&self, task: F) -> Result<T, ControlError>
    where
        T: Send + 'static,
        F: FnOnce(&Shared) -> T + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let job = Job::Task(Box::new(move |shared: &Shared| {
            let _ = tx.send(task(shared));
        }));
        self.jobs.send(job).map_err(|_| ControlError::NotReady)?;
        rx.recv().map_err(|_| ControlError::NotReady)
    }

    /// Comme `run`, et publie `CastEvent::Failure` en cas d'erreur.
    fn run_reporting<F>(&self, task: F) -> Result<(), ControlError>
    where
        F: FnOnce(&Shared) -> Result<(), ControlError> + Send + 'static,
    {
        let result = self.run(task).and_then(|r| r);
        if let Err(e) = &result {
            self.shared.events.broadcast(CastEvent::Failure {
                kind: e.kind(),
                message: format!("{}: {e}", e.user_message()),
            });
        }
        result
    }
}

impl Drop for CastOrchestrator {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn run_worker(shared: Arc<Shared>, jobs: Receiver<Job>) {
    debug!("Control worker started");
    for job in jobs.iter() {
        match job {
            Job::Command(command, reply) => {
                let result = shared.execute(&command);
                let _ = reply.send(result);
            }
            Job::Task(task) => task(&shared),
            Job::Shutdown => break,
        }
    }
    debug!("Control worker stopped");
}

/// Identifiant du média miroir : l'URL de publication en base64.
pub fn mirror_media_id(url: &str) -> String {
    STANDARD.encode(url)
}

fn capture_error(err: CaptureError) -> ControlError {
    match err {
        CaptureError::Publish(e) => ControlError::PublishOpenFailure {
            code: e.code(),
            message: e.to_string(),
        },
        CaptureError::PermissionDenied => ControlError::CapturePermissionDenied,
        CaptureError::Unavailable(reason) => ControlError::BindFailure(reason),
        other @ CaptureError::NotPrepared => ControlError::BindFailure(other.to_string()),
    }
}

impl Shared {
    fn execute(&self, command: &Command) -> CommandResult {
        let mut session = self.session.lock();
        let before = session.state();
        let result = match command {
            Command::Play => session.play().map(|_| CommandOutcome::Done),
            Command::Pause => session.pause().map(|_| CommandOutcome::Done),
            Command::Stop => session.stop().map(|_| CommandOutcome::Done),
            Command::Seek(secs) => session.seek(*secs).map(|_| CommandOutcome::Done),
            Command::SetVolume(level) => session.set_volume(*level).map(|_| CommandOutcome::Done),
            Command::Mute(mute) => session.mute(*mute).map(|_| CommandOutcome::Done),
            Command::GetPosition => session
                .get_position_info()
                .map(|info| CommandOutcome::Received(Payload::Position(info))),
            Command::GetVolume => session
                .get_volume()
                .map(|volume| CommandOutcome::Received(Payload::Volume(volume))),
            Command::GetTransportState => session
                .get_transport_info()
                .map(|_| CommandOutcome::Received(Payload::State(session.state()))),
        };
        let after = session.state();
        drop(session);

        match &result {
            Ok(_) => debug!(command = command.name(), "Command done"),
            Err(e) => {
                warn!(command = command.name(), code = e.code(), "Command failed: {e}");
                self.events.broadcast(CastEvent::Failure {
                    kind: e.kind(),
                    message: format!("{}: {e}", e.user_message()),
                });
            }
        }
        if after != before {
            self.events.broadcast(CastEvent::PlaybackChanged(after));
        }
        result
    }

    fn connect(&self, id: &DeviceId) -> Result<(), ControlError> {
        let Some(device) = self.registry.device(id) else {
            let err = ControlError::ConnectFailure(format!("unknown device {id}"));
            self.connect_failed(id, &err);
            return Err(err);
        };

        let previous = self
            .session
            .lock()
            .device()
            .map(|current| current.id.clone())
            .filter(|current| current != id);
        // Un device refusé laisse le mirroring en place
        if previous.is_some() && device.is_renderer() && !device.is_connected() {
            self.stop_mirror()?;
        }

        let result = self.session.lock().connect(&device);
        match &result {
            Ok(()) => {
                if let Some(previous) = previous {
                    self.events.broadcast(CastEvent::Disconnected {
                        device: previous,
                        code: codes::DISCONNECT_SUCCESS,
                    });
                }
                self.events.broadcast(CastEvent::Connected {
                    device: id.clone(),
                    code: codes::CONNECT_SUCCESS,
                });
            }
            Err(e) => self.connect_failed(id, e),
        }
        result
    }

    fn connect_failed(&self, id: &DeviceId, err: &ControlError) {
        warn!(device = %id, "Connect failed: {err}");
        self.events.broadcast(CastEvent::ConnectFailed {
            device: id.clone(),
            code: err.code(),
            message: err.to_string(),
        });
    }

    fn disconnect(&self) -> Result<(), ControlError> {
        self.stop_mirror()?;

        let mut session = self.session.lock();
        let device = session.device().map(|d| d.id.clone());
        session.disconnect()?;
        drop(session);

        if let Some(device) = device {
            self.events.broadcast(CastEvent::Disconnected {
                device,
                code: codes::DISCONNECT_SUCCESS,
            });
        }
        self.events
            .broadcast(CastEvent::PlaybackChanged(PlaybackState::Disconnected));
        Ok(())
    }

    fn cast(&self, media: MediaDescriptor) -> Result<(), ControlError> {
        if self.pipeline.lock().is_active() {
            self.stop_mirror()?;
        }
        self.play_media(media)
    }

    fn play_media(&self, media: MediaDescriptor) -> Result<(), ControlError> {
        let mut session = self.session.lock();
        let before = session.state();
        let result = session.set_source(media).and_then(|_| session.start());
        let after = session.state();
        drop(session);

        if after != before {
            self.events.broadcast(CastEvent::PlaybackChanged(after));
        }
        result
    }

    fn mirror_target(&self, options: &MirrorOptions) -> StreamPublishTarget {
        let mut target = StreamPublishTarget::new(&self.mirror_url)
            .with_video(options.video.clone().unwrap_or_else(|| self.video.clone()))
            .with_audio(options.audio.clone().unwrap_or_else(|| self.audio.clone()));
        if let Some(path) = &options.file_mirror {
            target = target.with_file_mirror(path);
        }
        target
    }

    fn start_mirror(&self, options: &MirrorOptions) -> Result<(), ControlError> {
        // Session refusée avant tout contact avec l'origine RTMP
        if !self.session.lock().is_ready() {
            return Err(ControlError::NotReady);
        }
        let target = self.mirror_target(options);

        let mut pipeline = self.pipeline.lock();
        if pipeline.is_recording() && pipeline.target() == Some(&target) {
            debug!(url = %target.output_url, "Mirror already running");
            return Ok(());
        }
        if pipeline.is_active() {
            info!("Replacing the running mirror session");
            pipeline.stop();
            self.events.broadcast(CastEvent::MirrorStopped);
        }

        let status = pipeline.prepare(target).map_err(capture_error)?;
        if status == OpenStatus::NotConnected {
            warn!(url = %self.mirror_url, "Media server unreachable, recording to file only");
        }
        pipeline.start().map_err(capture_error)?;
        drop(pipeline);

        let media = MediaDescriptor::new(
            MediaKind::MirrorStream,
            mirror_media_id(&self.mirror_url),
            MIRROR_MEDIA_NAME,
            self.mirror_url.clone(),
        );
        if let Err(e) = self.play_media(media) {
            self.pipeline.lock().stop();
            return Err(e);
        }

        info!(url = %self.mirror_url, "Mirroring started");
        self.events.broadcast(CastEvent::MirrorStarted {
            url: self.mirror_url.clone(),
        });
        Ok(())
    }

    fn stop_mirror(&self) -> Result<(), ControlError> {
        let report = {
            let mut pipeline = self.pipeline.lock();
            if !pipeline.is_active() {
                return Ok(());
            }
            pipeline.stop()
        };
        if let Some(report) = report {
            debug!(frames = report.frames, evicted = report.evicted, "Mirror session drained");
        }

        let mut session = self.session.lock();
        let mirroring = session
            .media()
            .is_some_and(|m| m.kind == MediaKind::MirrorStream);
        if mirroring
            && matches!(
                session.state(),
                PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Buffering
            )
        {
            if let Err(e) = session.stop() {
                warn!("Renderer did not stop the mirror stream: {e}");
            }
        }
        drop(session);

        info!("Mirroring stopped");
        self.events.broadcast(CastEvent::MirrorStopped);
        Ok(())
    }

    fn teardown(&self) {
        if let Err(e) = self.stop_mirror() {
            warn!("Mirror teardown failed: {e}");
        }
        let connected = self.session.lock().device().is_some();
        if connected {
            if let Err(e) = self.disconnect() {
                warn!("Disconnect during shutdown failed: {e}");
            }
        }
        self.pipeline.lock().destroy();
    }
}
