use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use dlnacast::{CastContext, CastOrchestrator, Command, CommandOutcome, Payload, init_logging};
use dlnaconfig::Config;
use dlnacontrol::{Device, MediaDescriptor, MediaKind};
use dlnamux::{
    AudioEncodeConfig, CaptureError, CaptureSource, CaptureSourceFactory, VideoEncodeConfig,
};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "simpledlna", version, about = "Cast media to DLNA renderers")]
struct Cli {
    /// Répertoire de configuration (défaut : $SIMPLEDLNA_CONFIG, ./.simpledlna, ~/.simpledlna)
    #[arg(long, global = true, default_value = "")]
    config_dir: String,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Liste les renderers visibles sur le réseau local
    Discover {
        /// Durée d'écoute en secondes
        #[arg(long)]
        wait: Option<u64>,
    },
    /// Envoie un fichier (servi par l'origine HTTP) ou une URL au renderer
    Cast {
        /// UDN ou nom du renderer
        #[arg(long)]
        device: String,
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Délai maximal de découverte du renderer, en secondes
        #[arg(long, default_value_t = 10)]
        wait: u64,
        source: String,
    },
    /// Commande de lecture sur un renderer
    Control {
        #[arg(long)]
        device: String,
        #[arg(long, default_value_t = 10)]
        wait: u64,
        #[command(subcommand)]
        op: ControlOp,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Video,
    Audio,
    Image,
}

impl From<KindArg> for MediaKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Video => MediaKind::Video,
            KindArg::Audio => MediaKind::Audio,
            KindArg::Image => MediaKind::Image,
        }
    }
}

#[derive(Subcommand, Debug)]
enum ControlOp {
    Play,
    Pause,
    Stop,
    /// Position absolue en secondes
    Seek { secs: u64 },
    /// 0..=100
    Volume { level: u16 },
    Mute {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
    Position,
}

impl ControlOp {
    fn command(&self) -> Command {
        match self {
            ControlOp::Play => Command::Play,
            ControlOp::Pause => Command::Pause,
            ControlOp::Stop => Command::Stop,
            ControlOp::Seek { secs } => Command::Seek(*secs),
            ControlOp::Volume { level } => Command::SetVolume(*level),
            ControlOp::Mute { state } => Command::Mute(state == "on"),
            ControlOp::Position => Command::GetPosition,
        }
    }
}

/// Pas de capture d'écran depuis la ligne de commande.
struct NoScreenCapture;

impl CaptureSourceFactory for NoScreenCapture {
    fn create(
        &self,
        _video: &VideoEncodeConfig,
        _audio: &AudioEncodeConfig,
    ) -> Result<Box<dyn CaptureSource>, CaptureError> {
        Err(CaptureError::Unavailable(
            "screen capture is not available from the command line".into(),
        ))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_config(&cli.config_dir).context("cannot load configuration")?;
    init_logging(&config);
    let search_mx = config.get_search_mx();

    let context = CastContext::from_config(config, Arc::new(NoScreenCapture))
        .context("cannot create device registry")?;
    let cast = CastOrchestrator::new(context).context("cannot start control worker")?;
    cast.init().context("cannot start SSDP discovery")?;

    let result = run(&cast, cli.command, search_mx);
    cast.destroy();
    result
}

fn run(cast: &CastOrchestrator, action: Action, search_mx: u32) -> Result<()> {
    match action {
        Action::Discover { wait } => {
            let wait = wait.unwrap_or(u64::from(search_mx) + 1);
            info!(wait, "Listening for renderers");
            thread::sleep(Duration::from_secs(wait));

            let devices = cast.devices();
            if devices.is_empty() {
                println!("No renderer found");
            }
            for device in devices {
                println!(
                    "{}\t{}\t{} {}\t{}",
                    device.id, device.friendly_name, device.manufacturer, device.model_name,
                    device.location
                );
            }
        }
        Action::Cast {
            device,
            kind,
            wait,
            source,
        } => {
            let device = find_device(cast, &device, wait)?;
            cast.connect(&device.id)
                .with_context(|| format!("cannot connect to {}", device.friendly_name))?;

            let kind = kind.map(MediaKind::from).unwrap_or_else(|| guess_kind(&source));
            let name = Path::new(&source)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| source.clone());
            let media = MediaDescriptor::new(kind, source.clone(), name, source.clone());
            cast.cast(media)
                .with_context(|| format!("cannot play {source}"))?;
            println!("Playing {source} on {}", device.friendly_name);
        }
        Action::Control { device, wait, op } => {
            let device = find_device(cast, &device, wait)?;
            cast.connect(&device.id)
                .with_context(|| format!("cannot connect to {}", device.friendly_name))?;

            let command = op.command();
            let outcome = cast
                .submit(command.clone())
                .wait()
                .with_context(|| format!("{} failed", command.name()))?;
            match outcome {
                CommandOutcome::Done => println!("{}: ok", command.name()),
                CommandOutcome::Received(Payload::Position(info)) => println!(
                    "position {} / {}",
                    info.rel_time.as_deref().unwrap_or("-"),
                    info.track_duration.as_deref().unwrap_or("-")
                ),
                CommandOutcome::Received(Payload::Volume(volume)) => println!("volume {volume}"),
                CommandOutcome::Received(Payload::State(state)) => println!("state {state:?}"),
            }
        }
    }
    Ok(())
}

/// Attend qu'un renderer correspondant (UDN ou nom, sans casse) soit visible.
fn find_device(cast: &CastOrchestrator, wanted: &str, wait_secs: u64) -> Result<Device> {
    let deadline = Instant::now() + Duration::from_secs(wait_secs);
    loop {
        if let Some(device) = cast.devices().into_iter().find(|d| matches_device(d, wanted)) {
            debug!(device = %device.id, "Renderer found");
            return Ok(device);
        }
        if Instant::now() >= deadline {
            bail!("renderer {wanted} not found after {wait_secs}s");
        }
        thread::sleep(Duration::from_millis(250));
    }
}

fn matches_device(device: &Device, wanted: &str) -> bool {
    device.id.as_str() == wanted
        || device.id.as_str().trim_start_matches("uuid:") == wanted
        || device.friendly_name.eq_ignore_ascii_case(wanted)
}

fn guess_kind(source: &str) -> MediaKind {
    let extension = Path::new(source.split(['?', '#']).next().unwrap_or(source))
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("mp4" | "mkv" | "avi" | "mov" | "webm" | "ts" | "m4v" | "flv") => MediaKind::Video,
        Some("mp3" | "flac" | "aac" | "m4a" | "wav" | "ogg" | "opus") => MediaKind::Audio,
        Some("jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp") => MediaKind::Image,
        _ => MediaKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(guess_kind("/sdcard/Movies/clip.MP4"), MediaKind::Video);
        assert_eq!(guess_kind("http://nas/a.flac?sid=1"), MediaKind::Audio);
        assert_eq!(guess_kind("photo.jpeg"), MediaKind::Image);
        assert_eq!(guess_kind("notes.txt"), MediaKind::Unknown);
    }

    #[test]
    fn control_ops_map_to_commands() {
        let cli = Cli::try_parse_from([
            "simpledlna", "control", "--device", "Living room", "mute", "on",
        ])
        .unwrap();
        let Action::Control { device, op, .. } = cli.command else {
            panic!("control subcommand expected");
        };
        assert_eq!(device, "Living room");
        assert_eq!(op.command(), Command::Mute(true));
    }

    #[test]
    fn unknown_kind_is_rejected_by_clap() {
        assert!(
            Cli::try_parse_from(["simpledlna", "cast", "--device", "x", "--kind", "text", "a"])
                .is_err()
        );
    }
}
