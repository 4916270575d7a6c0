//! # dlnacast - orchestration du casting DLNA
//!
//! Assemble la découverte et la session de contrôle (`dlnacontrol`) avec le
//! pipeline de capture et de publication (`dlnamux`) derrière une API
//! unique, [`CastOrchestrator`].

pub mod commands;
pub mod events;
pub mod indicator;
pub mod logging;
pub mod orchestrator;

pub use commands::{Command, CommandOutcome, CommandResult, Payload, PendingCommand};
pub use events::{CastEvent, CastEventBus};
pub use indicator::{BusIndicator, RecordingIndicator, format_elapsed, recording_label};
pub use logging::init_logging;
pub use orchestrator::{CastContext, CastOrchestrator, MirrorOptions, mirror_media_id};
