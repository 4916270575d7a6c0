//! Commandes de lecture exécutées sur le thread de contrôle.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use dlnacontrol::{ControlError, PlaybackState, PositionInfo};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    Stop,
    /// Position absolue en secondes
    Seek(u64),
    /// 0..=100
    SetVolume(u16),
    Mute(bool),
    GetPosition,
    GetVolume,
    GetTransportState,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Stop => "stop",
            Command::Seek(_) => "seek",
            Command::SetVolume(_) => "set-volume",
            Command::Mute(_) => "mute",
            Command::GetPosition => "get-position",
            Command::GetVolume => "get-volume",
            Command::GetTransportState => "get-transport-state",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Position(PositionInfo),
    Volume(u16),
    State(PlaybackState),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    Done,
    Received(Payload),
}

pub type CommandResult = Result<CommandOutcome, ControlError>;

/// Résultat à venir d'une commande soumise.
pub struct PendingCommand {
    rx: Receiver<CommandResult>,
}

impl PendingCommand {
    pub(crate) fn new(rx: Receiver<CommandResult>) -> Self {
        Self { rx }
    }

    /// Bloque jusqu'au résultat. Si le thread de contrôle s'est arrêté avant
    /// d'exécuter la commande, renvoie `NotReady`.
    pub fn wait(self) -> CommandResult {
        self.rx.recv().unwrap_or(Err(ControlError::NotReady))
    }

    /// `None` si le délai expire avant la fin de la commande.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CommandResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(ControlError::NotReady)),
        }
    }
}
