use thiserror::Error;

use crate::model::ServiceKind;

/// Codes numériques exposés aux callers (UI, CLI).
pub mod codes {
    pub const NO_ERROR: i32 = 0;
    pub const RE_PLAY: i32 = 1;
    pub const RE_PAUSE: i32 = 2;
    pub const RE_STOP: i32 = 3;
    pub const DLNA_ERROR: i32 = 4;
    pub const SERVICE_ERROR: i32 = 5;
    pub const NOT_READY: i32 = 6;
    pub const BIND_SCREEN_RECORDER_SERVICE_ERROR: i32 = 7;
    pub const ILLEGAL_MEDIA_TYPE: i32 = 8;
    pub const PUBLISH_OPEN_ERROR: i32 = 9;
    pub const CONNECT_FAILURE: i32 = 100001;

    // Résultats de connexion
    pub const CONNECT_SUCCESS: i32 = 100000;
    pub const DISCONNECT_SUCCESS: i32 = 212001;
}

/// Famille d'échec, pour le message présenté à l'utilisateur.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Connect,
    Playback,
    CapturePermission,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("session is not ready")]
    NotReady,

    #[error("{0} service is not available on this device")]
    ServiceUnavailable(ServiceKind),

    #[error("{action} returned UPnP error {code}: {description}")]
    Protocol {
        action: String,
        code: u32,
        description: String,
    },

    #[error("{action} failed: {message}")]
    Transport { action: String, message: String },

    #[error("connect failed: {0}")]
    ConnectFailure(String),

    #[error("disconnect failed: {0}")]
    DisconnectFailure(String),

    #[error("cannot bind capture service: {0}")]
    BindFailure(String),

    #[error("screen capture permission denied")]
    CapturePermissionDenied,

    #[error("cannot open stream publisher ({code}): {message}")]
    PublishOpenFailure { code: i32, message: String },

    #[error("illegal media type: {0}")]
    IllegalMediaType(String),
}

impl ControlError {
    pub fn protocol(action: &str, code: u32, description: impl Into<String>) -> Self {
        ControlError::Protocol {
            action: action.to_string(),
            code,
            description: description.into(),
        }
    }

    pub fn transport(action: &str, message: impl Into<String>) -> Self {
        ControlError::Transport {
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ControlError::NotReady => codes::NOT_READY,
            ControlError::ServiceUnavailable(_) => codes::SERVICE_ERROR,
            ControlError::Protocol { .. } | ControlError::Transport { .. } => codes::DLNA_ERROR,
            ControlError::ConnectFailure(_) => codes::CONNECT_FAILURE,
            ControlError::DisconnectFailure(_) => codes::DLNA_ERROR,
            ControlError::BindFailure(_) | ControlError::CapturePermissionDenied => {
                codes::BIND_SCREEN_RECORDER_SERVICE_ERROR
            }
            ControlError::PublishOpenFailure { .. } => codes::PUBLISH_OPEN_ERROR,
            ControlError::IllegalMediaType(_) => codes::ILLEGAL_MEDIA_TYPE,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ControlError::ConnectFailure(_) | ControlError::DisconnectFailure(_) => {
                FailureKind::Connect
            }
            ControlError::CapturePermissionDenied => FailureKind::CapturePermission,
            _ => FailureKind::Playback,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            FailureKind::Connect => "failed to connect to device",
            FailureKind::Playback => "failed to start playback",
            FailureKind::CapturePermission => "recording/mirroring permission denied",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(ControlError::NotReady.code(), 6);
        assert_eq!(
            ControlError::ServiceUnavailable(ServiceKind::AvTransport).code(),
            5
        );
        assert_eq!(ControlError::protocol("Play", 701, "x").code(), 4);
        assert_eq!(ControlError::transport("Play", "timeout").code(), 4);
        assert_eq!(ControlError::ConnectFailure("x".into()).code(), 100001);
        assert_eq!(ControlError::BindFailure("x".into()).code(), 7);
        assert_eq!(ControlError::CapturePermissionDenied.code(), 7);
        assert_eq!(ControlError::IllegalMediaType("x".into()).code(), 8);
    }

    #[test]
    fn user_messages_distinguish_failures() {
        assert_eq!(
            ControlError::ConnectFailure("busy".into()).user_message(),
            "failed to connect to device"
        );
        assert_eq!(
            ControlError::protocol("Play", 701, "Transition not available").user_message(),
            "failed to start playback"
        );
        assert_eq!(
            ControlError::CapturePermissionDenied.user_message(),
            "recording/mirroring permission denied"
        );
        // Capture absente : ce n'est pas un refus de permission
        assert_eq!(
            ControlError::BindFailure("no capture backend".into()).kind(),
            FailureKind::Playback
        );
    }
}
