use std::io;

use thiserror::Error;

use crate::rtmp::RtmpError;

/// Codes d'état de `Muxer::open`.
pub mod status {
    pub const CONNECTED: i32 = 1;
    pub const NOT_CONNECTED: i32 = 0;
    pub const URL_ERROR: i32 = -2;
    pub const CONNECT_ERROR: i32 = -3;
}

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("output url is empty")]
    EmptyOutputUrl,

    #[error("invalid output url: {0}")]
    InvalidUrl(String),

    #[error("cannot reach the media server: {0}")]
    Connect(String),

    #[error("muxer is already open on {0}")]
    AlreadyOpen(String),

    #[error("cannot create the FLV mirror file: {0}")]
    File(#[from] io::Error),

    #[error("cannot start the sender thread: {0}")]
    Worker(io::Error),
}

impl MuxError {
    /// Code d'état négatif renvoyé aux appelants qui attendent un entier.
    pub fn code(&self) -> i32 {
        match self {
            MuxError::InvalidUrl(_) | MuxError::EmptyOutputUrl => status::URL_ERROR,
            MuxError::Connect(_) => status::CONNECT_ERROR,
            MuxError::AlreadyOpen(_) | MuxError::File(_) | MuxError::Worker(_) => -1,
        }
    }
}

impl From<RtmpError> for MuxError {
    fn from(err: RtmpError) -> Self {
        match err {
            RtmpError::InvalidUrl { .. } => MuxError::InvalidUrl(err.to_string()),
            other => MuxError::Connect(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("screen capture permission denied")]
    PermissionDenied,

    #[error("capture source unavailable: {0}")]
    Unavailable(String),

    #[error("capture pipeline is not prepared")]
    NotPrepared,

    #[error(transparent)]
    Publish(#[from] MuxError),
}
