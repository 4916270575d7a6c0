//! Client RTMP bloquant, limité à la publication d'un flux live.

mod chunk;
mod handshake;
mod publisher;

use std::io;

use thiserror::Error;
use url::Url;

use crate::amf0::Amf0Error;

pub use chunk::{ChunkReader, ChunkWriter, RtmpMessage};
pub use handshake::{client_handshake, HANDSHAKE_SIZE, RTMP_VERSION};
pub use publisher::{PublishOptions, RtmpPublisher};

pub const DEFAULT_RTMP_PORT: u16 = 1935;
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Types de message RTMP utilisés.
pub mod message_type {
    pub const SET_CHUNK_SIZE: u8 = 1;
    pub const ABORT: u8 = 2;
    pub const ACKNOWLEDGEMENT: u8 = 3;
    pub const USER_CONTROL: u8 = 4;
    pub const WINDOW_ACK_SIZE: u8 = 5;
    pub const SET_PEER_BANDWIDTH: u8 = 6;
    pub const AUDIO: u8 = 8;
    pub const VIDEO: u8 = 9;
    pub const DATA_AMF0: u8 = 18;
    pub const COMMAND_AMF0: u8 = 20;
}

/// Chunk streams utilisés en émission.
pub mod chunk_stream {
    pub const PROTOCOL: u32 = 2;
    pub const COMMAND: u32 = 3;
    pub const AUDIO: u32 = 4;
    pub const DATA: u32 = 5;
    pub const VIDEO: u32 = 6;
}

#[derive(Debug, Error)]
pub enum RtmpError {
    #[error("invalid RTMP url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("malformed message: {0}")]
    Protocol(String),

    #[error("AMF0 error: {0}")]
    Amf(#[from] Amf0Error),

    #[error("server rejected {command}: {code}")]
    Rejected { command: String, code: String },
}

impl RtmpError {
    fn invalid_url(url: &str, reason: impl Into<String>) -> Self {
        RtmpError::InvalidUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// `rtmp://host[:port]/app[/...]/stream`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtmpUrl {
    pub host: String,
    pub port: u16,
    pub app: String,
    pub stream: String,
}

impl RtmpUrl {
    pub fn parse(raw: &str) -> Result<Self, RtmpError> {
        let url = Url::parse(raw).map_err(|e| RtmpError::invalid_url(raw, e.to_string()))?;
        if url.scheme() != "rtmp" {
            return Err(RtmpError::invalid_url(raw, "scheme must be rtmp"));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RtmpError::invalid_url(raw, "missing host"))?
            .to_string();

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        let Some((stream, app)) = segments.split_last() else {
            return Err(RtmpError::invalid_url(raw, "missing application"));
        };
        if app.is_empty() {
            return Err(RtmpError::invalid_url(raw, "missing stream name"));
        }

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_RTMP_PORT),
            app: app.join("/"),
            stream: stream.to_string(),
        })
    }

    /// URL passée dans `connect` (`tcUrl`).
    pub fn tc_url(&self) -> String {
        format!("rtmp://{}:{}/{}", self.host, self.port, self.app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_publish_url() {
        let url = RtmpUrl::parse("rtmp://192.168.1.10:9577/live/mirror").unwrap();
        assert_eq!(url.host, "192.168.1.10");
        assert_eq!(url.port, 9577);
        assert_eq!(url.app, "live");
        assert_eq!(url.stream, "mirror");
        assert_eq!(url.tc_url(), "rtmp://192.168.1.10:9577/live");

        let url = RtmpUrl::parse("rtmp://example.org/app/inst/key").unwrap();
        assert_eq!(url.port, DEFAULT_RTMP_PORT);
        assert_eq!(url.app, "app/inst");
        assert_eq!(url.stream, "key");
    }

    #[test]
    fn rejects_malformed_urls() {
        for raw in [
            "not a url",
            "http://host/live/x",
            "rtmp://host/",
            "rtmp://host/live",
            "rtmp:///live/x",
        ] {
            assert!(
                matches!(RtmpUrl::parse(raw), Err(RtmpError::InvalidUrl { .. })),
                "{raw}"
            );
        }
    }
}
