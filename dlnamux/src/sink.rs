//! Destinations des tags FLV produits par le thread d'envoi.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::MuxError;
use crate::flv::{FlvTag, FlvWriter};
use crate::rtmp::{PublishOptions, RtmpError, RtmpPublisher, RtmpUrl};

pub trait FrameSink: Send {
    fn name(&self) -> &str;

    fn write_tag(&mut self, tag: &FlvTag) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;
}

impl From<RtmpError> for io::Error {
    fn from(err: RtmpError) -> Self {
        match err {
            RtmpError::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

impl FrameSink for RtmpPublisher {
    fn name(&self) -> &str {
        "rtmp"
    }

    fn write_tag(&mut self, tag: &FlvTag) -> io::Result<()> {
        Ok(self.send_tag(tag)?)
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(RtmpPublisher::close(self)?)
    }
}

/// Miroir du flux dans un fichier `.flv`.
pub struct FlvFileSink {
    path: PathBuf,
    writer: Option<FlvWriter<BufWriter<File>>>,
}

impl FlvFileSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = FlvWriter::create(&path)?;
        debug!(path = %path.display(), "FLV mirror file created");
        Ok(Self {
            path,
            writer: Some(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for FlvFileSink {
    fn name(&self) -> &str {
        "flv-file"
    }

    fn write_tag(&mut self, tag: &FlvTag) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_tag(tag),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "FLV file closed")),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.take() {
            let tags = writer.tags_written();
            writer.into_inner()?;
            debug!(path = %self.path.display(), tags, "FLV mirror file closed");
        }
        Ok(())
    }
}

/// Ouvre la connexion de publication ; remplaçable dans les tests.
pub trait PublishConnector: Send + Sync {
    fn connect(&self, url: &RtmpUrl) -> Result<Box<dyn FrameSink>, MuxError>;
}

#[derive(Clone, Debug, Default)]
pub struct RtmpConnector {
    options: PublishOptions,
}

impl RtmpConnector {
    pub fn new(options: PublishOptions) -> Self {
        Self { options }
    }
}

impl PublishConnector for RtmpConnector {
    fn connect(&self, url: &RtmpUrl) -> Result<Box<dyn FrameSink>, MuxError> {
        let publisher = RtmpPublisher::connect(url, &self.options)?;
        Ok(Box::new(publisher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flv::TagKind;
    use bytes::Bytes;

    #[test]
    fn file_sink_writes_and_closes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.flv");
        let mut sink = FlvFileSink::create(&path).unwrap();
        sink.write_tag(&FlvTag::new(TagKind::Video, 0, Bytes::from_static(&[0x17, 0, 0, 0, 0])))
            .unwrap();
        sink.close().unwrap();
        sink.close().unwrap();
        assert!(sink.write_tag(&FlvTag::new(TagKind::Audio, 1, Bytes::new())).is_err());

        let bytes = std::fs::read(&path).unwrap();
        // en-tête 9 + prev 4 + tag 11 + 5 + prev 4
        assert_eq!(bytes.len(), 9 + 4 + 11 + 5 + 4);
    }
}
