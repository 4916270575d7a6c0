//! # dlnamux - capture, multiplexage FLV et publication RTMP
//!
//! Les encodeurs déposent leurs trames dans un [`BoundedFramePool`] ; un
//! thread d'envoi les met en forme FLV et les publie vers le serveur RTMP,
//! avec un miroir fichier optionnel.

pub mod amf0;
pub mod capture;
pub mod config;
pub mod error;
pub mod flv;
pub mod frame;
pub mod muxer;
pub mod pool;
pub mod rtmp;
pub mod sink;
pub mod timestamp;

pub use capture::{
    CapturePipeline, CaptureSource, CaptureSourceFactory, EncoderOutput, NoopRecorderCallback,
    PipelineState, RecorderCallback,
};
pub use config::{AudioEncodeConfig, VideoEncodeConfig};
pub use error::{CaptureError, MuxError};
pub use flv::{FlvPackager, FlvTag, FlvWriter, TagKind, flv_path_for};
pub use frame::{BufferInfo, EncodedFrame, FrameFlags, StreamKind};
pub use muxer::{Muxer, MuxerOptions, OpenStatus, PublishReport, StreamPublishTarget};
pub use pool::{BoundedFramePool, PushOutcome};
pub use rtmp::{PublishOptions, RtmpPublisher, RtmpUrl};
pub use sink::{FlvFileSink, FrameSink, PublishConnector, RtmpConnector};
pub use timestamp::FrameTimestampNormalizer;
