//! Mise en forme FLV des trames H.264 / AAC.
//!
//! Un message audio/vidéo RTMP est un tag FLV sans son en-tête de 11 octets :
//! le même [`FlvTag`] sert au publisher RTMP et au fichier `.flv`.
//!
//! ```text
//! vidéo : 0x17|0x27  AVCPacketType(0|1)  CompositionTime(3)  données
//! audio : 0xAF       AACPacketType(0|1)  données
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::amf0::{self, Amf0Value};
use crate::config::{AudioEncodeConfig, VideoEncodeConfig};
use crate::frame::{EncodedFrame, StreamKind};

pub const FLV_HEADER_SIZE: u32 = 9;
pub const TAG_HEADER_SIZE: u32 = 11;

const VIDEO_KEY_AVC: u8 = 0x17;
const VIDEO_INTER_AVC: u8 = 0x27;
const AVC_SEQUENCE_HEADER: u8 = 0x00;
const AVC_NALU: u8 = 0x01;

/// AAC, 44 kHz, 16 bits, stéréo (valeurs imposées par FLV pour l'AAC)
const AUDIO_AAC: u8 = 0xAF;
const AAC_SEQUENCE_HEADER: u8 = 0x00;
const AAC_RAW: u8 = 0x01;

const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_AUD: u8 = 9;

const VIDEO_CODEC_AVC: f64 = 7.0;
const AUDIO_CODEC_AAC: f64 = 10.0;

const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagKind {
    Audio = 8,
    Video = 9,
    Script = 18,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlvTag {
    pub kind: TagKind,
    pub timestamp_ms: u32,
    pub data: Bytes,
}

impl FlvTag {
    pub fn new(kind: TagKind, timestamp_ms: u32, data: Bytes) -> Self {
        Self {
            kind,
            timestamp_ms,
            data,
        }
    }

    pub fn is_sequence_header(&self) -> bool {
        matches!(self.kind, TagKind::Audio | TagKind::Video)
            && self.data.len() > 1
            && self.data[1] == 0
    }
}

fn nal_type(nalu: &[u8]) -> u8 {
    nalu.first().map(|b| b & 0x1F).unwrap_or(0)
}

/// Découpe un flux Annex-B (`00 00 01` / `00 00 00 01`) en NAL units.
/// Un buffer sans code de début est rendu tel quel.
pub fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    let mut starts: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let code_start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            starts.push((code_start, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    if starts.is_empty() {
        return if data.is_empty() { Vec::new() } else { vec![data] };
    }

    let mut nalus = Vec::with_capacity(starts.len());
    for (n, &(_, begin)) in starts.iter().enumerate() {
        let end = starts.get(n + 1).map(|&(code, _)| code).unwrap_or(data.len());
        if end > begin {
            nalus.push(&data[begin..end]);
        }
    }
    nalus
}

/// Corps d'un tag vidéo « AVC sequence header » (AVCDecoderConfigurationRecord).
pub fn avc_sequence_header(sps: &[u8], pps: &[u8]) -> Option<Bytes> {
    if sps.len() < 4 || pps.is_empty() {
        return None;
    }
    let mut buf = BytesMut::with_capacity(16 + sps.len() + pps.len());
    buf.put_slice(&[VIDEO_KEY_AVC, AVC_SEQUENCE_HEADER, 0, 0, 0]);
    buf.put_u8(0x01);
    buf.put_slice(&sps[1..4]);
    // NALU length sur 4 octets
    buf.put_u8(0xFF);
    buf.put_u8(0xE1);
    buf.put_u16(sps.len() as u16);
    buf.put_slice(sps);
    buf.put_u8(0x01);
    buf.put_u16(pps.len() as u16);
    buf.put_slice(pps);
    Some(buf.freeze())
}

/// Corps d'un tag vidéo AVCC (NAL units préfixées par leur longueur).
pub fn avc_frame(nalus: &[&[u8]], key_frame: bool) -> Bytes {
    let size = 5 + nalus.iter().map(|n| n.len() + 4).sum::<usize>();
    let mut buf = BytesMut::with_capacity(size);
    buf.put_u8(if key_frame { VIDEO_KEY_AVC } else { VIDEO_INTER_AVC });
    buf.put_slice(&[AVC_NALU, 0, 0, 0]);
    for nalu in nalus {
        buf.put_u32(nalu.len() as u32);
        buf.put_slice(nalu);
    }
    buf.freeze()
}

pub fn aac_sequence_header(audio_specific_config: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + audio_specific_config.len());
    buf.put_slice(&[AUDIO_AAC, AAC_SEQUENCE_HEADER]);
    buf.put_slice(audio_specific_config);
    buf.freeze()
}

pub fn aac_frame(raw: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + raw.len());
    buf.put_slice(&[AUDIO_AAC, AAC_RAW]);
    buf.put_slice(raw);
    buf.freeze()
}

/// AudioSpecificConfig sur 2 octets ; `None` si la fréquence n'est pas
/// une fréquence AAC standard.
pub fn audio_specific_config(object_type: u8, sample_rate: u32, channels: u32) -> Option<[u8; 2]> {
    let index = AAC_SAMPLE_RATES.iter().position(|&r| r == sample_rate)? as u8;
    let channels = (channels.min(7)) as u8;
    Some([
        (object_type << 3) | (index >> 1),
        ((index & 0x01) << 7) | (channels << 3),
    ])
}

/// Retire l'en-tête ADTS éventuel. Renvoie aussi l'AudioSpecificConfig
/// déduite de cet en-tête.
pub fn strip_adts(data: &[u8]) -> (&[u8], Option<[u8; 2]>) {
    if data.len() < 7 || data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
        return (data, None);
    }
    let header_len = if data[1] & 0x01 == 1 { 7 } else { 9 };
    if data.len() < header_len {
        return (data, None);
    }

    let object_type = (data[2] >> 6) + 1;
    let index = (data[2] >> 2) & 0x0F;
    let channels = ((data[2] & 0x01) << 2) | (data[3] >> 6);
    let asc = [
        (object_type << 3) | (index >> 1),
        ((index & 0x01) << 7) | (channels << 3),
    ];
    (&data[header_len..], Some(asc))
}

/// Corps du tag script `onMetaData`.
pub fn on_metadata(video: &VideoEncodeConfig, audio: &AudioEncodeConfig) -> Bytes {
    let props: Vec<(String, Amf0Value)> = vec![
        ("duration".into(), Amf0Value::Number(0.0)),
        ("width".into(), Amf0Value::Number(video.width as f64)),
        ("height".into(), Amf0Value::Number(video.height as f64)),
        (
            "videodatarate".into(),
            Amf0Value::Number(video.bitrate as f64 / 1000.0),
        ),
        ("framerate".into(), Amf0Value::Number(video.framerate as f64)),
        ("videocodecid".into(), Amf0Value::Number(VIDEO_CODEC_AVC)),
        (
            "audiodatarate".into(),
            Amf0Value::Number(audio.bitrate as f64 / 1000.0),
        ),
        (
            "audiosamplerate".into(),
            Amf0Value::Number(audio.sample_rate as f64),
        ),
        ("audiosamplesize".into(), Amf0Value::Number(16.0)),
        ("stereo".into(), Amf0Value::Boolean(audio.channels > 1)),
        ("audiocodecid".into(), Amf0Value::Number(AUDIO_CODEC_AAC)),
        ("encoder".into(), Amf0Value::string("SimpleDLNA")),
    ];
    amf0::encode_all(&[Amf0Value::string("onMetaData"), Amf0Value::EcmaArray(props)])
}

/// Transforme les trames d'encodeur en tags FLV.
///
/// Les trames d'un flux reçues avant son en-tête de séquence sont ignorées :
/// un lecteur ne saurait pas les décoder.
#[derive(Debug, Default)]
pub struct FlvPackager {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    video_ready: bool,
    audio_ready: bool,
    skipped: u64,
}

impl FlvPackager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trames ignorées faute d'en-tête de séquence.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn package(&mut self, frame: &EncodedFrame) -> Vec<FlvTag> {
        match frame.kind {
            StreamKind::Video => self.package_video(frame),
            StreamKind::Audio => self.package_audio(frame),
        }
    }

    fn package_video(&mut self, frame: &EncodedFrame) -> Vec<FlvTag> {
        let nalus = split_annexb(&frame.data);
        let mut tags = Vec::new();

        let sps = nalus.iter().find(|n| nal_type(n) == NAL_SPS);
        let pps = nalus.iter().find(|n| nal_type(n) == NAL_PPS);
        if let (Some(sps), Some(pps)) = (sps, pps) {
            let changed = self.sps.as_deref() != Some(*sps) || self.pps.as_deref() != Some(*pps);
            if changed {
                match avc_sequence_header(sps, pps) {
                    Some(body) => {
                        debug!(sps_len = sps.len(), pps_len = pps.len(), "AVC sequence header");
                        self.sps = Some(sps.to_vec());
                        self.pps = Some(pps.to_vec());
                        self.video_ready = true;
                        tags.push(FlvTag::new(TagKind::Video, frame.timestamp_ms, body));
                    }
                    None => warn!("Invalid SPS, AVC sequence header not sent"),
                }
            }
        } else if frame.is_config() {
            warn!("Video codec config without SPS/PPS");
        }

        if frame.is_config() {
            return tags;
        }

        let payload: Vec<&[u8]> = nalus
            .into_iter()
            .filter(|n| !matches!(nal_type(n), NAL_SPS | NAL_PPS | NAL_AUD))
            .collect();
        if payload.is_empty() {
            return tags;
        }
        if !self.video_ready {
            self.skipped += 1;
            trace!(ts = frame.timestamp_ms, "Video frame before sequence header");
            return tags;
        }

        let key = frame.flags.key_frame || payload.iter().any(|n| nal_type(n) == NAL_IDR);
        tags.push(FlvTag::new(
            TagKind::Video,
            frame.timestamp_ms,
            avc_frame(&payload, key),
        ));
        tags
    }

    fn package_audio(&mut self, frame: &EncodedFrame) -> Vec<FlvTag> {
        if frame.is_config() {
            if frame.data.len() < 2 {
                warn!("Audio codec config too short");
                return Vec::new();
            }
            self.audio_ready = true;
            return vec![FlvTag::new(
                TagKind::Audio,
                frame.timestamp_ms,
                aac_sequence_header(&frame.data),
            )];
        }

        let (raw, adts_config) = strip_adts(&frame.data);
        let mut tags = Vec::new();
        if !self.audio_ready {
            match adts_config {
                Some(asc) => {
                    debug!("AAC sequence header derived from ADTS");
                    self.audio_ready = true;
                    tags.push(FlvTag::new(
                        TagKind::Audio,
                        frame.timestamp_ms,
                        aac_sequence_header(&asc),
                    ));
                }
                None => {
                    self.skipped += 1;
                    trace!(ts = frame.timestamp_ms, "Audio frame before sequence header");
                    return tags;
                }
            }
        }

        if !raw.is_empty() {
            tags.push(FlvTag::new(TagKind::Audio, frame.timestamp_ms, aac_frame(raw)));
        }
        tags
    }
}

/// Chemin du miroir FLV d'un enregistrement : même nom, extension `flv`.
pub fn flv_path_for(recording_path: impl AsRef<Path>) -> PathBuf {
    recording_path.as_ref().with_extension("flv")
}

/// Écriture d'un fichier FLV : en-tête, puis tags suivis de leur taille.
pub struct FlvWriter<W: Write> {
    out: W,
    tags: u64,
}

impl FlvWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path.as_ref())?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> FlvWriter<W> {
    /// Ecrit l'en-tête (audio + vidéo) et le PreviousTagSize0.
    pub fn new(mut out: W) -> io::Result<Self> {
        out.write_all(&[b'F', b'L', b'V', 0x01, 0x05])?;
        out.write_all(&FLV_HEADER_SIZE.to_be_bytes())?;
        out.write_all(&0u32.to_be_bytes())?;
        Ok(Self { out, tags: 0 })
    }

    pub fn tags_written(&self) -> u64 {
        self.tags
    }

    pub fn write_tag(&mut self, tag: &FlvTag) -> io::Result<()> {
        let size = tag.data.len();
        if size > 0x00FF_FFFF {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "FLV tag larger than 16 MiB",
            ));
        }

        let mut header = [0u8; TAG_HEADER_SIZE as usize];
        header[0] = tag.kind as u8;
        header[1..4].copy_from_slice(&(size as u32).to_be_bytes()[1..]);
        let ts = tag.timestamp_ms.to_be_bytes();
        header[4..7].copy_from_slice(&ts[1..]);
        header[7] = ts[0];
        // StreamID toujours 0

        self.out.write_all(&header)?;
        self.out.write_all(&tag.data)?;
        self.out
            .write_all(&(TAG_HEADER_SIZE + size as u32).to_be_bytes())?;
        self.tags += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}
