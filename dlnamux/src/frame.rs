//! Trames encodées échangées entre les encodeurs, le pool et le thread d'envoi.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }
}

/// Drapeaux d'un buffer de sortie d'encodeur.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameFlags {
    pub key_frame: bool,
    /// SPS/PPS pour la vidéo, AudioSpecificConfig pour l'audio
    pub codec_config: bool,
    pub end_of_stream: bool,
}

impl FrameFlags {
    pub const KEY_FRAME: u32 = 0x1;
    pub const CODEC_CONFIG: u32 = 0x2;
    pub const END_OF_STREAM: u32 = 0x4;

    pub fn from_bits(bits: u32) -> Self {
        Self {
            key_frame: bits & Self::KEY_FRAME != 0,
            codec_config: bits & Self::CODEC_CONFIG != 0,
            end_of_stream: bits & Self::END_OF_STREAM != 0,
        }
    }

    pub fn bits(self) -> u32 {
        let mut bits = 0;
        if self.key_frame {
            bits |= Self::KEY_FRAME;
        }
        if self.codec_config {
            bits |= Self::CODEC_CONFIG;
        }
        if self.end_of_stream {
            bits |= Self::END_OF_STREAM;
        }
        bits
    }

    pub fn config() -> Self {
        Self {
            codec_config: true,
            ..Self::default()
        }
    }

    pub fn key() -> Self {
        Self {
            key_frame: true,
            ..Self::default()
        }
    }
}

/// Métadonnées livrées avec chaque buffer par l'encodeur.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub presentation_time_us: i64,
    pub flags: FrameFlags,
}

impl BufferInfo {
    pub fn new(presentation_time_us: i64, flags: FrameFlags) -> Self {
        Self {
            presentation_time_us,
            flags,
        }
    }
}

/// Trame prête à être envoyée. Le buffer appartient à la trame jusqu'à son
/// retour dans la liste libre du pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedFrame {
    pub kind: StreamKind,
    pub data: Vec<u8>,
    /// Index de présentation normalisé (ms)
    pub timestamp_ms: u32,
    pub flags: FrameFlags,
}

impl EncodedFrame {
    pub fn new(kind: StreamKind, data: Vec<u8>, timestamp_ms: u32, flags: FrameFlags) -> Self {
        Self {
            kind,
            data,
            timestamp_ms,
            flags,
        }
    }

    pub fn is_config(&self) -> bool {
        self.flags.codec_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits() {
        let flags = FrameFlags::from_bits(FrameFlags::KEY_FRAME | FrameFlags::END_OF_STREAM);
        assert!(flags.key_frame);
        assert!(!flags.codec_config);
        assert!(flags.end_of_stream);
        assert_eq!(flags.bits(), 0x5);
        assert_eq!(FrameFlags::config().bits(), FrameFlags::CODEC_CONFIG);
    }
}
