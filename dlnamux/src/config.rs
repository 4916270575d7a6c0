use dlnaconfig::Config;

/// Paramètres de l'encodeur vidéo H.264, repris dans `onMetaData`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoEncodeConfig {
    pub width: u32,
    pub height: u32,
    /// bit/s
    pub bitrate: u32,
    pub framerate: u32,
    /// Secondes entre deux images clés
    pub iframe_interval: u32,
}

impl Default for VideoEncodeConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            bitrate: 25_000_000,
            framerate: 60,
            iframe_interval: 30,
        }
    }
}

impl VideoEncodeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            width: config.get_video_width(),
            height: config.get_video_height(),
            bitrate: config.get_video_bitrate(),
            framerate: config.get_video_framerate(),
            iframe_interval: config.get_video_iframe_interval(),
        }
    }
}

/// Paramètres de l'encodeur AAC-LC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioEncodeConfig {
    /// bit/s
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channels: u32,
    /// Audio object type MPEG-4 (2 = AAC-LC)
    pub object_type: u8,
}

impl Default for AudioEncodeConfig {
    fn default() -> Self {
        Self {
            bitrate: 80_000,
            sample_rate: 44_100,
            channels: 2,
            object_type: 2,
        }
    }
}

impl AudioEncodeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bitrate: config.get_audio_bitrate(),
            sample_rate: config.get_audio_sample_rate(),
            channels: config.get_audio_channels(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_values_override_defaults() {
        let config = Config::from_yaml_with_overrides(
            "video:\n  width: 720\n  height: 1280\naudio:\n  channels: 1\n",
            std::iter::empty(),
        )
        .unwrap();

        let video = VideoEncodeConfig::from_config(&config);
        assert_eq!((video.width, video.height), (720, 1280));
        assert_eq!(video.framerate, 60);

        let audio = AudioEncodeConfig::from_config(&config);
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.sample_rate, 44_100);
        assert_eq!(audio.object_type, 2);
    }
}
