use chrono::NaiveDateTime;
use dlnadidl::{MediaItem, MediaItemKind};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    /// Flux RTMP publié par le pipeline de capture
    MirrorStream,
    #[default]
    Unknown,
}

impl MediaKind {
    /// Classe DIDL-Lite ; un flux miroir est présenté comme une vidéo.
    pub fn item_kind(self) -> Option<MediaItemKind> {
        match self {
            MediaKind::Image => Some(MediaItemKind::Image),
            MediaKind::Video | MediaKind::MirrorStream => Some(MediaItemKind::Video),
            MediaKind::Audio => Some(MediaItemKind::Audio),
            MediaKind::Unknown => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    pub id: String,
    pub name: String,
    /// Chemin local ou URI telle que fournie par l'appelant
    pub source_uri: String,
    /// URL que le renderer peut charger ; remplie par `set_source`
    pub playable_uri: Option<String>,
    pub artist: Option<String>,
    /// `H:MM:SS`
    pub duration: Option<String>,
    /// `WxH`
    pub resolution: Option<String>,
    pub created: Option<NaiveDateTime>,
}

impl MediaDescriptor {
    pub fn new(
        kind: MediaKind,
        id: impl Into<String>,
        name: impl Into<String>,
        source_uri: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
            source_uri: source_uri.into(),
            ..Default::default()
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    /// URL effectivement envoyée au renderer.
    pub fn uri(&self) -> &str {
        self.playable_uri.as_deref().unwrap_or(&self.source_uri)
    }

    pub(crate) fn to_media_item(&self) -> Option<MediaItem> {
        let kind = self.kind.item_kind()?;
        let mut item = MediaItem::new(&self.id, &self.name, kind, self.uri());
        item.artist = self.artist.clone();
        item.duration = self.duration.clone();
        item.resolution = self.resolution.clone();
        item.date = self.created;
        Some(item)
    }
}
