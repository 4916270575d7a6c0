//! # dlnadidl - DIDL-Lite
//!
//! Construction du fragment DIDL-Lite envoyé comme `CurrentURIMetaData` avec
//! `SetAVTransportURI`, et lecture des métadonnées renvoyées par les renderers.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DIDL_LITE_HEADER: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8" standalone="no"?>"#,
    r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" "#,
    r#"xmlns:dc="http://purl.org/dc/elements/1.1/" "#,
    r#"xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" "#,
    r#"xmlns:dlna="urn:schemas-dlna-org:metadata-1-0/">"#
);
pub const DIDL_LITE_FOOTER: &str = "</DIDL-Lite>";

/// Tout protocole, tout réseau, tout type MIME : le renderer décide.
pub const WILDCARD_PROTOCOL_INFO: &str = "*:*:*:*";
pub const UNKNOWN_ARTIST: &str = "unknown";
pub const ROOT_PARENT_ID: &str = "0";

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Error)]
pub enum DidlError {
    #[error("failed to serialize DIDL-Lite item: {0}")]
    Serialize(#[from] quick_xml::se::SeError),

    #[error("failed to parse DIDL-Lite document: {0}")]
    Parse(#[from] quick_xml::de::DeError),
}

/// Classe UPnP de l'item poussé vers le renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaItemKind {
    Image,
    Video,
    Audio,
}

impl MediaItemKind {
    pub fn upnp_class(self) -> &'static str {
        match self {
            MediaItemKind::Image => "object.item.imageItem",
            MediaItemKind::Video => "object.item.videoItem",
            MediaItemKind::Audio => "object.item.audioItem",
        }
    }

    /// Accepte aussi les sous-classes (`object.item.audioItem.musicTrack`).
    pub fn from_upnp_class(class: &str) -> Option<Self> {
        let class = class.trim();
        [
            MediaItemKind::Image,
            MediaItemKind::Video,
            MediaItemKind::Audio,
        ]
        .into_iter()
        .find(|kind| class.starts_with(kind.upnp_class()))
    }
}

/// Description d'un média à pousser, indépendante du format XML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub kind: MediaItemKind,
    pub url: String,
    /// `WxH`
    pub resolution: Option<String>,
    /// `H:MM:SS`
    pub duration: Option<String>,
    /// `None` : date courante
    pub date: Option<NaiveDateTime>,
}

impl MediaItem {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        kind: MediaItemKind,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: None,
            kind,
            url: url.into(),
            resolution: None,
            duration: None,
            date: None,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    pub fn with_date(mut self, date: NaiveDateTime) -> Self {
        self.date = Some(date);
        self
    }
}

// ============= Structures DIDL-Lite =============

/// Racine d'un document DIDL-Lite (lecture seule).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "DIDL-Lite")]
pub struct DidlLite {
    #[serde(rename = "item", default)]
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename = "item")]
pub struct Item {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "@parentID")]
    pub parent_id: String,

    #[serde(rename = "@restricted", skip_serializing_if = "Option::is_none")]
    pub restricted: Option<String>,

    #[serde(rename = "dc:title", alias = "title")]
    pub title: String,

    #[serde(
        rename = "upnp:artist",
        alias = "artist",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub artist: Option<String>,

    #[serde(rename = "upnp:class", alias = "class")]
    pub class: String,

    #[serde(
        rename = "dc:date",
        alias = "date",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub date: Option<String>,

    #[serde(rename = "res", default)]
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    #[serde(rename = "@protocolInfo")]
    pub protocol_info: String,

    #[serde(rename = "@resolution", skip_serializing_if = "Option::is_none", default)]
    pub resolution: Option<String>,

    #[serde(rename = "@duration", skip_serializing_if = "Option::is_none", default)]
    pub duration: Option<String>,

    #[serde(rename = "$text", default)]
    pub url: String,
}

impl Item {
    pub fn kind(&self) -> Option<MediaItemKind> {
        MediaItemKind::from_upnp_class(&self.class)
    }

    pub fn primary_resource(&self) -> Option<&Resource> {
        self.resources.first()
    }
}

impl From<&MediaItem> for Item {
    fn from(media: &MediaItem) -> Self {
        let date = media.date.unwrap_or_else(|| Local::now().naive_local());
        Item {
            id: media.id.clone(),
            parent_id: ROOT_PARENT_ID.to_string(),
            restricted: Some("1".to_string()),
            title: media.title.clone(),
            artist: Some(sanitize_artist(media.artist.as_deref())),
            class: media.kind.upnp_class().to_string(),
            date: Some(date.format(DATE_FORMAT).to_string()),
            resources: vec![Resource {
                protocol_info: WILDCARD_PROTOCOL_INFO.to_string(),
                resolution: media.resolution.clone().filter(|r| !r.is_empty()),
                duration: media.duration.clone().filter(|d| !d.is_empty()),
                url: media.url.clone(),
            }],
        }
    }
}

/// Les renderers tolèrent mal `<`/`>` dans l'artiste, même échappés.
fn sanitize_artist(artist: Option<&str>) -> String {
    match artist {
        Some(a) if !a.trim().is_empty() => a.replace(['<', '>'], "_"),
        _ => UNKNOWN_ARTIST.to_string(),
    }
}

/// Fragment complet (en-tête, un `item`, pied) pour `CurrentURIMetaData`.
pub fn build_didl_fragment(media: &MediaItem) -> Result<String, DidlError> {
    let item = Item::from(media);
    let body = quick_xml::se::to_string(&item)?;

    let mut fragment =
        String::with_capacity(DIDL_LITE_HEADER.len() + body.len() + DIDL_LITE_FOOTER.len());
    fragment.push_str(DIDL_LITE_HEADER);
    fragment.push_str(&body);
    fragment.push_str(DIDL_LITE_FOOTER);

    debug!(id = %media.id, kind = ?media.kind, "DIDL-Lite metadata built");
    Ok(fragment)
}

/// Lit un document DIDL-Lite (tel que renvoyé par `GetPositionInfo`).
pub fn parse_didl(xml: &str) -> Result<DidlLite, DidlError> {
    Ok(quick_xml::de::from_str(xml)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fixed_date() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 7, 9)
            .unwrap()
            .and_hms_opt(14, 3, 5)
            .unwrap()
    }

    #[test]
    fn fragment_has_header_item_and_footer() {
        let media = MediaItem::new("42", "Holiday", MediaItemKind::Video, "http://10.0.0.2:9578/a.mp4")
            .with_date(fixed_date());
        let xml = build_didl_fragment(&media).unwrap();

        assert!(xml.starts_with(DIDL_LITE_HEADER));
        assert!(xml.ends_with("</item></DIDL-Lite>"));
        assert!(xml.contains(r#"<item id="42" parentID="0" restricted="1">"#));
        assert!(xml.contains("<dc:title>Holiday</dc:title>"));
        assert!(xml.contains("<upnp:artist>unknown</upnp:artist>"));
        assert!(xml.contains("<upnp:class>object.item.videoItem</upnp:class>"));
        assert!(xml.contains("<dc:date>2019-07-09T14:03:05</dc:date>"));
        assert!(xml.contains(r#"<res protocolInfo="*:*:*:*">http://10.0.0.2:9578/a.mp4</res>"#));
    }

    #[test]
    fn child_order_is_stable() {
        let media = MediaItem::new("1", "t", MediaItemKind::Audio, "http://h/a.mp3")
            .with_date(fixed_date());
        let xml = build_didl_fragment(&media).unwrap();

        let pos = |needle: &str| xml.find(needle).unwrap();
        assert!(pos("<dc:title>") < pos("<upnp:artist>"));
        assert!(pos("<upnp:artist>") < pos("<upnp:class>"));
        assert!(pos("<upnp:class>") < pos("<dc:date>"));
        assert!(pos("<dc:date>") < pos("<res "));
    }

    #[test]
    fn artist_angle_brackets_are_replaced() {
        let media = MediaItem::new("1", "t", MediaItemKind::Audio, "http://h/a.mp3")
            .with_artist("<Band>");
        let xml = build_didl_fragment(&media).unwrap();
        assert!(xml.contains("<upnp:artist>_Band_</upnp:artist>"));
    }

    #[test]
    fn resolution_and_duration_are_optional_attributes() {
        let media = MediaItem::new("1", "t", MediaItemKind::Video, "http://h/v.mp4")
            .with_resolution("1920x1080")
            .with_duration("0:03:12");
        let xml = build_didl_fragment(&media).unwrap();
        assert!(xml.contains(r#"resolution="1920x1080""#));
        assert!(xml.contains(r#"duration="0:03:12""#));

        let bare = MediaItem::new("1", "t", MediaItemKind::Image, "http://h/i.jpg");
        let xml = build_didl_fragment(&bare).unwrap();
        assert!(!xml.contains("resolution="));
        assert!(!xml.contains("duration="));
    }

    #[test]
    fn url_is_escaped_in_text() {
        let media = MediaItem::new("1", "t", MediaItemKind::Video, "http://h/v.mp4?a=1&b=2");
        let xml = build_didl_fragment(&media).unwrap();
        assert!(xml.contains("http://h/v.mp4?a=1&amp;b=2"));
    }

    #[test]
    fn parses_renderer_metadata() {
        let xml = r#"
        <DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/"
                   xmlns:dc="http://purl.org/dc/elements/1.1/"
                   xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">
            <item id="7" parentID="0" restricted="1">
                <dc:title>Song</dc:title>
                <upnp:class>object.item.audioItem.musicTrack</upnp:class>
                <res protocolInfo="http-get:*:audio/mpeg:*" duration="0:04:00">http://h/s.mp3</res>
            </item>
        </DIDL-Lite>"#;

        let didl = parse_didl(xml).unwrap();
        assert_eq!(didl.items.len(), 1);
        let item = &didl.items[0];
        assert_eq!(item.title, "Song");
        assert_eq!(item.kind(), Some(MediaItemKind::Audio));
        let res = item.primary_resource().unwrap();
        assert_eq!(res.url, "http://h/s.mp3");
        assert_eq!(res.duration.as_deref(), Some("0:04:00"));
    }
}
