use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::path::{Component, Path, PathBuf};
use url::Url;

pub const DEFAULT_RTMP_PORT: u16 = 9577;
pub const DEFAULT_HTTP_PORT: u16 = 9578;
pub const DEFAULT_RTMP_APP: &str = "live";
pub const MIRROR_STREAM_NAME: &str = "mirror";

// application/x-www-form-urlencoded, with spaces as %20 instead of '+'
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'*');

/// Adresse du serveur d'origine (process externe) qui sert les fichiers
/// locaux en HTTP et reçoit le flux RTMP publié.
///
/// Les renderers n'ont pas accès au système de fichiers de l'appareil : tout
/// chemin local est réécrit en `http://<lan-ip>:<http-port>/<chemin-relatif>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaOrigin {
    lan_ip: String,
    http_port: u16,
    rtmp_port: u16,
    rtmp_app: String,
    media_root: PathBuf,
}

impl MediaOrigin {
    pub fn new(lan_ip: impl Into<String>, http_port: u16, rtmp_port: u16) -> Self {
        Self {
            lan_ip: lan_ip.into(),
            http_port,
            rtmp_port,
            rtmp_app: DEFAULT_RTMP_APP.to_string(),
            media_root: PathBuf::from("/"),
        }
    }

    /// Répertoire servi à la racine de l'origine HTTP.
    pub fn with_media_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.media_root = root.into();
        self
    }

    pub fn with_rtmp_app(mut self, app: impl Into<String>) -> Self {
        self.rtmp_app = app.into();
        self
    }

    pub fn lan_ip(&self) -> &str {
        &self.lan_ip
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn rtmp_port(&self) -> u16 {
        self.rtmp_port
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn http_base(&self) -> String {
        format!("http://{}:{}", self.lan_ip, self.http_port)
    }

    /// `rtmp://<lan-ip>:<rtmp-port>/<app>/<stream>`
    pub fn rtmp_url(&self, stream: &str) -> String {
        format!(
            "rtmp://{}:{}/{}/{}",
            self.lan_ip, self.rtmp_port, self.rtmp_app, stream
        )
    }

    pub fn mirror_url(&self) -> String {
        self.rtmp_url(MIRROR_STREAM_NAME)
    }

    /// URL que le renderer peut récupérer pour `source`.
    ///
    /// Les URI distantes et la chaîne vide sont renvoyées telles quelles. Un
    /// chemin sous `media_root` devient relatif à cette racine ; un autre
    /// chemin absolu est servi depuis la racine du système de fichiers.
    pub fn playable_url(&self, source: &str) -> String {
        if source.is_empty() || is_remote_uri(source) {
            return source.to_string();
        }

        let path = source.strip_prefix("file://").unwrap_or(source);
        let encoded = self
            .relative_segments(Path::new(path))
            .iter()
            .map(|segment| encode_path_segment(segment))
            .collect::<Vec<_>>()
            .join("/");

        format!("{}/{}", self.http_base(), encoded)
    }

    /// Inverse de [`playable_url`](Self::playable_url) : chemin relatif décodé,
    /// ou `None` si l'URL ne pointe pas vers cette origine.
    pub fn relative_path_of(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        if parsed.scheme() != "http"
            || parsed.host_str()? != self.lan_ip
            || parsed.port_or_known_default()? != self.http_port
        {
            return None;
        }

        let segments = parsed
            .path_segments()?
            .filter(|s| !s.is_empty())
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect::<Vec<_>>();
        Some(segments.join("/"))
    }

    fn relative_segments(&self, path: &Path) -> Vec<String> {
        let relative = path.strip_prefix(&self.media_root).unwrap_or(path);
        relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect()
    }
}

/// `true` pour toute URI avec un schéma autre que `file` (`http`, `https`,
/// `rtmp`, ...).
pub fn is_remote_uri(source: &str) -> bool {
    match source.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && !scheme.eq_ignore_ascii_case("file")
        }
        None => false,
    }
}

pub fn encode_path_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> MediaOrigin {
        MediaOrigin::new("192.168.1.20", DEFAULT_HTTP_PORT, DEFAULT_RTMP_PORT)
            .with_media_root("/storage/emulated/0")
    }

    #[test]
    fn local_path_under_root_is_rewritten() {
        let url = origin().playable_url("/storage/emulated/0/Movies/My Clip+1.mp4");
        assert_eq!(url, "http://192.168.1.20:9578/Movies/My%20Clip%2B1.mp4");
    }

    #[test]
    fn rewritten_url_round_trips_to_relative_path() {
        let origin = origin();
        for relative in ["Movies/été 2019/clip (1).mp4", "a&b/100%.mp3", "Pictures/x*y_z.jpg"] {
            let url = origin.playable_url(&format!("/storage/emulated/0/{relative}"));
            assert_eq!(origin.relative_path_of(&url).as_deref(), Some(relative));
        }
    }

    #[test]
    fn remote_and_empty_sources_are_untouched() {
        let origin = origin();
        assert_eq!(origin.playable_url(""), "");
        assert_eq!(
            origin.playable_url("https://cdn.example.org/a b.mp4"),
            "https://cdn.example.org/a b.mp4"
        );
        assert_eq!(
            origin.playable_url("rtmp://192.168.1.20:9577/live/mirror"),
            "rtmp://192.168.1.20:9577/live/mirror"
        );
    }

    #[test]
    fn file_scheme_and_foreign_paths() {
        let origin = origin();
        assert_eq!(
            origin.playable_url("file:///storage/emulated/0/song.flac"),
            "http://192.168.1.20:9578/song.flac"
        );
        assert_eq!(
            origin.playable_url("/mnt/usb/song.flac"),
            "http://192.168.1.20:9578/mnt/usb/song.flac"
        );
    }

    #[test]
    fn mirror_url_uses_fixed_stream_name() {
        assert_eq!(origin().mirror_url(), "rtmp://192.168.1.20:9577/live/mirror");
    }

    #[test]
    fn relative_path_of_rejects_other_hosts() {
        assert_eq!(origin().relative_path_of("http://10.0.0.1:9578/a.mp4"), None);
        assert_eq!(origin().relative_path_of("http://192.168.1.20:80/a.mp4"), None);
    }
}
