//! Petits utilitaires réseau partagés par les crates SimpleDLNA.
//!
//! - [`guess_local_ip`] : adresse IPv4 utilisée pour joindre le LAN
//! - [`MediaOrigin`] : conventions d'URL du serveur d'origine (HTTP pour les
//!   fichiers locaux, RTMP pour le flux de mirroring)
mod ip_utils;
mod media_origin;

pub use ip_utils::{guess_local_ip, list_all_ips};
pub use media_origin::{
    DEFAULT_HTTP_PORT, DEFAULT_RTMP_APP, DEFAULT_RTMP_PORT, MIRROR_STREAM_NAME, MediaOrigin,
    encode_path_segment, is_remote_uri,
};
