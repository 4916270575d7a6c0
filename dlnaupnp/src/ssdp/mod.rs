//! # Module SSDP - Simple Service Discovery Protocol (control point)
//!
//! - **Multicast Address**: 239.255.255.250:1900
//! - **Max-Age** par défaut : 1800 secondes
//!
//! Le client n'écoute jamais sur le port 1900 : il utilise un port éphémère,
//! envoie des M-SEARCH et reçoit les réponses unicast ainsi que les NOTIFY
//! multicast.

mod client;

pub use client::{SsdpClient, SsdpEvent, extract_udn_from_usn};

/// Adresse multicast SSDP
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// Port SSDP
pub const SSDP_PORT: u16 = 1900;

/// Durée de validité des annonces (en secondes)
pub const MAX_AGE: u32 = 1800;

/// Cibles de recherche
pub const ST_ALL: &str = "ssdp:all";
pub const ST_MEDIA_RENDERER: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";
