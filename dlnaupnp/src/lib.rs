//! Couche protocole UPnP côté *control point* : découverte SSDP et appels
//! SOAP. Aucun rôle device/serveur n'est implémenté ici.

pub mod soap;
pub mod ssdp;
