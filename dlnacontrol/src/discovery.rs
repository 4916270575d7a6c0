use std::collections::HashMap;
use std::time::{Duration, Instant};

use dlnaupnp::ssdp::{SsdpEvent, extract_udn_from_usn};
use tracing::{debug, info};

use crate::model::{Device, DeviceId};
use crate::provider::DescriptionError;

/// Ce que la découverte sait d'un endpoint UPnP, indexé par UDN.
#[derive(Clone, Debug)]
pub struct DiscoveredEndpoint {
    /// UDN normalisé (ex: "uuid:xxxx", en minuscules).
    pub udn: String,
    /// Dernière URL de description (LOCATION SSDP).
    pub location: String,
    pub server_header: String,
    /// Dernier max-age annoncé (secondes).
    pub max_age: u32,
    pub last_seen: Instant,
    /// Device décrit à partir de `location`, si la description a réussi.
    pub device: Option<Device>,
    /// LOCATION pour laquelle une description a déjà été tentée.
    described_location: Option<String>,
}

impl DiscoveredEndpoint {
    fn new(udn: String, location: String, server_header: String, max_age: u32) -> Self {
        Self {
            udn,
            location,
            server_header,
            max_age,
            last_seen: Instant::now(),
            device: None,
            described_location: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > Duration::from_secs(self.max_age as u64)
    }
}

/// Événements produits par la découverte et consommés par le registre.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Added(Device),
    Updated(Device),
    Removed(DeviceId),
    /// Description illisible ou injoignable ; le registre l'ignore.
    DiscoveryFailed { udn: String, reason: String },
}

/// Construit un [`Device`] à partir d'un endpoint (description.xml).
pub trait DeviceDescriptionProvider: Send + Sync {
    fn describe(&self, endpoint: &DiscoveredEndpoint) -> Result<Device, DescriptionError>;
}

/// Gestionnaire des événements SSDP -> DiscoveryEvent.
///
/// La description est récupérée une fois par couple (UDN, LOCATION) : une
/// annonce répétée ne fait que rafraîchir `last_seen`.
pub struct DiscoveryManager<P>
where
    P: DeviceDescriptionProvider,
{
    endpoints: HashMap<String, DiscoveredEndpoint>,
    provider: P,
}

impl<P> DiscoveryManager<P>
where
    P: DeviceDescriptionProvider,
{
    pub fn new(provider: P) -> Self {
        Self {
            endpoints: HashMap::new(),
            provider,
        }
    }

    pub fn endpoint(&self, udn: &str) -> Option<&DiscoveredEndpoint> {
        self.endpoints.get(udn)
    }

    pub fn handle_ssdp_event(&mut self, event: SsdpEvent) -> Vec<DiscoveryEvent> {
        match event {
            SsdpEvent::Alive {
                usn,
                location,
                server,
                max_age,
                ..
            }
            | SsdpEvent::SearchResponse {
                usn,
                location,
                server,
                max_age,
                ..
            } => match extract_udn_from_usn(&usn) {
                Some(udn) => self.update_endpoint(udn, location, server, max_age),
                None => Vec::new(),
            },
            SsdpEvent::ByeBye { usn, .. } => match extract_udn_from_usn(&usn) {
                Some(udn) => self.remove_endpoint(&udn),
                None => Vec::new(),
            },
        }
    }

    /// Retire les endpoints dont le max-age est dépassé.
    pub fn expire(&mut self, now: Instant) -> Vec<DiscoveryEvent> {
        let expired: Vec<String> = self
            .endpoints
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.udn.clone())
            .collect();

        expired
            .iter()
            .flat_map(|udn| {
                debug!(udn = %udn, "SSDP endpoint expired");
                self.remove_endpoint(udn)
            })
            .collect()
    }

    fn update_endpoint(
        &mut self,
        udn: String,
        location: String,
        server_header: String,
        max_age: u32,
    ) -> Vec<DiscoveryEvent> {
        let endpoint = self.endpoints.entry(udn.clone()).or_insert_with(|| {
            DiscoveredEndpoint::new(udn.clone(), location.clone(), server_header.clone(), max_age)
        });

        endpoint.location = location;
        endpoint.server_header = server_header;
        endpoint.max_age = max_age;
        endpoint.last_seen = Instant::now();

        if endpoint.described_location.as_deref() == Some(endpoint.location.as_str()) {
            return Vec::new();
        }
        endpoint.described_location = Some(endpoint.location.clone());
        let had_device = endpoint.device.is_some();

        match self.provider.describe(endpoint) {
            Ok(device) => {
                info!(udn = %udn, name = %device.friendly_name, "Device described");
                endpoint.device = Some(device.clone());
                if had_device {
                    vec![DiscoveryEvent::Updated(device)]
                } else {
                    vec![DiscoveryEvent::Added(device)]
                }
            }
            Err(err) => {
                debug!(udn = %udn, location = %endpoint.location, error = %err, "Description failed");
                let mut events = Vec::new();
                if let Some(previous) = endpoint.device.take() {
                    events.push(DiscoveryEvent::Removed(previous.id));
                }
                events.push(DiscoveryEvent::DiscoveryFailed {
                    udn,
                    reason: err.to_string(),
                });
                events
            }
        }
    }

    fn remove_endpoint(&mut self, udn: &str) -> Vec<DiscoveryEvent> {
        match self.endpoints.remove(udn) {
            Some(DiscoveredEndpoint {
                device: Some(device),
                ..
            }) => vec![DiscoveryEvent::Removed(device.id)],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConnectionState, ServiceEndpoint};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        calls: AtomicUsize,
    }

    impl DeviceDescriptionProvider for FakeProvider {
        fn describe(&self, endpoint: &DiscoveredEndpoint) -> Result<Device, DescriptionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if endpoint.location.contains("broken") {
                return Err(DescriptionError::MissingField("UDN"));
            }
            Ok(Device {
                id: DeviceId::new(&endpoint.udn),
                friendly_name: "TV".into(),
                manufacturer: String::new(),
                model_name: String::new(),
                location: endpoint.location.clone(),
                device_types: vec!["urn:schemas-upnp-org:device:MediaRenderer:1".into()],
                services: vec![ServiceEndpoint::new(
                    crate::model::AVTRANSPORT_SERVICE_TYPE,
                    "http://h/avt",
                )],
                connection_state: ConnectionState::Unknown,
            })
        }
    }

    fn manager() -> DiscoveryManager<FakeProvider> {
        DiscoveryManager::new(FakeProvider {
            calls: AtomicUsize::new(0),
        })
    }

    fn from() -> SocketAddr {
        "10.0.0.9:1900".parse().unwrap()
    }

    fn alive(usn: &str, location: &str, max_age: u32) -> SsdpEvent {
        SsdpEvent::Alive {
            usn: usn.into(),
            nt: "urn:schemas-upnp-org:device:MediaRenderer:1".into(),
            location: location.into(),
            server: "test".into(),
            max_age,
            from: from(),
        }
    }

    #[test]
    fn description_is_fetched_once_per_location() {
        let mut manager = manager();
        let usn = "uuid:TV-1::urn:schemas-upnp-org:device:MediaRenderer:1";

        let events = manager.handle_ssdp_event(alive(usn, "http://10.0.0.9/a.xml", 1800));
        assert!(matches!(&events[..], [DiscoveryEvent::Added(d)] if d.id.as_str() == "uuid:tv-1"));

        assert!(manager
            .handle_ssdp_event(alive("uuid:TV-1::upnp:rootdevice", "http://10.0.0.9/a.xml", 1800))
            .is_empty());
        assert_eq!(manager.provider.calls.load(Ordering::SeqCst), 1);

        let events = manager.handle_ssdp_event(alive(usn, "http://10.0.0.9/b.xml", 1800));
        assert!(matches!(&events[..], [DiscoveryEvent::Updated(_)]));
        assert_eq!(manager.provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn byebye_and_expiry_remove_devices() {
        let mut manager = manager();
        manager.handle_ssdp_event(alive("uuid:a", "http://h/a.xml", 10));
        manager.handle_ssdp_event(alive("uuid:b", "http://h/b.xml", 10));

        let events = manager.handle_ssdp_event(SsdpEvent::ByeBye {
            usn: "uuid:a::upnp:rootdevice".into(),
            nt: "upnp:rootdevice".into(),
            from: from(),
        });
        assert_eq!(events, vec![DiscoveryEvent::Removed(DeviceId::new("uuid:a"))]);

        assert!(manager.expire(Instant::now()).is_empty());
        let events = manager.expire(Instant::now() + Duration::from_secs(11));
        assert_eq!(events, vec![DiscoveryEvent::Removed(DeviceId::new("uuid:b"))]);
        assert!(manager.endpoint("uuid:b").is_none());
    }

    #[test]
    fn failed_description_is_reported_once() {
        let mut manager = manager();
        let events = manager.handle_ssdp_event(alive("uuid:bad", "http://h/broken.xml", 1800));
        assert!(matches!(
            &events[..],
            [DiscoveryEvent::DiscoveryFailed { udn, .. }] if udn == "uuid:bad"
        ));
        assert!(manager
            .handle_ssdp_event(alive("uuid:bad", "http://h/broken.xml", 1800))
            .is_empty());
    }

    #[test]
    fn usn_without_uuid_is_ignored() {
        let mut manager = manager();
        assert!(manager
            .handle_ssdp_event(alive("urn:weird", "http://h/a.xml", 1800))
            .is_empty());
    }
}
