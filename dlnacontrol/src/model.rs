use std::fmt;

/// Identifiant d'un device : UDN normalisé (`uuid:...`, en minuscules).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(udn: impl AsRef<str>) -> Self {
        Self(udn.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub const AVTRANSPORT_SERVICE_TYPE: &str = "urn:schemas-upnp-org:service:AVTransport:1";
pub const RENDERING_CONTROL_SERVICE_TYPE: &str = "urn:schemas-upnp-org:service:RenderingControl:1";
pub const MEDIA_RENDERER_DEVICE_PREFIX: &str = "urn:schemas-upnp-org:device:mediarenderer:";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    AvTransport,
    RenderingControl,
    ConnectionManager,
    Other,
}

impl ServiceKind {
    pub fn from_service_type(service_type: &str) -> Self {
        let lower = service_type.to_ascii_lowercase();
        if lower.contains("urn:schemas-upnp-org:service:avtransport:") {
            ServiceKind::AvTransport
        } else if lower.contains("urn:schemas-upnp-org:service:renderingcontrol:") {
            ServiceKind::RenderingControl
        } else if lower.contains("urn:schemas-upnp-org:service:connectionmanager:") {
            ServiceKind::ConnectionManager
        } else {
            ServiceKind::Other
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::AvTransport => "AVTransport",
            ServiceKind::RenderingControl => "RenderingControl",
            ServiceKind::ConnectionManager => "ConnectionManager",
            ServiceKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Service exposé par un device : type + URL de contrôle absolue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub service_type: String,
    pub control_url: String,
}

impl ServiceEndpoint {
    pub fn new(service_type: impl Into<String>, control_url: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            control_url: control_url.into(),
        }
    }

    pub fn kind(&self) -> ServiceKind {
        ServiceKind::from_service_type(&self.service_type)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
    /// URL de description (LOCATION SSDP)
    pub location: String,
    /// Types de device trouvés dans la description (racine et embarqués)
    pub device_types: Vec<String>,
    pub services: Vec<ServiceEndpoint>,
    pub connection_state: ConnectionState,
}

impl Device {
    pub fn is_renderer(&self) -> bool {
        self.device_types
            .iter()
            .any(|t| t.to_ascii_lowercase().starts_with(MEDIA_RENDERER_DEVICE_PREFIX))
    }

    pub fn supports_rendering(&self) -> bool {
        self.service(ServiceKind::AvTransport).is_some()
            && self.service(ServiceKind::RenderingControl).is_some()
    }

    /// Premier service du type demandé.
    pub fn service(&self, kind: ServiceKind) -> Option<&ServiceEndpoint> {
        self.services.iter().find(|s| s.kind() == kind)
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}
