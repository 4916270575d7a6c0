//! # dlnacontrol - control point DLNA
//!
//! Découverte SSDP, registre des renderers et session de contrôle
//! AVTransport / RenderingControl.

pub mod avtransport_client;
pub mod discovery;
pub mod errors;
pub mod media;
pub mod model;
pub mod provider;
pub mod registry;
pub mod rendering_control_client;
pub mod runtime;
pub mod session;
pub mod soap_client;
pub mod time_utils;

pub use avtransport_client::{AvTransportClient, PositionInfo, TransportInfo};
pub use discovery::{DeviceDescriptionProvider, DiscoveredEndpoint, DiscoveryEvent, DiscoveryManager};
pub use errors::{ControlError, FailureKind, codes};
pub use media::{MediaDescriptor, MediaKind};
pub use model::{ConnectionState, Device, DeviceId, ServiceEndpoint, ServiceKind};
pub use provider::{DescriptionError, HttpXmlDescriptionProvider};
pub use registry::{DeviceListListener, DeviceRegistry, SearchBackend, SubscriptionId};
pub use rendering_control_client::RenderingControlClient;
pub use runtime::{DiscoveryOptions, SsdpDiscovery};
pub use session::{ControlSession, PlaybackState};
pub use soap_client::{ActionInvoker, ActionResponse, SoapActionInvoker};
