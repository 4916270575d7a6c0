//! # Module SOAP - côté client
//!
//! - [`build_soap_request`] : enveloppe `s:Envelope/s:Body/u:Action`
//! - [`parse_soap_envelope`] : lecture d'une réponse (ou d'un fault)
//! - [`parse_upnp_fault`] : extraction `UPnPError/errorCode`
//!
//! ```
//! use dlnaupnp::soap::{build_soap_request, parse_soap_envelope};
//!
//! let xml = build_soap_request(
//!     "urn:schemas-upnp-org:service:AVTransport:1",
//!     "Play",
//!     &[("InstanceID", "0"), ("Speed", "1")],
//! )
//! .unwrap();
//! let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
//! assert!(envelope.body.content.children.len() == 1);
//! ```

mod builder;
mod envelope;
mod fault;
mod parser;

pub use builder::build_soap_request;
pub use envelope::{SoapBody, SoapEnvelope, SoapHeader, child_text, find_child_with_suffix};
pub use fault::{UpnpFault, parse_upnp_fault};
pub use parser::{SoapParseError, parse_soap_envelope};

/// Codes d'erreur UPnP standards
pub mod error_codes {
    pub const INVALID_ACTION: u32 = 401;
    pub const INVALID_ARGS: u32 = 402;
    pub const ACTION_FAILED: u32 = 501;
    pub const ARGUMENT_VALUE_INVALID: u32 = 600;
    pub const ARGUMENT_VALUE_OUT_OF_RANGE: u32 = 601;
    pub const OPTIONAL_ACTION_NOT_IMPLEMENTED: u32 = 602;
    /// AVTransport : transition non disponible (ex. Pause pendant STOPPED)
    pub const TRANSITION_NOT_AVAILABLE: u32 = 701;
    pub const NO_CONTENTS: u32 = 702;
    pub const ILLEGAL_SEEK_TARGET: u32 = 711;
    pub const ILLEGAL_MIME_TYPE: u32 = 714;
}
