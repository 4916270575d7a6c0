//! SOAP Faults renvoyés par les renderers

use super::envelope::{SoapEnvelope, child_text, find_child_with_suffix};

/// Erreur UPnP extraite de `s:Fault/detail/UPnPError`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpFault {
    /// Code d'erreur UPnP (ex: 401, 701)
    pub error_code: u32,

    pub error_description: String,
}

/// Extrait l'erreur UPnP d'une enveloppe, si le corps est un fault.
///
/// Un fault sans `UPnPError` exploitable donne le code 0 et la
/// `faultstring` comme description.
pub fn parse_upnp_fault(envelope: &SoapEnvelope) -> Option<UpnpFault> {
    let fault = find_child_with_suffix(&envelope.body.content, "Fault")?;

    let upnp_error = find_child_with_suffix(fault, "detail")
        .and_then(|detail| find_child_with_suffix(detail, "UPnPError"));

    if let Some(upnp_error) = upnp_error {
        if let Some(error_code) =
            child_text(upnp_error, "errorCode").and_then(|code| code.parse::<u32>().ok())
        {
            return Some(UpnpFault {
                error_code,
                error_description: child_text(upnp_error, "errorDescription")
                    .unwrap_or_default(),
            });
        }
    }

    Some(UpnpFault {
        error_code: 0,
        error_description: child_text(fault, "faultstring").unwrap_or_default(),
    })
}
