//! Parser des réponses SOAP

use super::{SoapBody, SoapEnvelope, SoapHeader};
use xmltree::Element;

/// Erreur de parsing SOAP
#[derive(Debug, thiserror::Error)]
pub enum SoapParseError {
    #[error("XML parse error: {0}")]
    XmlError(#[from] xmltree::ParseError),

    #[error("Missing SOAP Envelope")]
    MissingEnvelope,

    #[error("Missing SOAP Body")]
    MissingBody,
}

/// Parse une enveloppe SOAP complète
pub fn parse_soap_envelope(xml: &[u8]) -> Result<SoapEnvelope, SoapParseError> {
    let root = Element::parse(xml)?;

    if !root.name.ends_with("Envelope") {
        return Err(SoapParseError::MissingEnvelope);
    }

    let child_named = |suffix: &str| {
        root.children
            .iter()
            .filter_map(|n| n.as_element())
            .find(|e| e.name.ends_with(suffix))
            .cloned()
    };

    let header = child_named("Header").map(|content| SoapHeader { content });
    let content = child_named("Body").ok_or(SoapParseError::MissingBody)?;

    Ok(SoapEnvelope {
        header,
        body: SoapBody { content },
    })
}
