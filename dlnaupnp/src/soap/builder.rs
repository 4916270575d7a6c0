//! Construction des requêtes SOAP

use xmltree::{Element, EmitterConfig, XMLNode};

const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SOAP_ENCODING: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// Construit la requête SOAP d'une action UPnP.
///
/// * `service_urn` - URN du service (ex: "urn:schemas-upnp-org:service:AVTransport:1")
/// * `action` - Nom de l'action (ex: "SetAVTransportURI")
/// * `args` - Arguments dans l'ordre attendu par le service
///
/// Les valeurs sont échappées par l'émetteur XML, ce qui permet de passer un
/// fragment DIDL-Lite tel quel dans `CurrentURIMetaData`.
pub fn build_soap_request(
    service_urn: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<String, xmltree::Error> {
    let mut request = Element::new(&format!("u:{action}"));
    request
        .attributes
        .insert("xmlns:u".to_string(), service_urn.to_string());

    for (name, value) in args {
        let mut child = Element::new(name);
        if !value.is_empty() {
            child.children.push(XMLNode::Text((*value).to_string()));
        }
        request.children.push(XMLNode::Element(child));
    }

    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(request));

    let mut envelope = Element::new("s:Envelope");
    envelope
        .attributes
        .insert("xmlns:s".to_string(), SOAP_ENVELOPE_NS.to_string());
    envelope
        .attributes
        .insert("s:encodingStyle".to_string(), SOAP_ENCODING.to_string());
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(false);
    envelope.write_with_config(&mut buf, config)?;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_contains_namespaced_action_and_args() {
        let xml = build_soap_request(
            "urn:schemas-upnp-org:service:RenderingControl:1",
            "SetVolume",
            &[("InstanceID", "0"), ("Channel", "Master"), ("DesiredVolume", "35")],
        )
        .unwrap();

        assert!(xml.contains("<u:SetVolume"));
        assert!(xml.contains(r#"xmlns:u="urn:schemas-upnp-org:service:RenderingControl:1""#));
        assert!(xml.contains("<Channel>Master</Channel>"));
        assert!(xml.contains("<DesiredVolume>35</DesiredVolume>"));
        assert!(xml.contains(r#"xmlns:s="http://schemas.xmlsoap.org/soap/envelope/""#));
    }

    #[test]
    fn xml_argument_values_are_escaped() {
        let xml = build_soap_request(
            "urn:schemas-upnp-org:service:AVTransport:1",
            "SetAVTransportURI",
            &[("CurrentURIMetaData", "<DIDL-Lite><item/></DIDL-Lite>")],
        )
        .unwrap();

        assert!(xml.contains("&lt;DIDL-Lite>") || xml.contains("&lt;DIDL-Lite&gt;"));
        assert!(!xml.contains("<DIDL-Lite>"));
    }
}
