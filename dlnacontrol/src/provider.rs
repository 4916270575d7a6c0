use std::time::Duration;

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::{Error as XmlError, Reader, events::Event};
use thiserror::Error;
use tracing::{debug, trace};
use ureq::Agent;
use url::Url;

use crate::discovery::{DeviceDescriptionProvider, DiscoveredEndpoint};
use crate::model::{ConnectionState, Device, DeviceId, ServiceEndpoint};

#[derive(Debug, Error)]
pub enum DescriptionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] ureq::Error),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Missing required device element: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Default)]
struct ParsedDescription {
    url_base: Option<String>,
    udn: Option<String>,
    device_types: Vec<String>,
    friendly_name: Option<String>,
    manufacturer: Option<String>,
    model_name: Option<String>,
    services: Vec<(String, String)>,
}

/// Description UPnP récupérée en HTTP (description.xml).
pub struct HttpXmlDescriptionProvider {
    agent: Agent,
}

impl HttpXmlDescriptionProvider {
    pub fn new(timeout_secs: u64) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout_secs)))
            .build();

        Self {
            agent: config.into(),
        }
    }

    fn fetch(&self, location: &str) -> Result<Vec<u8>, DescriptionError> {
        let mut response = self.agent.get(location).call()?;
        Ok(response.body_mut().read_to_vec()?)
    }
}

impl DeviceDescriptionProvider for HttpXmlDescriptionProvider {
    fn describe(&self, endpoint: &DiscoveredEndpoint) -> Result<Device, DescriptionError> {
        debug!(udn = %endpoint.udn, location = %endpoint.location, "Fetching device description");
        let body = self.fetch(&endpoint.location)?;
        parse_description(&body, &endpoint.location)
    }
}

/// Parse un document de description et construit le [`Device`].
///
/// Les types de device et les services des devices embarqués sont inclus ;
/// nom, fabricant et modèle viennent du device racine.
pub fn parse_description(xml: &[u8], location: &str) -> Result<Device, DescriptionError> {
    let parsed = read_description(xml)?;

    let udn = parsed
        .udn
        .filter(|u| !u.is_empty())
        .ok_or(DescriptionError::MissingField("UDN"))?;
    if parsed.device_types.is_empty() {
        return Err(DescriptionError::MissingField("deviceType"));
    }

    let base = parsed.url_base.as_deref().unwrap_or(location);
    let services = parsed
        .services
        .into_iter()
        .map(|(service_type, control)| {
            let control_url = resolve_control_url(base, &control);
            trace!(%service_type, %control_url, "Service endpoint");
            ServiceEndpoint::new(service_type, control_url)
        })
        .collect();

    let model_name = parsed.model_name.unwrap_or_default();
    let friendly_name = parsed
        .friendly_name
        .filter(|n| !n.is_empty())
        .or_else(|| Some(model_name.clone()).filter(|m| !m.is_empty()))
        .unwrap_or_else(|| udn.clone());

    Ok(Device {
        id: DeviceId::new(&udn),
        friendly_name,
        manufacturer: parsed.manufacturer.unwrap_or_default(),
        model_name,
        location: location.to_string(),
        device_types: parsed.device_types,
        services,
        connection_state: ConnectionState::Unknown,
    })
}

fn read_description(xml: &[u8]) -> Result<ParsedDescription, DescriptionError> {
    let mut reader = Reader::from_reader(xml);
    // Pas de trim_text : les entités arrivent en événements séparés et les
    // espaces autour doivent être conservés
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut parsed = ParsedDescription::default();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut service: (Option<String>, Option<String>) = (None, None);

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "service" {
                    service = (None, None);
                }
                stack.push(name);
                text.clear();
            }
            Event::Text(e) => {
                text.push_str(&e.decode().map_err(XmlError::Encoding)?);
            }
            Event::GeneralRef(e) => {
                if let Some(ch) = e.resolve_char_ref()? {
                    text.push(ch);
                } else {
                    let entity = e.decode().map_err(XmlError::Encoding)?;
                    if let Some(value) = resolve_predefined_entity(&entity) {
                        text.push_str(value);
                    }
                }
            }
            Event::End(_) => {
                let Some(name) = stack.pop() else {
                    continue;
                };
                let value = text.trim().to_string();
                text.clear();

                let device_depth = stack.iter().filter(|n| *n == "device").count();
                let parent = stack.last().map(String::as_str);

                match (name.as_str(), parent) {
                    ("URLBase", Some("root")) => parsed.url_base = Some(value),
                    ("deviceType", Some("device")) => parsed.device_types.push(value),
                    ("UDN", Some("device")) if device_depth == 1 => parsed.udn = Some(value),
                    ("friendlyName", Some("device")) if device_depth == 1 => {
                        parsed.friendly_name = Some(value)
                    }
                    ("manufacturer", Some("device")) if device_depth == 1 => {
                        parsed.manufacturer = Some(value)
                    }
                    ("modelName", Some("device")) if device_depth == 1 => {
                        parsed.model_name = Some(value)
                    }
                    ("serviceType", Some("service")) => service.0 = Some(value),
                    ("controlURL", Some("service")) => service.1 = Some(value),
                    ("service", _) => {
                        if let (Some(st), Some(ctrl)) = (service.0.take(), service.1.take()) {
                            parsed.services.push((st, ctrl));
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(parsed)
}

/// URL de contrôle absolue ; une URL déjà absolue est conservée.
fn resolve_control_url(base: &str, control_url: &str) -> String {
    if let Ok(absolute) = Url::parse(control_url) {
        return absolute.to_string();
    }
    match Url::parse(base).and_then(|b| b.join(control_url)) {
        Ok(url) => url.to_string(),
        Err(_) => control_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceKind;

    const TV: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Salon &amp; TV</friendlyName>
    <manufacturer>ACME</manufacturer>
    <modelName>X100</modelName>
    <UDN>uuid:ABCD-0001</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <controlURL>/upnp/control/AVTransport1</controlURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <controlURL>upnp/control/RenderingControl1</controlURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    #[test]
    fn parses_renderer_description() {
        let device = parse_description(TV.as_bytes(), "http://192.168.1.30:49152/desc/device.xml")
            .unwrap();

        assert_eq!(device.id.as_str(), "uuid:abcd-0001");
        assert_eq!(device.friendly_name, "Salon & TV");
        assert_eq!(device.manufacturer, "ACME");
        assert!(device.is_renderer());
        assert!(device.supports_rendering());
        assert_eq!(
            device.service(ServiceKind::AvTransport).unwrap().control_url,
            "http://192.168.1.30:49152/upnp/control/AVTransport1"
        );
        assert_eq!(
            device.service(ServiceKind::RenderingControl).unwrap().control_url,
            "http://192.168.1.30:49152/desc/upnp/control/RenderingControl1"
        );
    }

    #[test]
    fn embedded_renderer_and_url_base() {
        let xml = r#"<root>
  <URLBase>http://10.0.0.5:8080/</URLBase>
  <device>
    <deviceType>urn:schemas-upnp-org:device:Basic:1</deviceType>
    <modelName>Box</modelName>
    <UDN>uuid:root-1</UDN>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
        <friendlyName>Inner</friendlyName>
        <UDN>uuid:inner-1</UDN>
        <serviceList>
          <service>
            <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
            <controlURL>avt</controlURL>
          </service>
        </serviceList>
      </device>
    </deviceList>
  </device>
</root>"#;
        let device = parse_description(xml.as_bytes(), "http://10.0.0.5:1900/d.xml").unwrap();

        assert_eq!(device.id.as_str(), "uuid:root-1");
        // Pas de friendlyName à la racine : repli sur le modèle
        assert_eq!(device.friendly_name, "Box");
        assert_eq!(device.device_types.len(), 2);
        assert!(device.is_renderer());
        assert_eq!(device.services[0].control_url, "http://10.0.0.5:8080/avt");
    }

    #[test]
    fn missing_fields_are_reported() {
        let no_udn = r#"<root><device><deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType></device></root>"#;
        assert!(matches!(
            parse_description(no_udn.as_bytes(), "http://h/d.xml"),
            Err(DescriptionError::MissingField("UDN"))
        ));

        let no_type = r#"<root><device><UDN>uuid:x</UDN></device></root>"#;
        assert!(matches!(
            parse_description(no_type.as_bytes(), "http://h/d.xml"),
            Err(DescriptionError::MissingField("deviceType"))
        ));
    }

    #[test]
    fn friendly_name_falls_back_to_udn() {
        let xml = r#"<root><device><deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType><UDN>uuid:lonely</UDN></device></root>"#;
        let device = parse_description(xml.as_bytes(), "http://h/d.xml").unwrap();
        assert_eq!(device.friendly_name, "uuid:lonely");
    }
}
