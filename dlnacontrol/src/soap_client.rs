use std::time::Duration;

use dlnaupnp::soap::{build_soap_request, parse_soap_envelope, parse_upnp_fault};
use tracing::{debug, trace};
use ureq::Agent;
use xmltree::XMLNode;

use crate::errors::ControlError;
use crate::model::ServiceEndpoint;

/// Arguments de sortie d'une action UPnP, dans l'ordre de la réponse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionResponse {
    values: Vec<(String, String)>,
}

impl ActionResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Argument obligatoire : son absence est une erreur de protocole.
    pub fn require(&self, action: &str, name: &str) -> Result<&str, ControlError> {
        self.get(name).ok_or_else(|| {
            ControlError::protocol(action, 0, format!("missing {name} in {action}Response"))
        })
    }
}

/// Seul point de passage réseau des sessions de contrôle.
pub trait ActionInvoker: Send + Sync {
    fn invoke(
        &self,
        service: &ServiceEndpoint,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<ActionResponse, ControlError>;
}

/// Invocation SOAP sur HTTP (ureq, bloquant).
pub struct SoapActionInvoker {
    agent: Agent,
}

impl SoapActionInvoker {
    pub fn new(timeout: Duration) -> Self {
        // Les 4xx/5xx ne sont pas des erreurs ureq : un fault SOAP arrive en 500
        // et son corps doit être lu.
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build();

        Self {
            agent: config.into(),
        }
    }
}

impl ActionInvoker for SoapActionInvoker {
    fn invoke(
        &self,
        service: &ServiceEndpoint,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<ActionResponse, ControlError> {
        let body_xml = build_soap_request(&service.service_type, action, args)
            .map_err(|e| ControlError::transport(action, format!("cannot build request: {e}")))?;

        let soap_action_header = format!(r#""{}#{}""#, service.service_type, action);
        debug!(action, url = %service.control_url, "SOAP request");

        let mut response = self
            .agent
            .post(&service.control_url)
            .header("Content-Type", r#"text/xml; charset="utf-8""#)
            .header("SOAPAction", &soap_action_header)
            .send(body_xml)
            .map_err(|e| ControlError::transport(action, e.to_string()))?;

        let status = response.status();
        let raw_body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ControlError::transport(action, format!("cannot read body: {e}")))?;
        trace!(action, %status, body = %raw_body, "SOAP response");

        let envelope = match parse_soap_envelope(raw_body.as_bytes()) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(ControlError::transport(
                    action,
                    format!("invalid SOAP response: {e}"),
                ));
            }
            Err(_) => {
                return Err(ControlError::transport(
                    action,
                    format!("HTTP status {status}"),
                ));
            }
        };

        if let Some(fault) = parse_upnp_fault(&envelope) {
            return Err(ControlError::protocol(
                action,
                fault.error_code,
                fault.error_description,
            ));
        }

        if !status.is_success() {
            return Err(ControlError::transport(
                action,
                format!("HTTP status {status}"),
            ));
        }

        let mut out = ActionResponse::new();
        match envelope.action_response(action) {
            Some(element) => {
                for node in &element.children {
                    if let XMLNode::Element(arg) = node {
                        let value = arg
                            .get_text()
                            .map(|t| t.trim().to_string())
                            .unwrap_or_default();
                        out = out.with(arg.name.clone(), value);
                    }
                }
            }
            None => debug!(action, "SOAP response without {action}Response element"),
        }

        Ok(out)
    }
}
