use std::sync::Arc;

use crate::errors::ControlError;
use crate::model::ServiceEndpoint;
use crate::soap_client::{ActionInvoker, ActionResponse};

const INSTANCE_ID: &str = "0";
const MASTER_CHANNEL: &str = "Master";

/// Client RenderingControl:1, canal `Master`.
#[derive(Clone)]
pub struct RenderingControlClient {
    service: ServiceEndpoint,
    invoker: Arc<dyn ActionInvoker>,
}

impl RenderingControlClient {
    pub fn new(service: ServiceEndpoint, invoker: Arc<dyn ActionInvoker>) -> Self {
        Self { service, invoker }
    }

    pub fn service(&self) -> &ServiceEndpoint {
        &self.service
    }

    fn call(&self, action: &str, args: &[(&str, &str)]) -> Result<ActionResponse, ControlError> {
        self.invoker.invoke(&self.service, action, args)
    }

    pub fn get_volume(&self) -> Result<u16, ControlError> {
        const ACTION: &str = "GetVolume";
        let response = self.call(
            ACTION,
            &[("InstanceID", INSTANCE_ID), ("Channel", MASTER_CHANNEL)],
        )?;

        let text = response.require(ACTION, "CurrentVolume")?;
        text.parse::<u16>().map_err(|_| {
            ControlError::protocol(ACTION, 0, format!("invalid CurrentVolume value: {text}"))
        })
    }

    pub fn set_volume(&self, volume: u16) -> Result<(), ControlError> {
        let volume_str = volume.to_string();
        self.call(
            "SetVolume",
            &[
                ("InstanceID", INSTANCE_ID),
                ("Channel", MASTER_CHANNEL),
                ("DesiredVolume", volume_str.as_str()),
            ],
        )
        .map(|_| ())
    }

    pub fn get_mute(&self) -> Result<bool, ControlError> {
        const ACTION: &str = "GetMute";
        let response = self.call(
            ACTION,
            &[("InstanceID", INSTANCE_ID), ("Channel", MASTER_CHANNEL)],
        )?;

        match response.require(ACTION, "CurrentMute")? {
            "0" | "false" => Ok(false),
            "1" | "true" => Ok(true),
            other => Err(ControlError::protocol(
                ACTION,
                0,
                format!("invalid CurrentMute value: {other} (expected 0 or 1)"),
            )),
        }
    }

    pub fn set_mute(&self, mute: bool) -> Result<(), ControlError> {
        let mute_str = if mute { "1" } else { "0" };
        self.call(
            "SetMute",
            &[
                ("InstanceID", INSTANCE_ID),
                ("Channel", MASTER_CHANNEL),
                ("DesiredMute", mute_str),
            ],
        )
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RENDERING_CONTROL_SERVICE_TYPE;

    struct Fixed(ActionResponse);

    impl ActionInvoker for Fixed {
        fn invoke(
            &self,
            _service: &ServiceEndpoint,
            _action: &str,
            _args: &[(&str, &str)],
        ) -> Result<ActionResponse, ControlError> {
            Ok(self.0.clone())
        }
    }

    fn make_client(reply: ActionResponse) -> RenderingControlClient {
        RenderingControlClient::new(
            ServiceEndpoint::new(RENDERING_CONTROL_SERVICE_TYPE, "http://h/rc"),
            Arc::new(Fixed(reply)),
        )
    }

    #[test]
    fn volume_is_parsed() {
        let client = make_client(ActionResponse::new().with("CurrentVolume", "35"));
        assert_eq!(client.get_volume().unwrap(), 35);

        let client = make_client(ActionResponse::new().with("CurrentVolume", "loud"));
        assert!(matches!(
            client.get_volume(),
            Err(ControlError::Protocol { .. })
        ));
    }

    #[test]
    fn mute_is_parsed() {
        assert!(make_client(ActionResponse::new().with("CurrentMute", "1")).get_mute().unwrap());
        assert!(!make_client(ActionResponse::new().with("CurrentMute", "0")).get_mute().unwrap());
        assert!(make_client(ActionResponse::new().with("CurrentMute", "2")).get_mute().is_err());
    }
}
