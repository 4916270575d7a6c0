use std::sync::Arc;

use crate::errors::ControlError;
use crate::model::ServiceEndpoint;
use crate::soap_client::{ActionInvoker, ActionResponse};
use crate::time_utils::parse_upnp_time;

const INSTANCE_ID: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportInfo {
    /// `PLAYING`, `PAUSED_PLAYBACK`, `STOPPED`, `TRANSITIONING`, ...
    pub current_transport_state: String,
    pub current_transport_status: String,
    pub current_speed: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionInfo {
    pub track: u32,
    pub track_duration: Option<String>,
    pub track_metadata: Option<String>,
    pub track_uri: Option<String>,
    pub rel_time: Option<String>,
    pub abs_time: Option<String>,
}

impl PositionInfo {
    pub fn duration_secs(&self) -> Option<u64> {
        self.track_duration.as_deref().and_then(parse_upnp_time)
    }

    pub fn position_secs(&self) -> Option<u64> {
        self.rel_time.as_deref().and_then(parse_upnp_time)
    }
}

/// Client AVTransport:1 (InstanceID 0).
#[derive(Clone)]
pub struct AvTransportClient {
    service: ServiceEndpoint,
    invoker: Arc<dyn ActionInvoker>,
}

impl AvTransportClient {
    pub fn new(service: ServiceEndpoint, invoker: Arc<dyn ActionInvoker>) -> Self {
        Self { service, invoker }
    }

    pub fn service(&self) -> &ServiceEndpoint {
        &self.service
    }

    fn call(&self, action: &str, args: &[(&str, &str)]) -> Result<ActionResponse, ControlError> {
        self.invoker.invoke(&self.service, action, args)
    }

    pub fn set_av_transport_uri(&self, uri: &str, metadata: &str) -> Result<(), ControlError> {
        self.call(
            "SetAVTransportURI",
            &[
                ("InstanceID", INSTANCE_ID),
                ("CurrentURI", uri),
                ("CurrentURIMetaData", metadata),
            ],
        )
        .map(|_| ())
    }

    pub fn play(&self) -> Result<(), ControlError> {
        self.call("Play", &[("InstanceID", INSTANCE_ID), ("Speed", "1")])
            .map(|_| ())
    }

    pub fn pause(&self) -> Result<(), ControlError> {
        self.call("Pause", &[("InstanceID", INSTANCE_ID)]).map(|_| ())
    }

    pub fn stop(&self) -> Result<(), ControlError> {
        self.call("Stop", &[("InstanceID", INSTANCE_ID)]).map(|_| ())
    }

    /// `target` au format `HH:MM:SS`.
    pub fn seek_rel_time(&self, target: &str) -> Result<(), ControlError> {
        self.call(
            "Seek",
            &[
                ("InstanceID", INSTANCE_ID),
                ("Unit", "REL_TIME"),
                ("Target", target),
            ],
        )
        .map(|_| ())
    }

    pub fn get_position_info(&self) -> Result<PositionInfo, ControlError> {
        const ACTION: &str = "GetPositionInfo";
        let response = self.call(ACTION, &[("InstanceID", INSTANCE_ID)])?;

        let track = response
            .get("Track")
            .and_then(|t| t.parse::<u32>().ok())
            .unwrap_or(0);
        let non_empty = |name: &str| {
            response
                .get(name)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Ok(PositionInfo {
            track,
            track_duration: non_empty("TrackDuration"),
            track_metadata: non_empty("TrackMetaData"),
            track_uri: non_empty("TrackURI"),
            rel_time: non_empty("RelTime"),
            abs_time: non_empty("AbsTime"),
        })
    }

    pub fn get_transport_info(&self) -> Result<TransportInfo, ControlError> {
        const ACTION: &str = "GetTransportInfo";
        let response = self.call(ACTION, &[("InstanceID", INSTANCE_ID)])?;

        Ok(TransportInfo {
            current_transport_state: response
                .require(ACTION, "CurrentTransportState")?
                .to_string(),
            current_transport_status: response
                .get("CurrentTransportStatus")
                .unwrap_or("OK")
                .to_string(),
            current_speed: response.get("CurrentSpeed").unwrap_or("1").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AVTRANSPORT_SERVICE_TYPE;
    use std::sync::Mutex;

    struct Recorder {
        calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
        reply: ActionResponse,
    }

    impl ActionInvoker for Recorder {
        fn invoke(
            &self,
            _service: &ServiceEndpoint,
            action: &str,
            args: &[(&str, &str)],
        ) -> Result<ActionResponse, ControlError> {
            self.calls.lock().unwrap().push((
                action.to_string(),
                args.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ));
            Ok(self.reply.clone())
        }
    }

    fn make_client(reply: ActionResponse) -> (AvTransportClient, Arc<Recorder>) {
        let recorder = Arc::new(Recorder {
            calls: Mutex::new(Vec::new()),
            reply,
        });
        let service = ServiceEndpoint::new(AVTRANSPORT_SERVICE_TYPE, "http://h/ctl");
        (AvTransportClient::new(service, recorder.clone()), recorder)
    }

    #[test]
    fn play_and_seek_arguments() {
        let (client, recorder) = make_client(ActionResponse::new());
        client.play().unwrap();
        client.seek_rel_time("00:01:30").unwrap();

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls[0].0, "Play");
        assert_eq!(
            calls[0].1,
            vec![
                ("InstanceID".to_string(), "0".to_string()),
                ("Speed".to_string(), "1".to_string())
            ]
        );
        assert_eq!(calls[1].0, "Seek");
        assert!(calls[1].1.contains(&("Unit".to_string(), "REL_TIME".to_string())));
        assert!(calls[1].1.contains(&("Target".to_string(), "00:01:30".to_string())));
    }

    #[test]
    fn position_info_is_parsed() {
        let (client, _) = make_client(
            ActionResponse::new()
                .with("Track", "1")
                .with("TrackDuration", "0:03:00")
                .with("TrackMetaData", "")
                .with("TrackURI", "http://h/a.mp4")
                .with("RelTime", "0:00:42")
                .with("AbsTime", "NOT_IMPLEMENTED"),
        );
        let info = client.get_position_info().unwrap();
        assert_eq!(info.track, 1);
        assert_eq!(info.duration_secs(), Some(180));
        assert_eq!(info.position_secs(), Some(42));
        assert_eq!(info.track_metadata, None);
        assert_eq!(info.track_uri.as_deref(), Some("http://h/a.mp4"));
    }

    #[test]
    fn transport_info_requires_state() {
        let (client, _) = make_client(ActionResponse::new());
        assert!(matches!(
            client.get_transport_info(),
            Err(ControlError::Protocol { .. })
        ));

        let (client, _) = make_client(ActionResponse::new().with("CurrentTransportState", "PLAYING"));
        let info = client.get_transport_info().unwrap();
        assert_eq!(info.current_transport_state, "PLAYING");
        assert_eq!(info.current_speed, "1");
    }
}
