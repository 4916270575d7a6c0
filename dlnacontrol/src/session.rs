//! Machine d'état de contrôle d'un renderer (AVTransport + RenderingControl).
//!
//! Toutes les commandes vérifient, dans cet ordre et avant tout appel réseau :
//! l'idempotence (déjà dans l'état visé → succès sans trafic), l'état de la
//! session (`Unknown`, `Error`, `Disconnected` → [`ControlError::NotReady`]),
//! puis la présence du service (→ [`ControlError::ServiceUnavailable`]).
//! Toute erreur réseau ou protocole place la session en `Error` ; seul un
//! nouveau `connect()` l'en fait sortir.

use std::sync::Arc;

use dlnautils::MediaOrigin;
use tracing::{debug, info, warn};

use crate::avtransport_client::{AvTransportClient, PositionInfo, TransportInfo};
use crate::errors::ControlError;
use crate::media::{MediaDescriptor, MediaKind};
use crate::model::{Device, ServiceKind};
use crate::registry::DeviceRegistry;
use crate::rendering_control_client::RenderingControlClient;
use crate::soap_client::ActionInvoker;
use crate::time_utils::format_hhmmss;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    #[default]
    Unknown,
    Connected,
    Playing,
    Paused,
    Stopped,
    Buffering,
    Error,
    Disconnected,
}

impl PlaybackState {
    pub fn code(self) -> i32 {
        match self {
            PlaybackState::Unknown => -1,
            PlaybackState::Connected => 0,
            PlaybackState::Playing => 1,
            PlaybackState::Paused => 2,
            PlaybackState::Stopped => 3,
            PlaybackState::Buffering => 4,
            PlaybackState::Error => 5,
            PlaybackState::Disconnected => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => PlaybackState::Unknown,
            0 => PlaybackState::Connected,
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            3 => PlaybackState::Stopped,
            4 => PlaybackState::Buffering,
            5 => PlaybackState::Error,
            6 => PlaybackState::Disconnected,
            _ => return None,
        })
    }

    /// Etat AVTransport (`CurrentTransportState`) vers état de session.
    pub fn from_transport_state(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PLAYING" => Some(PlaybackState::Playing),
            "PAUSED_PLAYBACK" | "PAUSED_RECORDING" => Some(PlaybackState::Paused),
            "STOPPED" | "NO_MEDIA_PRESENT" => Some(PlaybackState::Stopped),
            "TRANSITIONING" => Some(PlaybackState::Buffering),
            _ => None,
        }
    }

    fn is_ready(self) -> bool {
        !matches!(
            self,
            PlaybackState::Unknown | PlaybackState::Error | PlaybackState::Disconnected
        )
    }
}

pub struct ControlSession {
    registry: DeviceRegistry,
    invoker: Arc<dyn ActionInvoker>,
    origin: MediaOrigin,
    state: PlaybackState,
    device: Option<Device>,
    av_transport: Option<AvTransportClient>,
    rendering: Option<RenderingControlClient>,
    media: Option<MediaDescriptor>,
    metadata: String,
}

impl ControlSession {
    pub fn new(
        registry: DeviceRegistry,
        invoker: Arc<dyn ActionInvoker>,
        origin: MediaOrigin,
    ) -> Self {
        Self {
            registry,
            invoker,
            origin,
            state: PlaybackState::Unknown,
            device: None,
            av_transport: None,
            rendering: None,
            media: None,
            metadata: String::new(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Un device est lié et la session accepte des commandes.
    pub fn is_ready(&self) -> bool {
        self.device.is_some() && self.state.is_ready()
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    pub fn media(&self) -> Option<&MediaDescriptor> {
        self.media.as_ref()
    }

    pub fn origin(&self) -> &MediaOrigin {
        &self.origin
    }

    /// Lie la session au device et le réserve dans le registre.
    ///
    /// Le nouveau device est vérifié et réservé avant de libérer l'ancien :
    /// un échec laisse la session inchangée.
    pub fn connect(&mut self, device: &Device) -> Result<(), ControlError> {
        if let Some(current) = &self.device {
            if current.id == device.id {
                if self.state == PlaybackState::Error {
                    info!(device = %device.id, "Reconnecting after error");
                    self.state = PlaybackState::Connected;
                }
                return Ok(());
            }
        }

        if !device.is_renderer() {
            return Err(ControlError::ConnectFailure(format!(
                "{} is not a media renderer",
                device.friendly_name
            )));
        }
        if !self.registry.mark_connected(&device.id) {
            return Err(ControlError::ConnectFailure(format!(
                "{} is already held by another session",
                device.friendly_name
            )));
        }
        if let Some(current) = &self.device {
            debug!(from = %current.id, to = %device.id, "Switching device");
            self.release();
        }

        self.av_transport = device
            .service(ServiceKind::AvTransport)
            .map(|s| AvTransportClient::new(s.clone(), Arc::clone(&self.invoker)));
        self.rendering = device
            .service(ServiceKind::RenderingControl)
            .map(|s| RenderingControlClient::new(s.clone(), Arc::clone(&self.invoker)));
        if self.av_transport.is_none() {
            warn!(device = %device.id, "Device has no AVTransport service");
        }

        let mut bound = device.clone();
        bound.connection_state = crate::model::ConnectionState::Connected;
        self.device = Some(bound);
        self.media = None;
        self.metadata.clear();
        self.state = PlaybackState::Connected;
        info!(device = %device.id, name = %device.friendly_name, "Connected");
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), ControlError> {
        if self.device.is_none() {
            return Err(ControlError::DisconnectFailure(
                "no device connected".to_string(),
            ));
        }
        self.release();
        self.state = PlaybackState::Disconnected;
        Ok(())
    }

    fn release(&mut self) {
        if let Some(device) = self.device.take() {
            self.registry.mark_disconnected(&device.id);
            info!(device = %device.id, "Disconnected");
        }
        self.av_transport = None;
        self.rendering = None;
        self.media = None;
        self.metadata.clear();
    }

    /// Prépare le média : URL jouable par le renderer et métadonnées
    /// DIDL-Lite. Aucun appel réseau.
    pub fn set_source(&mut self, mut media: MediaDescriptor) -> Result<(), ControlError> {
        if media.kind == MediaKind::Unknown {
            return Err(ControlError::IllegalMediaType(format!(
                "media {} has no known type",
                media.id
            )));
        }

        media.playable_uri = Some(self.origin.playable_url(&media.source_uri));
        let item = media
            .to_media_item()
            .ok_or_else(|| ControlError::IllegalMediaType(media.id.clone()))?;
        let metadata = dlnadidl::build_didl_fragment(&item)
            .map_err(|e| ControlError::IllegalMediaType(e.to_string()))?;

        debug!(id = %media.id, uri = %media.uri(), "Source set");
        self.media = Some(media);
        self.metadata = metadata;
        Ok(())
    }

    /// `SetAVTransportURI` puis `Play`.
    pub fn start(&mut self) -> Result<(), ControlError> {
        self.ensure_ready()?;
        let media = self.media.clone().ok_or(ControlError::NotReady)?;
        let avt = self.avt()?;

        let result = avt
            .set_av_transport_uri(media.uri(), &self.metadata)
            .and_then(|_| avt.play());
        self.track(result)?;

        self.state = PlaybackState::Playing;
        info!(uri = %media.uri(), "Playback started");
        Ok(())
    }

    pub fn play(&mut self) -> Result<(), ControlError> {
        self.transition(PlaybackState::Playing, |avt| avt.play())
    }

    pub fn pause(&mut self) -> Result<(), ControlError> {
        self.transition(PlaybackState::Paused, |avt| avt.pause())
    }

    pub fn stop(&mut self) -> Result<(), ControlError> {
        self.transition(PlaybackState::Stopped, |avt| avt.stop())
    }

    /// Position relative en secondes depuis le début du morceau.
    pub fn seek(&mut self, position_secs: u64) -> Result<(), ControlError> {
        self.ensure_ready()?;
        let avt = self.avt()?;
        let result = avt.seek_rel_time(&format_hhmmss(position_secs));
        self.track(result)
    }

    /// Volume `0..=100` (borné).
    pub fn set_volume(&mut self, level: u16) -> Result<(), ControlError> {
        self.ensure_ready()?;
        let rc = self.rc()?;
        let result = rc.set_volume(level.min(100));
        self.track(result)
    }

    pub fn mute(&mut self, mute: bool) -> Result<(), ControlError> {
        self.ensure_ready()?;
        let rc = self.rc()?;
        let result = rc.set_mute(mute);
        self.track(result)
    }

    pub fn get_volume(&mut self) -> Result<u16, ControlError> {
        self.ensure_ready()?;
        let rc = self.rc()?;
        let result = rc.get_volume();
        self.track(result)
    }

    pub fn get_position_info(&mut self) -> Result<PositionInfo, ControlError> {
        self.ensure_ready()?;
        let avt = self.avt()?;
        let result = avt.get_position_info();
        self.track(result)
    }

    /// Interroge le renderer et aligne l'état de la session sur le sien.
    pub fn get_transport_info(&mut self) -> Result<TransportInfo, ControlError> {
        self.ensure_ready()?;
        let avt = self.avt()?;
        let result = avt.get_transport_info();
        let info = self.track(result)?;

        if let Some(state) = PlaybackState::from_transport_state(&info.current_transport_state) {
            if state != self.state {
                debug!(from = ?self.state, to = ?state, "State aligned on renderer");
                self.state = state;
            }
        }
        Ok(info)
    }

    fn transition<F>(&mut self, target: PlaybackState, action: F) -> Result<(), ControlError>
    where
        F: FnOnce(&AvTransportClient) -> Result<(), ControlError>,
    {
        if self.state == target {
            return Ok(());
        }
        self.ensure_ready()?;
        let avt = self.avt()?;
        let result = action(&avt);
        self.track(result)?;
        self.state = target;
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), ControlError> {
        if self.state.is_ready() {
            Ok(())
        } else {
            Err(ControlError::NotReady)
        }
    }

    fn avt(&self) -> Result<AvTransportClient, ControlError> {
        self.av_transport
            .clone()
            .ok_or(ControlError::ServiceUnavailable(ServiceKind::AvTransport))
    }

    fn rc(&self) -> Result<RenderingControlClient, ControlError> {
        self.rendering
            .clone()
            .ok_or(ControlError::ServiceUnavailable(ServiceKind::RenderingControl))
    }

    fn track<T>(&mut self, result: Result<T, ControlError>) -> Result<T, ControlError> {
        if let Err(err) = &result {
            warn!(error = %err, "Renderer command failed");
            self.state = PlaybackState::Error;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_codes_round_trip() {
        for code in -1..=6 {
            assert_eq!(PlaybackState::from_code(code).unwrap().code(), code);
        }
        assert_eq!(PlaybackState::from_code(7), None);
    }

    #[test]
    fn transport_states_are_mapped() {
        assert_eq!(
            PlaybackState::from_transport_state("TRANSITIONING"),
            Some(PlaybackState::Buffering)
        );
        assert_eq!(
            PlaybackState::from_transport_state("paused_playback"),
            Some(PlaybackState::Paused)
        );
        assert_eq!(
            PlaybackState::from_transport_state("NO_MEDIA_PRESENT"),
            Some(PlaybackState::Stopped)
        );
        assert_eq!(PlaybackState::from_transport_state("CUSTOM"), None);
    }
}
