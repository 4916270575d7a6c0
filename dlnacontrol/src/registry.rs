//! Registre des renderers visibles.
//!
//! Les événements de découverte, les abonnements et les désabonnements passent
//! tous par le même canal vers un unique thread de notification
//! (`dlna-registry-notifier`) : un nouvel abonné reçoit l'instantané courant
//! avant toute mise à jour ultérieure.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::discovery::DiscoveryEvent;
use crate::model::{ConnectionState, Device, DeviceId};

const NOTIFIER_THREAD_NAME: &str = "dlna-registry-notifier";

/// Reçoit la liste complète des renderers visibles à chaque changement.
pub trait DeviceListListener: Send + Sync {
    fn on_devices(&self, devices: &[Device]);
}

impl<F> DeviceListListener for F
where
    F: Fn(&[Device]) + Send + Sync,
{
    fn on_devices(&self, devices: &[Device]) {
        self(devices)
    }
}

/// Déclenche une recherche active (M-SEARCH).
pub trait SearchBackend: Send + Sync {
    fn search(&self, mx: u32);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum RegistryCommand {
    Publish(Arc<Vec<Device>>),
    Subscribe(SubscriptionId, Arc<dyn DeviceListListener>, Arc<Vec<Device>>),
    Unsubscribe(SubscriptionId),
    Shutdown,
}

#[derive(Default)]
struct RegistryState {
    known: HashMap<DeviceId, Device>,
    claimed: HashSet<DeviceId>,
    visible: Arc<Vec<Device>>,
}

impl RegistryState {
    fn recompute(&mut self) -> Option<Arc<Vec<Device>>> {
        let mut visible: Vec<Device> = self
            .known
            .values()
            .filter(|d| d.is_renderer() && !d.id.is_empty())
            .cloned()
            .collect();
        visible.sort_by(|a, b| {
            a.friendly_name
                .cmp(&b.friendly_name)
                .then_with(|| a.id.cmp(&b.id))
        });

        if *self.visible == visible {
            return None;
        }
        self.visible = Arc::new(visible);
        Some(Arc::clone(&self.visible))
    }
}

struct Inner {
    state: RwLock<RegistryState>,
    commands: Sender<RegistryCommand>,
    next_subscription: AtomicU64,
    backend: RwLock<Option<Arc<dyn SearchBackend>>>,
    default_mx: u32,
    notifier: Mutex<Option<JoinHandle<()>>>,
}

/// Handle clonable sur le registre partagé.
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<Inner>,
}

impl DeviceRegistry {
    /// `default_mx` : délai MX utilisé par [`search`](Self::search) sans
    /// timeout explicite.
    pub fn new(default_mx: u32) -> io::Result<Self> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name(NOTIFIER_THREAD_NAME.into())
            .spawn(move || run_notifier(rx))?;

        Ok(Self {
            inner: Arc::new(Inner {
                state: RwLock::new(RegistryState::default()),
                commands: tx,
                next_subscription: AtomicU64::new(1),
                backend: RwLock::new(None),
                default_mx,
                notifier: Mutex::new(Some(handle)),
            }),
        })
    }

    pub fn on_discovery_event(&self, event: DiscoveryEvent) {
        let mut state = self.inner.state.write();
        match event {
            DiscoveryEvent::Added(mut device) | DiscoveryEvent::Updated(mut device) => {
                if let Some(existing) = state.known.get(&device.id) {
                    device.connection_state = existing.connection_state;
                } else if state.claimed.contains(&device.id) {
                    device.connection_state = ConnectionState::Connected;
                }
                trace!(id = %device.id, renderer = device.is_renderer(), "Device known");
                state.known.insert(device.id.clone(), device);
            }
            DiscoveryEvent::Removed(id) => {
                if state.known.remove(&id).is_some() {
                    debug!(id = %id, "Device removed");
                }
            }
            DiscoveryEvent::DiscoveryFailed { udn, reason } => {
                debug!(udn = %udn, reason = %reason, "Ignoring device with unusable description");
                return;
            }
        }
        self.publish_if_changed(&mut state);
    }

    /// Le listener reçoit l'instantané courant, puis chaque changement.
    pub fn subscribe<L>(&self, listener: L) -> SubscriptionId
    where
        L: DeviceListListener + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        // Verrou tenu pendant l'envoi : l'instantané précède toute publication
        // ultérieure dans le canal.
        let state = self.inner.state.read();
        let snapshot = Arc::clone(&state.visible);
        if self
            .inner
            .commands
            .send(RegistryCommand::Subscribe(id, Arc::new(listener), snapshot))
            .is_err()
        {
            warn!("Registry notifier is gone, subscription ignored");
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let _ = self.inner.commands.send(RegistryCommand::Unsubscribe(id));
    }

    pub fn set_search_backend(&self, backend: Arc<dyn SearchBackend>) {
        *self.inner.backend.write() = Some(backend);
    }

    pub fn clear_search_backend(&self) {
        *self.inner.backend.write() = None;
    }

    /// Recherche active, non bloquante. `timeout_secs` devient le MX.
    pub fn search(&self, timeout_secs: Option<u32>) {
        let mx = timeout_secs.unwrap_or(self.inner.default_mx).max(1);
        match self.inner.backend.read().as_ref() {
            Some(backend) => backend.search(mx),
            None => debug!("search requested without discovery backend"),
        }
    }

    pub fn devices(&self) -> Vec<Device> {
        self.inner.state.read().visible.as_ref().clone()
    }

    pub fn device(&self, id: &DeviceId) -> Option<Device> {
        self.inner.state.read().known.get(id).cloned()
    }

    /// Réserve le device pour une session. `false` s'il est déjà tenu.
    pub fn mark_connected(&self, id: &DeviceId) -> bool {
        let mut state = self.inner.state.write();
        if !state.claimed.insert(id.clone()) {
            return false;
        }
        if let Some(device) = state.known.get_mut(id) {
            device.connection_state = ConnectionState::Connected;
        }
        info!(id = %id, "Device claimed");
        self.publish_if_changed(&mut state);
        true
    }

    pub fn mark_disconnected(&self, id: &DeviceId) {
        let mut state = self.inner.state.write();
        if !state.claimed.remove(id) {
            return;
        }
        if let Some(device) = state.known.get_mut(id) {
            device.connection_state = ConnectionState::Disconnected;
        }
        info!(id = %id, "Device released");
        self.publish_if_changed(&mut state);
    }

    /// Arrête le thread de notification et oublie les abonnés.
    pub fn shutdown(&self) {
        let _ = self.inner.commands.send(RegistryCommand::Shutdown);
        let handle = self.inner.notifier.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Registry notifier thread panicked");
            }
        }
    }

    fn publish_if_changed(&self, state: &mut RegistryState) {
        if let Some(snapshot) = state.recompute() {
            debug!(count = snapshot.len(), "Visible device list changed");
            let _ = self.inner.commands.send(RegistryCommand::Publish(snapshot));
        }
    }
}

fn run_notifier(rx: Receiver<RegistryCommand>) {
    let mut listeners: Vec<(SubscriptionId, Arc<dyn DeviceListListener>)> = Vec::new();

    while let Ok(command) = rx.recv() {
        match command {
            RegistryCommand::Publish(snapshot) => {
                for (_, listener) in &listeners {
                    listener.on_devices(&snapshot);
                }
            }
            RegistryCommand::Subscribe(id, listener, snapshot) => {
                listener.on_devices(&snapshot);
                listeners.push((id, listener));
            }
            RegistryCommand::Unsubscribe(id) => {
                listeners.retain(|(sid, _)| *sid != id);
            }
            RegistryCommand::Shutdown => break,
        }
    }

    debug!("Registry notifier stopped");
}
