//! Thread de découverte SSDP : alimente le [`DeviceRegistry`].

use std::cell::RefCell;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dlnaupnp::ssdp::{ST_ALL, ST_MEDIA_RENDERER, SsdpClient};
use tracing::{debug, info, warn};

use crate::discovery::DiscoveryManager;
use crate::provider::HttpXmlDescriptionProvider;
use crate::registry::{DeviceRegistry, SearchBackend};

const DISCOVERY_THREAD_NAME: &str = "dlna-ssdp-discovery";
const SEARCH_BURST_GAP: Duration = Duration::from_millis(200);
const EXPIRE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub search_mx: u32,
    pub description_timeout_secs: u64,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            search_mx: 3,
            description_timeout_secs: 5,
        }
    }
}

impl DiscoveryOptions {
    pub fn from_config(config: &dlnaconfig::Config) -> Self {
        Self {
            search_mx: config.get_search_mx(),
            description_timeout_secs: config.get_description_timeout_secs(),
        }
    }
}

impl SearchBackend for SsdpClient {
    fn search(&self, mx: u32) {
        for st in [ST_ALL, ST_MEDIA_RENDERER] {
            if let Err(e) = self.send_msearch(st, mx) {
                debug!(st, error = %e, "M-SEARCH not sent");
            }
        }
    }
}

/// Découverte SSDP en tâche de fond.
///
/// Le thread reste actif jusqu'à [`stop`](Self::stop) (ou au drop du handle).
pub struct SsdpDiscovery {
    registry: DeviceRegistry,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SsdpDiscovery {
    pub fn spawn(registry: DeviceRegistry, options: DiscoveryOptions) -> io::Result<Self> {
        let client = SsdpClient::new()?;
        let stop = Arc::new(AtomicBool::new(false));

        registry.set_search_backend(Arc::new(client.clone()));

        let thread_registry = registry.clone();
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(DISCOVERY_THREAD_NAME.into())
            .spawn(move || run_discovery(client, thread_registry, thread_stop, options))?;

        info!("SSDP discovery started");
        Ok(Self {
            registry,
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.registry.clear_search_backend();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("SSDP discovery thread panicked");
            }
            info!("SSDP discovery stopped");
        }
    }
}

impl Drop for SsdpDiscovery {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_discovery(
    client: SsdpClient,
    registry: DeviceRegistry,
    stop: Arc<AtomicBool>,
    options: DiscoveryOptions,
) {
    let provider = HttpXmlDescriptionProvider::new(options.description_timeout_secs);
    let manager = RefCell::new(DiscoveryManager::new(provider));
    let last_expire = RefCell::new(Instant::now());

    for st in [ST_ALL, ST_MEDIA_RENDERER] {
        if let Err(e) = client.send_msearch(st, options.search_mx) {
            warn!(st, error = %e, "Initial M-SEARCH failed");
        }
        thread::sleep(SEARCH_BURST_GAP);
    }

    let expire = || {
        let now = Instant::now();
        if now.duration_since(*last_expire.borrow()) < EXPIRE_INTERVAL {
            return;
        }
        *last_expire.borrow_mut() = now;
        for event in manager.borrow_mut().expire(now) {
            registry.on_discovery_event(event);
        }
    };

    client.run_event_loop(
        &stop,
        |event| {
            for discovery_event in manager.borrow_mut().handle_ssdp_event(event) {
                registry.on_discovery_event(discovery_event);
            }
            // Un trafic continu ne doit pas empêcher l'expiration
            expire();
        },
        || expire(),
    );
}
