//! Client SSDP pour la découverte des renderers
//!
//! Le socket est lié sur `0.0.0.0:0` : si un serveur SSDP local écoute sur
//! 1900, partager ce port ferait répartir les datagrammes entre les deux
//! sockets par le noyau et le client perdrait des réponses.

use super::{MAX_AGE, SSDP_PORT};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Événements SSDP intéressants pour un control point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsdpEvent {
    Alive {
        usn: String,
        nt: String,
        location: String,
        server: String,
        max_age: u32,
        from: SocketAddr,
    },
    ByeBye {
        usn: String,
        nt: String,
        from: SocketAddr,
    },
    SearchResponse {
        usn: String,
        st: String,
        location: String,
        server: String,
        max_age: u32,
        from: SocketAddr,
    },
}

/// Client SSDP : M-SEARCH sortants, réponses et annonces entrantes.
///
/// Clonable : les clones partagent le socket, ce qui permet d'envoyer un
/// M-SEARCH depuis un autre thread pendant que la boucle de réception tourne.
#[derive(Clone)]
pub struct SsdpClient {
    socket: Arc<UdpSocket>,
}

impl SsdpClient {
    pub fn new() -> io::Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        socket2.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket2.into();
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        socket.set_multicast_loop_v4(true)?;

        for iface in get_if_addrs::get_if_addrs()? {
            if let IpAddr::V4(ipv4) = iface.ip() {
                if ipv4.is_loopback() {
                    continue;
                }
                match socket.join_multicast_v4(&MULTICAST_V4, &ipv4) {
                    Ok(()) => debug!(interface = %ipv4, "SSDP: joined multicast group"),
                    Err(e) => warn!(interface = %ipv4, error = %e, "SSDP: failed to join multicast group"),
                }
            }
        }

        info!(local = ?socket.local_addr().ok(), "SSDP client ready");

        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Envoie un M-SEARCH pour `st`. `mx` (secondes) est le délai maximal
    /// de réponse annoncé aux devices ; il est ramené à 1 au minimum.
    pub fn send_msearch(&self, st: &str, mx: u32) -> io::Result<()> {
        let mx = mx.max(1);
        let msg = format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {MULTICAST_V4}:{SSDP_PORT}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {mx}\r\n\
             ST: {st}\r\n\
             USER-AGENT: SimpleDLNA/0.1 UPnP/1.0 SSDP Client\r\n\
             \r\n"
        );

        let addr = SocketAddr::V4(SocketAddrV4::new(MULTICAST_V4, SSDP_PORT));
        match self.socket.send_to(msg.as_bytes(), addr) {
            Ok(_) => {
                debug!(st, mx, "M-SEARCH sent");
                Ok(())
            }
            Err(e) => {
                warn!(st, error = %e, "Failed to send M-SEARCH");
                Err(e)
            }
        }
    }

    /// Boucle de réception bloquante.
    ///
    /// `on_event` reçoit chaque message SSDP reconnu ; `on_idle` est appelé à
    /// chaque expiration du timeout de lecture (environ une fois par seconde).
    /// La boucle rend la main dès que `stop` passe à `true`.
    pub fn run_event_loop<F, I>(&self, stop: &AtomicBool, mut on_event: F, mut on_idle: I)
    where
        F: FnMut(SsdpEvent),
        I: FnMut(),
    {
        let mut buf = [0u8; 8192];
        while !stop.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let data = String::from_utf8_lossy(&buf[..n]);
                    if let Some(event) = parse_message(&data, from) {
                        trace!(%from, ?event, "SSDP event");
                        on_event(event);
                    }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    on_idle();
                }
                Err(e) => {
                    warn!(error = %e, "SSDP client read error");
                    on_idle();
                }
            }
        }
        debug!("SSDP event loop stopped");
    }
}

/// `uuid:xxxx::urn:...` → `uuid:xxxx` (en minuscules).
pub fn extract_udn_from_usn(usn: &str) -> Option<String> {
    let udn = usn.split("::").next()?.trim();
    if udn.len() > "uuid:".len() && udn[..5].eq_ignore_ascii_case("uuid:") {
        Some(udn.to_ascii_lowercase())
    } else {
        None
    }
}

pub(crate) fn parse_message(data: &str, from: SocketAddr) -> Option<SsdpEvent> {
    let mut lines = data.lines();
    let first_line = lines.next()?.trim();
    let upper = first_line.to_ascii_uppercase();
    let headers = parse_headers(lines);

    if upper.starts_with("NOTIFY ") {
        handle_notify(&headers, from)
    } else if upper.starts_with("HTTP/") && upper.contains(" 200") {
        handle_search_response(&headers, from)
    } else {
        // M-SEARCH d'un autre control point, ou message inconnu
        trace!(%from, first_line, "Ignoring SSDP message");
        None
    }
}

fn handle_notify(headers: &HashMap<String, String>, from: SocketAddr) -> Option<SsdpEvent> {
    let nts = headers.get("NTS")?.to_ascii_lowercase();
    let nt = headers.get("NT")?.clone();
    let usn = headers.get("USN")?.clone();

    match nts.as_str() {
        "ssdp:alive" => {
            let Some(location) = headers.get("LOCATION").cloned() else {
                trace!(%from, "NOTIFY ssdp:alive without LOCATION, ignoring");
                return None;
            };
            Some(SsdpEvent::Alive {
                usn,
                nt,
                location,
                server: server_header(headers),
                max_age: parse_max_age(headers.get("CACHE-CONTROL")),
                from,
            })
        }
        "ssdp:byebye" => Some(SsdpEvent::ByeBye { usn, nt, from }),
        _ => {
            trace!(%from, nts, "Unknown NTS value");
            None
        }
    }
}

fn handle_search_response(
    headers: &HashMap<String, String>,
    from: SocketAddr,
) -> Option<SsdpEvent> {
    let required = |name: &str| {
        let value = headers.get(name).cloned();
        if value.is_none() {
            trace!(%from, header = name, "M-SEARCH response missing header, ignoring");
        }
        value
    };

    let st = required("ST")?;
    let usn = required("USN")?;
    let location = required("LOCATION")?;

    Some(SsdpEvent::SearchResponse {
        usn,
        st,
        location,
        server: server_header(headers),
        max_age: parse_max_age(headers.get("CACHE-CONTROL")),
        from,
    })
}

fn server_header(headers: &HashMap<String, String>) -> String {
    headers
        .get("SERVER")
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string())
}

fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        // Les valeurs peuvent contenir ':' (LOCATION)
        match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() && !value.trim().is_empty() => {
                headers.insert(name.trim().to_ascii_uppercase(), value.trim().to_string());
            }
            _ => trace!(line, "Skipping malformed header"),
        }
    }
    headers
}

fn parse_max_age(value: Option<&String>) -> u32 {
    let Some(v) = value else {
        return MAX_AGE;
    };

    let lower = v.to_ascii_lowercase();
    lower
        .find("max-age")
        .and_then(|idx| {
            let digits: String = lower[idx + "max-age".len()..]
                .trim_start()
                .trim_start_matches('=')
                .trim_start()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse::<u32>().ok()
        })
        .unwrap_or_else(|| {
            trace!(cache_control = %v, "Could not parse max-age, using default {}", MAX_AGE);
            MAX_AGE
        })
}
