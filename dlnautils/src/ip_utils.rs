use get_if_addrs::get_if_addrs;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::debug;

/// Devine l'adresse IPv4 locale que les renderers du LAN peuvent joindre.
///
/// 1. Route par défaut : un socket UDP "connecté" vers `8.8.8.8:80` (aucun
///    paquet n'est émis) donne l'interface de sortie.
/// 2. Sans route par défaut (Wi-Fi local sans Internet), première adresse
///    privée trouvée sur les interfaces.
/// 3. Sinon `127.0.0.1`.
pub fn guess_local_ip() -> String {
    if let Some(ip) = routed_local_ip() {
        return ip.to_string();
    }

    let candidates = list_all_ips();
    if let Some((iface, ip)) = candidates.iter().find(|(_, ip)| ip.is_private()) {
        debug!(interface = %iface, ip = %ip, "No default route, using private interface address");
        return ip.to_string();
    }

    Ipv4Addr::LOCALHOST.to_string()
}

fn routed_local_ip() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Liste les adresses IPv4 non-loopback, sous forme `(interface, adresse)`.
///
/// L'ordre est celui renvoyé par le système. Une erreur d'énumération donne
/// une liste vide.
pub fn list_all_ips() -> Vec<(String, Ipv4Addr)> {
    let Ok(interfaces) = get_if_addrs() else {
        return Vec::new();
    };

    interfaces
        .into_iter()
        .filter_map(|iface| match iface.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() => Some((iface.name, ip)),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_local_ip_is_an_ipv4_address() {
        let ip = guess_local_ip();
        let parsed = ip.parse::<IpAddr>().expect("valid ip");
        assert!(parsed.is_ipv4());
    }

    #[test]
    fn list_all_ips_skips_loopback() {
        for (iface, ip) in list_all_ips() {
            assert!(!iface.is_empty());
            assert!(!ip.is_loopback(), "{iface} reported loopback {ip}");
        }
    }
}
