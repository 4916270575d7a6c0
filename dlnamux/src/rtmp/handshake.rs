//! Handshake RTMP simple (sans digest HMAC).
//!
//! ```text
//! client                      serveur
//!   C0 (version) + C1 (1536) ->
//!                  <- S0 + S1 + S2
//!   C2 (écho de S1)          ->
//! ```

use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::{debug, warn};

use super::RtmpError;

pub const HANDSHAKE_SIZE: usize = 1536;
pub const RTMP_VERSION: u8 = 3;

/// C1 / S1 : horodatage, 4 octets nuls, aléa.
pub(crate) fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0);
    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());
    rand::rng().fill(&mut packet[8..]);
    packet
}

pub fn client_handshake<S: Read + Write>(stream: &mut S) -> Result<(), RtmpError> {
    let c1 = generate_packet();
    let mut c0c1 = Vec::with_capacity(1 + HANDSHAKE_SIZE);
    c0c1.push(RTMP_VERSION);
    c0c1.extend_from_slice(&c1);
    stream.write_all(&c0c1)?;
    stream.flush()?;

    let mut s0 = [0u8; 1];
    stream.read_exact(&mut s0)?;
    if s0[0] < RTMP_VERSION {
        return Err(RtmpError::Handshake(format!(
            "unsupported server version {}",
            s0[0]
        )));
    }

    let mut s1 = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut s1)?;
    let mut s2 = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut s2)?;
    if s2[8..] != c1[8..] {
        // Beaucoup de serveurs n'écho pas C1 fidèlement
        warn!("S2 does not echo C1, continuing");
    }

    stream.write_all(&s1)?;
    stream.flush()?;
    debug!("RTMP handshake done");
    Ok(())
}

/// Côté serveur, pour les tests : lit C0C1, envoie S0S1S2, lit C2.
#[cfg(test)]
pub(crate) fn server_handshake<S: Read + Write>(stream: &mut S) -> Result<(), RtmpError> {
    let mut c0c1 = [0u8; 1 + HANDSHAKE_SIZE];
    stream.read_exact(&mut c0c1)?;
    let s1 = generate_packet();
    stream.write_all(&[RTMP_VERSION])?;
    stream.write_all(&s1)?;
    stream.write_all(&c0c1[1..])?;
    let mut c2 = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut c2)?;
    if c2 != s1 {
        return Err(RtmpError::Handshake("C2 does not echo S1".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    #[test]
    fn handshake_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            server_handshake(&mut socket)
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client_handshake(&mut client).unwrap();
        server.join().unwrap().unwrap();
    }

    #[test]
    fn old_server_version_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut c0c1 = [0u8; 1 + HANDSHAKE_SIZE];
            socket.read_exact(&mut c0c1).unwrap();
            let mut reply = vec![0u8; 1 + HANDSHAKE_SIZE * 2];
            reply[0] = 2;
            // Le client peut couper avant la fin de l'écriture
            let _ = socket.write_all(&reply);
        });

        let mut client = TcpStream::connect(addr).unwrap();
        assert!(matches!(
            client_handshake(&mut client),
            Err(RtmpError::Handshake(_))
        ));
        server.join().unwrap();
    }
}
