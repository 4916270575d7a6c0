//! Publication d'un flux live sur un serveur RTMP.
//!
//! Séquence : handshake, `connect`, `releaseStream`, `FCPublish`,
//! `createStream`, `publish`, puis envoi des tags audio/vidéo/script.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, BytesMut};
use dlnaconfig::Config;
use tracing::{debug, info, trace, warn};

use super::chunk::{ChunkReader, ChunkWriter, RtmpMessage};
use super::handshake::client_handshake;
use super::{RtmpError, RtmpUrl, chunk_stream, message_type};
use crate::amf0::{self, Amf0Value};
use crate::flv::{FlvTag, TagKind};

const FLASH_VERSION: &str = "FMLE/3.0 (compatible; SimpleDLNA)";
const PUBLISH_START: &str = "NetStream.Publish.Start";
const WINDOW_ACK_SIZE: u32 = 2_500_000;

const PING_REQUEST: u16 = 6;
const PING_RESPONSE: u16 = 7;

/// Intervalle minimal entre deux lectures des messages serveur en cours de
/// publication.
const INCOMING_POLL_INTERVAL: Duration = Duration::from_millis(500);
const INCOMING_PEEK_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Clone, Debug)]
pub struct PublishOptions {
    pub connect_timeout: Duration,
    /// Délai maximal d'une lecture ou écriture sur la socket
    pub io_timeout: Duration,
    pub chunk_size: u32,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(10),
            chunk_size: 4096,
        }
    }
}

impl PublishOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.get_rtmp_connect_timeout_secs().max(1)),
            chunk_size: config.get_rtmp_chunk_size(),
            ..Self::default()
        }
    }
}

pub struct RtmpPublisher {
    url: RtmpUrl,
    socket: TcpStream,
    input: BufReader<TcpStream>,
    writer: ChunkWriter,
    reader: ChunkReader,
    stream_id: u32,
    transaction_id: f64,
    io_timeout: Duration,
    last_poll: Instant,
    closed: bool,
}

impl RtmpPublisher {
    /// Ouvre la connexion et démarre la publication. Au retour, le serveur a
    /// confirmé `NetStream.Publish.Start`.
    pub fn connect(url: &RtmpUrl, options: &PublishOptions) -> Result<Self, RtmpError> {
        let address = (url.host.as_str(), url.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| RtmpError::InvalidUrl {
                url: url.tc_url(),
                reason: "host does not resolve".into(),
            })?;

        debug!(%address, app = %url.app, stream = %url.stream, "Connecting RTMP publisher");
        let mut socket = TcpStream::connect_timeout(&address, options.connect_timeout)?;
        socket.set_nodelay(true)?;
        socket.set_read_timeout(Some(options.io_timeout))?;
        socket.set_write_timeout(Some(options.io_timeout))?;

        client_handshake(&mut socket)?;
        let input = BufReader::new(socket.try_clone()?);

        let mut publisher = Self {
            url: url.clone(),
            socket,
            input,
            writer: ChunkWriter::new(),
            reader: ChunkReader::new(),
            stream_id: 0,
            transaction_id: 0.0,
            io_timeout: options.io_timeout,
            last_poll: Instant::now(),
            closed: false,
        };

        publisher.send(
            chunk_stream::PROTOCOL,
            &RtmpMessage::set_chunk_size(options.chunk_size),
        )?;
        publisher.writer.set_chunk_size(options.chunk_size);

        publisher.connect_app()?;
        publisher.create_stream()?;
        publisher.publish()?;
        publisher.last_poll = Instant::now();
        info!(url = %publisher.url.tc_url(), stream = %publisher.url.stream, "RTMP publishing started");
        Ok(publisher)
    }

    pub fn url(&self) -> &RtmpUrl {
        &self.url
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Envoie un tag FLV sous forme de message RTMP. Les tags script sont
    /// préfixés par `@setDataFrame`. Les pings reçus depuis le dernier envoi
    /// sont traités au passage.
    pub fn send_tag(&mut self, tag: &FlvTag) -> Result<(), RtmpError> {
        if self.closed {
            return Err(RtmpError::Protocol("publisher closed".into()));
        }
        self.poll_incoming()?;

        let (csid, type_id, payload) = match tag.kind {
            TagKind::Audio => (chunk_stream::AUDIO, message_type::AUDIO, tag.data.clone()),
            TagKind::Video => (chunk_stream::VIDEO, message_type::VIDEO, tag.data.clone()),
            TagKind::Script => {
                let mut buf = BytesMut::with_capacity(16 + tag.data.len());
                amf0::encode(&Amf0Value::string("@setDataFrame"), &mut buf);
                buf.extend_from_slice(&tag.data);
                (chunk_stream::DATA, message_type::DATA_AMF0, buf.freeze())
            }
        };

        let message = RtmpMessage::new(type_id, self.stream_id, tag.timestamp_ms, payload);
        self.send(csid, &message)
    }

    /// `FCUnpublish` + `deleteStream`, puis fermeture de la socket.
    pub fn close(&mut self) -> Result<(), RtmpError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let stream = Amf0Value::string(self.url.stream.clone());
        let unpublish = self.next_transaction();
        let delete = self.next_transaction();
        let result = self
            .command(
                0,
                &[
                    Amf0Value::string("FCUnpublish"),
                    Amf0Value::Number(unpublish),
                    Amf0Value::Null,
                    stream,
                ],
            )
            .and_then(|_| {
                self.command(
                    0,
                    &[
                        Amf0Value::string("deleteStream"),
                        Amf0Value::Number(delete),
                        Amf0Value::Null,
                        Amf0Value::Number(self.stream_id as f64),
                    ],
                )
            });

        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            trace!("RTMP socket shutdown: {e}");
        }
        debug!(stream = %self.url.stream, "RTMP publisher closed");
        result
    }

    fn next_transaction(&mut self) -> f64 {
        self.transaction_id += 1.0;
        self.transaction_id
    }

    fn send(&mut self, csid: u32, message: &RtmpMessage) -> Result<(), RtmpError> {
        self.writer.write(&mut self.socket, csid, message)?;
        Ok(())
    }

    fn command(&mut self, stream_id: u32, values: &[Amf0Value]) -> Result<(), RtmpError> {
        let message = RtmpMessage::new(
            message_type::COMMAND_AMF0,
            stream_id,
            0,
            amf0::encode_all(values),
        );
        self.send(chunk_stream::COMMAND, &message)?;
        self.socket.flush()?;
        Ok(())
    }

    fn connect_app(&mut self) -> Result<(), RtmpError> {
        let txn = self.next_transaction();
        let properties = Amf0Value::object([
            ("app", Amf0Value::string(self.url.app.clone())),
            ("type", Amf0Value::string("nonprivate")),
            ("flashVer", Amf0Value::string(FLASH_VERSION)),
            ("tcUrl", Amf0Value::string(self.url.tc_url())),
        ]);
        self.command(
            0,
            &[Amf0Value::string("connect"), Amf0Value::Number(txn), properties],
        )?;
        self.wait_for_result(txn, "connect")?;
        debug!(app = %self.url.app, "RTMP connect accepted");
        Ok(())
    }

    fn create_stream(&mut self) -> Result<(), RtmpError> {
        let stream = Amf0Value::string(self.url.stream.clone());
        for name in ["releaseStream", "FCPublish"] {
            let txn = self.next_transaction();
            self.command(
                0,
                &[
                    Amf0Value::string(name),
                    Amf0Value::Number(txn),
                    Amf0Value::Null,
                    stream.clone(),
                ],
            )?;
        }

        let txn = self.next_transaction();
        self.command(
            0,
            &[
                Amf0Value::string("createStream"),
                Amf0Value::Number(txn),
                Amf0Value::Null,
            ],
        )?;
        let values = self.wait_for_result(txn, "createStream")?;
        let id = values
            .get(3)
            .and_then(Amf0Value::as_number)
            .ok_or_else(|| RtmpError::Protocol("createStream result without stream id".into()))?;
        self.stream_id = id as u32;
        debug!(stream_id = self.stream_id, "RTMP stream created");
        Ok(())
    }

    fn publish(&mut self) -> Result<(), RtmpError> {
        self.command(
            self.stream_id,
            &[
                Amf0Value::string("publish"),
                Amf0Value::Number(0.0),
                Amf0Value::Null,
                Amf0Value::string(self.url.stream.clone()),
                Amf0Value::string("live"),
            ],
        )?;

        loop {
            let values = self.next_command()?;
            if values.first().and_then(Amf0Value::as_str) != Some("onStatus") {
                continue;
            }
            let info = values.get(3);
            let code = info
                .and_then(|i| i.get("code"))
                .and_then(Amf0Value::as_str)
                .unwrap_or_default();
            let level = info
                .and_then(|i| i.get("level"))
                .and_then(Amf0Value::as_str)
                .unwrap_or_default();
            if code == PUBLISH_START {
                return Ok(());
            }
            if level == "error" {
                return Err(RtmpError::Rejected {
                    command: "publish".into(),
                    code: code.to_string(),
                });
            }
            trace!(code, "onStatus ignored");
        }
    }

    /// Attend le `_result` de la transaction `txn`.
    fn wait_for_result(&mut self, txn: f64, command: &str) -> Result<Vec<Amf0Value>, RtmpError> {
        loop {
            let values = self.next_command()?;
            let name = values.first().and_then(Amf0Value::as_str).unwrap_or_default();
            let id = values.get(1).and_then(Amf0Value::as_number);
            match name {
                "_result" if id == Some(txn) => return Ok(values),
                "_error" if id == Some(txn) => {
                    let code = values
                        .get(3)
                        .and_then(|i| i.get("code"))
                        .and_then(Amf0Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    return Err(RtmpError::Rejected {
                        command: command.to_string(),
                        code,
                    });
                }
                other => trace!(command = other, "Command ignored while waiting for {command}"),
            }
        }
    }

    /// Lit jusqu'à la prochaine commande AMF0 ; les messages de contrôle
    /// rencontrés sont traités au passage.
    fn next_command(&mut self) -> Result<Vec<Amf0Value>, RtmpError> {
        loop {
            let message = self.reader.read_message(&mut self.input)?;
            match message.type_id {
                message_type::COMMAND_AMF0 => return Ok(amf0::decode_all(message.payload)?),
                _ => self.handle_control(message)?,
            }
        }
    }

    /// Traite sans bloquer les messages déjà arrivés du serveur : pings,
    /// bande passante, `onStatus`.
    fn poll_incoming(&mut self) -> Result<(), RtmpError> {
        if self.last_poll.elapsed() < INCOMING_POLL_INTERVAL {
            return Ok(());
        }
        self.last_poll = Instant::now();

        if self.input.buffer().is_empty() {
            // Les deux handles partagent la même socket, donc le même délai
            self.socket.set_read_timeout(Some(INCOMING_PEEK_TIMEOUT))?;
            let filled = self.input.fill_buf().map(|data| data.len());
            self.socket.set_read_timeout(Some(self.io_timeout))?;
            match filled {
                Ok(0) => return Err(RtmpError::Protocol("server closed the connection".into())),
                Ok(_) => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }

        while !self.input.buffer().is_empty() {
            let message = self.reader.read_message(&mut self.input)?;
            match message.type_id {
                message_type::COMMAND_AMF0 => {
                    let values = amf0::decode_all(message.payload)?;
                    let code = values
                        .get(3)
                        .and_then(|i| i.get("code"))
                        .and_then(Amf0Value::as_str)
                        .unwrap_or_default();
                    debug!(code, "Server status while publishing");
                }
                _ => self.handle_control(message)?,
            }
        }
        Ok(())
    }

    fn handle_control(&mut self, message: RtmpMessage) -> Result<(), RtmpError> {
        let mut payload = message.payload;
        match message.type_id {
            message_type::SET_CHUNK_SIZE | message_type::ACKNOWLEDGEMENT => {}
            message_type::WINDOW_ACK_SIZE if payload.remaining() >= 4 => {
                trace!(size = payload.get_u32(), "Server window ack size");
            }
            message_type::SET_PEER_BANDWIDTH => {
                self.send(
                    chunk_stream::PROTOCOL,
                    &RtmpMessage::window_ack_size(WINDOW_ACK_SIZE),
                )?;
            }
            message_type::USER_CONTROL if payload.remaining() >= 6 => {
                let event = payload.get_u16();
                if event == PING_REQUEST {
                    let value = payload.get_u32();
                    let mut body = BytesMut::with_capacity(6);
                    body.put_u16(PING_RESPONSE);
                    body.put_u32(value);
                    self.send(
                        chunk_stream::PROTOCOL,
                        &RtmpMessage::new(message_type::USER_CONTROL, 0, 0, body.freeze()),
                    )?;
                }
            }
            other => warn!(type_id = other, "Unexpected RTMP message from server"),
        }
        Ok(())
    }
}

impl Drop for RtmpPublisher {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::handshake::server_handshake;
    use bytes::Bytes;
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    fn reply(writer: &ChunkWriter, socket: &mut TcpStream, stream_id: u32, values: &[Amf0Value]) {
        let message = RtmpMessage::new(message_type::COMMAND_AMF0, stream_id, 0, amf0::encode_all(values));
        writer.write(socket, 3, &message).unwrap();
    }

    /// Serveur minimal : accepte (ou refuse) `connect`, crée le flux 1 et
    /// rend tous les messages reçus à la fermeture.
    fn fake_server(reject: bool) -> (RtmpUrl, JoinHandle<Vec<RtmpMessage>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            server_handshake(&mut socket).unwrap();
            let mut input = socket.try_clone().unwrap();
            let mut reader = ChunkReader::new();
            let writer = ChunkWriter::new();
            let mut received = Vec::new();

            while let Ok(message) = reader.read_message(&mut input) {
                if message.type_id == message_type::COMMAND_AMF0 {
                    let values = amf0::decode_all(message.payload.clone()).unwrap();
                    let name = values[0].as_str().unwrap_or_default().to_string();
                    let txn = values[1].as_number().unwrap_or(0.0);
                    match name.as_str() {
                        "connect" if reject => reply(&writer, &mut socket, 0, &[
                            Amf0Value::string("_error"),
                            Amf0Value::Number(txn),
                            Amf0Value::Null,
                            Amf0Value::object([
                                ("level", Amf0Value::string("error")),
                                ("code", Amf0Value::string("NetConnection.Connect.Rejected")),
                            ]),
                        ]),
                        "connect" => {
                            writer.write(&mut socket, 2, &RtmpMessage::window_ack_size(5_000_000)).unwrap();
                            let bandwidth = RtmpMessage::new(
                                message_type::SET_PEER_BANDWIDTH,
                                0,
                                0,
                                Bytes::from_static(&[0, 0x4C, 0x4B, 0x40, 2]),
                            );
                            writer.write(&mut socket, 2, &bandwidth).unwrap();
                            let ping = RtmpMessage::new(
                                message_type::USER_CONTROL,
                                0,
                                0,
                                Bytes::from_static(&[0, 6, 0, 0, 0, 42]),
                            );
                            writer.write(&mut socket, 2, &ping).unwrap();
                            reply(&writer, &mut socket, 0, &[
                                Amf0Value::string("_result"),
                                Amf0Value::Number(txn),
                                Amf0Value::Null,
                                Amf0Value::object([(
                                    "code",
                                    Amf0Value::string("NetConnection.Connect.Success"),
                                )]),
                            ]);
                        }
                        "createStream" => reply(&writer, &mut socket, 0, &[
                            Amf0Value::string("_result"),
                            Amf0Value::Number(txn),
                            Amf0Value::Null,
                            Amf0Value::Number(1.0),
                        ]),
                        "publish" => {
                            reply(&writer, &mut socket, 1, &[
                                Amf0Value::string("onStatus"),
                                Amf0Value::Number(0.0),
                                Amf0Value::Null,
                                Amf0Value::object([
                                    ("level", Amf0Value::string("status")),
                                    ("code", Amf0Value::string(PUBLISH_START)),
                                ]),
                            ]);
                            // Keep-alive du serveur une fois le flux ouvert
                            let ping = RtmpMessage::new(
                                message_type::USER_CONTROL,
                                0,
                                0,
                                Bytes::from_static(&[0, 6, 0, 0, 0, 99]),
                            );
                            writer.write(&mut socket, 2, &ping).unwrap();
                        }
                        _ => {}
                    }
                }
                received.push(message);
            }
            received
        });

        let url = RtmpUrl::parse(&format!("rtmp://127.0.0.1:{port}/live/mirror")).unwrap();
        (url, handle)
    }

    fn command_names(messages: &[RtmpMessage]) -> Vec<String> {
        messages
            .iter()
            .filter(|m| m.type_id == message_type::COMMAND_AMF0)
            .filter_map(|m| {
                amf0::decode_all(m.payload.clone())
                    .ok()
                    .and_then(|v| v.first().and_then(Amf0Value::as_str).map(str::to_string))
            })
            .collect()
    }

    #[test]
    fn publishes_tags_to_server() {
        let (url, server) = fake_server(false);
        let mut publisher = RtmpPublisher::connect(&url, &PublishOptions::default()).unwrap();
        assert_eq!(publisher.stream_id(), 1);

        publisher
            .send_tag(&FlvTag::new(TagKind::Script, 0, amf0::encode_all(&[Amf0Value::string("onMetaData")])))
            .unwrap();
        let big = Bytes::from(vec![0x27u8; 10_000]);
        publisher.send_tag(&FlvTag::new(TagKind::Video, 40, big.clone())).unwrap();
        publisher
            .send_tag(&FlvTag::new(TagKind::Audio, 41, Bytes::from_static(&[0xAF, 0x01, 1])))
            .unwrap();
        publisher.close().unwrap();
        publisher.close().unwrap();

        let received = server.join().unwrap();
        assert_eq!(
            command_names(&received),
            vec!["connect", "releaseStream", "FCPublish", "createStream", "publish", "FCUnpublish", "deleteStream"]
        );

        // Réponse au ping et à la bande passante
        assert!(received.iter().any(|m| m.type_id == message_type::USER_CONTROL
            && m.payload[..] == [0, 7, 0, 0, 0, 42]));
        assert!(received.iter().any(|m| m.type_id == message_type::WINDOW_ACK_SIZE));

        let data = received.iter().find(|m| m.type_id == message_type::DATA_AMF0).unwrap();
        let values = amf0::decode_all(data.payload.clone()).unwrap();
        assert_eq!(values[0].as_str(), Some("@setDataFrame"));
        assert_eq!(values[1].as_str(), Some("onMetaData"));

        let video = received.iter().find(|m| m.type_id == message_type::VIDEO).unwrap();
        assert_eq!(video.payload, big);
        assert_eq!(video.timestamp, 40);
        assert_eq!(video.stream_id, 1);
    }

    #[test]
    fn pings_are_answered_while_publishing() {
        let (url, server) = fake_server(false);
        let mut publisher = RtmpPublisher::connect(&url, &PublishOptions::default()).unwrap();
        let audio = FlvTag::new(TagKind::Audio, 0, Bytes::from_static(&[0xAF, 0x01, 1]));

        publisher.send_tag(&audio).unwrap();
        thread::sleep(INCOMING_POLL_INTERVAL + Duration::from_millis(100));
        publisher.send_tag(&audio).unwrap();
        // Rien à lire : l'envoi ne bloque pas
        thread::sleep(INCOMING_POLL_INTERVAL + Duration::from_millis(100));
        let started = Instant::now();
        publisher.send_tag(&audio).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        publisher.close().unwrap();

        let received = server.join().unwrap();
        let pongs: Vec<_> = received
            .iter()
            .filter(|m| m.type_id == message_type::USER_CONTROL && m.payload[..2] == [0, 7])
            .map(|m| m.payload.clone())
            .collect();
        assert_eq!(pongs.len(), 2);
        assert_eq!(pongs[1][..], [0, 7, 0, 0, 0, 99]);
        assert_eq!(
            received.iter().filter(|m| m.type_id == message_type::AUDIO).count(),
            3
        );
    }

    #[test]
    fn rejected_connect_is_reported() {
        let (url, server) = fake_server(true);
        match RtmpPublisher::connect(&url, &PublishOptions::default()) {
            Err(RtmpError::Rejected { command, code }) => {
                assert_eq!(command, "connect");
                assert_eq!(code, "NetConnection.Connect.Rejected");
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("connect should be rejected"),
        }
        server.join().unwrap();
    }

    #[test]
    fn refused_connection_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let url = RtmpUrl::parse(&format!("rtmp://127.0.0.1:{port}/live/mirror")).unwrap();
        assert!(matches!(
            RtmpPublisher::connect(&url, &PublishOptions::default()),
            Err(RtmpError::Io(_))
        ));
    }
}
