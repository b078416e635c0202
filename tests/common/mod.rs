//! Shared wire-level test harness: a frontend client speaking raw protocol
//! frames to a Session running over an in-memory duplex stream.

#![allow(dead_code)]

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use pg_bridge::backend::mock::MockBackend;
use pg_bridge::config::Config;
use pg_bridge::session::registry::SessionKey;
use pg_bridge::session::Session;

pub struct WireClient {
    read: ReadHalf<DuplexStream>,
    write: WriteHalf<DuplexStream>,
}

/// One decoded backend message: tag byte plus payload.
pub type Frame = (u8, Vec<u8>);

/// Spawn a session over a duplex pipe and consume the startup burst.
pub async fn spawn_session(backend: MockBackend, config: Config) -> WireClient {
    let (client, _key) = spawn_session_with_key(backend, config).await;
    client
}

/// Same, but also expose the cancel key the session registered.
pub async fn spawn_session_with_key(
    backend: MockBackend,
    config: Config,
) -> (WireClient, SessionKey) {
    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let (server_read, server_write) = tokio::io::split(server_io);
    let mut startup = HashMap::new();
    startup.insert("user".to_string(), "tester".to_string());
    startup.insert("database".to_string(), "db".to_string());
    let session = Session::new(
        server_read,
        server_write,
        Box::new(backend),
        config,
        &startup,
        42,
    );
    let key = session.session_key();
    tokio::spawn(session.run());

    let (read, write) = tokio::io::split(client_io);
    let mut client = WireClient { read, write };
    client.consume_startup().await;
    (client, key)
}

impl WireClient {
    /// Read frames until the first ReadyForQuery, discarding the startup
    /// burst (AuthenticationOk, ParameterStatus*, BackendKeyData).
    async fn consume_startup(&mut self) {
        loop {
            let (tag, _) = self.recv().await;
            if tag == b'Z' {
                return;
            }
        }
    }

    pub async fn send(&mut self, frame: BytesMut) {
        self.write.write_all(&frame).await.unwrap();
        self.write.flush().await.unwrap();
    }

    pub async fn recv(&mut self) -> Frame {
        let mut header = [0u8; 5];
        self.read.read_exact(&mut header).await.unwrap();
        let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut payload = vec![0u8; len - 4];
        self.read.read_exact(&mut payload).await.unwrap();
        (header[0], payload)
    }

    /// Collect frames up to and including the next ReadyForQuery.
    pub async fn recv_until_ready(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            let frame = self.recv().await;
            let done = frame.0 == b'Z';
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }
}

// Frontend frame builders.

fn framed(tag: u8, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(payload.len() + 5);
    buf.put_u8(tag);
    buf.put_i32(4 + payload.len() as i32);
    buf.put_slice(payload);
    buf
}

pub fn query(sql: &str) -> BytesMut {
    let mut payload = BytesMut::new();
    payload.put_slice(sql.as_bytes());
    payload.put_u8(0);
    framed(b'Q', &payload)
}

pub fn parse(name: &str, sql: &str, type_oids: &[u32]) -> BytesMut {
    let mut payload = BytesMut::new();
    payload.put_slice(name.as_bytes());
    payload.put_u8(0);
    payload.put_slice(sql.as_bytes());
    payload.put_u8(0);
    payload.put_i16(type_oids.len() as i16);
    for oid in type_oids {
        payload.put_u32(*oid);
    }
    framed(b'P', &payload)
}

pub fn bind(
    portal: &str,
    statement: &str,
    param_formats: &[i16],
    params: &[Option<&[u8]>],
    result_formats: &[i16],
) -> BytesMut {
    let mut payload = BytesMut::new();
    payload.put_slice(portal.as_bytes());
    payload.put_u8(0);
    payload.put_slice(statement.as_bytes());
    payload.put_u8(0);
    payload.put_i16(param_formats.len() as i16);
    for format in param_formats {
        payload.put_i16(*format);
    }
    payload.put_i16(params.len() as i16);
    for param in params {
        match param {
            None => payload.put_i32(-1),
            Some(raw) => {
                payload.put_i32(raw.len() as i32);
                payload.put_slice(raw);
            }
        }
    }
    payload.put_i16(result_formats.len() as i16);
    for format in result_formats {
        payload.put_i16(*format);
    }
    framed(b'B', &payload)
}

pub fn describe(kind: u8, name: &str) -> BytesMut {
    let mut payload = BytesMut::new();
    payload.put_u8(kind);
    payload.put_slice(name.as_bytes());
    payload.put_u8(0);
    framed(b'D', &payload)
}

pub fn execute(portal: &str, max_rows: i32) -> BytesMut {
    let mut payload = BytesMut::new();
    payload.put_slice(portal.as_bytes());
    payload.put_u8(0);
    payload.put_i32(max_rows);
    framed(b'E', &payload)
}

pub fn close(kind: u8, name: &str) -> BytesMut {
    let mut payload = BytesMut::new();
    payload.put_u8(kind);
    payload.put_slice(name.as_bytes());
    payload.put_u8(0);
    framed(b'C', &payload)
}

pub fn sync() -> BytesMut {
    framed(b'S', &[])
}

pub fn flush() -> BytesMut {
    framed(b'H', &[])
}

pub fn terminate() -> BytesMut {
    framed(b'X', &[])
}

pub fn copy_data(data: &[u8]) -> BytesMut {
    framed(b'd', data)
}

pub fn copy_done() -> BytesMut {
    framed(b'c', &[])
}

pub fn copy_fail(message: &str) -> BytesMut {
    let mut payload = BytesMut::new();
    payload.put_slice(message.as_bytes());
    payload.put_u8(0);
    framed(b'f', &payload)
}

// Response frame inspectors.

/// CommandComplete tag text.
pub fn command_tag(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).to_string()
}

/// SQLSTATE out of an ErrorResponse payload.
pub fn error_sqlstate(payload: &[u8]) -> String {
    error_field(payload, b'C').unwrap_or_default()
}

/// Hint field out of an ErrorResponse payload.
pub fn error_hint(payload: &[u8]) -> Option<String> {
    error_field(payload, b'H')
}

fn error_field(payload: &[u8], wanted: u8) -> Option<String> {
    let mut pos = 0;
    while pos < payload.len() && payload[pos] != 0 {
        let field = payload[pos];
        pos += 1;
        let end = pos + payload[pos..].iter().position(|b| *b == 0)?;
        if field == wanted {
            return Some(String::from_utf8_lossy(&payload[pos..end]).to_string());
        }
        pos = end + 1;
    }
    None
}

/// Single text cell of a one-column DataRow.
pub fn data_row_text(payload: &[u8]) -> String {
    // i16 column count, i32 length, bytes
    let len = i32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]) as usize;
    String::from_utf8_lossy(&payload[6..6 + len]).to_string()
}

/// The tag bytes of a frame list, for order assertions.
pub fn tags(frames: &[Frame]) -> Vec<u8> {
    frames.iter().map(|(tag, _)| *tag).collect()
}

/// ReadyForQuery status byte of the last frame.
pub fn ready_status(frames: &[Frame]) -> u8 {
    let (tag, payload) = frames.last().expect("no frames");
    assert_eq!(*tag, b'Z', "last frame is not ReadyForQuery");
    payload[0]
}
