// MLLP transport for HL7 v2 messages
//
// Each `connect()` opens a fresh TCP connection that is owned by exactly one
// worker. Frames are `<VT> message <FS><CR>`; every send waits for the
// receiver's acknowledgement frame before returning.

use crate::error::{DorError, Result};
use crate::message::Message;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const START_BLOCK: u8 = 0x0b;
pub const END_BLOCK: u8 = 0x1c;
pub const CARRIAGE_RETURN: u8 = 0x0d;

/// Acknowledgement returned by the receiver (MSA-1 / MSA-2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub code: String,
    pub control_id: Option<String>,
}

impl Ack {
    pub fn from_message(response: &Message) -> Result<Self> {
        let code = response
            .first_field("MSA", 1)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| DorError::Send("acknowledgement has no MSA-1 code".to_string()))?;

        Ok(Self {
            code: code.to_string(),
            control_id: response
                .first_field("MSA", 2)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        })
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.code.as_str(), "AA" | "CA")
    }
}

/// One open connection to the receiver.
#[async_trait]
pub trait Connection: Send {
    /// Send one message and wait for its acknowledgement.
    async fn send(&mut self, message: &Message) -> Result<Ack>;

    fn is_open(&self) -> bool;

    async fn close(&mut self);
}

/// Factory for independent connections to one destination.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;

    fn destination(&self) -> String;
}

pub fn frame(payload: &str) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 3);
    framed.push(START_BLOCK);
    framed.extend_from_slice(payload.as_bytes());
    framed.push(END_BLOCK);
    framed.push(CARRIAGE_RETURN);
    framed
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(2)
        .position(|w| w[0] == END_BLOCK && w[1] == CARRIAGE_RETURN)
}

/// Read one MLLP frame, keeping any bytes past it in `buffer`.
pub async fn read_frame<R>(reader: &mut R, buffer: &mut Vec<u8>) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = find_frame_end(buffer) {
            let frame: Vec<u8> = buffer.drain(..end + 2).collect();
            let start = frame
                .iter()
                .position(|b| *b == START_BLOCK)
                .map(|p| p + 1)
                .unwrap_or(0);
            return Ok(String::from_utf8_lossy(&frame[start..end]).into_owned());
        }

        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Err(DorError::Send(
                "connection closed by peer before a complete frame arrived".to_string(),
            ));
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

#[derive(Debug, Clone)]
pub struct MllpTransport {
    host: String,
    port: u16,
    ack_timeout: Duration,
}

impl MllpTransport {
    pub fn new(host: impl Into<String>, port: u16, ack_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            ack_timeout,
        }
    }
}

#[async_trait]
impl Transport for MllpTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let addr = self.destination();
        log::debug!("Connecting to MLLP receiver at {}", addr);

        let stream = timeout(self.ack_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| DorError::Connect(format!("timed out connecting to {}", addr)))?
            .map_err(|e| DorError::Connect(format!("{}: {}", addr, e)))?;

        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY on {}: {}", addr, e);
        }

        Ok(Box::new(MllpConnection {
            stream: Some(stream),
            buffer: Vec::new(),
            ack_timeout: self.ack_timeout,
            peer: addr,
        }))
    }

    fn destination(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct MllpConnection {
    stream: Option<TcpStream>,
    buffer: Vec<u8>,
    ack_timeout: Duration,
    peer: String,
}

impl MllpConnection {
    async fn exchange(&mut self, payload: &[u8]) -> Result<String> {
        let Self {
            stream,
            buffer,
            ack_timeout,
            peer,
        } = self;
        let stream = stream
            .as_mut()
            .ok_or_else(|| DorError::Send(format!("connection to {} is closed", peer)))?;

        stream.write_all(payload).await?;
        stream.flush().await?;

        timeout(*ack_timeout, read_frame(stream, buffer))
            .await
            .map_err(|_| {
                DorError::Timeout(format!(
                    "no acknowledgement from {} within {:?}",
                    peer, ack_timeout
                ))
            })?
    }
}

#[async_trait]
impl Connection for MllpConnection {
    async fn send(&mut self, message: &Message) -> Result<Ack> {
        let payload = frame(&message.encode());

        let response = match self.exchange(&payload).await {
            Ok(response) => response,
            Err(e) => {
                // The stream is out of step after a failed exchange
                self.stream = None;
                self.buffer.clear();
                return Err(e);
            }
        };

        log::debug!("Got response: {}", response.replace('\r', "\n"));

        let response = Message::decode(&response)
            .map_err(|e| DorError::Send(format!("unreadable acknowledgement: {}", e)))?;
        let ack = Ack::from_message(&response)?;

        if !ack.is_accepted() {
            return Err(DorError::Send(format!(
                "receiver answered {} for control id {}",
                ack.code,
                ack.control_id.as_deref().unwrap_or("?")
            )));
        }

        Ok(ack)
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                log::debug!("Error shutting down connection to {}: {}", self.peer, e);
            }
        }
    }
}
