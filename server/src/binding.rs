//! Socket binding: turns the listener's UDP socket into the reader and
//! writer the pipelines work with.
//!
//! The reader and writer are traits so a binding can wrap the socket (for
//! tunnelling, framing, or fault injection in tests) without the pipelines
//! knowing about it. [`SocketBinding`] is the plain variant that reads and
//! writes the socket directly.

use crate::config::{Config, MAX_DATAGRAM_SIZE};
use crate::error::ReadError;
use crate::handlers::ConnHandler;
use crate::message::Datagram;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Receives one datagram at a time. Used only by the read loop, so it is
/// never shared.
#[async_trait]
pub trait DatagramReader: Send {
    async fn recv_from(&mut self) -> io::Result<(SocketAddr, Vec<u8>)>;
}

/// Sends datagrams. Shared by every write task of a listener.
#[async_trait]
pub trait DatagramWriter: Send + Sync {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
}

/// Reads one datagram from `reader`, classifying I/O failures into
/// transient and terminal [`ReadError`]s.
pub async fn read_datagram(reader: &mut dyn DatagramReader) -> Result<Datagram, ReadError> {
    let (addr, data) = reader.recv_from().await?;
    Ok(Datagram::new(addr, data))
}

/// Reader and writer produced by [`ConnHandler::bind`]
pub struct Binding {
    pub reader: Box<dyn DatagramReader>,
    pub writer: Arc<dyn DatagramWriter>,
}

impl Binding {
    pub fn new(reader: impl DatagramReader + 'static, writer: impl DatagramWriter + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Arc::new(writer),
        }
    }
}

/// Reads straight off the socket into a reusable receive buffer
pub struct SocketReader {
    socket: Arc<UdpSocket>,
    buffer: Vec<u8>,
}

impl SocketReader {
    pub fn new(socket: Arc<UdpSocket>, buffer_size: usize) -> Self {
        Self {
            socket,
            buffer: vec![0u8; buffer_size],
        }
    }
}

#[async_trait]
impl DatagramReader for SocketReader {
    async fn recv_from(&mut self) -> io::Result<(SocketAddr, Vec<u8>)> {
        let (len, addr) = self.socket.recv_from(&mut self.buffer).await?;
        Ok((addr, self.buffer[..len].to_vec()))
    }
}

/// Writes straight to the socket. `UdpSocket::send_to` takes `&self`, so
/// concurrent write tasks need no extra locking.
pub struct SocketWriter {
    socket: Arc<UdpSocket>,
}

impl SocketWriter {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl DatagramWriter for SocketWriter {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, target).await
    }
}

/// Default connection handler binding the socket directly
#[derive(Debug, Clone)]
pub struct SocketBinding {
    buffer_size: usize,
}

impl SocketBinding {
    pub fn new(buffer_size: usize) -> Self {
        Self { buffer_size }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_datagram_size)
    }
}

impl Default for SocketBinding {
    fn default() -> Self {
        Self::new(MAX_DATAGRAM_SIZE)
    }
}

impl<C> ConnHandler<C> for SocketBinding
where
    C: Send + Sync + 'static,
{
    fn bind(&self, _ctx: &C, socket: UdpSocket) -> io::Result<Binding> {
        if self.buffer_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "receive buffer size must be non-zero",
            ));
        }
        let socket = Arc::new(socket);
        Ok(Binding::new(
            SocketReader::new(Arc::clone(&socket), self.buffer_size),
            SocketWriter::new(socket),
        ))
    }
}
