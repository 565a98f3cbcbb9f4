//! Values flowing through the request and response pipelines

use crate::error::WriteError;
use crate::network::Udp;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::SystemTime;

/// Result of one successful read on the listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub addr: SocketAddr,
    pub data: Vec<u8>,
    pub length: usize,
}

impl Datagram {
    pub fn new(addr: SocketAddr, data: Vec<u8>) -> Self {
        let length = data.len();
        Self { addr, data, length }
    }
}

/// A datagram received from a client, handed to [`crate::ReqHandler::process`]
/// exactly once.
pub struct Request<C> {
    pub udp: Udp<C>,
    pub addr: SocketAddr,
    pub is_ipv6: bool,
    pub read_at: SystemTime,
    pub data: Vec<u8>,
    pub length: usize,
}

impl<C> Request<C> {
    pub(crate) fn new(udp: Udp<C>, datagram: Datagram) -> Self {
        Self {
            udp,
            addr: datagram.addr,
            is_ipv6: datagram.addr.is_ipv6(),
            read_at: SystemTime::now(),
            data: datagram.data,
            length: datagram.length,
        }
    }

    /// The received bytes, limited to the reported length
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length.min(self.data.len())]
    }
}

impl<C> fmt::Debug for Request<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("udp", &self.udp.name())
            .field("addr", &self.addr)
            .field("is_ipv6", &self.is_ipv6)
            .field("read_at", &self.read_at)
            .field("length", &self.length)
            .finish()
    }
}

/// Called once a response's write attempt has finished, whatever its outcome
pub type Complete<C> = Box<dyn FnOnce(&Response<C>, &Result<(), WriteError>) + Send>;

/// A message to send to a client.
///
/// The server handle and the context are filled in when the response is
/// submitted through [`Udp::send`] or [`Udp::async_send`].
pub struct Response<C> {
    pub addr: SocketAddr,
    pub data: Vec<u8>,
    pub length: usize,
    // Behind a mutex so a borrowed response stays `Sync` while the callback
    // only has to be `Send`.
    complete: Mutex<Option<Complete<C>>>,

    pub(crate) udp: Option<Udp<C>>,
    pub(crate) context: Option<C>,
}

impl<C> Response<C> {
    pub fn new(addr: SocketAddr, data: Vec<u8>) -> Self {
        let length = data.len();
        Self {
            addr,
            data,
            length,
            complete: Mutex::new(None),
            udp: None,
            context: None,
        }
    }

    /// Registers the completion callback
    pub fn on_complete<F>(mut self, complete: F) -> Self
    where
        F: FnOnce(&Response<C>, &Result<(), WriteError>) + Send + 'static,
    {
        self.complete = Mutex::new(Some(Box::new(complete)));
        self
    }

    pub fn has_complete(&self) -> bool {
        match self.complete.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    pub(crate) fn take_complete(&mut self) -> Option<Complete<C>> {
        match self.complete.get_mut() {
            Ok(complete) => complete.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Bytes to put on the wire, limited to `length`
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length.min(self.data.len())]
    }

    /// Server the response was submitted to
    pub fn udp(&self) -> Option<&Udp<C>> {
        self.udp.as_ref()
    }

    /// Context supplied with the submission
    pub fn context(&self) -> Option<&C> {
        self.context.as_ref()
    }
}

impl<C> fmt::Debug for Response<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("addr", &self.addr)
            .field("length", &self.length)
            .field("has_complete", &self.has_complete())
            .field("udp", &self.udp.as_ref().map(|udp| udp.name().to_string()))
            .finish()
    }
}
