//! Listener configuration supplied by the embedding application

use crate::error::ServerError;
use std::net::{Ipv4Addr, SocketAddr};

/// Largest payload a UDP datagram can carry over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the listener socket binds to
    pub addr: SocketAddr,
    /// Number of pool routines processing requests and writing responses
    pub routines: usize,
    /// Tasks that may wait in the pool queue before the read loop is held back
    pub queue_capacity: usize,
    /// Receive buffer size allocated by the default socket binding
    pub max_datagram_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            routines: 8,
            queue_capacity: 1024,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl Config {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Self::default()
        }
    }

    pub fn with_routines(mut self, routines: usize) -> Self {
        self.routines = routines;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_max_datagram_size(mut self, max_datagram_size: usize) -> Self {
        self.max_datagram_size = max_datagram_size;
        self
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.routines == 0 {
            return Err(ServerError::Config("routines must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ServerError::Config(
                "queue capacity must be at least 1".into(),
            ));
        }
        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_DATAGRAM_SIZE {
            return Err(ServerError::Config(format!(
                "max datagram size must be within 1..={}",
                MAX_DATAGRAM_SIZE
            )));
        }
        Ok(())
    }
}
