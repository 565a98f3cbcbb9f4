//! Echo/ping application served by the `server` binary.
//!
//! Decodes [`shared::Packet`]s, answers pings with pongs and echoes payloads
//! back to the sender. Malformed datagrams are answered with an error packet
//! and counted; they never affect the listener.

use crate::binding::{read_datagram, DatagramReader, SocketBinding};
use crate::config::Config;
use crate::error::{ReadError, ServerError};
use crate::handlers::{DirectWrite, Handlers, ReqHandler};
use crate::message::{Datagram, Request, Response};
use crate::network::Udp;
use async_trait::async_trait;
use log::{debug, warn};
use shared::{decode, encode, timestamp_millis, Packet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EchoStats {
    pub pings: u64,
    pub echoes: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
pub struct EchoHandler {
    pings: AtomicU64,
    echoes: AtomicU64,
    rejected: AtomicU64,
}

impl EchoHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> EchoStats {
        EchoStats {
            pings: self.pings.load(Ordering::Relaxed),
            echoes: self.echoes.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Builds the reply for one datagram, if it deserves one
    fn answer(&self, payload: &[u8], from: SocketAddr) -> Packet {
        match decode(payload) {
            Ok(Packet::Ping {
                sequence,
                timestamp,
            }) => {
                self.pings.fetch_add(1, Ordering::Relaxed);
                Packet::Pong {
                    sequence,
                    timestamp,
                    server_time: timestamp_millis(),
                }
            }
            Ok(Packet::Echo { payload }) => {
                self.echoes.fetch_add(1, Ordering::Relaxed);
                Packet::Echo { payload }
            }
            Ok(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Unexpected packet type from {}", from);
                Packet::Error {
                    reason: "unexpected packet".to_string(),
                }
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to decode datagram from {}: {}", from, e);
                Packet::Error {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl<C> ReqHandler<C> for EchoHandler
where
    C: Clone + Send + Sync + 'static,
{
    async fn read(&self, _ctx: &C, reader: &mut dyn DatagramReader) -> Result<Datagram, ReadError> {
        read_datagram(reader).await
    }

    async fn process(&self, ctx: &C, req: Request<C>) {
        let reply = self.answer(req.payload(), req.addr);
        let data = match encode(&reply) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to encode reply for {}: {}", req.addr, e);
                return;
            }
        };

        let response = Response::new(req.addr, data);
        if let Err(e) = req.udp.async_send(ctx.clone(), response).await {
            debug!("Reply to {} not sent: {}", req.addr, e);
        }
    }
}

/// Builds an echo listener on `config.addr`, returning the handler so its
/// counters can be read.
pub fn listener<C>(name: &str, config: Config) -> Result<(Udp<C>, Arc<EchoHandler>), ServerError>
where
    C: Clone + Send + Sync + 'static,
{
    let echo = Arc::new(EchoHandler::new());
    let handlers = Handlers::new(
        Arc::new(SocketBinding::from_config(&config)),
        Arc::clone(&echo) as Arc<dyn ReqHandler<C>>,
        Arc::new(DirectWrite),
    );
    let udp = Udp::new(name, config, handlers)?;
    Ok((udp, echo))
}
