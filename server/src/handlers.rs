//! Capabilities the embedding application plugs into a listener.
//!
//! `C` is the context type fixed per listener. The read loop passes the
//! context given to [`crate::Udp::start`]; responses carry the context
//! they were submitted with.

use crate::binding::{Binding, DatagramReader, DatagramWriter};
use crate::error::{ReadError, WriteError};
use crate::message::{Datagram, Request, Response};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Binds the listener socket to a reader and a writer. Called once, before
/// the read loop starts.
pub trait ConnHandler<C>: Send + Sync {
    fn bind(&self, ctx: &C, socket: UdpSocket) -> io::Result<Binding>;
}

/// Reads requests off the wire and processes them
#[async_trait]
pub trait ReqHandler<C>: Send + Sync {
    /// Reads one datagram. Returning a terminal [`ReadError`] (end of stream
    /// or a non-transient failure) shuts the listener down; a transient one
    /// makes the loop read again. [`crate::binding::read_datagram`] covers
    /// the common case.
    async fn read(&self, ctx: &C, reader: &mut dyn DatagramReader) -> Result<Datagram, ReadError>;

    /// Handles one request. Runs on a pool routine; failures stay here.
    async fn process(&self, ctx: &C, req: Request<C>);
}

/// Writes responses to the wire
#[async_trait]
pub trait RespHandler<C>: Send + Sync {
    /// Runs on a pool routine (or the caller's task for [`crate::Udp::send`]).
    /// The writer is shared between concurrent calls.
    async fn write(
        &self,
        ctx: &C,
        resp: &Response<C>,
        writer: &dyn DatagramWriter,
    ) -> Result<(), WriteError>;
}

/// Writes the response payload as a single datagram to its address
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectWrite;

#[async_trait]
impl<C> RespHandler<C> for DirectWrite
where
    C: Send + Sync + 'static,
{
    async fn write(
        &self,
        _ctx: &C,
        resp: &Response<C>,
        writer: &dyn DatagramWriter,
    ) -> Result<(), WriteError> {
        let payload = resp.payload();
        let written = writer.send_to(payload, resp.addr).await?;
        if written != payload.len() {
            return Err(WriteError::Short {
                written,
                expected: payload.len(),
            });
        }
        Ok(())
    }
}

/// The three capabilities a listener is built from
pub struct Handlers<C> {
    pub conn: Arc<dyn ConnHandler<C>>,
    pub req: Arc<dyn ReqHandler<C>>,
    pub resp: Arc<dyn RespHandler<C>>,
}

impl<C> Handlers<C> {
    pub fn new(
        conn: Arc<dyn ConnHandler<C>>,
        req: Arc<dyn ReqHandler<C>>,
        resp: Arc<dyn RespHandler<C>>,
    ) -> Self {
        Self { conn, req, resp }
    }
}

impl<C> Clone for Handlers<C> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            req: Arc::clone(&self.req),
            resp: Arc::clone(&self.resp),
        }
    }
}
