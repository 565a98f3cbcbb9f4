//! # Pooled UDP Server Library
//!
//! This library provides a datagram server framework: it owns a UDP socket,
//! reads datagrams on a single sequential loop and hands every request and
//! every response to a bounded worker pool, so slow application logic never
//! holds up the socket.
//!
//! ## Core Responsibilities
//!
//! ### Sequential Reading
//! One task performs every read on the listener socket, in arrival order.
//! Each successful read becomes a [`Request`] that is submitted to the pool;
//! the loop then goes straight back to reading.
//!
//! ### Pooled Processing and Writing
//! Requests are processed and responses are written on pool routines. The
//! number of routines is fixed per listener, and the pool queue is bounded
//! so a processing backlog holds the read loop back instead of growing
//! without limit.
//!
//! ### Error Classification
//! Read errors are split into transient ones (the loop reads again) and
//! terminal ones (the listener shuts down). Processing and write errors
//! belong to the application handlers and never stop the listener.
//!
//! ## Architecture Design
//!
//! ### Pluggable Capabilities
//! A listener is assembled from three capabilities supplied by the
//! embedding application:
//! - [`ConnHandler`] binds the socket to a reader and a writer
//! - [`ReqHandler`] reads datagrams and processes requests
//! - [`RespHandler`] writes responses through the shared writer
//!
//! ### Injected Scheduling
//! The listener only sees the [`Scheduler`] contract. [`WorkPool`] is the
//! tokio implementation used by default; [`InlineScheduler`] runs tasks
//! on the submitting task for deterministic tests. Responses sent from
//! inside a pool task never wait for queue space; when the queue is full
//! they are written on the routine that sent them.
//!
//! ### Ordering
//! Datagrams are read in order, but two requests may finish processing in
//! either order. Applications that need ordering must restore it themselves.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The [`Udp`] listener: lifecycle, read loop, synchronous and asynchronous
//! response submission.
//!
//! ### Pool Module (`pool`)
//! Task and scheduler contracts plus the work pool implementations.
//!
//! ### Binding Module (`binding`)
//! Datagram reader and writer traits and the plain socket binding.
//!
//! ### Echo Module (`echo`)
//! The ping/echo application run by the `server` binary.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{echo, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new("127.0.0.1:8080".parse()?).with_routines(4);
//!     let (udp, _stats) = echo::listener::<String>("echo", config)?;
//!
//!     udp.start("echo".to_string()).await?;
//!
//!     // Runs until the socket fails; `udp.stop()` closes it from elsewhere.
//!     if let Some(reason) = udp.closed().await {
//!         eprintln!("listener ended: {}", reason);
//!     }
//!     Ok(())
//! }
//! ```

pub mod binding;
pub mod config;
pub mod echo;
pub mod error;
pub mod handlers;
pub mod message;
pub mod network;
pub mod pool;

pub use binding::{read_datagram, Binding, DatagramReader, DatagramWriter, SocketBinding};
pub use config::Config;
pub use error::{PoolError, ReadError, ServerError, WriteError};
pub use handlers::{ConnHandler, DirectWrite, Handlers, ReqHandler, RespHandler};
pub use message::{Complete, Datagram, Request, Response};
pub use network::{ListenerState, Udp};
pub use pool::{
    current_routine, InlineScheduler, PoolConfig, PoolStats, Refused, RoutineId, Scheduler, Task,
    WorkPool,
};
