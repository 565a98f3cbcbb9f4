//! # Ping/Echo Client Library
//!
//! Client side of the demo protocol served by the `server` binary. It sends
//! [`shared::Packet`]s to a server over UDP and waits for the matching
//! replies, measuring round-trip times along the way.
//!
//! ## Network Module (`network`)
//! - UDP socket management and reply matching
//! - Packet serialization through the `shared` crate
//! - Reply timeouts and optional simulated latency
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080", Duration::from_secs(1), 0).await?;
//!
//!     let result = client.ping().await?;
//!     println!("ping {} took {:?}", result.sequence, result.rtt);
//!
//!     let echoed = client.echo(b"hello").await?;
//!     assert_eq!(echoed, b"hello");
//!     Ok(())
//! }
//! ```

pub mod network;
