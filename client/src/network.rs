use log::{debug, warn};
use shared::{decode, encode, timestamp_millis, Packet, PacketError};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("invalid server address: {0}")]
    Address(#[from] std::net::AddrParseError),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("server rejected request: {0}")]
    Rejected(String),
}

/// Round trip of one ping
#[derive(Debug, Clone, Copy)]
pub struct PingResult {
    pub sequence: u32,
    pub rtt: Duration,
    /// Server clock minus the midpoint of the round trip, in milliseconds
    pub clock_offset_ms: i64,
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    reply_timeout: Duration,
    fake_ping_ms: u64,
    next_sequence: u32,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        reply_timeout: Duration,
        fake_ping_ms: u64,
    ) -> Result<Self, ClientError> {
        let server_addr: SocketAddr = server_addr.parse()?;
        let bind_addr = if server_addr.is_ipv6() {
            "[::]:0"
        } else {
            "0.0.0.0:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;

        Ok(Client {
            socket,
            server_addr,
            reply_timeout,
            fake_ping_ms,
            next_sequence: 1,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), ClientError> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = encode(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Waits for the next packet from the server, skipping datagrams from
    /// anyone else
    async fn recv_packet(&self) -> Result<Packet, ClientError> {
        let mut buffer = [0u8; 2048];
        let deadline = Instant::now() + self.reply_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (len, addr) = timeout(remaining, self.socket.recv_from(&mut buffer))
                .await
                .map_err(|_| ClientError::Timeout(self.reply_timeout))??;

            if addr != self.server_addr {
                warn!("Ignoring datagram from unexpected peer {}", addr);
                continue;
            }

            if self.fake_ping_ms > 0 {
                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
            }

            return match decode(&buffer[..len])? {
                Packet::Error { reason } => Err(ClientError::Rejected(reason)),
                packet => Ok(packet),
            };
        }
    }

    pub async fn ping(&mut self) -> Result<PingResult, ClientError> {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let sent_at = Instant::now();
        let timestamp = timestamp_millis();
        self.send_packet(&Packet::Ping {
            sequence,
            timestamp,
        })
        .await?;

        loop {
            match self.recv_packet().await? {
                Packet::Pong {
                    sequence: seq,
                    timestamp: sent,
                    server_time,
                } if seq == sequence => {
                    let rtt = sent_at.elapsed();
                    let midpoint = sent + (rtt.as_millis() as u64) / 2;
                    return Ok(PingResult {
                        sequence,
                        rtt,
                        clock_offset_ms: server_time as i64 - midpoint as i64,
                    });
                }
                // Late pong for an earlier ping that already timed out.
                Packet::Pong { sequence: seq, .. } => {
                    debug!("Discarding stale pong {}", seq);
                }
                other => warn!("Unexpected packet while waiting for pong: {:?}", other),
            }
        }
    }

    pub async fn echo(&self, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
        self.send_packet(&Packet::Echo {
            payload: payload.to_vec(),
        })
        .await?;

        loop {
            match self.recv_packet().await? {
                Packet::Echo { payload } => return Ok(payload),
                other => warn!("Unexpected packet while waiting for echo: {:?}", other),
            }
        }
    }
}
