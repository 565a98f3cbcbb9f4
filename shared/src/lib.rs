//! Demo wire protocol spoken by the `server` and `client` binaries.
//!
//! The framework core never looks at payload bytes; this crate is the
//! application-level format the demo echo server and its client agree on.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_PORT: u16 = 8080;
pub const MAX_PACKET_SIZE: usize = 1200;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    Ping {
        sequence: u32,
        timestamp: u64,
    },
    Echo {
        payload: Vec<u8>,
    },

    Pong {
        sequence: u32,
        timestamp: u64,
        server_time: u64,
    },
    Error {
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("packet of {0} bytes exceeds the {MAX_PACKET_SIZE} byte limit")]
    TooLarge(usize),
    #[error("malformed packet: {0}")]
    Malformed(#[from] bincode::Error),
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, PacketError> {
    let data = bincode::serialize(packet)?;
    if data.len() > MAX_PACKET_SIZE {
        return Err(PacketError::TooLarge(data.len()));
    }
    Ok(data)
}

pub fn decode(data: &[u8]) -> Result<Packet, PacketError> {
    if data.len() > MAX_PACKET_SIZE {
        return Err(PacketError::TooLarge(data.len()));
    }
    Ok(bincode::deserialize(data)?)
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn timestamp_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    (millis.min(u64::MAX as u128)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_survives_encoding() {
        let packet = Packet::Ping {
            sequence: 7,
            timestamp: 1234567890,
        };

        let data = encode(&packet).unwrap();
        assert_eq!(decode(&data).unwrap(), packet);
    }

    #[test]
    fn test_oversized_echo_is_rejected() {
        let packet = Packet::Echo {
            payload: vec![0xAB; MAX_PACKET_SIZE],
        };

        match encode(&packet) {
            Err(PacketError::TooLarge(len)) => assert!(len > MAX_PACKET_SIZE),
            other => panic!("Expected TooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        let garbage = [0xFFu8, 0xFF, 0xFF, 0xFF, 0x01];
        assert!(matches!(decode(&garbage), Err(PacketError::Malformed(_))));
    }

    #[test]
    fn test_oversized_input_is_rejected_before_decoding() {
        let data = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(decode(&data), Err(PacketError::TooLarge(_))));
    }

    #[test]
    fn test_timestamp_is_monotonic_enough() {
        let first = timestamp_millis();
        std::thread::sleep(Duration::from_millis(2));
        let second = timestamp_millis();

        assert!(second >= first);
        assert!(first > 0);
    }
}
