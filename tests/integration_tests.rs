//! Integration tests for the pooled UDP server
//!
//! These tests run real listeners on loopback sockets and drive them with
//! the demo client or hand-written handlers.

use async_trait::async_trait;
use client::network::{Client, ClientError};
use server::{
    echo, read_datagram, Config, Datagram, DatagramReader, DirectWrite, Handlers, ListenerState,
    ReadError, ReqHandler, Request, Response, ServerError, SocketBinding, Udp,
};
use shared::{encode, Packet};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(2);

/// ECHO SERVER TESTS
mod echo_tests {
    use super::*;

    /// Tests ping and echo round trips through the demo client
    #[tokio::test]
    async fn client_round_trips() {
        let (udp, stats) = echo::listener::<String>("echo", Config::default()).unwrap();
        udp.start("it".to_string()).await.unwrap();
        let addr = udp.addr().unwrap();

        let mut client = Client::new(&addr.to_string(), WAIT, 0).await.unwrap();
        for expected in 1..=3 {
            let result = client.ping().await.unwrap();
            assert_eq!(result.sequence, expected);
        }
        assert_eq!(client.echo(b"hello").await.unwrap(), b"hello");

        let stats = stats.stats();
        assert_eq!(stats.pings, 3);
        assert_eq!(stats.echoes, 1);

        udp.stop().await;
    }

    /// Tests that malformed datagrams are answered without hurting the listener
    #[tokio::test]
    async fn malformed_datagram_handling() {
        let (udp, stats) = echo::listener::<String>("echo", Config::default()).unwrap();
        udp.start("it".to_string()).await.unwrap();
        let addr = udp.addr().unwrap();

        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(&[0xFF, 0xFF, 0xFF, 0xFF, 0x00], addr)
            .await
            .unwrap();
        let mut buf = [0u8; 2048];
        let (len, _) = timeout(WAIT, raw.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            shared::decode(&buf[..len]).unwrap(),
            Packet::Error { .. }
        ));

        // The listener still answers well-formed traffic.
        let client = Client::new(&addr.to_string(), WAIT, 0).await.unwrap();
        assert_eq!(client.echo(b"still here").await.unwrap(), b"still here");
        assert_eq!(stats.stats().rejected, 1);
        assert_ne!(udp.state(), ListenerState::ShutDown);

        udp.stop().await;
    }

    /// Tests that a stopped listener no longer answers
    #[tokio::test]
    async fn stopped_listener_is_silent() {
        let (udp, _stats) = echo::listener::<String>("echo", Config::default()).unwrap();
        udp.start("it".to_string()).await.unwrap();
        let addr = udp.addr().unwrap();

        udp.stop().await;
        assert_eq!(udp.state(), ListenerState::ShutDown);
        assert!(matches!(udp.closed().await, Some(ReadError::Closed)));

        let client = Client::new(&addr.to_string(), Duration::from_millis(100), 0)
            .await
            .unwrap();
        let result = client.echo(b"hello?").await;
        // Depending on the platform the closed port shows up as a timeout or
        // as a connection refused error.
        assert!(matches!(
            result,
            Err(ClientError::Timeout(_)) | Err(ClientError::Io(_))
        ));
    }

    /// Tests that a burst larger than the pool queue is still fully answered
    #[tokio::test]
    async fn burst_beyond_queue_capacity() {
        let config = Config::default().with_routines(1).with_queue_capacity(1);
        let (udp, stats) = echo::listener::<String>("echo", config).unwrap();
        udp.start("it".to_string()).await.unwrap();
        let addr = udp.addr().unwrap();

        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for sequence in 0..20u32 {
            let ping = encode(&Packet::Ping {
                sequence,
                timestamp: 0,
            })
            .unwrap();
            raw.send_to(&ping, addr).await.unwrap();
        }

        let mut answered = Vec::new();
        let mut buf = [0u8; 2048];
        for _ in 0..20 {
            let (len, _) = timeout(WAIT, raw.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            match shared::decode(&buf[..len]).unwrap() {
                Packet::Pong { sequence, .. } => answered.push(sequence),
                other => panic!("Unexpected reply: {:?}", other),
            }
        }
        answered.sort();
        assert_eq!(answered, (0..20).collect::<Vec<_>>());

        // The listener kept reading after the burst.
        let mut client = Client::new(&addr.to_string(), WAIT, 0).await.unwrap();
        assert_ok!(client.ping().await);

        assert_ok!(timeout(WAIT, udp.stop()).await);
        assert_eq!(stats.stats().pings, 21);
    }

    /// Tests serving many concurrent clients
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_clients() {
        let config = Config::default().with_routines(4);
        let (udp, stats) = echo::listener::<String>("echo", config).unwrap();
        udp.start("it".to_string()).await.unwrap();
        let addr = udp.addr().unwrap().to_string();

        let mut handles = Vec::new();
        for id in 0..8u8 {
            let addr = addr.clone();
            handles.push(tokio::spawn(async move {
                let client = Client::new(&addr, WAIT, 0).await.unwrap();
                for round in 0..5u8 {
                    let payload = vec![id, round];
                    assert_eq!(client.echo(&payload).await.unwrap(), payload);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(stats.stats().echoes, 40);
        udp.stop().await;
    }
}

/// FRAMEWORK TESTS WITH CUSTOM HANDLERS
mod pipeline_tests {
    use super::*;

    /// Replies with the payload reversed, using the synchronous send path
    struct Reverse {
        seen: mpsc::UnboundedSender<(Vec<u8>, bool)>,
    }

    #[async_trait]
    impl ReqHandler<u32> for Reverse {
        async fn read(
            &self,
            _ctx: &u32,
            reader: &mut dyn DatagramReader,
        ) -> Result<Datagram, ReadError> {
            read_datagram(reader).await
        }

        async fn process(&self, ctx: &u32, req: Request<u32>) {
            let mut reply = req.payload().to_vec();
            reply.reverse();

            let seen = self.seen.clone();
            let response = Response::new(req.addr, reply).on_complete(move |resp, result| {
                let _ = seen.send((resp.data.clone(), result.is_ok()));
            });
            let _ = req.udp.send(*ctx + 1, response).await;
        }
    }

    fn reverse_listener() -> (Udp<u32>, mpsc::UnboundedReceiver<(Vec<u8>, bool)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handlers = Handlers::new(
            Arc::new(SocketBinding::default()),
            Arc::new(Reverse { seen: tx }),
            Arc::new(DirectWrite),
        );
        let udp = Udp::new("reverse", Config::default().with_routines(2), handlers).unwrap();
        (udp, rx)
    }

    /// Tests the full request and response path over a real socket
    #[tokio::test]
    async fn request_to_response_over_socket() {
        let (udp, mut completions) = reverse_listener();
        udp.start(41).await.unwrap();
        let addr = udp.addr().unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(b"abc", addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = timeout(WAIT, peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"cba");
        assert_eq!(from, addr);

        let (data, ok) = timeout(WAIT, completions.recv()).await.unwrap().unwrap();
        assert_eq!(data, b"cba");
        assert!(ok);

        udp.stop().await;
    }

    /// Tests that responses can be pushed to clients outside of any request
    #[tokio::test]
    async fn unsolicited_async_send() {
        let (udp, _completions) = reverse_listener();
        udp.start(0).await.unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let data = encode(&Packet::Echo {
            payload: b"push".to_vec(),
        })
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let response = Response::new(peer_addr, data.clone()).on_complete(move |resp, result| {
            let _ = tx.send((resp.context().copied(), result.is_ok()));
        });
        assert_ok!(udp.async_send(7, response).await);

        let mut buf = [0u8; 64];
        let (len, _) = timeout(WAIT, peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], &data[..]);
        assert_eq!(
            timeout(WAIT, rx.recv()).await.unwrap(),
            Some((Some(7), true))
        );

        udp.stop().await;
    }

    /// Tests that two listeners cannot share a port
    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let (first, _rx1) = reverse_listener();
        first.start(0).await.unwrap();
        let taken = first.addr().unwrap();

        let (tx, _rx2) = mpsc::unbounded_channel();
        let handlers = Handlers::new(
            Arc::new(SocketBinding::default()),
            Arc::new(Reverse { seen: tx }),
            Arc::new(DirectWrite),
        );
        let second = Udp::new("conflict", Config::new(taken), handlers).unwrap();

        let result = second.start(0).await;
        assert!(matches!(assert_err!(result), ServerError::Bind(_)));
        assert_eq!(second.state(), ListenerState::ShutDown);

        first.stop().await;
    }
}
