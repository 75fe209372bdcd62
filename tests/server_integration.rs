//! Integration tests for the dual-transport session core
//!
//! These tests run the real server on loopback sockets and drive the
//! client side of the protocol by hand: stream handshake, datagram echo,
//! challenge-response, then tick reception.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use emberlink::net::auth::{
    expected_response, AUTH_CHALLENGE_PREFIX, AUTH_FAILED_LINE, AUTH_RESPONSE_PREFIX,
    AUTH_SUCCESS_LINE,
};
use emberlink::net::wire::{decode_tick_packet, seq_newer, SEQ_PREFIX_LEN, TICK_PACKET_LEN};
use emberlink::{GameModule, GameServer, ServerConfig, TickDispatcher, TickKind};

const SECRET: &str = "integration-test-secret";

/// Registers Movement at a short interval so tests observe ticks fast.
struct MovementOnly;

impl GameModule for MovementOnly {
    fn name(&self) -> &str {
        "movement-only"
    }

    fn initialize(&self, dispatcher: &TickDispatcher) {
        dispatcher.register(TickKind::Movement, 20, Default::default());
    }
}

async fn start_server(handshake_timeout: Duration) -> GameServer {
    let config = ServerConfig {
        stream_bind: "127.0.0.1:0".parse().unwrap(),
        datagram_bind: "127.0.0.1:0".parse().unwrap(),
        handshake_timeout,
        auth_timeout: Duration::from_secs(5),
        shared_secret: SECRET.to_string(),
        ..ServerConfig::default()
    };

    let server = GameServer::bind(config).await.unwrap();
    // Nobody drains inbound datagrams in these tests; the acceptor
    // tolerates the dropped receiver.
    drop(server.take_inbound().await);
    server.load_module(&MovementOnly);
    server.start().await;
    server
}

/// A hand-driven client: stream reader plus the bound UDP socket.
struct TestClient {
    reader: BufReader<TcpStream>,
    udp: UdpSocket,
}

impl TestClient {
    /// Connect and complete the transport handshake (stream line + UDP
    /// echo + ack), stopping before authentication.
    async fn handshake(server: &GameServer) -> Self {
        let stream = TcpStream::connect(server.stream_addr()).await.unwrap();
        let mut reader = BufReader::new(stream);

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let parts: Vec<&str> = line.trim().split('|').collect();
        assert_eq!(parts[0], "HANDSHAKE");
        assert_eq!(parts.len(), 4, "HANDSHAKE|nonce|stream-addr|udp-port");
        let nonce = parts[1].to_string();
        let udp_port: u16 = parts[3].parse().unwrap();

        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = SocketAddr::new(server.datagram_addr().ip(), udp_port);
        udp.send_to(format!("HANDSHAKE|{nonce}").as_bytes(), target)
            .await
            .unwrap();

        // The ack is the session's first datagram: sequence 1.
        let mut buf = [0u8; 64];
        let (n, _) = timeout(Duration::from_secs(2), udp.recv_from(&mut buf))
            .await
            .expect("ack should arrive")
            .unwrap();
        assert_eq!(&buf[..SEQ_PREFIX_LEN], &1u32.to_le_bytes());
        assert_eq!(&buf[SEQ_PREFIX_LEN..n], b"HANDSHAKE_ACK");

        Self { reader, udp }
    }

    /// Run the challenge-response with `secret`. Returns the verdict line
    /// (`AUTH_SUCCESS` or `AUTH_FAILED`).
    async fn authenticate(&mut self, secret: &str) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        let challenge = line
            .trim()
            .strip_prefix(AUTH_CHALLENGE_PREFIX)
            .expect("challenge line")
            .to_string();

        let response = expected_response(secret.as_bytes(), &challenge);
        self.reader
            .get_mut()
            .write_all(format!("{AUTH_RESPONSE_PREFIX}{response}\n").as_bytes())
            .await
            .unwrap();

        line.clear();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim().to_string()
    }

    /// Receive one raw datagram.
    async fn recv_datagram(&self, wait: Duration) -> Option<Vec<u8>> {
        let mut buf = [0u8; 256];
        match timeout(wait, self.udp.recv_from(&mut buf)).await {
            Ok(Ok((n, _))) => Some(buf[..n].to_vec()),
            _ => None,
        }
    }
}

mod happy_path {
    use super::*;

    /// S1: handshake, ack with sequence 1, auth success, welcome line,
    /// then a Movement tick datagram of exactly 25 bytes within one
    /// interval's worth of waiting.
    #[tokio::test]
    async fn full_session_receives_ticks() {
        let server = start_server(Duration::from_secs(5)).await;
        let mut client = TestClient::handshake(&server).await;

        assert_eq!(client.authenticate(SECRET).await, AUTH_SUCCESS_LINE);

        let mut welcome = String::new();
        client.reader.read_line(&mut welcome).await.unwrap();
        assert!(!welcome.trim().is_empty());

        let datagram = client
            .recv_datagram(Duration::from_secs(2))
            .await
            .expect("tick datagram should arrive");
        assert_eq!(datagram.len(), SEQ_PREFIX_LEN + TICK_PACKET_LEN);

        let packet = decode_tick_packet(&datagram[SEQ_PREFIX_LEN..]).unwrap();
        assert_eq!(packet.kind, TickKind::Movement);
        assert!(packet.counter >= 1);
        assert!(packet.timestamp_ms > 0);

        assert_eq!(server.registry().session_count().await, 1);
        server.stop().await.unwrap();
    }

    /// Tick sequences are strictly newer in delivery order; the ack used
    /// sequence 1, so the first tick carries 2.
    #[tokio::test]
    async fn tick_sequences_strictly_increase() {
        let server = start_server(Duration::from_secs(5)).await;
        let mut client = TestClient::handshake(&server).await;
        client.authenticate(SECRET).await;
        let mut welcome = String::new();
        client.reader.read_line(&mut welcome).await.unwrap();

        let mut last_seq: u32 = 1; // the ack
        for _ in 0..5 {
            let datagram = client
                .recv_datagram(Duration::from_secs(2))
                .await
                .expect("tick datagram");
            let seq = u32::from_le_bytes(datagram[..SEQ_PREFIX_LEN].try_into().unwrap());
            assert!(
                seq_newer(seq, last_seq),
                "sequence {seq} should be newer than {last_seq}"
            );
            last_seq = seq;
        }

        server.stop().await.unwrap();
    }
}

mod authentication {
    use super::*;

    /// S2: a client with the wrong secret gets AUTH_FAILED, the stream
    /// closes, and no tick datagram is ever delivered to it.
    #[tokio::test]
    async fn wrong_secret_is_rejected_without_ticks() {
        let server = start_server(Duration::from_secs(5)).await;
        let mut client = TestClient::handshake(&server).await;

        assert_eq!(client.authenticate("not-the-secret").await, AUTH_FAILED_LINE);

        // Stream closes shortly after the verdict.
        let mut line = String::new();
        let n = timeout(Duration::from_secs(1), client.reader.read_line(&mut line))
            .await
            .expect("close should be prompt")
            .unwrap();
        assert_eq!(n, 0, "expected EOF after AUTH_FAILED");

        // No tick traffic for an unauthenticated session.
        assert!(client.recv_datagram(Duration::from_millis(300)).await.is_none());
        assert_eq!(server.registry().session_count().await, 0);

        server.stop().await.unwrap();
    }
}

mod handshake {
    use super::*;

    /// S3: a client that never echoes the nonce on UDP loses its stream
    /// once the handshake window lapses, and no session is created.
    #[tokio::test]
    async fn missing_datagram_times_out() {
        let server = start_server(Duration::from_millis(300)).await;

        let stream = TcpStream::connect(server.stream_addr()).await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("HANDSHAKE|"));

        line.clear();
        let n = timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .expect("server should close the stream")
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(server.registry().session_count().await, 0);

        server.stop().await.unwrap();
    }

    /// S4: retransmitting the handshake datagram after binding changes
    /// nothing; one session, same endpoint.
    #[tokio::test]
    async fn duplicate_handshake_datagram_is_harmless() {
        let server = start_server(Duration::from_secs(5)).await;

        let stream = TcpStream::connect(server.stream_addr()).await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let parts: Vec<&str> = line.trim().split('|').collect();
        let nonce = parts[1].to_string();
        let udp_port: u16 = parts[3].parse().unwrap();

        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = SocketAddr::new(server.datagram_addr().ip(), udp_port);
        let echo = format!("HANDSHAKE|{nonce}");
        udp.send_to(echo.as_bytes(), target).await.unwrap();

        let mut buf = [0u8; 64];
        udp.recv_from(&mut buf).await.unwrap();
        assert_eq!(server.registry().session_count().await, 1);

        let session = server
            .registry()
            .by_endpoint(udp.local_addr().unwrap())
            .await
            .unwrap();

        udp.send_to(echo.as_bytes(), target).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(server.registry().session_count().await, 1);
        let same = server
            .registry()
            .by_endpoint(udp.local_addr().unwrap())
            .await
            .unwrap();
        assert_eq!(same.id(), session.id());

        server.stop().await.unwrap();
    }
}

mod shutdown {
    use super::*;

    /// S6: stopping the server mid-tick disconnects the session, stops
    /// every component within the grace window, and reports success.
    #[tokio::test]
    async fn graceful_shutdown_mid_tick() {
        let server = start_server(Duration::from_secs(5)).await;
        let mut client = TestClient::handshake(&server).await;
        client.authenticate(SECRET).await;
        let mut welcome = String::new();
        client.reader.read_line(&mut welcome).await.unwrap();

        // Ticks are flowing.
        assert!(client.recv_datagram(Duration::from_secs(2)).await.is_some());

        let verdict = timeout(Duration::from_secs(5), server.stop())
            .await
            .expect("stop should finish inside the grace window");
        verdict.unwrap();

        // The session was disconnected: the client observes EOF.
        let mut line = String::new();
        let n = timeout(Duration::from_secs(1), client.reader.read_line(&mut line))
            .await
            .expect("stream should close")
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(server.registry().session_count().await, 0);
    }

    /// Stopping with no clients connected is just as clean.
    #[tokio::test]
    async fn shutdown_with_no_sessions() {
        let server = start_server(Duration::from_secs(5)).await;
        server.stop().await.unwrap();
    }
}
