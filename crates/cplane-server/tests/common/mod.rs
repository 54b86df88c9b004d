// crates/cplane-server/tests/common/mod.rs
//
// Scripted engine side of the control protocol, built on the protocol
// crate's codec.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cplane_core::{ConnectionReady, ControlMessage, EngineHello};
use cplane_protocol::builders::control_frame;
use cplane_protocol::{decode_control, FrameReader};
use cplane_server::{
    Config, ControlPlane, EngineId, EngineRecord, ServerEvent, StaticRegistry,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;

pub const TOKEN: &str = "engine-one-token";
pub const ENGINE: EngineId = EngineId(1);
pub const STEP: Duration = Duration::from_secs(3);

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        heartbeat_interval: Duration::from_secs(60),
        request_timeout: Duration::from_secs(2),
        data_connection_timeout: Duration::from_secs(2),
        fail_fast_on_disconnect: false,
        server_version: "test-1.0".to_string(),
    }
}

pub async fn start_server(config: Config) -> (ControlPlane, Arc<StaticRegistry>) {
    let registry = Arc::new(StaticRegistry::new(vec![
        EngineRecord::new(ENGINE, "engine-one", TOKEN),
        EngineRecord::new(EngineId(2), "engine-two", "engine-two-token"),
    ]));
    let server = ControlPlane::start(config, registry.clone())
        .await
        .expect("server start");
    (server, registry)
}

pub struct FakeEngine {
    stream: TcpStream,
    reader: FrameReader,
}

impl FakeEngine {
    /// Open a socket without sending anything.
    pub async fn raw(addr: SocketAddr) -> FakeEngine {
        let stream = TcpStream::connect(addr).await.expect("connect");
        FakeEngine {
            stream,
            reader: FrameReader::new(),
        }
    }

    /// Open a socket and send `EngineHello`, without waiting for the ack.
    pub async fn connect(addr: SocketAddr, token: Option<&str>) -> FakeEngine {
        let mut engine = FakeEngine::raw(addr).await;
        engine
            .send(&ControlMessage::EngineHello(EngineHello {
                version: "fake-0.1".to_string(),
                registration_token: token.map(str::to_string),
            }))
            .await;
        engine
    }

    /// Connect with `token` and expect an accepting ack.
    pub async fn register(addr: SocketAddr, token: &str) -> FakeEngine {
        let mut engine = FakeEngine::connect(addr, Some(token)).await;
        match engine.recv().await {
            Some(ControlMessage::EngineHelloAck(ack)) => {
                assert!(ack.accepted, "engine rejected");
                assert_eq!(ack.server_version, "test-1.0");
            }
            other => panic!("expected EngineHelloAck, got {:?}", other),
        }
        engine
    }

    pub async fn send(&mut self, msg: &ControlMessage) {
        let frame = control_frame(msg).expect("encode");
        self.stream.write_all(&frame).await.expect("write");
    }

    /// Write bytes as-is, bypassing the frame encoder.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write");
    }

    /// Next control message, or `None` once the server closed the socket.
    pub async fn recv(&mut self) -> Option<ControlMessage> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.reader.next_frame().expect("valid frame") {
                return Some(decode_control(&frame).expect("decode"));
            }
            let n = timeout(STEP, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for the server")
                .unwrap_or(0);
            if n == 0 {
                return None;
            }
            self.reader.push(&buf[..n]);
        }
    }

    /// Next message that is not a heartbeat `Ping`.
    pub async fn recv_skip_ping(&mut self) -> Option<ControlMessage> {
        loop {
            match self.recv().await {
                Some(ControlMessage::Ping(_)) => continue,
                other => return other,
            }
        }
    }
}

/// Open a data connection announcing `session_id`; `extra` rides in the
/// same write as the handshake frame.
pub async fn open_data_connection(addr: SocketAddr, session_id: &str, extra: &[u8]) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let frame = control_frame(&ControlMessage::ConnectionReady(ConnectionReady {
        session_id: session_id.to_string(),
    }))
    .expect("encode");

    let mut segment = frame.to_vec();
    segment.extend_from_slice(extra);
    stream.write_all(&segment).await.expect("write");
    stream
}

/// Wait for the first event matching `pred`.
pub async fn wait_event<F>(events: &mut broadcast::Receiver<ServerEvent>, mut pred: F) -> ServerEvent
where
    F: FnMut(&ServerEvent) -> bool,
{
    timeout(STEP, async {
        loop {
            let event = events.recv().await.expect("event channel");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
