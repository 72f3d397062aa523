//! End-to-end relay tests over loopback sockets

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use bytes::Bytes;
use common::*;
use futures::{SinkExt, StreamExt};
use packet_relay::config::{ListenerConfig, RedirectConfig};
use packet_relay::core::codec::FrameCodec;
use packet_relay::core::obfuscation::{self, CounterRecovery};
use packet_relay::core::packet::{ObfuscationType, HEADER_SIZE};
use packet_relay::protocol::dispatcher::{Direction, Dispatcher, Verdict};
use packet_relay::protocol::event::{Event, Value};
use packet_relay::protocol::pipeline::Pipeline;
use packet_relay::protocol::redirect::LoginRedirect;
use packet_relay::protocol::registry::{Identifier, SchemaVersion};
use packet_relay::transport::relay::RelayListener;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

type Conn = Framed<TcpStream, FrameCodec>;

struct Relay {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<packet_relay::Result<()>>,
}

impl Relay {
    async fn start(remote: SocketAddr, pipeline: Pipeline) -> Self {
        let config = ListenerConfig::new("login", "127.0.0.1:0", remote.to_string());
        let listener = RelayListener::bind(&config, pipeline).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(listener.run(shutdown_rx));
        Self {
            addr,
            shutdown_tx,
            task,
        }
    }

    async fn connect(&self) -> Conn {
        Framed::new(TcpStream::connect(self.addr).await.unwrap(), FrameCodec)
    }

    async fn stop(self) {
        self.shutdown_tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(15), self.task)
            .await
            .expect("listener did not stop")
            .unwrap()
            .unwrap();
    }
}

async fn next_frame(conn: &mut Conn) -> Bytes {
    tokio::time::timeout(Duration::from_secs(5), conn.next())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed")
        .expect("framing error")
}

async fn upstream() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn accept(listener: &TcpListener) -> Conn {
    let (stream, _) = listener.accept().await.unwrap();
    Framed::new(stream, FrameCodec)
}

fn server_list_frame() -> Bytes {
    let event = Event::new().with(
        "servers",
        vec![
            Event::new().with("id", 1u32).with("name", "Alpha"),
            Event::new().with("id", 2u32).with("name", "Beta"),
        ],
    );
    let plain = registry()
        .write(VERSION, Identifier::Name("S_SERVER_LIST"), SchemaVersion::Latest, &event)
        .unwrap();
    obfuscation::to_client(
        &plain[HEADER_SIZE..],
        ObfuscationType::Xor,
        S_SERVER_LIST,
        Some(&table()),
    )
    .unwrap()
}

fn ping(seq: u32) -> Bytes {
    obfuscation::to_server(&ping_payload(seq), ObfuscationType::Xor, C_PING, Some(&table()))
        .unwrap()
}

fn ping_seq(frame: &[u8]) -> u32 {
    let (packet, recovery) = obfuscation::from_client(frame, Some(&table()), 0).unwrap();
    assert!(matches!(recovery, CounterRecovery::Recovered(_)));
    let event = registry()
        .parse_frame(VERSION, Identifier::Opcode(C_PING), SchemaVersion::Latest, &packet.to_bytes())
        .unwrap();
    event.get("seq").and_then(Value::as_i128).unwrap() as u32
}

#[tokio::test]
async fn test_server_list_rewritten_in_flight() {
    let (server, server_addr) = upstream().await;
    let dispatcher = Dispatcher::new();
    LoginRedirect::new(&RedirectConfig::default())
        .install(&dispatcher)
        .unwrap();
    let relay = Relay::start(server_addr, pipeline(dispatcher)).await;

    let server_task = tokio::spawn(async move {
        let mut conn = accept(&server).await;
        conn.send(version_response("Client (CL:100)")).await.unwrap();
        conn.send(server_list_frame()).await.unwrap();
        next_frame(&mut conn).await
    });

    let mut client = relay.connect().await;
    assert_eq!(next_frame(&mut client).await, version_response("Client (CL:100)"));

    let rewritten = next_frame(&mut client).await;
    let packet = obfuscation::from_server(&rewritten, Some(&table())).unwrap();
    assert_eq!(packet.id, S_SERVER_LIST);
    let event = registry()
        .parse_frame(
            VERSION,
            Identifier::Opcode(S_SERVER_LIST),
            SchemaVersion::Latest,
            &packet.to_bytes(),
        )
        .unwrap();
    let names: Vec<_> = event
        .get("servers")
        .and_then(Value::as_array)
        .unwrap()
        .iter()
        .map(|s| s.get_str("name").unwrap().to_string())
        .collect();
    assert_eq!(names, ["Alpha(Proxy)", "Beta(Proxy)"]);

    // client traffic without a handler goes out byte-identical
    client.send(ping(5)).await.unwrap();
    assert_eq!(server_task.await.unwrap(), ping(5));

    drop(client);
    relay.stop().await;
}

#[tokio::test]
async fn test_dropped_frames_never_reach_server() {
    let (server, server_addr) = upstream().await;
    let dispatcher = Dispatcher::new();
    dispatcher
        .register("C_PING", |_, event, _| {
            match event.get("seq").and_then(Value::as_i128) {
                Some(seq) if seq % 2 == 0 => Verdict::Drop,
                _ => Verdict::Forward,
            }
        })
        .unwrap();
    let relay = Relay::start(server_addr, pipeline(dispatcher)).await;

    let server_task = tokio::spawn(async move {
        let mut conn = accept(&server).await;
        conn.send(version_response("Client (CL:100)")).await.unwrap();
        let mut seqs = Vec::new();
        for _ in 0..3 {
            seqs.push(ping_seq(&next_frame(&mut conn).await));
        }
        seqs
    });

    let mut client = relay.connect().await;
    next_frame(&mut client).await;
    for seq in 1..=6 {
        client.send(ping(seq)).await.unwrap();
    }

    assert_eq!(server_task.await.unwrap(), [1, 3, 5]);
    drop(client);
    relay.stop().await;
}

#[tokio::test]
async fn test_client_rewrite_is_reobfuscated() {
    let (server, server_addr) = upstream().await;
    let dispatcher = Dispatcher::new();
    dispatcher
        .register("C_PING", |_, event, direction| {
            assert_eq!(direction, Direction::FromClient);
            let seq = event.get("seq").and_then(Value::as_i128).unwrap_or(0) as u32;
            Verdict::Rewrite(event.clone().with("seq", seq + 1000))
        })
        .unwrap();
    let relay = Relay::start(server_addr, pipeline(dispatcher)).await;

    let server_task = tokio::spawn(async move {
        let mut conn = accept(&server).await;
        conn.send(version_response("Client (CL:100)")).await.unwrap();
        next_frame(&mut conn).await
    });

    let mut client = relay.connect().await;
    next_frame(&mut client).await;
    client.send(ping(7)).await.unwrap();

    let received = server_task.await.unwrap();
    assert_ne!(received, ping(7));
    assert_eq!(ping_seq(&received), 1007);

    drop(client);
    relay.stop().await;
}

#[tokio::test]
async fn test_fragmented_server_stream_reassembled() {
    let (server, server_addr) = upstream().await;
    let relay = Relay::start(server_addr, pipeline(Dispatcher::new())).await;

    let first = frame(40, 0, b"first frame");
    let second = frame(41, 2, &[0xAB; 300]);
    let mut wire = first.clone();
    wire.extend_from_slice(&second);

    let server_task = tokio::spawn(async move {
        let (mut stream, _) = server.accept().await.unwrap();
        for chunk in wire.chunks(7) {
            stream.write_all(chunk).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        stream
    });

    let mut client = relay.connect().await;
    assert_eq!(next_frame(&mut client).await.as_ref(), first.as_slice());
    assert_eq!(next_frame(&mut client).await.as_ref(), second.as_slice());

    drop(server_task.await.unwrap());
    drop(client);
    relay.stop().await;
}

#[tokio::test]
async fn test_server_close_closes_client() {
    let (server, server_addr) = upstream().await;
    let relay = Relay::start(server_addr, pipeline(Dispatcher::new())).await;

    tokio::spawn(async move {
        let (stream, _) = server.accept().await.unwrap();
        drop(stream);
    });

    let mut client = relay.connect().await;
    let next = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("client was not closed");
    assert!(matches!(next, None | Some(Err(_))));

    relay.stop().await;
}

#[tokio::test]
async fn test_unreachable_upstream_closes_client() {
    let (server, server_addr) = upstream().await;
    drop(server);
    let relay = Relay::start(server_addr, pipeline(Dispatcher::new())).await;

    let mut client = relay.connect().await;
    let next = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("client was not closed");
    assert!(matches!(next, None | Some(Err(_))));

    relay.stop().await;
}
