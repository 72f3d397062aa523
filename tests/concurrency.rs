#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Many simultaneous pairings through one listener sharing one pipeline

mod common;

use bytes::Bytes;
use common::*;
use futures::{SinkExt, StreamExt};
use packet_relay::config::ListenerConfig;
use packet_relay::core::codec::FrameCodec;
use packet_relay::protocol::dispatcher::Dispatcher;
use packet_relay::transport::relay::RelayListener;
use rand::Rng;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;

/// Upstream that echoes every byte back on the same connection
async fn echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut rx, mut tx) = stream.into_split();
                let _ = tokio::io::copy(&mut rx, &mut tx).await;
            });
        }
    });
    addr
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pairings_keep_per_connection_order() {
    let clients = 16u16;
    let frames_per_client = 64u16;

    let upstream = echo_server().await;
    let config = ListenerConfig::new("login", "127.0.0.1:0", upstream.to_string());
    let listener = RelayListener::bind(&config, pipeline(Dispatcher::new()))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let relay = tokio::spawn(listener.run(shutdown_rx));

    let mut tasks = JoinSet::new();
    for client in 0..clients {
        tasks.spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut conn = Framed::new(stream, FrameCodec);

            let sent: Vec<Bytes> = {
                let mut rng = rand::rng();
                (0..frames_per_client)
                    .map(|i| {
                        let mut payload = vec![0u8; rng.random_range(0..700)];
                        rng.fill(&mut payload[..]);
                        Bytes::from(frame(1000 + client * frames_per_client + i, 0, &payload))
                    })
                    .collect()
            };
            for frame in &sent {
                conn.send(frame.clone()).await.unwrap();
            }

            for expected in &sent {
                let got = tokio::time::timeout(Duration::from_secs(10), conn.next())
                    .await
                    .expect("timed out")
                    .expect("closed")
                    .unwrap();
                assert_eq!(&got, expected);
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    shutdown_tx.send(()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(15), relay)
        .await
        .expect("listener did not stop")
        .unwrap()
        .unwrap();
}
