//! End-to-end transfers driving a real `Client` against a real `Server` over
//! loopback UDP, with a minimal local HTTP origin standing in for whatever
//! resource the server's `fetch_and_chunk` collaborator is pointed at.
//!
//! Covers single- and multi-chunk transfers, independent sessions sharing a
//! session id from different addresses, and transfers over a lossy channel
//! (dropped and corrupted datagrams) via the `TEST_MODE` fault injector.

use std::net::SocketAddr;
use std::time::Duration;

use dns_tunnel::client::Client;
use dns_tunnel::config::TunnelConfig;
use dns_tunnel::server::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve `body` over plain HTTP/1.0 for exactly one request, on an
/// OS-assigned port, returning that port. Good enough for `reqwest::get` —
/// no routing, no persistent connections needed.
async fn serve_once(body: &'static [u8]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        let response = format!(
            "HTTP/1.0 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.write_all(body).await;
        let _ = socket.shutdown().await;
    });
    port
}

async fn spawn_server(idle_timeout_secs: u64) -> SocketAddr {
    let config = TunnelConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        idle_timeout_secs,
    };
    let server = Server::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

async fn run_client(server_addr: SocketAddr, filename: &str) -> (Vec<u8>, dns_tunnel::TransferStats) {
    let client = Client::connect(
        server_addr,
        "127.0.0.1:0".parse().unwrap(),
        dns_tunnel::client::generate_session_id(),
        10,
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    client.run(filename).await.unwrap()
}

#[tokio::test]
async fn s1_one_chunk_resource_round_trips() {
    let port = serve_once(b"hi").await;
    let server_addr = spawn_server(300).await;

    let (data, stats) = run_client(server_addr, &format!("127.0.0.1:{port}/file")).await;
    assert_eq!(data, b"hi");
    assert_eq!(stats.duplicate_count, 0);
}

#[tokio::test]
async fn s2_two_chunk_resource_round_trips() {
    let body: Vec<u8> = vec![b'A'; 151];
    let body: &'static [u8] = Box::leak(body.into_boxed_slice());
    let port = serve_once(body).await;
    let server_addr = spawn_server(300).await;

    let (data, stats) = run_client(server_addr, &format!("127.0.0.1:{port}/file")).await;
    assert_eq!(data, body);
    assert_eq!(stats.duplicate_count, 0);
}

#[tokio::test]
async fn s6_session_id_collision_keeps_independent_records() {
    let port_a = serve_once(b"alpha-response").await;
    let port_b = serve_once(b"beta-response-longer").await;
    let server_addr = spawn_server(300).await;

    let session_id = dns_tunnel::client::generate_session_id();

    let client_a = Client::connect(
        server_addr,
        "127.0.0.1:0".parse().unwrap(),
        session_id.clone(),
        10,
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    let client_b = Client::connect(
        server_addr,
        "127.0.0.1:0".parse().unwrap(),
        session_id,
        10,
        Duration::from_secs(2),
    )
    .await
    .unwrap();

    let (data_a, data_b) = tokio::join!(
        client_a.run(&format!("127.0.0.1:{port_a}/file")),
        client_b.run(&format!("127.0.0.1:{port_b}/file")),
    );

    assert_eq!(data_a.unwrap().0, b"alpha-response");
    assert_eq!(data_b.unwrap().0, b"beta-response-longer");
}

#[tokio::test]
async fn property_6_alternating_bit_survives_lossy_channel() {
    use dns_tunnel::fault::FaultInjector;

    let body: Vec<u8> = (0u8..=255).cycle().take(450).collect();
    let body: &'static [u8] = Box::leak(body.into_boxed_slice());
    let port = serve_once(body).await;
    let server_addr = spawn_server(300).await;

    let mut client = Client::connect(
        server_addr,
        "127.0.0.1:0".parse().unwrap(),
        dns_tunnel::client::generate_session_id(),
        50,
        Duration::from_millis(500),
    )
    .await
    .unwrap();
    client.set_fault_injector(FaultInjector::new(true, 0.2, 0.2));

    let (data, _stats) = client.run(&format!("127.0.0.1:{port}/file")).await.unwrap();
    assert_eq!(data, body);
}
