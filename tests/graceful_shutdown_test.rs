//! Draining a real HTTP server with requests in flight.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use zerodown::config::ServerConfig;
use zerodown::lifecycle::{Invocation, Orchestrator, ShutdownError, Signal, Signals};
use zerodown::net::ConnectionTracker;
use zerodown::{Error, HttpServer};

fn app() -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route(
            "/short",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                "short"
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "slow"
            }),
        )
}

fn orchestrator(addr: SocketAddr) -> Orchestrator {
    Orchestrator::new(Invocation::new("/bin/true", ["serve"])).bind_address(addr.to_string())
}

#[tokio::test]
async fn idle_server_stops_and_releases_port() {
    let addr: SocketAddr = "127.0.0.1:29101".parse().unwrap();
    let server = HttpServer::new(&ServerConfig::default(), app());
    let (sender, signals) = Signals::channel();
    let run = tokio::spawn(orchestrator(addr).run_with_signals(server, signals));
    common::wait_for_listener(addr).await;

    let body = reqwest::get(format!("http://{addr}/"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");

    sender.send(Signal::Terminate);
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("idle drain finishes promptly")
        .unwrap()
        .unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn in_flight_request_completes_during_drain() {
    let addr: SocketAddr = "127.0.0.1:29102".parse().unwrap();
    let connections = ConnectionTracker::new();
    let server = HttpServer::with_connections(&ServerConfig::default(), app(), connections.clone());
    let (sender, signals) = Signals::channel();
    let run = tokio::spawn(orchestrator(addr).run_with_signals(server, signals));
    common::wait_for_listener(addr).await;
    // The readiness check above leaves a connection counted until hyper sees it close.
    common::wait_until(|| connections.active_count() == 0).await;

    let request = tokio::spawn(reqwest::get(format!("http://{addr}/short")));
    common::wait_until(|| connections.active_count() == 1).await;

    sender.send(Signal::Terminate);

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "short");

    run.await.unwrap().unwrap();
    assert_eq!(connections.active_count(), 0);
}

#[tokio::test]
async fn slow_request_is_cut_off_at_deadline() {
    let addr: SocketAddr = "127.0.0.1:29103".parse().unwrap();
    let connections = ConnectionTracker::new();
    let server = HttpServer::with_connections(&ServerConfig::default(), app(), connections.clone());
    let (sender, signals) = Signals::channel();
    let orchestrator = orchestrator(addr).drain_timeout(Some(Duration::from_secs(1)));
    let run = tokio::spawn(orchestrator.run_with_signals(server, signals));
    common::wait_for_listener(addr).await;
    common::wait_until(|| connections.active_count() == 0).await;

    let request = tokio::spawn(reqwest::get(format!("http://{addr}/slow")));
    common::wait_until(|| connections.active_count() == 1).await;

    let started = std::time::Instant::now();
    sender.send(Signal::Terminate);
    let result = run.await.unwrap();

    assert!(matches!(
        result,
        Err(Error::Shutdown(ShutdownError::DeadlineExceeded(d))) if d == Duration::from_secs(1)
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(request.await.unwrap().is_err());
}

#[tokio::test]
async fn accepted_connection_is_served_when_request_follows_drain() {
    let addr: SocketAddr = "127.0.0.1:29105".parse().unwrap();
    let connections = ConnectionTracker::new();
    let server = HttpServer::with_connections(&ServerConfig::default(), app(), connections.clone());
    let (sender, signals) = Signals::channel();
    let run = tokio::spawn(orchestrator(addr).run_with_signals(server, signals));
    common::wait_for_listener(addr).await;
    common::wait_until(|| connections.active_count() == 0).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    common::wait_until(|| connections.active_count() == 1).await;

    sender.send(Signal::Terminate);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!run.is_finished());

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("ok"));

    run.await.unwrap().unwrap();
    assert_eq!(connections.active_count(), 0);
}

#[tokio::test]
async fn write_timeout_bounds_handlers() {
    let addr: SocketAddr = "127.0.0.1:29104".parse().unwrap();
    let config = ServerConfig {
        write_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let server = HttpServer::new(&config, app());
    let (sender, signals) = Signals::channel();
    let run = tokio::spawn(orchestrator(addr).run_with_signals(server, signals));
    common::wait_for_listener(addr).await;

    let response = reqwest::get(format!("http://{addr}/slow")).await.unwrap();
    assert_eq!(response.status(), 408);
    assert!(response.headers().contains_key("x-request-id"));

    sender.send(Signal::Terminate);
    run.await.unwrap().unwrap();
}
