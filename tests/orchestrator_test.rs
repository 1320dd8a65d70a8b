//! Control loop behaviour against a mock server and injected signals.

mod common;

use std::time::Duration;

use common::MockServer;
use zerodown::lifecycle::{
    Invocation, LifecycleState, Orchestrator, ShutdownError, Signal, Signals, SpawnError, Timeouts,
};
use zerodown::Error;

fn fresh(program: &str) -> Invocation {
    Invocation::new(program, ["serve"])
}

fn orchestrator(program: &str) -> Orchestrator {
    Orchestrator::new(fresh(program)).bind_address("127.0.0.1:0")
}

#[tokio::test]
async fn terminate_drains_and_closes() {
    let server = MockServer::new();
    let (sender, signals) = Signals::channel();
    let orchestrator = orchestrator("/bin/true");
    let state = orchestrator.state();
    assert_eq!(*state.borrow(), LifecycleState::Starting);

    let run = tokio::spawn(orchestrator.run_with_signals(server.clone(), signals));
    let addr = server.serving().await;
    assert_eq!(*state.borrow(), LifecycleState::Running);
    common::wait_for_listener(addr).await;

    assert!(sender.send(Signal::Terminate));
    run.await.unwrap().unwrap();

    assert_eq!(server.drains(), 1);
    assert_eq!(server.terminates(), 0);
    assert_eq!(*state.borrow(), LifecycleState::Terminated);
    // The queue was unsubscribed before draining.
    assert!(!sender.send(Signal::Terminate));
}

#[tokio::test]
async fn interrupt_stops_like_terminate() {
    let server = MockServer::new();
    let (sender, signals) = Signals::channel();
    let run = tokio::spawn(orchestrator("/bin/true").run_with_signals(server.clone(), signals));
    server.serving().await;

    sender.send(Signal::Interrupt);
    run.await.unwrap().unwrap();
    assert_eq!(server.drains(), 1);
}

#[tokio::test]
async fn ignored_signals_keep_serving() {
    let server = MockServer::new();
    let (sender, signals) = Signals::channel();
    let run = tokio::spawn(orchestrator("/bin/true").run_with_signals(server.clone(), signals));
    let addr = server.serving().await;

    sender.send(Signal::Hangup);
    sender.send(Signal::User1);
    sender.send(Signal::Absorbed("SIGQUIT"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!run.is_finished());
    assert_eq!(server.drains(), 0);
    common::wait_for_listener(addr).await;

    sender.send(Signal::Terminate);
    run.await.unwrap().unwrap();
    assert_eq!(server.drains(), 1);
}

#[tokio::test]
async fn serve_failure_ends_run_without_draining() {
    let server = MockServer::failing();
    let (_sender, signals) = Signals::channel();

    let result = orchestrator("/bin/true")
        .run_with_signals(server.clone(), signals)
        .await;

    assert!(matches!(result, Err(Error::Serve(_))));
    assert_eq!(server.drains(), 0);
    assert_eq!(server.terminates(), 0);
}

#[tokio::test]
async fn bind_failure_is_returned_before_serving() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();
    let server = MockServer::new();
    let (_sender, signals) = Signals::channel();

    let result = Orchestrator::new(fresh("/bin/true"))
        .bind_address(addr.to_string())
        .run_with_signals(server.clone(), signals)
        .await;

    assert!(matches!(result, Err(Error::Acquire(_))));
    assert!(server.address().is_none());
    assert_eq!(server.drains(), 0);
}

#[tokio::test]
async fn reload_launches_replacement_then_drains() {
    let server = MockServer::new();
    let (sender, signals) = Signals::channel();
    let run = tokio::spawn(orchestrator("/bin/true").run_with_signals(server.clone(), signals));
    server.serving().await;

    sender.send(Signal::Reload);
    run.await.unwrap().unwrap();

    assert_eq!(server.drains(), 1);
    assert_eq!(server.terminates(), 0);
}

#[tokio::test]
async fn failed_respawn_skips_drain_and_keeps_listener() {
    let server = MockServer::new();
    let (sender, signals) = Signals::channel();
    let run = tokio::spawn(
        orchestrator("/nonexistent/zerodown").run_with_signals(server.clone(), signals),
    );
    let addr = server.serving().await;

    sender.send(Signal::Reload);
    let result = run.await.unwrap();

    assert!(matches!(result, Err(Error::Spawn(SpawnError::Launch { .. }))));
    assert_eq!(server.drains(), 0);
    assert_eq!(server.terminates(), 0);
    // The serve loop was never told to stop.
    common::wait_for_listener(addr).await;
}

#[tokio::test(start_paused = true)]
async fn hanging_drain_is_cut_off_at_derived_deadline() {
    let server = MockServer::hanging(Timeouts::new(
        Duration::from_secs(5),
        Duration::from_secs(5),
    ));
    let (sender, signals) = Signals::channel();
    let run = tokio::spawn(orchestrator("/bin/true").run_with_signals(server.clone(), signals));
    server.serving().await;

    let started = tokio::time::Instant::now();
    sender.send(Signal::Terminate);
    let result = run.await.unwrap();

    match result {
        Err(Error::Shutdown(ShutdownError::DeadlineExceeded(deadline))) => {
            assert_eq!(deadline, Duration::from_secs(10));
        }
        other => panic!("expected deadline error, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(server.drains(), 1);
    assert_eq!(server.terminates(), 1);
}

#[tokio::test]
async fn drain_timeout_override_wins() {
    let server = MockServer::hanging(Timeouts::default());
    let (sender, signals) = Signals::channel();
    let orchestrator = orchestrator("/bin/true").drain_timeout(Some(Duration::from_millis(100)));
    let run = tokio::spawn(orchestrator.run_with_signals(server.clone(), signals));
    server.serving().await;

    sender.send(Signal::Terminate);
    let result = run.await.unwrap();

    assert!(matches!(
        result,
        Err(Error::Shutdown(ShutdownError::DeadlineExceeded(d))) if d == Duration::from_millis(100)
    ));
    assert_eq!(server.terminates(), 1);
}
