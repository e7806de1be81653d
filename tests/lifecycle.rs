//! Plain-listener lifecycle: start, serve, drain, stop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use notes_server::lifecycle::StartupError;
use notes_server::{LifecycleError, LifecycleOrchestrator, LifecycleState};

mod common;
use common::{TestApp, SLOW_REQUEST, STUCK_REQUEST};

#[tokio::test]
async fn test_tls_disabled_lifecycle() {
    let (dir, config) = common::test_config();
    let plain = config.listener.http_address.clone();
    let app = Arc::new(TestApp::default());

    let orchestrator = LifecycleOrchestrator::new(config, app.clone());
    let mut state = orchestrator.state();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(orchestrator.run_until(async move {
        let _ = stop_rx.await;
    }));

    common::wait_for_state(&mut state, LifecycleState::Running).await;

    let client = common::client();
    let response = client
        .get(format!("http://{plain}/me"))
        .header("referer", "https://notes.example.com/")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "me");

    // Nothing TLS related was set up.
    assert!(!dir.path().join("cache").exists());

    stop_tx.send(()).unwrap();
    run.await.unwrap().unwrap();

    assert_eq!(*state.borrow(), LifecycleState::Stopped);
    assert!(app.closed());
    assert!(tokio::net::TcpStream::connect(&plain).await.is_err());

    let files = common::access_log_files(&dir.path().join("log"));
    assert_eq!(files.len(), 1);
    let log = std::fs::read_to_string(&files[0]).unwrap();
    let fields: Vec<&str> = log.trim_end().split(',').collect();
    assert_eq!(fields.len(), 8);
    assert_eq!(fields[1], "/me");
    assert_eq!(fields[2], "127.0.0.1");
    assert_eq!(fields[3], "https://notes.example.com/");
    assert_eq!(fields[4], "200");
    assert_eq!(fields[5], "2");
    assert_eq!(fields[6], "7");
}

#[tokio::test]
async fn test_maintenance_runs_on_start() {
    let (_dir, config) = common::test_config();
    let app = Arc::new(TestApp::default());

    let orchestrator = LifecycleOrchestrator::new(config, app.clone());
    let mut state = orchestrator.state();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(orchestrator.run_until(async move {
        let _ = stop_rx.await;
    }));
    common::wait_for_state(&mut state, LifecycleState::Running).await;

    for _ in 0..50 {
        if app.maintenance_runs() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(app.maintenance_runs(), 1);

    stop_tx.send(()).unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_in_flight_request_drains() {
    let (_dir, config) = common::test_config();
    let plain = config.listener.http_address.clone();
    let app = Arc::new(TestApp::default());

    let orchestrator = LifecycleOrchestrator::new(config, app.clone());
    let mut state = orchestrator.state();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(orchestrator.run_until(async move {
        let _ = stop_rx.await;
    }));
    common::wait_for_state(&mut state, LifecycleState::Running).await;

    let slow = tokio::spawn({
        let url = format!("http://{plain}/slow");
        async move { common::client().get(url).send().await }
    });
    tokio::time::sleep(SLOW_REQUEST / 5).await;

    let started = tokio::time::Instant::now();
    stop_tx.send(()).unwrap();
    common::wait_for_state(&mut state, LifecycleState::Draining).await;

    let response = slow.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "slow");

    run.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(app.closed());
    assert!(tokio::net::TcpStream::connect(&plain).await.is_err());
}

#[tokio::test]
async fn test_requests_past_deadline_are_cut_off() {
    let (_dir, mut config) = common::test_config();
    config.listener.shutdown_timeout_secs = 1;
    let plain = config.listener.http_address.clone();
    let app = Arc::new(TestApp::default());

    let orchestrator = LifecycleOrchestrator::new(config, app.clone());
    let mut state = orchestrator.state();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(orchestrator.run_until(async move {
        let _ = stop_rx.await;
    }));
    common::wait_for_state(&mut state, LifecycleState::Running).await;

    let stuck = tokio::spawn({
        let url = format!("http://{plain}/stuck");
        async move { common::client().get(url).send().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = tokio::time::Instant::now();
    stop_tx.send(()).unwrap();
    run.await.unwrap().unwrap();
    let stopped_after = started.elapsed();
    assert!(stopped_after >= Duration::from_millis(900), "{stopped_after:?}");
    assert!(stopped_after < Duration::from_millis(2500), "{stopped_after:?}");

    // The connection was closed under the client, well before the handler
    // would have answered or the client would have timed out.
    let response = stuck.await.unwrap();
    assert!(response.is_err());
    assert!(started.elapsed() < STUCK_REQUEST / 4);

    assert!(app.closed());
    assert_eq!(*state.borrow(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_missing_data_dir_is_fatal() {
    let (dir, mut config) = common::test_config();
    config.storage.data_dir = dir.path().join("does-not-exist");
    let app = Arc::new(TestApp::default());

    let err = LifecycleOrchestrator::new(config, app.clone())
        .run_until(std::future::pending())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Startup(StartupError::MissingDirectory(_))
    ));
    assert!(!app.closed());
    assert_eq!(app.maintenance_runs(), 0);
}

#[tokio::test]
async fn test_port_in_use_is_fatal() {
    let (_dir, mut config) = common::test_config();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    config.listener.http_address = taken.local_addr().unwrap().to_string();

    let err = LifecycleOrchestrator::new(config, Arc::new(TestApp::default()))
        .run_until(std::future::pending())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Listener(_)));
}
