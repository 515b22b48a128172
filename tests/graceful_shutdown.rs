mod common;

use std::sync::Arc;
use std::time::Duration;

use k8s_graceful::config::TlsConfig;
use k8s_graceful::health::{HealthHandlerOptions, HealthTest, ProbeCallback};
use k8s_graceful::http::{default_options, HttpServer, ProbeContext, ServerState};
use k8s_graceful::lifecycle::{Signal, SignalBus, CLOSE_SERVER_HOOK};
use k8s_graceful::net::{CloseError, Listener, Server};
use k8s_graceful::HealthHandler;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use common::{get_json, start_service, start_with_options, test_config, wait_until};

const PARTIAL_REQUEST: &[u8] = b"GET /health HTTP/1.1\r\nHost: localhost\r\nX-Slow-Client: ";

/// Read until EOF or reset; panics if the peer keeps the socket open.
async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 1024];
    let read = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(read.is_ok(), "connection was not closed");
}

#[tokio::test]
async fn probe_flips_to_unavailable_on_terminate() {
    let service = start_service(test_config(500)).await;

    let (status, body) = get_json(&service.url("/health")).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    assert_eq!(service.bus.emit(Signal::Terminate), 2);
    assert!(service.health.is_terminating());

    let (status, body) = get_json(&service.url("/health")).await;
    assert_eq!(status, 503);
    assert_eq!(body["status"], "unavailable");

    // The close hook fires after the grace period and ends the service.
    service.finished().await.unwrap();
}

#[tokio::test]
async fn interrupt_also_flips_the_probe() {
    let service = start_service(test_config(300)).await;

    service.bus.emit(Signal::Interrupt);
    let (status, _) = get_json(&service.url("/health")).await;
    assert_eq!(status, 503);

    service.finished().await.unwrap();
}

#[tokio::test]
async fn grace_period_keeps_serving_before_close() {
    let service = start_service(test_config(300)).await;
    service.bus.emit(Signal::Terminate);

    // Still accepting during the grace period, just reporting unavailable.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(service.close.server().is_accepting());
    let (status, _) = get_json(&service.url("/health")).await;
    assert_eq!(status, 503);

    let server = service.close.server().clone();
    service.finished().await.unwrap();
    assert_eq!(server.state(), ServerState::Closed);
}

#[tokio::test]
async fn draining_close_terminates_live_connections() {
    let service = start_service(test_config(60_000)).await;

    // One client stuck mid-request, one idle keep-alive client.
    let mut slow = TcpStream::connect(service.addr).await.unwrap();
    slow.write_all(PARTIAL_REQUEST).await.unwrap();

    let mut idle = TcpStream::connect(service.addr).await.unwrap();
    idle.write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
    let mut buf = [0u8; 1024];
    let n = idle.read(&mut buf).await.unwrap();
    assert!(buf[..n].starts_with(b"HTTP/1.1 200"));

    let close = service.close.clone();
    wait_until(move || close.live_connections() == 2).await;

    tokio::time::timeout(Duration::from_secs(5), service.close.close_and_wait())
        .await
        .expect("close did not complete")
        .unwrap();

    expect_closed(&mut slow).await;
    expect_closed(&mut idle).await;
    assert_eq!(service.close.live_connections(), 0);

    // Closing again reports the native not-running error.
    assert_eq!(service.close.close_and_wait().await, Err(CloseError::NotRunning));

    service.finished().await.unwrap();
}

#[tokio::test]
async fn terminate_closes_connections_through_hook() {
    let service = start_service(test_config(100)).await;
    assert!(service.hooks.is_registered(CLOSE_SERVER_HOOK));

    let mut slow = TcpStream::connect(service.addr).await.unwrap();
    slow.write_all(PARTIAL_REQUEST).await.unwrap();
    let close = service.close.clone();
    wait_until(move || close.live_connections() == 1).await;

    service.bus.emit(Signal::Terminate);

    expect_closed(&mut slow).await;
    service.finished().await.unwrap();
}

#[tokio::test]
async fn deregistered_close_hook_leaves_server_running() {
    let service = start_service(test_config(50)).await;
    service.hooks.deregister(CLOSE_SERVER_HOOK);

    service.bus.emit(Signal::Terminate);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(service.close.server().is_accepting());
    let (status, _) = get_json(&service.url("/health")).await;
    assert_eq!(status, 503);

    service.close.close_and_wait().await.unwrap();
    service.finished().await.unwrap();
}

#[tokio::test]
async fn custom_health_test_drives_the_probe() {
    let options = default_options().with_test(HealthTest::from_fn(|| Err::<bool, _>("database unreachable")));
    let service = start_with_options(test_config(60_000), options).await;

    let (status, body) = get_json(&service.url("/health")).await;
    assert_eq!(status, 503);
    assert_eq!(body["status"], "unavailable");

    service.close.close_and_wait().await.unwrap();
    service.finished().await.unwrap();
}

#[tokio::test]
async fn probe_path_is_configurable() {
    let mut config = test_config(60_000);
    config.health.path = "/healthz".into();
    let service = start_service(config).await;

    let (status, _) = get_json(&service.url("/healthz")).await;
    assert_eq!(status, 200);

    let res = reqwest::get(service.url("/")).await.unwrap();
    assert_eq!(res.status().as_u16(), 200);

    service.close.close_and_wait().await.unwrap();
    service.finished().await.unwrap();
}

#[tokio::test]
async fn request_id_is_propagated() {
    let service = start_service(test_config(60_000)).await;

    let res = reqwest::Client::new()
        .get(service.url("/health"))
        .header("x-request-id", "probe-42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "probe-42");

    service.close.close_and_wait().await.unwrap();
    service.finished().await.unwrap();
}

#[tokio::test]
async fn native_close_waits_for_open_connections() {
    let health = HealthHandler::new(default_options(), &SignalBus::default());
    let router = HttpServer::build_router(&Default::default(), health);
    let server = Arc::new(HttpServer::new(router));
    let listener = Listener::from_tcp(tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap(), 16).unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(server.clone().serve(listener));

    let s = server.clone();
    wait_until(move || s.is_accepting()).await;

    let mut slow = TcpStream::connect(addr).await.unwrap();
    slow.write_all(PARTIAL_REQUEST).await.unwrap();
    let s = server.clone();
    wait_until(move || s.active_connections() == 1).await;

    Server::close(server.as_ref(), None);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.state(), ServerState::Closing);

    drop(slow);
    tokio::time::timeout(Duration::from_secs(5), server.closed())
        .await
        .expect("server did not close after the client left");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn custom_callbacks_control_the_response() {
    let options = HealthHandlerOptions::new(
        ProbeCallback::from_fn(|ctx: ProbeContext| {
            ctx.respond(axum::http::StatusCode::NO_CONTENT, serde_json::json!(null))
        }),
        ProbeCallback::from_fn(|ctx: ProbeContext| {
            ctx.respond(axum::http::StatusCode::IM_A_TEAPOT, serde_json::json!(null))
        }),
    );
    let service = start_with_options(test_config(300), options).await;

    let res = reqwest::get(service.url("/health")).await.unwrap();
    assert_eq!(res.status().as_u16(), 204);

    service.bus.emit(Signal::Terminate);
    let res = reqwest::get(service.url("/health")).await.unwrap();
    assert_eq!(res.status().as_u16(), 418);

    service.finished().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_completes_while_clients_keep_connecting() {
    for round in 0..10 {
        let service = start_service(test_config(60_000)).await;
        let stop = CancellationToken::new();

        let clients: Vec<_> = (0..4)
            .map(|_| {
                let addr = service.addr;
                let stop = stop.clone();
                tokio::spawn(async move {
                    let mut open = Vec::new();
                    while !stop.is_cancelled() {
                        if let Ok(mut stream) = TcpStream::connect(addr).await {
                            let _ = stream.write_all(PARTIAL_REQUEST).await;
                            open.push(stream);
                        }
                        tokio::time::sleep(Duration::from_millis(2)).await;
                    }
                    open
                })
            })
            .collect();

        let close = service.close.clone();
        wait_until(move || close.live_connections() > 0).await;

        let closed = tokio::time::timeout(Duration::from_secs(5), service.close.close_and_wait()).await;
        stop.cancel();
        for client in clients {
            drop(client.await.unwrap());
        }

        assert!(matches!(closed, Ok(Ok(()))), "round {round}: close did not complete");
        service.finished().await.unwrap();
    }
}

#[tokio::test]
async fn secure_connections_are_tracked_after_handshake() {
    let fixtures = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");
    let mut config = test_config(60_000);
    config.listener.tls = Some(TlsConfig {
        cert_path: format!("{fixtures}/localhost.crt"),
        key_path: format!("{fixtures}/localhost.key"),
    });
    let service = start_service(config).await;
    let server = service.close.server().clone();
    assert!(server.is_secure());

    // Transport open, handshake never started.
    let mut pending = TcpStream::connect(service.addr).await.unwrap();
    let s = server.clone();
    wait_until(move || s.active_connections() == 1).await;
    assert_eq!(service.close.live_connections(), 0);

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap();
    let res = client
        .get(format!("https://{}/health", service.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    res.text().await.unwrap();

    let close = service.close.clone();
    wait_until(move || close.live_connections() == 1).await;
    assert_eq!(server.active_connections(), 2);

    tokio::time::timeout(Duration::from_secs(5), service.close.close_and_wait())
        .await
        .expect("close did not complete")
        .unwrap();

    expect_closed(&mut pending).await;
    assert_eq!(service.close.live_connections(), 0);
    assert_eq!(server.active_connections(), 0);
    service.finished().await.unwrap();
}
