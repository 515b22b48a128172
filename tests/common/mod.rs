//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use k8s_graceful::config::ServiceConfig;
use k8s_graceful::health::{HealthHandler, HealthHandlerOptions};
use k8s_graceful::http::{default_options, HttpServer, ProbeContext};
use k8s_graceful::lifecycle::{Service, ServiceError, ShutdownHooks, SignalBus};
use k8s_graceful::net::DrainingClose;
use tokio::task::JoinHandle;

/// A service serving on a loopback port, with handles to its subsystems.
pub struct TestService {
    pub addr: SocketAddr,
    pub bus: SignalBus,
    pub hooks: ShutdownHooks,
    pub health: HealthHandler<ProbeContext>,
    pub close: DrainingClose<HttpServer>,
    pub task: JoinHandle<Result<(), ServiceError>>,
}

impl TestService {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Wait for `serve` to return.
    pub async fn finished(self) -> Result<(), ServiceError> {
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("service did not stop in time")
            .expect("service task panicked")
    }
}

/// Loopback config with an ephemeral port.
pub fn test_config(grace_ms: u64) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.shutdown.grace_period_ms = grace_ms;
    config
}

pub async fn start_service(config: ServiceConfig) -> TestService {
    start_with_options(config, default_options()).await
}

pub async fn start_with_options(config: ServiceConfig, options: HealthHandlerOptions<ProbeContext>) -> TestService {
    let service = Service::build(config, options).await.unwrap();
    let addr = service.local_addr().unwrap();
    let bus = service.bus().clone();
    let hooks = service.hooks().clone();
    let health = service.health().clone();
    let close = service.close().clone();

    let task = tokio::spawn(service.serve());
    let server = close.server().clone();
    wait_until(move || server.is_accepting()).await;

    TestService {
        addr,
        bus,
        hooks,
        health,
        close,
        task,
    }
}

/// Poll `condition` every 10ms, panicking after 5 seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// GET a URL, returning status and JSON body.
pub async fn get_json(url: &str) -> (u16, serde_json::Value) {
    let res = reqwest::get(url).await.unwrap();
    let status = res.status().as_u16();
    let body = res.json().await.unwrap();
    (status, body)
}
