//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Json, Router,
};
use edge_gateway::config::{GatewayConfig, PathRewrite, RouteConfig, ServiceConfig};
use edge_gateway::http::AppState;
use edge_gateway::{GatewayServer, Shutdown};
use serde_json::json;
use tokio::net::TcpListener;

/// Serve `router` on an ephemeral local port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Start a simple mock backend that returns a fixed 200 response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    serve(Router::new().fallback(move || async move { response })).await
}

/// Start a programmable mock backend. `f` receives the 1-based call number.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, Arc<AtomicU32>)
where
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let calls = Arc::new(AtomicU32::new(0));
    let f = Arc::new(f);
    let counter = calls.clone();
    let router = Router::new().fallback(move || {
        let f = f.clone();
        let counter = counter.clone();
        async move {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let (status, body) = f(call).await;
            (StatusCode::from_u16(status).unwrap(), body).into_response()
        }
    });
    (serve(router).await, calls)
}

/// Backend that echoes the path, query and headers it received as JSON.
pub async fn start_echo_backend() -> SocketAddr {
    let router = Router::new().fallback(|request: Request<Body>| async move {
        let headers: BTreeMap<String, String> = request
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let response: Response = Json(json!({
            "method": request.method().as_str(),
            "path": request.uri().path(),
            "query": request.uri().query(),
            "headers": headers,
        }))
        .into_response();
        response
    });
    serve(router).await
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn service(name: &str, instances: &[SocketAddr]) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        instances: instances.iter().map(ToString::to_string).collect(),
        ..Default::default()
    }
}

pub fn route(service: &str, prefix: &str, replacement: &str) -> RouteConfig {
    RouteConfig {
        name: service.to_string(),
        service: service.to_string(),
        path_rewrite: vec![PathRewrite {
            prefix: prefix.to_string(),
            replacement: replacement.to_string(),
        }],
        retry_delay_ms: 10,
        ..Default::default()
    }
}

/// Config with active probing off so tests drive health explicitly.
pub fn base_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.health_check.enabled = false;
    config.health_check.readiness_timeout_ms = 500;
    config.health_check.passive_failure_threshold = 100;
    config
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: AppState,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = GatewayServer::new(&config, shutdown.clone());
    let state = server.state().clone();
    tokio::spawn(async move {
        let _ = server.run(listener, None).await;
    });
    TestGateway {
        addr,
        state,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
