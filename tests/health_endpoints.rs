//! Gateway health, readiness and metrics endpoints.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use edge_gateway::{GatewayServer, Shutdown};
use serde_json::Value;
use tower::ServiceExt;

mod common;

#[tokio::test]
async fn test_health_and_gateway_headers() {
    let mut config = common::base_config();
    config.gateway.name = "edge-test".into();

    let gateway = common::start_gateway(config).await;
    let res = common::client().get(gateway.url("/health")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-gateway-service"], "edge-test");
    assert!(res.headers().contains_key("x-request-id"));
    assert!(res.headers()["x-response-time"].to_str().unwrap().ends_with("ms"));

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "edge-test");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let gateway = common::start_gateway(common::base_config()).await;
    let res = common::client()
        .get(gateway.url("/health/live"))
        .header("x-request-id", "req-123")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-request-id"], "req-123");
}

#[tokio::test]
async fn test_health_reports_shutting_down() {
    let shutdown = Shutdown::new();
    let server = GatewayServer::new(&common::base_config(), shutdown.clone());
    shutdown.trigger();

    let res = server
        .router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Liveness does not care.
    let res = server
        .router()
        .oneshot(Request::get("/health/live").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_readiness_follows_critical_services() {
    let up = common::start_mock_backend("ok").await;
    let down = common::unused_addr().await;

    let mut config = common::base_config();
    let mut core = common::service("banking", &[up]);
    core.critical = true;
    config.services.push(core);
    // Non-critical and unreachable: does not affect readiness.
    config.services.push(common::service("analytics", &[down]));

    let gateway = common::start_gateway(config).await;
    let res = common::client().get(gateway.url("/health/ready")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["ready"], true);

    let mut config = common::base_config();
    let mut core = common::service("banking", &[down]);
    core.critical = true;
    config.services.push(core);

    let gateway = common::start_gateway(config).await;
    let res = common::client().get(gateway.url("/health/ready")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["ready"], false);
}

#[tokio::test]
async fn test_service_health_aggregation() {
    let up = common::start_mock_backend("ok").await;
    let down = common::unused_addr().await;

    let mut config = common::base_config();
    config.services.push(common::service("banking", &[up]));
    config.services.push(common::service("nlu", &[down]));

    let gateway = common::start_gateway(config).await;
    let res = common::client()
        .get(gateway.url("/health/services"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
    let services = body["services"].as_array().unwrap();
    assert_eq!(services.len(), 2);

    let banking = services.iter().find(|s| s["service"] == "banking").unwrap();
    assert_eq!(banking["status"], "healthy");
    assert_eq!(banking["breaker"], "CLOSED");
    assert!(banking.get("error").is_none());

    let nlu = services.iter().find(|s| s["service"] == "nlu").unwrap();
    assert_eq!(nlu["status"], "unhealthy");
    assert!(nlu["error"].is_string());
}

#[tokio::test]
async fn test_degraded_service_keeps_health_ok() {
    let up = common::start_mock_backend("ok").await;
    let down = common::unused_addr().await;

    let mut config = common::base_config();
    config.services.push(common::service("nlu", &[up, down]));

    let gateway = common::start_gateway(config).await;
    let res = common::client()
        .get(gateway.url("/health/services"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["services"][0]["status"], "degraded");
}

#[tokio::test]
async fn test_metrics_record_and_reset() {
    let (backend, _) = common::start_programmable_backend(|call| async move {
        if call == 1 {
            (200, "ok".into())
        } else {
            (404, "missing".into())
        }
    })
    .await;

    let mut config = common::base_config();
    config.services.push(common::service("orders", &[backend]));
    config.routes.push(common::route("orders", "/api/orders", "/"));

    let gateway = common::start_gateway(config).await;
    let client = common::client();
    client.get(gateway.url("/api/orders/1")).send().await.unwrap();
    client.get(gateway.url("/api/orders/2")).send().await.unwrap();

    let body: Value = client
        .get(gateway.url("/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["totalRequests"], 2);
    let orders = &body["services"][0];
    assert_eq!(orders["service"], "orders");
    assert_eq!(orders["byStatus"]["2xx"]["count"], 1);
    assert_eq!(orders["byStatus"]["4xx"]["count"], 1);
    assert!(body["breakers"].is_array());

    let text = client
        .get(gateway.url("/metrics/prometheus"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.lines().any(|line| line.starts_with("gateway_requests_total{")
        && line.contains("service=\"orders\"")
        && line.contains("status_class=\"2xx\"")
        && line.ends_with(" 1")));
    assert!(text
        .lines()
        .any(|line| line.starts_with("gateway_circuit_state{") && line.contains("service=\"orders\"")));

    let res = client.post(gateway.url("/metrics/reset")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = client
        .get(gateway.url("/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["totalRequests"], 0);
}

#[tokio::test]
async fn test_forwarded_request_shape() {
    let backend = common::start_echo_backend().await;

    let mut config = common::base_config();
    config.gateway.name = "edge-test".into();
    config.identity.trust_headers = true;
    config.services.push(common::service("banking", &[backend]));
    config.routes.push(common::route("banking", "/api/banking", "/api"));

    let gateway = common::start_gateway(config).await;
    let res = common::client()
        .get(gateway.url("/api/banking/accounts?limit=5"))
        .header("x-request-id", "req-echo")
        .header("x-session-id", "sess-1")
        .header("x-user-id", "u-7")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["path"], "/api/accounts");
    assert_eq!(body["query"], "limit=5");
    let headers = &body["headers"];
    assert_eq!(headers["x-request-id"], "req-echo");
    assert_eq!(headers["x-gateway-service"], "edge-test");
    assert_eq!(headers["x-target-service"], "banking");
    assert_eq!(headers["x-session-id"], "sess-1");
    assert_eq!(headers["x-user-id"], "u-7");
    assert!(headers["x-forwarded-for"].as_str().unwrap().contains("127.0.0.1"));
}

#[tokio::test]
async fn test_untrusted_identity_headers_are_dropped() {
    let backend = common::start_echo_backend().await;

    let mut config = common::base_config();
    config.services.push(common::service("banking", &[backend]));
    config.routes.push(common::route("banking", "/api/banking", "/api"));

    let gateway = common::start_gateway(config).await;
    let body: Value = common::client()
        .get(gateway.url("/api/banking/accounts"))
        .header("x-user-id", "spoofed")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(body["headers"].get("x-user-id").is_none());
}
