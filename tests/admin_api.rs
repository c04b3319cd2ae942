//! Admin API: auth, registry management, breaker inspection.

use axum::http::StatusCode;
use serde_json::{json, Value};

mod common;

const KEY: &str = "test-admin-key";

fn admin_config() -> edge_gateway::GatewayConfig {
    let mut config = common::base_config();
    config.admin.enabled = true;
    config.admin.api_key = KEY.to_string();
    config
}

#[tokio::test]
async fn test_admin_requires_bearer_key() {
    let gateway = common::start_gateway(admin_config()).await;
    let client = common::client();

    let res = client.get(gateway.url("/admin/status")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(gateway.url("/admin/status"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.post(gateway.url("/metrics/reset")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(gateway.url("/admin/status"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "operational");

    // Public endpoints stay open.
    let res = client.get(gateway.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_register_and_deregister_instance() {
    let backend = common::start_mock_backend("from new instance").await;

    let mut config = admin_config();
    config.services.push(common::service("search", &[]));
    config.routes.push(common::route("search", "/api/search", "/"));

    let gateway = common::start_gateway(config).await;
    let client = common::client();

    let res = client.get(gateway.url("/api/search")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    let res = client
        .post(gateway.url("/admin/services/search/instances"))
        .bearer_auth(KEY)
        .json(&json!({ "host": "127.0.0.1", "port": backend.port() }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["health"], "UNKNOWN");

    let res = client.get(gateway.url("/api/search")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "from new instance");

    let services: Value = client
        .get(gateway.url("/admin/services"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(services[0]["service"], "search");
    assert_eq!(services[0]["instances"].as_array().unwrap().len(), 1);

    let path = format!("/admin/services/search/instances/127.0.0.1/{}", backend.port());
    let res = client.delete(gateway.url(&path)).bearer_auth(KEY).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client.delete(gateway.url(&path)).bearer_auth(KEY).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "INSTANCE_NOT_FOUND");

    let res = client.get(gateway.url("/api/search")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_remove_service() {
    let mut config = admin_config();
    config.services.push(common::service("legacy", &[]));

    let gateway = common::start_gateway(config).await;
    let client = common::client();

    let res = client
        .delete(gateway.url("/admin/services/legacy"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .delete(gateway.url("/admin/services/legacy"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "SERVICE_NOT_FOUND");
}

#[tokio::test]
async fn test_breakers_listing() {
    let dead = common::unused_addr().await;

    let mut config = admin_config();
    config.services.push(common::service("nlu", &[dead]));
    let mut route = common::route("nlu", "/api/nlu", "/");
    route.max_retries = 0;
    config.routes.push(route);
    config.circuit_breaker.failure_threshold = 1;

    let gateway = common::start_gateway(config).await;
    let client = common::client();
    client.get(gateway.url("/api/nlu")).send().await.unwrap();

    let breakers: Value = client
        .get(gateway.url("/admin/breakers"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(breakers[0]["service"], "nlu");
    assert_eq!(breakers[0]["state"], "OPEN");
    assert_eq!(breakers[0]["openedTotal"], 1);
}
