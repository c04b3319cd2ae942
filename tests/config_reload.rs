//! Route table hot reload.

use axum::http::StatusCode;
use edge_gateway::config::loader::parse_config;

mod common;

#[tokio::test]
async fn test_reload_adds_route_and_service() {
    let orders = common::start_mock_backend("orders").await;
    let search = common::start_mock_backend("search").await;

    let mut config = common::base_config();
    config.services.push(common::service("orders", &[orders]));
    config.routes.push(common::route("orders", "/api/orders", "/"));

    let gateway = common::start_gateway(config.clone()).await;
    let client = common::client();

    let res = client.get(gateway.url("/api/search")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    config.services.push(common::service("search", &[search]));
    config.routes.push(common::route("search", "/api/search", "/"));
    gateway.state.apply_config(&config);

    let res = client.get(gateway.url("/api/search?q=x")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "search");

    let res = client.get(gateway.url("/api/orders")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "orders");
}

#[test]
fn test_sample_config_is_valid() {
    let content = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/config/gateway.toml")).unwrap();
    let config = parse_config(&content, Vec::new()).unwrap();
    assert_eq!(config.services.len(), 3);
    assert_eq!(config.routes.len(), 3);
    assert!(config.services[1].circuit_breaker.is_some());
}
