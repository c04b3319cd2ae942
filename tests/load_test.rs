//! Load testing for the gateway.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use edge_gateway::config::LoadBalancingPolicy;

mod common;

#[tokio::test]
async fn test_round_robin_distribution() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;

    let mut config = common::base_config();
    config.services.push(common::service("web", &[a, b]));
    config.routes.push(common::route("web", "/", "/"));

    let gateway = common::start_gateway(config).await;
    let client = common::client();

    let mut seen: HashMap<String, usize> = HashMap::new();
    for _ in 0..20 {
        let body = client.get(gateway.url("/")).send().await.unwrap().text().await.unwrap();
        *seen.entry(body).or_default() += 1;
    }
    assert_eq!(seen.get("a"), Some(&10));
    assert_eq!(seen.get("b"), Some(&10));
}

#[tokio::test]
async fn test_load_performance() {
    let a = common::start_mock_backend("Hello from backend").await;
    let b = common::start_mock_backend("Hello from backend").await;

    let mut config = common::base_config();
    let mut web = common::service("web", &[a, b]);
    web.load_balancing = LoadBalancingPolicy::LeastConnections;
    config.services.push(web);
    config.routes.push(common::route("web", "/", "/"));

    let gateway = common::start_gateway(config).await;

    let concurrency = 20;
    let requests_per_task = 50;
    let total_requests = concurrency * requests_per_task;

    let client = common::client();
    let start = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let client = client.clone();
        let url = gateway.url("/load");
        tasks.push(tokio::spawn(async move {
            let mut latencies: Vec<Duration> = Vec::new();
            for _ in 0..requests_per_task {
                let req_start = Instant::now();
                if let Ok(res) = client.get(&url).send().await {
                    if res.status().is_success() {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();

    assert_eq!(all_latencies.len(), total_requests, "every request should succeed");

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p95 = all_latencies[(all_latencies.len() as f64 * 0.95) as usize];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", rps);
    println!("P50 Latency:    {:?}", p50);
    println!("P95 Latency:    {:?}", p95);
    println!("P99 Latency:    {:?}", p99);
    println!("-------------------------\n");

    let snapshot = gateway.state.metrics.snapshot();
    assert_eq!(snapshot.total_requests, total_requests as u64);
    assert_eq!(snapshot.total_errors, 0);
}
