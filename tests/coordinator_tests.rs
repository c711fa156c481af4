//! Coordinator integration tests
//!
//! Exercise register/unregister/route against the in-memory directory, plus
//! the HTTP surface against a real bound listener.

use presenced::coordinator::{http, Coordinator, RouteSource};
use presenced::directory::{Directory, MemoryDirectory};
use presenced::Error;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn coordinator(directory: Arc<MemoryDirectory>, vnode_count: u32) -> Coordinator {
    Coordinator::new(
        directory,
        vnode_count,
        Duration::from_secs(60),
        Duration::from_secs(60),
    )
}

#[tokio::test]
async fn test_register_assigns_first_fit_by_weight() {
    let directory = Arc::new(MemoryDirectory::new());
    let coordinator = coordinator(directory, 1024);

    // weight 1 → floor(1024 / 100) = 10 vnodes
    let assigned = coordinator.register("A", 1).await.unwrap();
    assert_eq!(assigned, (0..10).collect::<Vec<u32>>());

    // weight 10 → 102 vnodes, continuing after A's block
    let assigned = coordinator.register("B", 10).await.unwrap();
    assert_eq!(assigned.len(), 102);
    assert_eq!(assigned.first(), Some(&10));
    assert_eq!(assigned.last(), Some(&111));
}

#[tokio::test]
async fn test_route_cold_then_hash_then_cache() {
    let directory = Arc::new(MemoryDirectory::new());
    let coordinator = coordinator(directory, 1024);

    coordinator.register("A", 1).await.unwrap(); // vnodes 0..10
    coordinator.register("B", 10).await.unwrap(); // vnodes 10..112

    // md5("u1") → vnode 221, owned by nobody yet
    match coordinator.route("u1").await {
        Err(Error::OwnerNotFound(vnode)) => assert_eq!(vnode, 221),
        other => panic!("expected OwnerNotFound, got {:?}", other.map(|d| d.instance)),
    }

    // C takes the next 307 vnodes (112..419), absorbing 221
    let assigned = coordinator.register("C", 30).await.unwrap();
    assert!(assigned.contains(&221));

    let decision = coordinator.route("u1").await.unwrap();
    assert_eq!(decision.instance, "C");
    assert_eq!(decision.source, RouteSource::Hash);
    assert_eq!(decision.vnode, Some(221));

    // Second lookup within the cache TTL is served from the cache
    let decision = coordinator.route("u1").await.unwrap();
    assert_eq!(decision.instance, "C");
    assert_eq!(decision.source, RouteSource::Cache);
    assert_eq!(decision.vnode, None);
}

#[tokio::test]
async fn test_route_refreshes_stale_local_ring() {
    let directory = Arc::new(MemoryDirectory::new());

    // Ownership written by another coordinator replica: the local ring has
    // never seen it and must refresh from the directory.
    let all: std::collections::HashMap<u32, String> =
        (0..64).map(|v| (v, "remote-node".to_string())).collect();
    directory
        .put_owners(&all, Duration::from_secs(60))
        .await
        .unwrap();

    let coordinator = coordinator(directory, 64);
    let decision = coordinator.route("some-user").await.unwrap();
    assert_eq!(decision.instance, "remote-node");
    assert_eq!(decision.source, RouteSource::Hash);
}

#[tokio::test]
async fn test_ownership_stays_unique_across_churn() {
    let directory = Arc::new(MemoryDirectory::new());
    let coordinator = coordinator(directory.clone(), 256);

    coordinator.register("A", 20).await.unwrap();
    coordinator.register("B", 20).await.unwrap();
    coordinator.unregister("A").await.unwrap();
    coordinator.register("C", 30).await.unwrap();
    coordinator.register("D", 5).await.unwrap();

    // Every vnode has exactly one owner; assignment sets are disjoint by
    // construction of the directory map, so check totals line up.
    let owners = directory.get_owners().await.unwrap();
    let mut by_instance: std::collections::HashMap<&str, HashSet<u32>> = Default::default();
    for (vnode, owner) in &owners {
        assert_ne!(owner.as_str(), "A", "unregistered instance still owns {}", vnode);
        by_instance.entry(owner.as_str()).or_default().insert(*vnode);
    }
    let total: usize = by_instance.values().map(HashSet::len).sum();
    assert_eq!(total, owners.len());
}

#[tokio::test]
async fn test_register_partial_assignment_when_nearly_full() {
    let directory = Arc::new(MemoryDirectory::new());
    let coordinator = coordinator(directory, 8);

    // weight 50 of a ring of 8 → 4 vnodes
    let first = coordinator.register("A", 50).await.unwrap();
    assert_eq!(first, vec![0, 1, 2, 3]);

    // B wants the whole ring but only 4 remain; registration still succeeds
    let second = coordinator.register("B", 100).await.unwrap();
    assert_eq!(second, vec![4, 5, 6, 7]);
}

#[tokio::test]
async fn test_register_conflict_when_ring_full() {
    let directory = Arc::new(MemoryDirectory::new());
    let coordinator = coordinator(directory, 8);

    coordinator.register("A", 100).await.unwrap();
    match coordinator.register("B", 1).await {
        Err(Error::RingFull) => {}
        other => panic!("expected RingFull, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unregister_removes_all_ownership() {
    let directory = Arc::new(MemoryDirectory::new());
    let coordinator = coordinator(directory.clone(), 64);

    coordinator.register("A", 10).await.unwrap();
    let assigned = coordinator.register("B", 10).await.unwrap();

    let removed = coordinator.unregister("B").await.unwrap();
    assert_eq!(removed, assigned);

    let owners = directory.get_owners().await.unwrap();
    assert!(owners.values().all(|owner| owner != "B"));

    match coordinator.unregister("B").await {
        Err(Error::InstanceNotFound(id)) => assert_eq!(id, "B"),
        other => panic!("expected InstanceNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ownership_decays_with_lease_expiry() {
    let directory = Arc::new(MemoryDirectory::new());
    let coordinator = Coordinator::new(
        directory.clone(),
        64,
        Duration::from_millis(30),
        Duration::from_millis(30),
    );

    coordinator.register("A", 100).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    // Lease expired with no heartbeat: the directory has forgotten A and
    // new registrations start from an empty ring.
    assert!(directory.get_owners().await.unwrap().is_empty());
    let assigned = coordinator.register("B", 1).await.unwrap();
    assert_eq!(assigned, vec![0]);
}

// ---------------------------------------------------------------------------
// HTTP surface
// ---------------------------------------------------------------------------

async fn spawn_coordinator_server() -> String {
    let directory = Arc::new(MemoryDirectory::new());
    let coordinator = Arc::new(Coordinator::new(
        directory,
        1024,
        Duration::from_secs(60),
        Duration::from_secs(60),
    ));
    coordinator.warm().await.unwrap();

    let router = http::build_router(coordinator);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_health() {
    let base = spawn_coordinator_server().await;
    let body: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_http_register_route_unregister_flow() {
    let base = spawn_coordinator_server().await;
    let client = reqwest::Client::new();

    // Missing instanceId → 400
    let resp = client
        .post(format!("{}/nodes/register", base))
        .json(&serde_json::json!({ "weight": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Register the whole ring so any user routes to it
    let resp = client
        .post(format!("{}/nodes/register", base))
        .json(&serde_json::json!({ "instanceId": "node-a", "weight": 100 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["instanceId"], "node-a");
    assert_eq!(body["assignedVnodes"].as_array().unwrap().len(), 1024);

    // First route comes from the hash path with the vnode attached
    let body: serde_json::Value = client
        .get(format!("{}/route", base))
        .query(&[("userId", "u1")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["instance"], "node-a");
    assert_eq!(body["source"], "hash");
    assert_eq!(body["vnode"], 221);

    // Second route hits the cache and omits the vnode
    let body: serde_json::Value = client
        .get(format!("{}/route", base))
        .query(&[("userId", "u1")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["source"], "cache");
    assert!(body.get("vnode").is_none());

    // Unregister, then unknown instance → 404
    let resp = client
        .post(format!("{}/nodes/unregister", base))
        .json(&serde_json::json!({ "instanceId": "node-a" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/nodes/unregister", base))
        .json(&serde_json::json!({ "instanceId": "node-a" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("node-a"));
}

#[tokio::test]
async fn test_http_route_misses() {
    let base = spawn_coordinator_server().await;
    let client = reqwest::Client::new();

    // No userId → 400
    let resp = client.get(format!("{}/route", base)).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    // Unowned vnode → 404
    let resp = client
        .get(format!("{}/route", base))
        .query(&[("userId", "nobody-home")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_http_register_conflict() {
    let base = spawn_coordinator_server().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/nodes/register", base))
        .json(&serde_json::json!({ "instanceId": "node-a", "weight": 100 }))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{}/nodes/register", base))
        .json(&serde_json::json!({ "instanceId": "node-b" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_http_unknown_fields_ignored() {
    let base = spawn_coordinator_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/nodes/register", base))
        .json(&serde_json::json!({
            "instanceId": "node-a",
            "weight": 1,
            "datacenter": "us-east-1"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
}
