//! End-to-end command flow against a running server.
//!
//! Run with: cargo test --test convoy_flow_test -- --ignored
//! Requires a running convoy server with the demo fleet seeded.

use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;

fn base_url() -> String {
    std::env::var("CONVOY_TEST_URL").unwrap_or_else(|_| "http://localhost:5000".to_string())
}

/// A landslide on the only Ladakh corridor leaves CVY-001 without a path.
#[tokio::test]
#[ignore]
async fn test_landslide_strands_ladakh_convoy() {
    let client = Client::new();
    let base = base_url();

    let resp = client
        .post(format!("{}/events", base))
        .json(&json!({
            "convoyId": "CVY-001",
            "type": "LANDSLIDE",
            "severity": "HIGH",
            "affectedSegmentId": "SEG-SON-ZOJ"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let segment: Value = client
        .get(format!("{}/segments/SEG-SON-ZOJ", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(segment["status"], "BLOCKED");

    let resp = client
        .post(format!("{}/optimizer/route", base))
        .json(&json!({ "convoyId": "CVY-001" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "NO_PATH");
}

/// A second convoy on the Sikkim corridor shows up in the conflict feed.
#[tokio::test]
#[ignore]
async fn test_second_sikkim_convoy_conflicts() {
    let client = Client::new();
    let base = base_url();

    let created: Value = client
        .post(format!("{}/convoys", base))
        .json(&json!({
            "name": "ALPHA-LIFT-02",
            "origin": { "lat": 27.31, "lng": 88.60, "name": "Gangtok" },
            "destination": { "lat": 27.39, "lng": 88.84, "name": "Nathu La" },
            "priority": "ALPHA",
            "speedKmph": 40
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/optimizer/route", base))
        .json(&json!({ "convoyId": id }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    // Give the conflict loop a cycle.
    sleep(Duration::from_millis(500)).await;

    let conflicts: Vec<Value> = client
        .get(format!("{}/conflicts?convoyId={}", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!conflicts.is_empty(), "expected a conflict for {}", id);
    assert!(conflicts[0]["convoyIds"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c == "CVY-002"));
}
