//! Integration tests for the activity-window HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use activity_window::server::{run, ServerConfig};
    use activity_window::EngineConfig;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::time::Duration;

    async fn start(horizon: u32) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let config = ServerConfig::new(0, EngineConfig::with_horizon(horizon));
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        (addr, shutdown_tx)
    }

    fn day(date: &str, basal: f64, active: f64, high: f64) -> serde_json::Value {
        json!({
            "day": date,
            "basal_calories": basal,
            "active_calories": active,
            "activity_buckets": [
                {"intensity": "medium", "minutes": 45},
                {"intensity": "high", "minutes": high}
            ]
        })
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx) = start(15).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_ingest_then_snapshot() {
        let (addr, shutdown_tx) = start(15).await;
        let client = reqwest::Client::new();

        // Nothing published yet
        let response = client
            .get(format!("http://{}/snapshot", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status().as_u16(), 404);

        let response = client
            .post(format!("http://{}/ingest", addr))
            .json(&day("2024-03-01", 1500.0, 300.0, 20.0))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "applied");
        assert_eq!(body["date"], "2024-03-01");
        assert_eq!(body["outcome"], "inserted");
        assert_eq!(body["window_len"], 1);

        let snapshot: serde_json::Value = client
            .get(format!("http://{}/snapshot", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");

        let points = snapshot["points"].as_array().expect("points array");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0]["total_calories"], 1800.0);
        assert_eq!(points[0]["high_activity_minutes"], 20.0);
        assert_eq!(snapshot["sequence"], 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected_and_counted() {
        let (addr, shutdown_tx) = start(15).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/ingest", addr))
            .body("{not json")
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status().as_u16(), 422);
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "DECODE_ERROR");

        let response = client
            .post(format!("http://{}/ingest", addr))
            .json(&json!({"day": "2024-03-01", "basal_calories": 1500}))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status().as_u16(), 422);
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "DERIVATION_ERROR");

        let stats: serde_json::Value = client
            .get(format!("http://{}/stats", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(stats["messages_received"], 2);
        assert_eq!(stats["decode_failures"], 1);
        assert_eq!(stats["derivation_failures"], 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_stale_record_reported() {
        let (addr, shutdown_tx) = start(3).await;
        let client = reqwest::Client::new();

        for payload in [
            day("2024-03-10", 1500.0, 300.0, 10.0),
            day("2024-03-01", 1500.0, 300.0, 10.0),
        ] {
            let response = client
                .post(format!("http://{}/ingest", addr))
                .json(&payload)
                .send()
                .await
                .expect("Failed to send request");
            assert!(response.status().is_success());
            let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
            if body["date"] == "2024-03-01" {
                assert_eq!(body["status"], "stale");
                assert_eq!(body["window_len"], 1);
            }
        }

        let _ = shutdown_tx.send(());
    }
}
