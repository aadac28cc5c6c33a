//! End-to-end behaviour of the aggregation engine through the public API

use activity_window::{
    create_shared_stats, AggregationEngine, EngineConfig, FieldMapping, IterSource, JsonlReplayer,
    LatestSnapshot, MessageOutcome, ReplayConfig, Snapshot, SnapshotPublisher, StopReason,
    UpsertOutcome,
};
use chrono::{Days, NaiveDate};
use serde_json::json;
use std::sync::atomic::AtomicBool;

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

/// Day `n` counted from the first of January 2024 (day 1 is 2024-01-01).
fn day(n: u64) -> NaiveDate {
    base().checked_add_days(Days::new(n - 1)).unwrap()
}

fn payload(date: NaiveDate, basal: f64, active: f64, high: f64) -> Vec<u8> {
    json!({
        "day": date.format("%Y-%m-%d").to_string(),
        "basal_calories": basal,
        "active_calories": active,
        "activity_buckets": [
            {"intensity": "low", "minutes": 60},
            {"intensity": "high", "minutes": high}
        ]
    })
    .to_string()
    .into_bytes()
}

fn engine(horizon: u32) -> (AggregationEngine, LatestSnapshot) {
    let stats = create_shared_stats();
    let latest = LatestSnapshot::new();
    let publisher = SnapshotPublisher::inline(latest.clone(), stats.clone());
    let engine = AggregationEngine::new(EngineConfig::with_horizon(horizon), publisher, stats)
        .expect("valid config");
    (engine, latest)
}

fn assert_window_invariant(snapshot: &Snapshot, horizon: u32) {
    let latest = match snapshot.latest_date {
        Some(latest) => latest,
        None => {
            assert!(snapshot.is_empty());
            return;
        }
    };
    assert!(snapshot.len() <= horizon as usize);
    for pair in snapshot.points.windows(2) {
        assert!(pair[0].date < pair[1].date, "dates must be strictly ascending");
    }
    for point in &snapshot.points {
        let age = (latest - point.date).num_days();
        assert!(age >= 0 && age < i64::from(horizon), "{} outside horizon", point.date);
    }
}

/// Deterministic pseudo-random sequence so failures are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }
}

#[test]
fn test_invariant_holds_after_every_message() {
    let horizon = 7;
    let (mut engine, latest) = engine(horizon);
    let mut rng = Lcg(42);
    let mut previous_latest = None;

    for _ in 0..300 {
        let date = day(1 + rng.next(60));
        let calories = rng.next(1000) as f64;
        let minutes = rng.next(90) as f64;
        engine.on_message(&payload(date, 1400.0, calories, minutes));

        let snapshot = engine.snapshot();
        assert_window_invariant(&snapshot, horizon);
        assert!(snapshot.latest_date >= previous_latest, "latest date went backwards");
        previous_latest = snapshot.latest_date;

        if let Some(published) = latest.get() {
            assert_window_invariant(&published, horizon);
        }
    }
}

#[test]
fn test_redelivery_is_idempotent() {
    let (mut engine, latest) = engine(15);
    let message = payload(day(3), 1500.0, 300.0, 20.0);

    engine.on_message(&message);
    let first = latest.get().unwrap();

    let outcome = engine.on_message(&message);
    assert!(matches!(
        outcome,
        MessageOutcome::Applied {
            upsert: UpsertOutcome::Unchanged,
            ..
        }
    ));
    let second = latest.get().unwrap();

    assert_eq!(first.points, second.points);
    assert_eq!(second.sequence, first.sequence + 1);
}

#[test]
fn test_last_write_by_arrival_wins() {
    let (mut engine, _) = engine(15);
    engine.on_message(&payload(day(5), 1500.0, 300.0, 20.0));
    engine.on_message(&payload(day(5), 1500.0, 900.0, 45.0));

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.points[0].total_calories, 2400.0);
    assert_eq!(snapshot.points[0].high_activity_minutes, 45.0);
}

#[test]
fn test_arrival_order_does_not_change_final_window() {
    let horizon = 10;
    let days: Vec<u64> = (1..=25).collect();
    let mut shuffled = days.clone();
    let mut rng = Lcg(7);
    for i in (1..shuffled.len()).rev() {
        let j = rng.next(i as u64 + 1) as usize;
        shuffled.swap(i, j);
    }

    let run = |order: &[u64]| {
        let (mut engine, _) = engine(horizon);
        for &n in order {
            engine.on_message(&payload(day(n), 1000.0 + n as f64, 100.0, n as f64));
        }
        engine.snapshot().points
    };

    let in_order = run(&days);
    let out_of_order = run(&shuffled);
    assert_eq!(in_order, out_of_order);
    assert_eq!(in_order.len(), horizon as usize);
    assert_eq!(in_order[0].date, day(16));
}

#[test]
fn test_eviction_boundary_at_default_horizon() {
    let (mut engine, _) = engine(15);
    engine.on_message(&payload(day(1), 1500.0, 300.0, 10.0));
    engine.on_message(&payload(day(2), 1500.0, 300.0, 10.0));

    // Day 16 is fifteen days after day 1
    let outcome = engine.on_message(&payload(day(16), 1500.0, 300.0, 10.0));
    assert!(matches!(outcome, MessageOutcome::Applied { evicted: 1, .. }));

    let dates: Vec<NaiveDate> = engine.snapshot().dates().collect();
    assert_eq!(dates, vec![day(2), day(16)]);

    // Day 1 can no longer re-enter
    let outcome = engine.on_message(&payload(day(1), 1500.0, 300.0, 10.0));
    assert_eq!(outcome, MessageOutcome::Stale { date: day(1) });
    assert_eq!(engine.snapshot().len(), 2);
}

#[test]
fn test_derivation_examples() {
    let (mut engine, latest) = engine(15);
    let message = json!({
        "day": "2024-03-01",
        "basal_calories": 1500,
        "active_calories": 300,
        "activity_buckets": [
            {"intensity": "medium", "minutes": 30},
            {"intensity": "high", "minutes": 20},
            {"intensity": "HIGH", "minutes": 10}
        ]
    })
    .to_string();

    assert!(engine.on_message(message.as_bytes()).is_applied());
    let snapshot = latest.get().unwrap();
    assert_eq!(snapshot.points[0].total_calories, 1800.0);
    assert_eq!(snapshot.points[0].high_activity_minutes, 30.0);
}

#[test]
fn test_no_high_buckets_means_zero_minutes() {
    let (mut engine, _) = engine(15);
    let message = json!({
        "day": "2024-03-02",
        "basal_calories": 1600,
        "active_calories": 0,
        "activity_buckets": [{"intensity": "low", "minutes": 240}]
    })
    .to_string();

    assert!(engine.on_message(message.as_bytes()).is_applied());
    assert_eq!(engine.snapshot().points[0].high_activity_minutes, 0.0);
}

#[test]
fn test_bad_message_between_good_ones_is_isolated() {
    let (mut engine, latest) = engine(15);

    engine.on_message(&payload(day(1), 1500.0, 300.0, 20.0));
    let outcome = engine.on_message(b"{\"day\": \"2024-01-02\", \"basal_calories\": ");
    assert!(matches!(outcome, MessageOutcome::Rejected(_)));
    engine.on_message(&payload(day(2), 1500.0, 500.0, 5.0));

    let snapshot = latest.get().unwrap();
    let dates: Vec<NaiveDate> = snapshot.dates().collect();
    assert_eq!(dates, vec![day(1), day(2)]);

    let stats = engine.stats().snapshot();
    assert_eq!(stats.messages_received, 3);
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.snapshots_published, 2);
}

#[test]
fn test_twenty_days_keep_last_fifteen() {
    let (mut engine, latest) = engine(15);
    let messages: Vec<Vec<u8>> = (1..=20)
        .map(|n| payload(day(n), 1500.0, 10.0 * n as f64, n as f64))
        .collect();

    let running = AtomicBool::new(true);
    let mut source = IterSource::new(messages);
    let summary = engine.run(&mut source, &running, None).unwrap();

    assert_eq!(summary.messages, 20);
    assert_eq!(summary.applied, 20);
    assert_eq!(summary.stop_reason, StopReason::SourceExhausted);

    let snapshot = latest.get().unwrap();
    assert_eq!(snapshot.len(), 15);
    assert_eq!(snapshot.first_date(), Some(day(6)));
    assert_eq!(snapshot.last_date(), Some(day(20)));
    assert_eq!(snapshot.sequence, 20);
    assert_eq!(engine.stats().snapshot().records_evicted, 5);
}

#[test]
fn test_replay_file_through_engine() {
    let dir = std::env::temp_dir().join(format!("activity-window-replay-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("daily_activity.jsonl");

    let mut lines: Vec<String> = (1..=5)
        .map(|n| String::from_utf8(payload(day(n), 1500.0, 250.0, 15.0)).unwrap())
        .collect();
    lines.insert(2, "not a record".to_string());
    lines.push(String::new());
    std::fs::write(&path, lines.join("\n")).unwrap();

    let (mut engine, latest) = engine(3);
    let (mut source, handle) = JsonlReplayer::start(ReplayConfig::new(&path)).unwrap();
    let running = AtomicBool::new(true);
    let summary = engine.run(&mut source, &running, None).unwrap();

    assert_eq!(summary.messages, 6);
    assert_eq!(summary.applied, 5);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.stop_reason, StopReason::SourceExhausted);
    assert_eq!(handle.join().unwrap().messages_sent, 6);

    let dates: Vec<NaiveDate> = latest.get().unwrap().dates().collect();
    assert_eq!(dates, vec![day(3), day(4), day(5)]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_daily_activity_export_record_is_charted() {
    let stats = create_shared_stats();
    let latest = LatestSnapshot::new();
    let publisher = SnapshotPublisher::inline(latest.clone(), stats.clone());
    let config = EngineConfig {
        fields: FieldMapping::default().with_activity_time_fields(),
        ..EngineConfig::default()
    };
    let mut engine = AggregationEngine::new(config, publisher, stats).unwrap();

    let record = json!({
        "score": 81,
        "active_calories": 356,
        "average_met_minutes": 1.53125,
        "contributors": {"meet_daily_targets": 60, "move_every_hour": 95},
        "equivalent_walking_distance": 4659,
        "high_activity_met_minutes": 0,
        "high_activity_time": 600,
        "low_activity_time": 20340,
        "medium_activity_time": 480,
        "sedentary_time": 38820,
        "steps": 6072,
        "target_calories": 550,
        "total_calories": 2978,
        "day": "2022-01-28",
        "timestamp": "2022-01-28T04:00:00-06:00"
    })
    .to_string();

    assert!(engine.on_message(record.as_bytes()).is_applied());
    let snapshot = latest.get().unwrap();
    assert_eq!(snapshot.points[0].date, NaiveDate::from_ymd_opt(2022, 1, 28).unwrap());
    assert_eq!(snapshot.points[0].total_calories, 2978.0);
    assert_eq!(snapshot.points[0].high_activity_minutes, 10.0);
}

#[test]
fn test_replay_survives_non_utf8_line() {
    let dir = std::env::temp_dir().join(format!("activity-window-replay-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("daily_activity.jsonl");

    let mut contents = payload(day(1), 1500.0, 250.0, 15.0);
    contents.extend_from_slice(b"\n{\"day\":\"\xff\xfe\"}\n");
    contents.extend(payload(day(2), 1500.0, 250.0, 15.0));
    contents.push(b'\n');
    contents.extend(payload(day(3), 1500.0, 250.0, 15.0));
    std::fs::write(&path, &contents).unwrap();

    let (mut engine, latest) = engine(15);
    let (mut source, handle) = JsonlReplayer::start(ReplayConfig::new(&path)).unwrap();
    let running = AtomicBool::new(true);
    let summary = engine.run(&mut source, &running, None).unwrap();

    assert_eq!(summary.messages, 4);
    assert_eq!(summary.applied, 3);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.stop_reason, StopReason::SourceExhausted);
    assert!(handle.join().is_ok());
    assert_eq!(engine.stats().snapshot().decode_failures, 1);

    let dates: Vec<NaiveDate> = latest.get().unwrap().dates().collect();
    assert_eq!(dates, vec![day(1), day(2), day(3)]);

    let _ = std::fs::remove_dir_all(&dir);
}
