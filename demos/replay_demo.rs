//! Demonstration of the rolling activity window.
//!
//! This example shows how to:
//! 1. Feed an engine from a channel the way a broker consumer would
//! 2. Survive redelivered, reordered and malformed messages
//! 3. Render every published snapshot as a console chart
//!
//! Run with: cargo run --example replay_demo

use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use activity_window::{
    create_shared_stats,
    source::{channel_source, Message},
    AggregationEngine, ConsoleChartSink, EngineConfig, SnapshotPublisher,
};
use chrono::{Days, NaiveDate};
use serde_json::json;

fn record(date: NaiveDate, active: u32, high_minutes: u32) -> Vec<u8> {
    json!({
        "day": date.format("%Y-%m-%d").to_string(),
        "basal_calories": 1650,
        "active_calories": active,
        "activity_buckets": [
            {"intensity": "low", "minutes": 180},
            {"intensity": "medium", "minutes": 40},
            {"intensity": "high", "minutes": high_minutes}
        ]
    })
    .to_string()
    .into_bytes()
}

fn main() {
    println!("Activity Window - Replay Demo");
    println!("=============================");
    println!();

    let stats = create_shared_stats();
    let publisher = SnapshotPublisher::inline(ConsoleChartSink::stdout(), stats.clone());
    let mut engine = match AggregationEngine::new(EngineConfig::with_horizon(7), publisher, stats) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error creating engine: {e}");
            return;
        }
    };

    let (sender, mut source) = channel_source(16);
    let Some(start) = NaiveDate::from_ymd_opt(2022, 1, 1) else {
        return;
    };

    let producer = thread::spawn(move || {
        let mut offset = 0u64;
        let mut send = |payload: Vec<u8>| {
            let sent = sender.send(Message::new(offset, payload));
            offset += 1;
            thread::sleep(Duration::from_millis(150));
            sent
        };

        for n in 0..10u64 {
            let Some(date) = start.checked_add_days(Days::new(n)) else {
                return;
            };
            let active = 200 + (n as u32 * 73) % 600;
            let high = (n as u32 * 7) % 45;
            if !send(record(date, active, high)) {
                return;
            }

            // A redelivery, a late arrival and a corrupt payload along the way
            if n == 3 {
                send(record(date, active, high));
            }
            if n == 6 {
                if let Some(late) = start.checked_add_days(Days::new(1)) {
                    send(record(late, 950, 30));
                }
            }
            if n == 8 {
                send(b"{\"day\": \"2022-01-09\", \"basal_calories\"".to_vec());
            }
        }
    });

    let running = AtomicBool::new(true);
    match engine.run(&mut source, &running, None) {
        Ok(summary) => {
            println!();
            println!(
                "Done: {} messages, {} applied, {} stale, {} rejected",
                summary.messages, summary.applied, summary.stale, summary.rejected
            );
        }
        Err(e) => eprintln!("Source failed: {e}"),
    }

    let _ = producer.join();
    println!();
    println!("{}", engine.stats().summary());
}
