use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use boardroom::auth::{Admin, Principal, require_admin};
use boardroom::engine::Engine;
use boardroom::model::*;

const HOUR: i64 = 3_600_000; // 1 hour in ms

fn admin() -> Admin {
    require_admin(&Principal::admin("bench")).expect("admin proof")
}

fn open_engine(name: &str) -> Engine {
    let dir = std::env::temp_dir().join("boardroom_bench");
    std::fs::create_dir_all(&dir).expect("bench dir");
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    Engine::new(path).expect("open engine")
}

async fn add_venue(engine: &Engine, name: String) -> VenueId {
    engine
        .create_venue(
            &admin(),
            NewVenue {
                name,
                capacity: 10,
                location: "Bench Tower".into(),
            },
        )
        .await
        .expect("create venue")
}

fn booking(venue_id: VenueId, slot: i64) -> NewBooking {
    NewBooking {
        venue_id,
        title: "Bench".into(),
        description: None,
        start: slot * HOUR,
        end: slot * HOUR + HOUR,
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential() {
    let engine = open_engine("sequential.wal");
    let venue = add_venue(&engine, "Sequential".into()).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        engine
            .create_booking(&admin(), booking(venue, i as i64))
            .await
            .expect("booking");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent() {
    let engine = Arc::new(open_engine("concurrent.wal"));
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let venue = add_venue(&engine, format!("Room {i}")).await;
            for j in 0..n_per_task {
                engine
                    .create_booking(&admin(), booking(venue, j))
                    .await
                    .expect("booking");
            }
        }));
    }
    for h in handles {
        h.await.expect("task");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_series() {
    let engine = open_engine("series.wal");
    let venue = add_venue(&engine, "Series".into()).await;

    let n = 24;
    let per_series: u32 = 200;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        // Each series takes its own hour of the day
        let start = i as i64 * HOUR;
        let req = NewSeries {
            frequency: Frequency::Daily,
            count: Some(per_series),
            ..NewSeries::once(venue, "Daily", start, start + HOUR)
        };
        let t = Instant::now();
        engine.create_series(&admin(), req).await.expect("series");
        latencies.push(t.elapsed());
    }
    println!(
        "  {n} series x {per_series} occurrences, {} bookings stored",
        engine.store().booking_count()
    );
    print_latency("series create latency", &mut latencies);
}

async fn phase4_read_under_load() {
    let engine = Arc::new(open_engine("read_load.wal"));
    let venue = add_venue(&engine, "Shared".into()).await;
    for i in 0..500 {
        engine
            .create_booking(&admin(), booking(venue, i))
            .await
            .expect("prefill");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..5i64 {
        let engine = engine.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let own = add_venue(&engine, format!("Writer {w}")).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine.create_booking(&admin(), booking(own, i)).await;
                i += 1;
            }
        }));
    }

    let mut readers = Vec::new();
    for _ in 0..10 {
        let engine = engine.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(500);
            for _ in 0..500 {
                let t = Instant::now();
                engine.list_bookings(Some(venue), None).await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.expect("reader"));
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("list_bookings", &mut all);
}

#[tokio::main]
async fn main() {
    println!("=== boardroom stress benchmark ===\n");

    println!("[phase 1] sequential write throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent writes across venues");
    phase2_concurrent().await;

    println!("\n[phase 3] recurring series creation");
    phase3_series().await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load().await;

    println!("\n=== done ===");
}
