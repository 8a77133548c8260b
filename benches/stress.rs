use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms

async fn connect(host: &str, port: u16, user: &str, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user(user)
        .password("nido");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn insert_slot(
    client: &tokio_postgres::Client,
    caregiver_id: Ulid,
    start: i64,
    capacity: u32,
) -> Ulid {
    let slot_id = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO slots (id, caregiver_id, start, "end", capacity, rate) VALUES ('{slot_id}', '{caregiver_id}', {start}, {}, {capacity}, 2500)"#,
            start + HOUR,
        ))
        .await
        .unwrap();
    slot_id
}

/// Sequential checkout: reserve then book, one parent, fresh slot each time.
async fn phase1_sequential(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    let caregiver_id = Ulid::new();
    let caregiver = connect(host, port, &format!("caregiver_{caregiver_id}"), &db).await;
    let parent = connect(host, port, &format!("parent_{}", Ulid::new()), &db).await;

    let n = 1000;
    let base = now_ms() + HOUR;
    let mut slots = Vec::with_capacity(n);
    for i in 0..n {
        slots.push(insert_slot(&caregiver, caregiver_id, base + (i as i64) * HOUR, 1).await);
    }

    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for slot_id in slots {
        let hold_id = Ulid::new();
        let booking_id = Ulid::new();
        let t = Instant::now();
        parent
            .batch_execute(&format!(
                "INSERT INTO reservations (id, slot_id, children, spots) VALUES ('{hold_id}', '{slot_id}', 1, 1)"
            ))
            .await
            .unwrap();
        parent
            .batch_execute(&format!(
                "INSERT INTO bookings (id, slot_id, children, address, reservation_id) VALUES ('{booking_id}', '{slot_id}', 1, NULL, '{hold_id}')"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} checkouts in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("reserve+book latency", &mut latencies);
}

/// Contended checkout: many parents racing for spots on ONE slot. The
/// per-slot write lock serializes them; this measures what that costs.
async fn phase2_contended(host: &str, port: u16) {
    let db = format!("bench_{}", Ulid::new());
    let caregiver_id = Ulid::new();
    let caregiver = connect(host, port, &format!("caregiver_{caregiver_id}"), &db).await;

    let n_parents = 10;
    let holds_per_parent = 100;
    let slot_id = insert_slot(
        &caregiver,
        caregiver_id,
        now_ms() + HOUR,
        (n_parents * holds_per_parent) as u32,
    )
    .await;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_parents {
        let host = host.to_string();
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &format!("parent_{}", Ulid::new()), &db).await;
            let mut latencies = Vec::with_capacity(holds_per_parent);
            for _ in 0..holds_per_parent {
                let hold_id = Ulid::new();
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "INSERT INTO reservations (id, slot_id, children, spots) VALUES ('{hold_id}', '{slot_id}', 1, 1)"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed();
    let total = n_parents * holds_per_parent;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_parents} parents x {holds_per_parent} reserves on one slot = {total} in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("contended reserve latency", &mut all);
}

/// Availability reads while writers churn holds in their own tenants.
async fn phase3_read_under_load(host: &str, port: u16) {
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let db = format!("bench_{}", Ulid::new());
            let caregiver_id = Ulid::new();
            let caregiver = connect(&host, port, &format!("caregiver_{caregiver_id}"), &db).await;
            let slot_id = insert_slot(&caregiver, caregiver_id, now_ms() + HOUR, 100).await;
            let parent = connect(&host, port, &format!("parent_{}", Ulid::new()), &db).await;

            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let hold_id = Ulid::new();
                let _ = parent
                    .batch_execute(&format!(
                        "INSERT INTO reservations (id, slot_id, children, spots) VALUES ('{hold_id}', '{slot_id}', 1, 1)"
                    ))
                    .await;
                let _ = parent
                    .batch_execute(&format!("DELETE FROM reservations WHERE id = '{hold_id}'"))
                    .await;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let db = format!("bench_{}", Ulid::new());
            let caregiver_id = Ulid::new();
            let caregiver = connect(&host, port, &format!("caregiver_{caregiver_id}"), &db).await;
            let start = now_ms() + HOUR;
            for i in 0..20 {
                insert_slot(&caregiver, caregiver_id, start + (i as i64) * HOUR, 5).await;
            }
            let day = start.div_euclid(86_400_000);

            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                caregiver
                    .batch_execute(&format!(
                        "SELECT * FROM realtime_availability WHERE caregiver_id = '{caregiver_id}' AND day = {day}"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("realtime availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let db = format!("bench_{}", Ulid::new());
            let caregiver_id = Ulid::new();
            let caregiver = connect(&host, port, &format!("caregiver_{caregiver_id}"), &db).await;
            let base = now_ms() + HOUR;
            for i in 0..ops_per_conn {
                insert_slot(&caregiver, caregiver_id, base + (i as i64) * HOUR, 3).await;
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("NIDO_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("NIDO_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid NIDO_PORT");

    println!("=== nido stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own tenant (unique dbname) to avoid interference

    println!("[phase 1] sequential checkout throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended single-slot reserves");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] read latency under hold churn");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
