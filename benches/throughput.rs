use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

fn start_server(port: u16) -> tokio::task::JoinHandle<()> {
    let config = hivepoll::config::Config {
        port,
        ..Default::default()
    };
    let config = Arc::new(RwLock::new(config));
    let store = Arc::new(hivepoll::store::MemoryStore::new());
    let hub = Arc::new(hivepoll::hub::MessageHub::new(store, config.clone()));

    tokio::spawn(async move {
        let _ = hivepoll::server::run_server(hub, config).await;
    })
}

fn get_client(port: u16) -> redis::Connection {
    let client = redis::Client::open(format!("redis://127.0.0.1:{port}/")).unwrap();
    for i in 0..50 {
        match client.get_connection() {
            Ok(conn) => return conn,
            Err(_) if i < 49 => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => panic!("Failed to connect: {e}"),
        }
    }
    unreachable!()
}

type Row = Vec<Option<String>>;

/// Timestamp of an inserted row, usable as a `SINCE` cursor.
fn row_timestamp(row: &Row) -> String {
    row.chunks(2)
        .find(|pair| pair[0].as_deref() == Some("timestamp"))
        .and_then(|pair| pair[1].clone())
        .unwrap()
}

fn bench_insert(conn: &mut redis::Connection, iterations: usize) -> f64 {
    let start = Instant::now();
    for i in 0..iterations {
        let _: Row = redis::cmd("NOTIFICATION.INSERT")
            .arg("bench-dev")
            .arg("temp")
            .arg(format!("{{\"v\":{i}}}"))
            .query(conn)
            .unwrap();
    }
    iterations as f64 / start.elapsed().as_secs_f64()
}

fn bench_poll_backlog(conn: &mut redis::Connection, iterations: usize) -> f64 {
    let start = Instant::now();
    for _ in 0..iterations {
        let _: Vec<Row> = redis::cmd("NOTIFICATION.POLL")
            .arg("bench-dev")
            .arg("SINCE")
            .arg(0)
            .arg("NAMES")
            .arg("door")
            .arg("WAIT")
            .arg(0)
            .query(conn)
            .unwrap();
    }
    iterations as f64 / start.elapsed().as_secs_f64()
}

/// Insert on one connection, wake a blocked poller on another, repeat.
fn bench_wake_round_trip(port: u16, iterations: usize) -> f64 {
    let mut writer = get_client(port);
    let mut poller = get_client(port);
    let row: Row = redis::cmd("NOTIFICATION.INSERT")
        .arg("bench-dev")
        .arg("wake")
        .query(&mut writer)
        .unwrap();
    let mut cursor = row_timestamp(&row);

    let start = Instant::now();
    for _ in 0..iterations {
        let since = cursor.clone();
        let handle = std::thread::spawn(move || {
            let rows: Vec<Row> = redis::cmd("NOTIFICATION.POLL")
                .arg("bench-dev")
                .arg("SINCE")
                .arg(since)
                .arg("NAMES")
                .arg("wake")
                .arg("WAIT")
                .arg(5)
                .query(&mut poller)
                .unwrap();
            (poller, rows)
        });
        let row: Row = redis::cmd("NOTIFICATION.INSERT")
            .arg("bench-dev")
            .arg("wake")
            .query(&mut writer)
            .unwrap();
        cursor = row_timestamp(&row);
        let (returned, rows) = handle.join().unwrap();
        assert!(!rows.is_empty());
        poller = returned;
    }
    iterations as f64 / start.elapsed().as_secs_f64()
}

#[tokio::main]
async fn main() {
    let port = 17500;
    let _server = start_server(port);
    tokio::time::sleep(Duration::from_millis(300)).await;

    tokio::task::spawn_blocking(move || {
        let mut conn = get_client(port);
        let iterations = 10_000;
        let _: i64 = redis::cmd("DEVICE.SAVE")
            .arg("bench-dev")
            .arg("bench")
            .query(&mut conn)
            .unwrap();

        println!("=== hivepoll Benchmark ({iterations} operations) ===\n");

        let insert_ops = bench_insert(&mut conn, iterations);
        println!("INSERT:      {insert_ops:>10.0} ops/sec");

        let poll_ops = bench_poll_backlog(&mut conn, 1_000);
        println!("POLL(scan):  {poll_ops:>10.0} ops/sec ({iterations} row backlog)");

        let wake_ops = bench_wake_round_trip(port, 1_000);
        println!("WAKE:        {wake_ops:>10.0} round trips/sec");

        println!("\n=== Done ===");
    })
    .await
    .unwrap();
}
