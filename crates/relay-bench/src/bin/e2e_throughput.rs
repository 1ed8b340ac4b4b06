//! End-to-end throughput benchmark for Payrelay.
//!
//! Connects N clients to one channel over real WebSockets; every client sends
//! payments as fast as it can and counts the payments relayed to it.
//!
//! ```bash
//! cargo run --release -p payrelay-server &
//! cargo run --release -p payrelay-bench --bin e2e_throughput -- 16
//! ```

use futures_util::{SinkExt, StreamExt};
use payrelay_bench::sample_payment;
use payrelay_protocol::{codec, Frame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const CHANNEL: u64 = 1;
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    disconnected: AtomicU64,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("Payrelay end-to-end throughput benchmark");
    println!("Make sure the server is running on {}", SERVER_URL);
    println!();

    run_relay_benchmark(num_clients).await;
}

async fn run_relay_benchmark(num_clients: usize) {
    println!("{} clients on channel {}", num_clients, CHANNEL);
    println!("Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);

    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(num_clients + 1));
    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let counters = Arc::clone(&counters);
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(client_id, counters, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    barrier.wait().await;
    println!("All {} clients connected", num_clients);

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    counters.received.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = counters.received.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Clients:        {:>12}", num_clients);
    println!("Duration:       {:>12.2}s", elapsed.as_secs_f64());
    println!("Delivered:      {:>12}", total);
    println!("Throughput:     {:>12.0} msg/s", per_sec);
    println!("Per client:     {:>12.0} msg/s", per_sec / num_clients as f64);
    println!(
        "Evicted:        {:>12}",
        counters.disconnected.load(Ordering::SeqCst)
    );

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    counters: Arc<Counters>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(SERVER_URL).await?;
    let (mut sender, mut receiver) = ws.split();

    let register = serde_json::to_string(&Frame::register(CHANNEL)?)?;
    sender.send(Message::Text(register)).await?;

    barrier.wait().await;

    let event = sample_payment(CHANNEL, client_id as u64);
    let payment = Message::Text(serde_json::to_string(&Frame::payment(&event)?)?);

    let recv_counters = Arc::clone(&counters);
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if codec::decode_payment(text.as_bytes()).is_ok() {
                        recv_counters.received.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        // The server closes clients that fall behind.
        recv_counters.disconnected.fetch_add(1, Ordering::Relaxed);
    });

    loop {
        if sender.send(payment.clone()).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
