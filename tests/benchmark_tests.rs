//! Performance benchmarks for the work pool and the datagram path

use async_trait::async_trait;
use client::network::Client;
use server::{echo, Config, PoolConfig, RoutineId, Scheduler, Task, WorkPool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Count(Arc<AtomicU64>);

#[async_trait]
impl Task for Count {
    async fn run(self: Box<Self>, _routine: RoutineId) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Benchmarks raw task throughput through the work pool
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn benchmark_pool_throughput() {
    let pool = WorkPool::new("bench", PoolConfig::new(8, 256)).unwrap();
    let counter = Arc::new(AtomicU64::new(0));

    let iterations = 20_000;
    let start = Instant::now();

    for _ in 0..iterations {
        pool.submit(Box::new(Count(Arc::clone(&counter))))
            .await
            .unwrap();
    }
    pool.shutdown().await;

    let duration = start.elapsed();
    println!(
        "Pool throughput: {} tasks in {:?} ({:.2} μs/task)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(counter.load(Ordering::Relaxed), iterations);
    assert_eq!(pool.stats().executed, iterations);
    // Should complete in under 5 seconds
    assert!(duration.as_secs() < 5);
}

/// Benchmarks sequential echo round trips over loopback
#[tokio::test]
async fn benchmark_echo_latency() {
    let (udp, stats) = echo::listener::<String>("bench", Config::default()).unwrap();
    udp.start("bench".to_string()).await.unwrap();
    let addr = udp.addr().unwrap();

    let client = Client::new(&addr.to_string(), Duration::from_secs(2), 0)
        .await
        .unwrap();
    let payload = vec![0xAB; 512];

    let iterations = 500;
    let start = Instant::now();

    for _ in 0..iterations {
        let reply = client.echo(&payload).await.unwrap();
        assert_eq!(reply.len(), payload.len());
    }

    let duration = start.elapsed();
    println!(
        "Echo round trip: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(stats.stats().echoes, iterations);
    // Loopback round trips should average well under 10ms
    assert!(duration.as_millis() < 5000);

    udp.stop().await;
}

/// Benchmarks ping throughput with several clients in parallel
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn benchmark_parallel_pings() {
    let config = Config::default().with_routines(4);
    let (udp, stats) = echo::listener::<String>("bench", config).unwrap();
    udp.start("bench".to_string()).await.unwrap();
    let addr = udp.addr().unwrap().to_string();

    let clients = 16;
    let pings_per_client = 50;
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..clients {
        let addr = addr.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::new(&addr, Duration::from_secs(2), 0).await.unwrap();
            let mut worst = Duration::ZERO;
            for _ in 0..pings_per_client {
                let result = client.ping().await.unwrap();
                worst = worst.max(result.rtt);
            }
            worst
        }));
    }

    let mut worst = Duration::ZERO;
    for handle in handles {
        worst = worst.max(handle.await.unwrap());
    }

    let duration = start.elapsed();
    let total = clients * pings_per_client;
    println!(
        "Parallel pings: {} pings from {} clients in {:?}, worst rtt {:?}",
        total, clients, duration, worst
    );

    assert_eq!(stats.stats().pings, total as u64);
    // Should complete in under 5 seconds
    assert!(duration.as_secs() < 5);

    udp.stop().await;
}
