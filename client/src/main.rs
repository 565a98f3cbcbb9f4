use clap::Parser;
use client::network::Client;
use log::{error, info};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to send to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Number of requests to send
    #[arg(short = 'c', long, default_value = "5")]
    count: u32,

    /// Pause between requests in milliseconds
    #[arg(short = 'i', long, default_value = "1000")]
    interval_ms: u64,

    /// How long to wait for each reply in milliseconds
    #[arg(short = 't', long, default_value = "1000")]
    timeout_ms: u64,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Send this text as echo requests instead of pinging
    #[arg(short = 'e', long)]
    echo: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Sending {} requests to {}", args.count, args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let mut client = Client::new(
        &args.server,
        Duration::from_millis(args.timeout_ms),
        args.fake_ping,
    )
    .await?;

    let mut answered = 0;
    for round in 0..args.count {
        if round > 0 {
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }

        match &args.echo {
            Some(text) => match client.echo(text.as_bytes()).await {
                Ok(payload) => {
                    answered += 1;
                    info!("Echo: {}", String::from_utf8_lossy(&payload));
                }
                Err(e) => error!("Echo failed: {}", e),
            },
            None => match client.ping().await {
                Ok(result) => {
                    answered += 1;
                    info!(
                        "Pong {}: {:.2}ms (clock offset {}ms)",
                        result.sequence,
                        result.rtt.as_secs_f64() * 1000.0,
                        result.clock_offset_ms
                    );
                }
                Err(e) => error!("Ping failed: {}", e),
            },
        }
    }

    println!(
        "{} of {} requests to {} answered",
        answered,
        args.count,
        client.server_addr()
    );

    Ok(())
}
