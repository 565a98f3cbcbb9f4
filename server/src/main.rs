use clap::Parser;
use log::{info, warn};
use server::{echo, Config};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Pool routines processing requests and writing responses
    #[arg(short, long, default_value = "8")]
    routines: usize,

    /// Tasks allowed to queue before reading is held back
    #[arg(short, long, default_value = "1024")]
    queue: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let config = Config::new(addr)
        .with_routines(args.routines)
        .with_queue_capacity(args.queue);

    let (udp, echo) = echo::listener::<String>("echo", config)?;
    udp.start(format!("echo@{}", addr)).await?;
    info!(
        "Serving ping/echo on {} with {} routines",
        addr, args.routines
    );

    tokio::select! {
        reason = udp.closed() => {
            if let Some(reason) = reason {
                warn!("Listener ended: {}", reason);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    udp.stop().await;

    let stats = echo.stats();
    info!(
        "Answered {} pings and {} echoes, rejected {}",
        stats.pings, stats.echoes, stats.rejected
    );

    Ok(())
}
