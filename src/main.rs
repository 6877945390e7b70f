use std::env;

use livecast::signaling::{DEFAULT_SIGNALING_PORT, SignalingServer};
use tracing::info;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let bind_addr = env::args()
        .nth(1)
        .or_else(|| env::var("SIGNALING_ADDR").ok())
        .unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_SIGNALING_PORT));

    println!("   Livecast Signaling Hub");
    println!("   Binding to {}", bind_addr);
    println!("   Press Ctrl+C to stop\n");

    let server = SignalingServer::new();

    tokio::select! {
        res = server.run(&bind_addr) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down signaling hub");
            Ok(())
        }
    }
}
