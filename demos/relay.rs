//! Re-serve an upstream MJPEG camera to any number of local clients
//!
//! Run with: cargo run --example relay <UPSTREAM_URL> [BIND_ADDR]
//!
//! The upstream is read once; frames are forwarded without re-encoding.

use std::net::SocketAddr;
use std::sync::Arc;

use mjpeg_rs::{FrameBroadcaster, FrameDecoder, MjpegServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_rs=info".parse()?)
                .add_directive("relay=debug".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(upstream) = args.get(1).cloned() else {
        eprintln!("Usage: relay <UPSTREAM_URL> [BIND_ADDR]");
        std::process::exit(1);
    };
    let bind_addr: SocketAddr = match args.get(2) {
        Some(addr) => addr.parse()?,
        None => SocketAddr::from(([0, 0, 0, 0], 8081)),
    };

    let broadcaster = Arc::new(FrameBroadcaster::new());
    let server = MjpegServer::new(ServerConfig::with_addr(bind_addr), Arc::clone(&broadcaster));

    let pump = {
        let broadcaster = Arc::clone(&broadcaster);
        tokio::spawn(async move {
            let mut decoder = match FrameDecoder::from_url(&upstream).await {
                Ok(decoder) => decoder,
                Err(e) => {
                    tracing::error!(url = %upstream, error = %e, "Failed to open upstream");
                    let _ = broadcaster.shutdown();
                    return;
                }
            };
            tracing::info!(url = %upstream, "Relaying upstream");

            loop {
                match decoder.next_frame().await {
                    Ok(jpeg) => {
                        if broadcaster.publish(jpeg).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if !e.is_end_of_stream() {
                            tracing::warn!(error = %e, "Upstream failed");
                        }
                        break;
                    }
                }
            }

            // Upstream is gone, end every client's stream
            let _ = broadcaster.shutdown();
        })
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
            }
        }
        _ = pump => {
            println!("Upstream ended");
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
            broadcaster.shutdown()?;
        }
    }

    Ok(())
}
