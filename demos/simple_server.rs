//! Simple MJPEG server example with a synthetic camera
//!
//! Run with: cargo run --example simple_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example simple_server                    # binds to 0.0.0.0:8080
//!   cargo run --example simple_server localhost          # binds to 127.0.0.1:8080
//!   cargo run --example simple_server 127.0.0.1:8081     # binds to 127.0.0.1:8081
//!
//! ## Watching
//!
//! Open http://localhost:8080/ in a browser, or:
//!   ffplay -f mjpeg http://localhost:8080/
//!   cargo run --example decode_url http://localhost:8080/

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use mjpeg_rs::{FrameBroadcaster, MjpegServer, ServerConfig};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const FPS: u64 = 10;

/// Render a frame with a bar that sweeps across the image
fn render_frame(tick: u64) -> Result<Vec<u8>, image::ImageError> {
    let bar = (tick * 8 % WIDTH as u64) as u32;
    let image = RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
        if x >= bar && x < bar + 16 {
            Rgb([255, 255, 255])
        } else {
            Rgb([(x * 255 / WIDTH) as u8, (y * 255 / HEIGHT) as u8, 96])
        }
    });

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 80).encode_image(&image)?;
    Ok(jpeg)
}

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:8080
/// - "127.0.0.1" -> 127.0.0.1:8080
/// - "127.0.0.1:8081" -> 127.0.0.1:8081
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, mjpeg_rs::server::config::DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let config = match args.get(1) {
        Some(addr) => ServerConfig::with_addr(parse_bind_addr(addr)?),
        None => ServerConfig::default(),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_rs=debug".parse()?)
                .add_directive("simple_server=debug".parse()?),
        )
        .init();

    println!("Starting MJPEG server on http://{}/", config.bind_addr);

    let broadcaster = Arc::new(FrameBroadcaster::new());
    let server = MjpegServer::new(config, Arc::clone(&broadcaster));

    // Synthetic camera
    let producer = {
        let broadcaster = Arc::clone(&broadcaster);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(1000 / FPS));
            for tick in 0.. {
                interval.tick().await;
                let jpeg = match render_frame(tick) {
                    Ok(jpeg) => jpeg,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                if broadcaster.publish(jpeg).is_err() {
                    break;
                }
                if tick % (FPS * 5) == 0 {
                    let stats = broadcaster.stats();
                    tracing::debug!(
                        frames = stats.frames_published,
                        subscribers = stats.subscribers,
                        "Producer progress"
                    );
                }
            }
        })
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        println!("\nShutting down...");
    };

    if let Err(e) = server.run_until(shutdown).await {
        eprintln!("Server error: {}", e);
    }

    // Ends every client's stream with the closing boundary
    broadcaster.shutdown()?;
    let _ = producer.await;

    // Give handlers a moment to write their final boundary
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(())
}
