//! Decode an MJPEG stream from a URL and print each frame's size
//!
//! Run with: cargo run --example decode_url <URL> [MAX_FRAMES]
//!
//! Example:
//!   cargo run --example decode_url http://localhost:8080/ 50

use std::time::Instant;

use mjpeg_rs::FrameDecoder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_rs=debug".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(url) = args.get(1) else {
        eprintln!("Usage: decode_url <URL> [MAX_FRAMES]");
        std::process::exit(1);
    };
    let max_frames: Option<u64> = args.get(2).map(|n| n.parse()).transpose()?;

    let mut decoder = FrameDecoder::from_url(url).await?;
    println!("Connected, boundary={}", decoder.boundary());

    let started = Instant::now();
    loop {
        match decoder.decode().await {
            Ok(image) => {
                println!(
                    "frame {}: {}x{}",
                    decoder.frames_read(),
                    image.width(),
                    image.height()
                );
            }
            Err(e) if e.is_end_of_stream() => {
                println!("Stream ended");
                break;
            }
            Err(e) => {
                eprintln!("Decode error: {}", e);
                break;
            }
        }

        if max_frames.is_some_and(|max| decoder.frames_read() >= max) {
            break;
        }
    }

    let secs = started.elapsed().as_secs_f64();
    if secs > 0.0 {
        println!(
            "{} frames in {:.1}s ({:.1} fps)",
            decoder.frames_read(),
            secs,
            decoder.frames_read() as f64 / secs
        );
    }

    Ok(())
}
