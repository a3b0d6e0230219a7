//! camera_check - verify camera connectivity
//!
//! Opens the device, reports the negotiated format, and captures a handful of
//! frames. Exits zero when every frame arrives, non-zero otherwise.

use anyhow::{anyhow, Result};
use clap::Parser;

use door_sentinel::{CameraConfig, CameraSource};

#[derive(Parser, Debug)]
#[command(name = "camera_check", about = "Verify the camera produces frames")]
struct Args {
    /// Device path, or stub://<name> for the synthetic source
    #[arg(long, default_value = "/dev/video0")]
    device: String,

    /// Requested frame width (the device may clamp it)
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Requested frame height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Requested frame rate
    #[arg(long, default_value_t = 15)]
    fps: u32,

    /// Number of frames to capture
    #[arg(long, default_value_t = 10)]
    frames: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!(
        "opening {} (requested {}x{} @ {}fps)...",
        args.device, args.width, args.height, args.fps
    );
    let mut source = CameraSource::open(CameraConfig {
        device: args.device.clone(),
        width: args.width,
        height: args.height,
        target_fps: args.fps,
    })?;

    let format = source
        .actual_format()
        .ok_or_else(|| anyhow!("camera reported no format"))?;
    println!(
        "camera opened: {}x{} @ {}fps (negotiated)",
        format.width, format.height, format.fps
    );

    let mut captured = 0u32;
    for i in 1..=args.frames {
        match source.next_frame() {
            Ok(frame) => {
                captured += 1;
                println!("frame {}/{}: {}x{}", i, args.frames, frame.width, frame.height);
            }
            Err(e) => println!("frame {}/{}: failed ({e:#})", i, args.frames),
        }
    }
    source.close();

    if captured == args.frames {
        println!("camera test passed ({captured}/{} frames)", args.frames);
        Ok(())
    } else {
        Err(anyhow!(
            "camera test failed ({captured}/{} frames captured)",
            args.frames
        ))
    }
}
