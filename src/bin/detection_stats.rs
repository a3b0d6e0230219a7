//! detection_stats - summarize the detection log
//!
//! Read-only aggregation over the trailing window of the CSV log.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use door_sentinel::config::StorageSettings;
use door_sentinel::DetectionRecorder;

#[derive(Parser, Debug)]
#[command(name = "detection_stats", about = "Summarize recent detections")]
struct Args {
    /// Detections directory holding the CSV log
    #[arg(long, default_value = "detections")]
    dir: PathBuf,

    /// CSV log filename within the directory
    #[arg(long, default_value = "detection_log.csv")]
    log_file: String,

    /// Trailing window, in hours
    #[arg(long, default_value_t = 24)]
    hours: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let recorder = DetectionRecorder::new(
        &StorageSettings {
            detections_dir: args.dir,
            log_file: args.log_file,
            overlay_font: None,
        },
        "front_door",
    );
    let stats = recorder.stats(args.hours)?;

    println!("detections in the last {}h", args.hours);
    println!("  total:           {}", stats.total);
    println!("  allowed:         {}", stats.allowed);
    println!("  intruders:       {}", stats.intruders);
    println!("  unique persons:  {}", stats.unique_persons);
    println!("  mean confidence: {:.3}", stats.mean_confidence);
    if stats.parse_errors > 0 {
        println!("  unparsable rows: {}", stats.parse_errors);
    }
    Ok(())
}
