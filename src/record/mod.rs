//! Detection records: annotated snapshots, the CSV audit log, retention, and
//! rolling statistics.
//!
//! Every detection gets a CSV row regardless of alert rate limiting. Snapshot
//! writing is best-effort: a failed write costs the alert its photo, nothing
//! else. Retention is a periodic sweep over the snapshot directory keyed on
//! file modification time.

mod overlay;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::config::StorageSettings;
use crate::frame::RgbFrame;
use crate::PersonClass;

use overlay::OverlayRenderer;

const CSV_HEADER: &str = "timestamp,person_type,person_name,confidence,camera";
const SNAPSHOT_PREFIX: &str = "detection_";
const SNAPSHOT_EXT: &str = "jpg";

/// Aggregates over the trailing stats window.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionStats {
    pub total: u64,
    pub allowed: u64,
    pub intruders: u64,
    pub unique_persons: u64,
    pub mean_confidence: f32,
    /// Rows skipped because their timestamp or confidence did not parse.
    pub parse_errors: u64,
}

/// Owns the snapshot directory and the CSV log.
pub struct DetectionRecorder {
    detections_dir: PathBuf,
    log_path: PathBuf,
    camera_id: String,
    overlay: OverlayRenderer,
}

impl DetectionRecorder {
    pub fn new(storage: &StorageSettings, camera_id: &str) -> Self {
        Self {
            detections_dir: storage.detections_dir.clone(),
            log_path: storage.detections_dir.join(&storage.log_file),
            camera_id: camera_id.to_string(),
            overlay: OverlayRenderer::load(storage.overlay_font.as_deref()),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Write an annotated snapshot and return its path.
    ///
    /// The overlay is two lines: identity + confidence, and a human-readable
    /// timestamp. Returns `None` on any failure; the caller proceeds without
    /// an image.
    pub fn record_image(
        &self,
        frame: &RgbFrame,
        confidence: f32,
        label: &str,
    ) -> Option<PathBuf> {
        let now = Local::now();
        let filename = format!(
            "{}{}_{}.{}",
            SNAPSHOT_PREFIX,
            crate::sanitize_label(label),
            now.format("%Y%m%d_%H%M%S_%3f"),
            SNAPSHOT_EXT,
        );
        let path = self.detections_dir.join(filename);

        let mut image = frame.to_image();
        self.overlay.annotate(
            &mut image,
            &format!("{} ({:.0}%)", label, confidence * 100.0),
            &now.format("%Y-%m-%d %H:%M:%S").to_string(),
        );

        match image.save(&path) {
            Ok(()) => {
                log::debug!("snapshot saved: {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("snapshot write failed for {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Append one CSV row; the header is written iff the file is new.
    pub fn append_log(
        &self,
        timestamp: DateTime<Local>,
        class: PersonClass,
        label: &str,
        confidence: f32,
    ) -> Result<()> {
        use std::io::Write;

        let existed = self.log_path.exists();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("open detection log {}", self.log_path.display()))?;
        if !existed {
            writeln!(file, "{}", CSV_HEADER)?;
        }
        writeln!(
            file,
            "{},{},{},{:.3},{}",
            timestamp.to_rfc3339(),
            class,
            label,
            confidence,
            self.camera_id,
        )?;
        Ok(())
    }

    /// Delete snapshots whose modification time is strictly older than
    /// `now - days`. Returns the number removed.
    pub fn purge_older_than(&self, days: u64) -> Result<usize> {
        let cutoff = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
        let mut removed = 0usize;

        let entries = std::fs::read_dir(&self.detections_dir)
            .with_context(|| format!("read snapshot dir {}", self.detections_dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if !is_snapshot(&path) {
                continue;
            }
            let modified = match path.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    log::warn!("cannot stat {}: {}", path.display(), e);
                    continue;
                }
            };
            if modified < cutoff {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => log::warn!("cannot remove {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            log::info!("purged {} old snapshots", removed);
        }
        Ok(removed)
    }

    /// Scan the log for rows within the trailing window.
    ///
    /// Rows that fail to parse are skipped and counted, not fatal.
    pub fn stats(&self, window_hours: u64) -> Result<DetectionStats> {
        let mut stats = DetectionStats::default();
        if !self.log_path.exists() {
            return Ok(stats);
        }

        let cutoff = Local::now() - chrono::Duration::hours(window_hours as i64);
        let raw = std::fs::read_to_string(&self.log_path)
            .with_context(|| format!("read detection log {}", self.log_path.display()))?;

        let mut unique = std::collections::HashSet::new();
        let mut confidence_sum = 0.0f64;
        for line in raw.lines() {
            if line.is_empty() || line == CSV_HEADER {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != 5 {
                stats.parse_errors += 1;
                continue;
            }
            let timestamp = match DateTime::parse_from_rfc3339(fields[0]) {
                Ok(ts) => ts,
                Err(_) => {
                    stats.parse_errors += 1;
                    continue;
                }
            };
            let confidence: f32 = match fields[3].parse() {
                Ok(c) => c,
                Err(_) => {
                    stats.parse_errors += 1;
                    continue;
                }
            };
            if timestamp < cutoff {
                continue;
            }

            stats.total += 1;
            if fields[1] == PersonClass::Allowed.as_str() {
                stats.allowed += 1;
            } else {
                stats.intruders += 1;
            }
            unique.insert(fields[2].to_string());
            confidence_sum += confidence as f64;
        }

        stats.unique_persons = unique.len() as u64;
        if stats.total > 0 {
            stats.mean_confidence = (confidence_sum / stats.total as f64) as f32;
        }
        Ok(stats)
    }
}

fn is_snapshot(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with(SNAPSHOT_PREFIX)
        && path.extension().and_then(|e| e.to_str()) == Some(SNAPSHOT_EXT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder_in(dir: &Path) -> DetectionRecorder {
        DetectionRecorder::new(
            &StorageSettings {
                detections_dir: dir.to_path_buf(),
                log_file: "detection_log.csv".to_string(),
                overlay_font: None,
            },
            "front_door",
        )
    }

    fn test_frame() -> RgbFrame {
        RgbFrame::new(vec![40u8; 64 * 48 * 3], 64, 48)
    }

    #[test]
    fn append_log_writes_header_once_and_rows_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recorder = recorder_in(dir.path());

        let now = Local::now();
        recorder.append_log(now, PersonClass::Intruder, "unknown", 0.91)?;
        recorder.append_log(now, PersonClass::Allowed, "alice", 0.72)?;
        recorder.append_log(now, PersonClass::Allowed, "bob", 0.5)?;

        let raw = std::fs::read_to_string(recorder.log_path())?;
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].contains("INTRUDER,unknown,0.910,front_door"));
        assert!(lines[2].contains("ALLOWED,alice,0.720,front_door"));
        assert!(lines[3].contains("ALLOWED,bob,0.500,front_door"));
        Ok(())
    }

    #[test]
    fn record_image_writes_deterministically_named_jpeg() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recorder = recorder_in(dir.path());

        let path = recorder.record_image(&test_frame(), 0.87, "alice").unwrap();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("detection_alice_"));
        assert!(name.ends_with(".jpg"));
        // detection_alice_YYYYMMDD_HHMMSS_mmm.jpg
        let stamp = name
            .trim_start_matches("detection_alice_")
            .trim_end_matches(".jpg");
        assert_eq!(stamp.len(), "YYYYMMDD_HHMMSS_mmm".len());
        Ok(())
    }

    #[test]
    fn record_image_failure_yields_none() {
        let recorder = recorder_in(Path::new("/nonexistent/detections"));
        assert!(recorder.record_image(&test_frame(), 0.5, "alice").is_none());
    }

    #[test]
    fn purge_removes_only_stale_snapshots() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recorder = recorder_in(dir.path());

        let snap = recorder.record_image(&test_frame(), 0.9, "alice").unwrap();
        let unrelated = dir.path().join("notes.jpg");
        std::fs::write(&unrelated, b"not a snapshot")?;
        recorder.append_log(Local::now(), PersonClass::Allowed, "alice", 0.9)?;

        // Nothing is older than a day.
        assert_eq!(recorder.purge_older_than(1)?, 0);
        assert!(snap.exists());

        // With a zero-day window everything already written is stale.
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(recorder.purge_older_than(0)?, 1);
        assert!(!snap.exists());
        assert!(unrelated.exists());
        assert!(recorder.log_path().exists());
        Ok(())
    }

    #[test]
    fn stats_respect_window_and_count_parse_errors() -> Result<()> {
        use std::io::Write;

        let dir = tempfile::tempdir()?;
        let recorder = recorder_in(dir.path());

        let now = Local::now();
        recorder.append_log(now, PersonClass::Allowed, "alice", 0.8)?;
        recorder.append_log(now, PersonClass::Allowed, "alice", 0.6)?;
        recorder.append_log(now, PersonClass::Intruder, "unknown", 0.7)?;
        // Outside a 24h window.
        recorder.append_log(
            now - chrono::Duration::hours(48),
            PersonClass::Intruder,
            "unknown",
            0.99,
        )?;
        // Corrupt row.
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(recorder.log_path())?;
        writeln!(file, "not-a-timestamp,INTRUDER,unknown,0.5,front_door")?;

        let stats = recorder.stats(24)?;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.allowed, 2);
        assert_eq!(stats.intruders, 1);
        assert_eq!(stats.unique_persons, 2);
        assert_eq!(stats.parse_errors, 1);
        assert!((stats.mean_confidence - 0.7).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn stats_on_missing_log_are_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let recorder = recorder_in(dir.path());
        assert_eq!(recorder.stats(24)?, DetectionStats::default());
        Ok(())
    }
}
