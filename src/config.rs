use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_MODEL_PATH: &str = "models/yolov8n.onnx";
const DEFAULT_DETECTION_CLASS: &str = "person";
const DEFAULT_RECOGNITION_TOLERANCE: f32 = 0.6;
const DEFAULT_KNOWN_FACES_DIR: &str = "known_faces";
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_CAMERA_FPS: u32 = 15;
const DEFAULT_CAMERA_ID: &str = "front_door";
const DEFAULT_DETECTIONS_DIR: &str = "detections";
const DEFAULT_LOG_FILE: &str = "detection_log.csv";
const DEFAULT_MIN_ALERT_SECS: u64 = 2;
const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Placeholder credential values shipped in example configs. Startup refuses
/// to run until they are replaced.
const TOKEN_PLACEHOLDER: &str = "YOUR_BOT_TOKEN_HERE";
const CHAT_PLACEHOLDER: &str = "YOUR_CHAT_ID_HERE";

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    telegram: Option<TelegramConfigFile>,
    detection: Option<DetectionConfigFile>,
    recognition: Option<RecognitionConfigFile>,
    camera: Option<CameraConfigFile>,
    storage: Option<StorageConfigFile>,
    alerts: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TelegramConfigFile {
    bot_token: Option<String>,
    chat_id: Option<String>,
    channel_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    model_path: Option<PathBuf>,
    classes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct RecognitionConfigFile {
    enabled: Option<bool>,
    tolerance: Option<f32>,
    known_faces_dir: Option<PathBuf>,
    embedding_model: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    camera_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    detections_dir: Option<PathBuf>,
    log_file: Option<String>,
    overlay_font: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    min_interval_secs: Option<u64>,
    send_image: Option<bool>,
    retention_days: Option<u64>,
    cleanup_old_images: Option<bool>,
    startup_notice: Option<bool>,
    error_notices: Option<bool>,
}

/// Resolved daemon configuration.
///
/// Loaded from an optional JSON file named by `SENTINEL_CONFIG`, then
/// overridden per-field from the environment, then validated.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub telegram: TelegramSettings,
    pub detection: DetectionSettings,
    pub recognition: RecognitionSettings,
    pub camera: CameraSettings,
    pub storage: StorageSettings,
    pub alerts: AlertSettings,
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
    /// Optional broadcast channel. `None` or a placeholder value means unset.
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub confidence_threshold: f32,
    pub model_path: PathBuf,
    /// Class allow-list; detections outside it are discarded.
    pub classes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RecognitionSettings {
    pub enabled: bool,
    pub tolerance: f32,
    pub known_faces_dir: PathBuf,
    /// ONNX face-embedding model (feature: embed-tract); the stub embedder is
    /// used when unset.
    pub embedding_model: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Device path (`/dev/video0`) or `stub://<name>` for the synthetic source.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub camera_id: String,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub detections_dir: PathBuf,
    pub log_file: String,
    /// TTF used for the snapshot overlay; overlay text is skipped when unset
    /// or unloadable.
    pub overlay_font: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub min_interval: Duration,
    pub send_image: bool,
    pub retention_days: u64,
    pub cleanup_old_images: bool,
    pub startup_notice: bool,
    pub error_notices: bool,
}

impl SentinelConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Self {
        let telegram = TelegramSettings {
            bot_token: file
                .telegram
                .as_ref()
                .and_then(|t| t.bot_token.clone())
                .unwrap_or_else(|| TOKEN_PLACEHOLDER.to_string()),
            chat_id: file
                .telegram
                .as_ref()
                .and_then(|t| t.chat_id.clone())
                .unwrap_or_else(|| CHAT_PLACEHOLDER.to_string()),
            channel_id: file.telegram.and_then(|t| t.channel_id),
        };
        let detection = DetectionSettings {
            confidence_threshold: file
                .detection
                .as_ref()
                .and_then(|d| d.confidence_threshold)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            model_path: file
                .detection
                .as_ref()
                .and_then(|d| d.model_path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            classes: file
                .detection
                .and_then(|d| d.classes)
                .unwrap_or_else(|| vec![DEFAULT_DETECTION_CLASS.to_string()]),
        };
        let recognition = RecognitionSettings {
            enabled: file
                .recognition
                .as_ref()
                .and_then(|r| r.enabled)
                .unwrap_or(true),
            tolerance: file
                .recognition
                .as_ref()
                .and_then(|r| r.tolerance)
                .unwrap_or(DEFAULT_RECOGNITION_TOLERANCE),
            known_faces_dir: file
                .recognition
                .as_ref()
                .and_then(|r| r.known_faces_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_KNOWN_FACES_DIR)),
            embedding_model: file.recognition.and_then(|r| r.embedding_model),
        };
        let camera = CameraSettings {
            device: file
                .camera
                .as_ref()
                .and_then(|c| c.device.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            width: file
                .camera
                .as_ref()
                .and_then(|c| c.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|c| c.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
            target_fps: file
                .camera
                .as_ref()
                .and_then(|c| c.target_fps)
                .unwrap_or(DEFAULT_CAMERA_FPS),
            camera_id: file
                .camera
                .and_then(|c| c.camera_id)
                .unwrap_or_else(|| DEFAULT_CAMERA_ID.to_string()),
        };
        let storage = StorageSettings {
            detections_dir: file
                .storage
                .as_ref()
                .and_then(|s| s.detections_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DETECTIONS_DIR)),
            log_file: file
                .storage
                .as_ref()
                .and_then(|s| s.log_file.clone())
                .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
            overlay_font: file.storage.and_then(|s| s.overlay_font),
        };
        let alerts = AlertSettings {
            min_interval: Duration::from_secs(
                file.alerts
                    .as_ref()
                    .and_then(|a| a.min_interval_secs)
                    .unwrap_or(DEFAULT_MIN_ALERT_SECS),
            ),
            send_image: file
                .alerts
                .as_ref()
                .and_then(|a| a.send_image)
                .unwrap_or(true),
            retention_days: file
                .alerts
                .as_ref()
                .and_then(|a| a.retention_days)
                .unwrap_or(DEFAULT_RETENTION_DAYS),
            cleanup_old_images: file
                .alerts
                .as_ref()
                .and_then(|a| a.cleanup_old_images)
                .unwrap_or(true),
            startup_notice: file
                .alerts
                .as_ref()
                .and_then(|a| a.startup_notice)
                .unwrap_or(true),
            error_notices: file
                .alerts
                .and_then(|a| a.error_notices)
                .unwrap_or(true),
        };
        Self {
            telegram,
            detection,
            recognition,
            camera,
            storage,
            alerts,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(token) = std::env::var("SENTINEL_BOT_TOKEN") {
            if !token.trim().is_empty() {
                self.telegram.bot_token = token;
            }
        }
        if let Ok(chat) = std::env::var("SENTINEL_CHAT_ID") {
            if !chat.trim().is_empty() {
                self.telegram.chat_id = chat;
            }
        }
        if let Ok(channel) = std::env::var("SENTINEL_CHANNEL_ID") {
            if !channel.trim().is_empty() {
                self.telegram.channel_id = Some(channel);
            }
        }
        if let Ok(device) = std::env::var("SENTINEL_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(dir) = std::env::var("SENTINEL_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.storage.detections_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("SENTINEL_KNOWN_FACES_DIR") {
            if !dir.trim().is_empty() {
                self.recognition.known_faces_dir = PathBuf::from(dir);
            }
        }
        if let Ok(secs) = std::env::var("SENTINEL_MIN_ALERT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                anyhow!("SENTINEL_MIN_ALERT_SECS must be an integer number of seconds")
            })?;
            self.alerts.min_interval = Duration::from_secs(secs);
        }
        if let Ok(days) = std::env::var("SENTINEL_RETENTION_DAYS") {
            let days: u64 = days
                .parse()
                .map_err(|_| anyhow!("SENTINEL_RETENTION_DAYS must be an integer number of days"))?;
            self.alerts.retention_days = days;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let token = self.telegram.bot_token.trim();
        if token.is_empty() || token == TOKEN_PLACEHOLDER {
            return Err(anyhow!(
                "telegram bot_token not configured (set SENTINEL_BOT_TOKEN or the config file)"
            ));
        }
        let chat = self.telegram.chat_id.trim();
        if chat.is_empty() || chat == CHAT_PLACEHOLDER {
            return Err(anyhow!(
                "telegram chat_id not configured (set SENTINEL_CHAT_ID or the config file)"
            ));
        }
        // A placeholder channel counts as unset rather than a second destination.
        if let Some(channel) = &self.telegram.channel_id {
            if channel.trim().is_empty() || channel == "@your_channel" {
                self.telegram.channel_id = None;
            }
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(anyhow!("detection confidence_threshold must be within 0..=1"));
        }
        if self.detection.classes.is_empty() {
            return Err(anyhow!("detection classes allow-list must not be empty"));
        }
        if self.recognition.tolerance <= 0.0 {
            return Err(anyhow!("recognition tolerance must be positive"));
        }

        if !crate::is_valid_label(&self.camera.camera_id) {
            return Err(anyhow!(
                "camera_id must match [a-z0-9_-]{{1,64}} (got {:?})",
                self.camera.camera_id
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }

        if self.alerts.retention_days == 0 {
            return Err(anyhow!("retention_days must be greater than zero"));
        }

        std::fs::create_dir_all(&self.storage.detections_dir).map_err(|e| {
            anyhow!(
                "cannot create detections dir {}: {}",
                self.storage.detections_dir.display(),
                e
            )
        })?;
        std::fs::create_dir_all(&self.recognition.known_faces_dir).map_err(|e| {
            anyhow!(
                "cannot create known faces dir {}: {}",
                self.recognition.known_faces_dir.display(),
                e
            )
        })?;
        Ok(())
    }

    /// Path of the CSV detection log.
    pub fn log_path(&self) -> PathBuf {
        self.storage.detections_dir.join(&self.storage.log_file)
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg = SentinelConfig::from_file(SentinelConfigFile::default());
        assert_eq!(cfg.detection.confidence_threshold, 0.5);
        assert_eq!(cfg.detection.classes, vec!["person"]);
        assert_eq!(cfg.camera.device, "/dev/video0");
        assert_eq!(cfg.camera.camera_id, "front_door");
        assert_eq!(cfg.alerts.min_interval, Duration::from_secs(2));
        assert_eq!(cfg.alerts.retention_days, 7);
        assert!(cfg.alerts.send_image);
    }

    #[test]
    fn placeholder_token_fails_validation() {
        let mut cfg = SentinelConfig::from_file(SentinelConfigFile::default());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("bot_token"));
    }

    #[test]
    fn placeholder_channel_becomes_unset() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SentinelConfig::from_file(SentinelConfigFile::default());
        cfg.telegram.bot_token = "123:abc".into();
        cfg.telegram.chat_id = "42".into();
        cfg.telegram.channel_id = Some("@your_channel".into());
        cfg.storage.detections_dir = dir.path().join("detections");
        cfg.recognition.known_faces_dir = dir.path().join("known_faces");
        cfg.validate().unwrap();
        assert!(cfg.telegram.channel_id.is_none());
        assert!(cfg.storage.detections_dir.is_dir());
        assert!(cfg.recognition.known_faces_dir.is_dir());
    }

    #[test]
    fn camera_id_must_be_conforming() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SentinelConfig::from_file(SentinelConfigFile::default());
        cfg.telegram.bot_token = "123:abc".into();
        cfg.telegram.chat_id = "42".into();
        cfg.storage.detections_dir = dir.path().to_path_buf();
        cfg.recognition.known_faces_dir = dir.path().to_path_buf();
        cfg.camera.camera_id = "Front Door".into();
        assert!(cfg.validate().is_err());
    }
}
