use std::sync::Mutex;

use tempfile::NamedTempFile;

use door_sentinel::SentinelConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "SENTINEL_BOT_TOKEN",
        "SENTINEL_CHAT_ID",
        "SENTINEL_CHANNEL_ID",
        "SENTINEL_CAMERA_DEVICE",
        "SENTINEL_DATA_DIR",
        "SENTINEL_KNOWN_FACES_DIR",
        "SENTINEL_MIN_ALERT_SECS",
        "SENTINEL_RETENTION_DAYS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    let mut file = NamedTempFile::new().expect("temp config");
    let json = format!(
        r#"{{
            "telegram": {{
                "bot_token": "123:abc",
                "chat_id": "42",
                "channel_id": "@door_feed"
            }},
            "detection": {{
                "confidence_threshold": 0.6,
                "classes": ["person"]
            }},
            "recognition": {{
                "enabled": true,
                "tolerance": 0.5,
                "known_faces_dir": "{faces}"
            }},
            "camera": {{
                "device": "stub://front",
                "width": 640,
                "height": 480,
                "target_fps": 10,
                "camera_id": "porch"
            }},
            "storage": {{
                "detections_dir": "{detections}",
                "log_file": "log.csv"
            }},
            "alerts": {{
                "min_interval_secs": 5,
                "send_image": false,
                "retention_days": 3,
                "startup_notice": false
            }}
        }}"#,
        faces = dir.path().join("faces").display(),
        detections = dir.path().join("detections").display(),
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_CAMERA_DEVICE", "stub://override");
    std::env::set_var("SENTINEL_RETENTION_DAYS", "9");

    let cfg = SentinelConfig::load().expect("load config");

    assert_eq!(cfg.telegram.bot_token, "123:abc");
    assert_eq!(cfg.telegram.chat_id, "42");
    assert_eq!(cfg.telegram.channel_id.as_deref(), Some("@door_feed"));
    assert_eq!(cfg.detection.confidence_threshold, 0.6);
    assert_eq!(cfg.recognition.tolerance, 0.5);
    // Env beats the file for the camera device and retention.
    assert_eq!(cfg.camera.device, "stub://override");
    assert_eq!(cfg.alerts.retention_days, 9);
    assert_eq!(cfg.camera.camera_id, "porch");
    assert_eq!(cfg.alerts.min_interval.as_secs(), 5);
    assert!(!cfg.alerts.send_image);
    assert!(!cfg.alerts.startup_notice);
    assert!(cfg.alerts.error_notices);
    assert_eq!(
        cfg.log_path(),
        dir.path().join("detections").join("log.csv")
    );
    // Validation created both data directories.
    assert!(dir.path().join("detections").is_dir());
    assert!(dir.path().join("faces").is_dir());

    clear_env();
}

#[test]
fn env_only_configuration_is_enough() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    std::env::set_var("SENTINEL_BOT_TOKEN", "999:zzz");
    std::env::set_var("SENTINEL_CHAT_ID", "7");
    std::env::set_var("SENTINEL_DATA_DIR", dir.path().join("data"));
    std::env::set_var("SENTINEL_KNOWN_FACES_DIR", dir.path().join("faces"));
    std::env::set_var("SENTINEL_MIN_ALERT_SECS", "30");

    let cfg = SentinelConfig::load().expect("load config");
    assert_eq!(cfg.telegram.bot_token, "999:zzz");
    assert_eq!(cfg.telegram.chat_id, "7");
    assert!(cfg.telegram.channel_id.is_none());
    assert_eq!(cfg.alerts.min_interval.as_secs(), 30);
    // Defaults survive where nothing overrides them.
    assert_eq!(cfg.camera.device, "/dev/video0");
    assert_eq!(cfg.detection.classes, vec!["person"]);

    clear_env();
}

#[test]
fn missing_credentials_fail_startup() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = SentinelConfig::load().unwrap_err();
    assert!(err.to_string().contains("bot_token"));

    clear_env();
}

#[test]
fn malformed_min_alert_secs_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_BOT_TOKEN", "999:zzz");
    std::env::set_var("SENTINEL_CHAT_ID", "7");
    std::env::set_var("SENTINEL_MIN_ALERT_SECS", "soon");

    let err = SentinelConfig::load().unwrap_err();
    assert!(err.to_string().contains("SENTINEL_MIN_ALERT_SECS"));

    clear_env();
}
