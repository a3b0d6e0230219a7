//! Alert dispatch.
//!
//! The dispatcher formats detection alerts and pushes them through a
//! `ChatTransport` to the primary chat and an optional broadcast channel.
//! Nothing in here returns an error to the pipeline: a transport failure is a
//! lost notification, logged and dropped (no retry, no queue).
//!
//! Rate limiting is per identity label: an alert is suppressed unless the
//! minimum interval has elapsed since the last *attempt* for that label.
//! Suppression never touches the table; an attempt updates it whether or not
//! the transport delivered. Check-and-mark happens under one lock, so
//! dispatch could be offloaded to a task without changing this code.

mod telegram;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Local;

use crate::config::{AlertSettings, TelegramSettings};
use crate::PersonClass;

pub use telegram::TelegramTransport;

/// Chat transport trait: the wire mechanics of one destination kind.
///
/// Both operations may fail with a transport error; the dispatcher catches
/// every failure at its own boundary.
pub trait ChatTransport: Send + Sync {
    /// Transport identifier.
    fn name(&self) -> &'static str;

    fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;

    fn send_photo(&self, chat_id: &str, photo: &Path, caption: &str) -> Result<()>;
}

impl<T: ChatTransport + ?Sized> ChatTransport for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        (**self).send_text(chat_id, text)
    }

    fn send_photo(&self, chat_id: &str, photo: &Path, caption: &str) -> Result<()> {
        (**self).send_photo(chat_id, photo, caption)
    }
}

/// Alert dispatcher with per-identity rate limiting.
pub struct AlertDispatcher {
    transport: Box<dyn ChatTransport>,
    chat_id: String,
    channel_id: Option<String>,
    send_image: bool,
    min_interval: Duration,
    startup_notice_enabled: bool,
    error_notices_enabled: bool,
    last_alert: Mutex<HashMap<String, Instant>>,
}

impl AlertDispatcher {
    pub fn new(
        transport: Box<dyn ChatTransport>,
        telegram: &TelegramSettings,
        alerts: &AlertSettings,
    ) -> Self {
        Self {
            transport,
            chat_id: telegram.chat_id.clone(),
            channel_id: telegram.channel_id.clone(),
            send_image: alerts.send_image,
            min_interval: alerts.min_interval,
            startup_notice_enabled: alerts.startup_notice,
            error_notices_enabled: alerts.error_notices,
            last_alert: Mutex::new(HashMap::new()),
        }
    }

    /// Send a detection alert, rate-limit permitting. Never fails.
    pub fn notify(
        &self,
        class: PersonClass,
        confidence: f32,
        label: &str,
        image_path: Option<&Path>,
    ) {
        self.notify_at(class, confidence, label, image_path, Instant::now());
    }

    /// As `notify`, with the clock injected so tests can replay timelines.
    pub fn notify_at(
        &self,
        class: PersonClass,
        confidence: f32,
        label: &str,
        image_path: Option<&Path>,
        now: Instant,
    ) {
        // Check and mark under one lock: once we decide to attempt, the
        // attempt time is recorded, delivered or not.
        {
            let mut table = lock_table(&self.last_alert);
            if let Some(&last) = table.get(label) {
                if now.duration_since(last) < self.min_interval {
                    log::debug!("rate limited alert for {}", label);
                    return;
                }
            }
            table.insert(label.to_string(), now);
        }

        let text = alert_text(class, confidence, label);
        self.deliver(&self.chat_id, &text, image_path);
        if let Some(channel) = &self.channel_id {
            self.deliver(channel, &text, image_path);
        }
        log::info!("alert sent: {} - {}", class, label);
    }

    /// Fire-and-forget system-online notice. Bypasses rate limiting.
    pub fn startup_notice(&self, recognition_enabled: bool) {
        if !self.startup_notice_enabled {
            return;
        }
        let text = format!(
            "*Door camera online*\n\n\
             *Started:* {}\n\
             *Face recognition:* {}\n\
             *Status:* watching",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            if recognition_enabled {
                "enabled"
            } else {
                "disabled"
            },
        );
        if let Err(e) = self.transport.send_text(&self.chat_id, &text) {
            log::warn!("startup notice failed: {:#}", e);
        }
    }

    /// Fire-and-forget error notice. Bypasses rate limiting.
    pub fn error_notice(&self, message: &str) {
        if !self.error_notices_enabled {
            return;
        }
        let text = format!(
            "*Door camera error*\n\n\
             *Error:* {}\n\
             *Time:* {}",
            message,
            Local::now().format("%Y-%m-%d %H:%M:%S"),
        );
        if let Err(e) = self.transport.send_text(&self.chat_id, &text) {
            log::warn!("error notice failed: {:#}", e);
        }
    }

    fn deliver(&self, chat_id: &str, text: &str, image_path: Option<&Path>) {
        if self.send_image {
            if let Some(path) = image_path {
                if path.exists() {
                    match self.transport.send_photo(chat_id, path, text) {
                        Ok(()) => return,
                        Err(e) => {
                            log::warn!(
                                "photo alert to {} failed ({:#}), falling back to text",
                                chat_id,
                                e
                            );
                        }
                    }
                } else {
                    log::warn!("alert image missing: {}, sending text only", path.display());
                }
            }
        }
        if let Err(e) = self.transport.send_text(chat_id, text) {
            log::warn!("alert to {} dropped: {:#}", chat_id, e);
        }
    }
}

fn alert_text(class: PersonClass, confidence: f32, label: &str) -> String {
    let headline = match class {
        PersonClass::Intruder => "*INTRUDER ALERT*",
        PersonClass::Allowed => "*Person detected*",
    };
    format!(
        "{}\n\n\
         *Status:* {}\n\
         *Confidence:* {:.1}%\n\
         *Person:* {}\n\
         *Time:* {}",
        headline,
        class,
        confidence * 100.0,
        label,
        Local::now().format("%Y-%m-%d %H:%M:%S"),
    )
}

fn lock_table(table: &Mutex<HashMap<String, Instant>>) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
    match table.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ----------------------------------------------------------------------------
// Recording stub transport for tests
// ----------------------------------------------------------------------------

/// One message captured by `StubTransport`.
#[derive(Clone, Debug)]
pub struct SentMessage {
    pub chat_id: String,
    pub text: String,
    pub photo: Option<std::path::PathBuf>,
}

/// In-memory transport: records every send, optionally scripted to fail.
#[derive(Default)]
pub struct StubTransport {
    sent: Mutex<Vec<SentMessage>>,
    fail_text: bool,
    fail_photo: bool,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_photos() -> Self {
        Self {
            fail_photo: true,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_text: true,
            fail_photo: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, message: SentMessage) {
        match self.sent.lock() {
            Ok(mut guard) => guard.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
    }
}

impl ChatTransport for StubTransport {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        if self.fail_text {
            return Err(anyhow::anyhow!("stub transport: text send scripted to fail"));
        }
        self.record(SentMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            photo: None,
        });
        Ok(())
    }

    fn send_photo(&self, chat_id: &str, photo: &Path, caption: &str) -> Result<()> {
        if self.fail_photo {
            return Err(anyhow::anyhow!("stub transport: photo send scripted to fail"));
        }
        self.record(SentMessage {
            chat_id: chat_id.to_string(),
            text: caption.to_string(),
            photo: Some(photo.to_path_buf()),
        });
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn telegram_settings(channel: Option<&str>) -> TelegramSettings {
        TelegramSettings {
            bot_token: "123:abc".to_string(),
            chat_id: "42".to_string(),
            channel_id: channel.map(|c| c.to_string()),
        }
    }

    fn alert_settings(min_interval: Duration) -> AlertSettings {
        AlertSettings {
            min_interval,
            send_image: true,
            retention_days: 7,
            cleanup_old_images: true,
            startup_notice: true,
            error_notices: true,
        }
    }

    fn dispatcher_with(
        transport: Arc<StubTransport>,
        min_interval: Duration,
        channel: Option<&str>,
    ) -> AlertDispatcher {
        AlertDispatcher::new(
            Box::new(transport),
            &telegram_settings(channel),
            &alert_settings(min_interval),
        )
    }

    #[test]
    fn alerts_within_window_are_suppressed() {
        let stub = Arc::new(StubTransport::new());
        let dispatcher = dispatcher_with(stub.clone(), Duration::from_secs(10), None);

        let t1 = Instant::now();
        dispatcher.notify_at(PersonClass::Intruder, 0.9, "unknown", None, t1);
        dispatcher.notify_at(
            PersonClass::Intruder,
            0.9,
            "unknown",
            None,
            t1 + Duration::from_secs(5),
        );
        assert_eq!(stub.sent().len(), 1);

        // At exactly t1 + min_interval the alert goes through again.
        dispatcher.notify_at(
            PersonClass::Intruder,
            0.9,
            "unknown",
            None,
            t1 + Duration::from_secs(10),
        );
        assert_eq!(stub.sent().len(), 2);
    }

    #[test]
    fn suppression_does_not_extend_the_window() {
        let stub = Arc::new(StubTransport::new());
        let dispatcher = dispatcher_with(stub.clone(), Duration::from_secs(10), None);

        let t1 = Instant::now();
        dispatcher.notify_at(PersonClass::Intruder, 0.9, "unknown", None, t1);
        // A suppressed attempt at t1+9 must not reset the clock...
        dispatcher.notify_at(
            PersonClass::Intruder,
            0.9,
            "unknown",
            None,
            t1 + Duration::from_secs(9),
        );
        // ...so t1+10 is still past the window.
        dispatcher.notify_at(
            PersonClass::Intruder,
            0.9,
            "unknown",
            None,
            t1 + Duration::from_secs(10),
        );
        assert_eq!(stub.sent().len(), 2);
    }

    #[test]
    fn distinct_identities_rate_limit_independently() {
        let stub = Arc::new(StubTransport::new());
        let dispatcher = dispatcher_with(stub.clone(), Duration::from_secs(10), None);

        let t = Instant::now();
        dispatcher.notify_at(PersonClass::Allowed, 0.9, "alice", None, t);
        dispatcher.notify_at(PersonClass::Intruder, 0.9, "unknown", None, t);
        assert_eq!(stub.sent().len(), 2);
    }

    #[test]
    fn failed_attempt_still_consumes_the_window() {
        let stub = Arc::new(StubTransport::failing());
        let dispatcher = dispatcher_with(stub.clone(), Duration::from_secs(10), None);

        let t1 = Instant::now();
        dispatcher.notify_at(PersonClass::Intruder, 0.9, "unknown", None, t1);
        assert!(stub.sent().is_empty());
        // The failed attempt opened a suppression window anyway.
        dispatcher.notify_at(
            PersonClass::Intruder,
            0.9,
            "unknown",
            None,
            t1 + Duration::from_secs(1),
        );
        assert!(stub.sent().is_empty());
    }

    #[test]
    fn missing_image_falls_back_to_text() {
        let stub = Arc::new(StubTransport::new());
        let dispatcher = dispatcher_with(stub.clone(), Duration::ZERO, None);

        dispatcher.notify(
            PersonClass::Intruder,
            0.8,
            "unknown",
            Some(Path::new("/nonexistent/detection.jpg")),
        );
        let sent = stub.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].photo.is_none());
    }

    #[test]
    fn failing_photo_send_falls_back_to_text() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let photo = dir.path().join("detection.jpg");
        std::fs::write(&photo, b"jpeg")?;

        let stub = Arc::new(StubTransport::failing_photos());
        let dispatcher = dispatcher_with(stub.clone(), Duration::ZERO, None);
        dispatcher.notify(PersonClass::Intruder, 0.8, "unknown", Some(&photo));

        let sent = stub.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].photo.is_none());
        Ok(())
    }

    #[test]
    fn photo_goes_through_when_transport_accepts_it() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let photo = dir.path().join("detection.jpg");
        std::fs::write(&photo, b"jpeg")?;

        let stub = Arc::new(StubTransport::new());
        let dispatcher = dispatcher_with(stub.clone(), Duration::ZERO, None);
        dispatcher.notify(PersonClass::Allowed, 0.9, "alice", Some(&photo));

        let sent = stub.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].photo.as_deref(), Some(photo.as_path()));
        Ok(())
    }

    #[test]
    fn channel_receives_a_copy() {
        let stub = Arc::new(StubTransport::new());
        let dispatcher = dispatcher_with(stub.clone(), Duration::ZERO, Some("@door_feed"));

        dispatcher.notify(PersonClass::Intruder, 0.7, "unknown", None);
        let sent = stub.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].chat_id, "42");
        assert_eq!(sent[1].chat_id, "@door_feed");
    }

    #[test]
    fn notices_bypass_rate_limiting() {
        let stub = Arc::new(StubTransport::new());
        let dispatcher = dispatcher_with(stub.clone(), Duration::from_secs(3600), None);

        dispatcher.startup_notice(true);
        dispatcher.error_notice("camera unplugged");
        dispatcher.error_notice("camera unplugged again");
        assert_eq!(stub.sent().len(), 3);
    }

    #[test]
    fn alert_text_carries_class_and_label() {
        let text = alert_text(PersonClass::Intruder, 0.876, "unknown");
        assert!(text.contains("INTRUDER"));
        assert!(text.contains("87.6%"));
        assert!(text.contains("unknown"));
    }
}
