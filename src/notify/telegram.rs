//! Telegram Bot API transport.
//!
//! Each send is one blocking HTTP request: `sendMessage` as a form POST,
//! `sendPhoto` as multipart/form-data with the JPEG inlined. The multipart
//! body is framed by hand; the Bot API only needs the basic
//! boundary/disposition layout.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::ChatTransport;

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct TelegramTransport {
    agent: ureq::Agent,
    base_url: String,
}

impl TelegramTransport {
    pub fn new(bot_token: &str) -> Result<Self> {
        Self::with_base_url(API_BASE, bot_token)
    }

    /// Point at a different API host (tests, local bot-api servers).
    pub fn with_base_url(base: &str, bot_token: &str) -> Result<Self> {
        let base = Url::parse(base).context("parse telegram api base url")?;
        if bot_token.trim().is_empty() {
            return Err(anyhow!("telegram bot token is empty"));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .build();
        Ok(Self {
            agent,
            base_url: format!("{}bot{}", base, bot_token),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }
}

impl ChatTransport for TelegramTransport {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        self.agent
            .post(&self.method_url("sendMessage"))
            .send_form(&[
                ("chat_id", chat_id),
                ("text", text),
                ("parse_mode", "Markdown"),
            ])
            .context("telegram sendMessage")?;
        Ok(())
    }

    fn send_photo(&self, chat_id: &str, photo: &Path, caption: &str) -> Result<()> {
        let photo_bytes = std::fs::read(photo)
            .with_context(|| format!("read alert photo {}", photo.display()))?;
        let filename = photo
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("detection.jpg");

        let boundary = format!(
            "sentinel{:x}",
            chrono::Local::now().timestamp_nanos_opt().unwrap_or(0)
        );
        let body = multipart_body(
            &boundary,
            &[
                ("chat_id", chat_id),
                ("caption", caption),
                ("parse_mode", "Markdown"),
            ],
            "photo",
            filename,
            &photo_bytes,
        );

        self.agent
            .post(&self.method_url("sendPhoto"))
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body)
            .context("telegram sendPhoto")?;
        Ok(())
    }
}

/// Frame text fields plus one file part into a multipart/form-data body.
fn multipart_body(
    boundary: &str,
    fields: &[(&str, &str)],
    file_field: &str,
    filename: &str,
    file_bytes: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(file_bytes.len() + 512);
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{file_field}\"; \
             filename=\"{filename}\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(file_bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
