//! telegram_check - verify Telegram bot connectivity
//!
//! Sends a test message to the configured chat. Exits zero when the message
//! goes through, non-zero otherwise.

use anyhow::{Context, Result};

use door_sentinel::{ChatTransport, SentinelConfig, TelegramTransport};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SentinelConfig::load()?;
    let transport = TelegramTransport::new(&config.telegram.bot_token)?;

    println!("sending test message to chat {}...", config.telegram.chat_id);
    transport
        .send_text(
            &config.telegram.chat_id,
            "*Door camera test*\n\nTelegram credentials are configured correctly.",
        )
        .context("test message")?;

    println!("test message sent; telegram is configured correctly");
    if let Some(channel) = &config.telegram.channel_id {
        println!("broadcast channel configured: {}", channel);
    }
    Ok(())
}
