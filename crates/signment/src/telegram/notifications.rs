//! Direct admin notifications (startup, failures).

use teloxide::prelude::*;

use crate::core::config;
use crate::telegram::bot::Bot;

/// Notifies the primary admin that the bot (re)started.
pub async fn notify_admin_startup(bot: &Bot, bot_username: Option<&str>) {
    let admin_id = *config::admin::ADMIN_USER_ID;
    if admin_id == 0 {
        log::debug!("No ADMIN_USER_ID configured, skipping startup notification");
        return;
    }

    let message = format!(
        "Signment bot started{}.\nWeb port: {}\nCache: {}",
        bot_username.map(|u| format!(" as @{}", u)).unwrap_or_default(),
        *config::PORT,
        if config::REDIS_URL.is_some() { "redis" } else { "memory" },
    );

    if let Err(e) = bot.send_message(ChatId(admin_id), message).await {
        log::error!("Failed to send startup notification to admin {}: {}", admin_id, e);
    }
}

/// Sends an arbitrary alert to the primary admin. Used by background
/// tasks that have no chat of their own.
pub async fn notify_admin(bot: &Bot, text: &str) {
    let admin_id = *config::admin::ADMIN_USER_ID;
    if admin_id == 0 {
        return;
    }
    if let Err(e) = bot.send_message(ChatId(admin_id), text).await {
        log::error!("Failed to send admin notification: {}", e);
    }
}
