//! Command handlers for the admin bot.

use once_cell::sync::Lazy;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::app::AppDeps;
use crate::core::config;
use crate::core::metrics;
use crate::core::rate_limiter::RateLimiter;
use crate::core::validation::{sanitize_input, sanitize_tracking_number, validate_email, validate_webhook_url};
use crate::notify::{Notification, NotificationKind, WebhookPayload};
use crate::shipments;
use crate::storage::db::{self, ShipmentDraft};
use crate::telegram::bot::{is_admin, Bot, Command};
use crate::telegram::menu;

/// Shipments shown per page in /list and the menu.
pub const PAGE_SIZE: u32 = 5;

static BOT_LIMITER: Lazy<RateLimiter> = Lazy::new(|| {
    RateLimiter::new(
        config::rate_limit::bot_window(),
        config::rate_limit::BOT_MAX_PER_WINDOW,
    )
});

/// Top-level command dispatcher.
pub async fn handle_command(bot: Bot, msg: Message, cmd: Command, deps: AppDeps) -> ResponseResult<()> {
    let chat_id = msg.chat.id;
    let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(0);

    if !BOT_LIMITER.check(&chat_id.0.to_string()).await {
        metrics::record_rate_limit_hit("bot");
        bot.send_message(chat_id, "Rate limit exceeded. Try again in a minute.")
            .await?;
        return Ok(());
    }

    // /myid and /help work for everyone; everything else is admin-only
    match &cmd {
        Command::Myid => {
            metrics::record_command("myid");
            bot.send_message(chat_id, format!("Your Telegram user ID: {}", user_id))
                .await?;
            return Ok(());
        }
        Command::Help => {
            metrics::record_command("help");
            bot.send_message(chat_id, Command::descriptions().to_string()).await?;
            return Ok(());
        }
        _ => {}
    }

    if !is_admin(user_id) {
        log::warn!("Unauthorized command from user {}", user_id);
        bot.send_message(chat_id, "You are not authorized to manage shipments.")
            .await?;
        return Ok(());
    }

    match cmd {
        Command::Start | Command::Menu => {
            metrics::record_command("menu");
            menu::send_dynamic_menu(&bot, chat_id, None, 1, &deps).await?;
        }
        Command::Track(args) => {
            metrics::record_command("track");
            cmd_track(&bot, chat_id, &args, &deps).await?;
        }
        Command::Generate => {
            metrics::record_command("generate");
            cmd_generate(&bot, chat_id, &deps).await?;
        }
        Command::Add(args) => {
            metrics::record_command("add");
            cmd_add(&bot, chat_id, &args, &deps).await?;
        }
        Command::Update(args) => {
            metrics::record_command("update");
            cmd_update(&bot, chat_id, &args, &deps).await?;
        }
        Command::Delete(args) => {
            metrics::record_command("delete");
            cmd_delete(&bot, chat_id, &args, &deps).await?;
        }
        Command::List(args) => {
            metrics::record_command("list");
            cmd_list(&bot, chat_id, &args, &deps).await?;
        }
        Command::Search(args) => {
            metrics::record_command("search");
            cmd_search(&bot, chat_id, &args, &deps).await?;
        }
        Command::Stats => {
            metrics::record_command("stats");
            cmd_stats(&bot, chat_id, &deps).await?;
        }
        Command::Notify(args) => {
            metrics::record_command("notify");
            cmd_notify(&bot, chat_id, &args, &deps).await?;
        }
        Command::Stop(args) => {
            metrics::record_command("stop");
            cmd_pause(&bot, chat_id, &args, &deps).await?;
        }
        Command::Continue(args) => {
            metrics::record_command("continue");
            cmd_resume(&bot, chat_id, &args, &deps).await?;
        }
        Command::Setspeed(args) => {
            metrics::record_command("setspeed");
            cmd_set_speed(&bot, chat_id, &args, &deps).await?;
        }
        Command::Getspeed(args) => {
            metrics::record_command("getspeed");
            cmd_get_speed(&bot, chat_id, &args, &deps).await?;
        }
        Command::Debug(args) => {
            metrics::record_command("debug");
            cmd_debug(&bot, chat_id, &args, &deps).await?;
        }
        Command::Setwebhook(args) => {
            metrics::record_command("setwebhook");
            cmd_set_webhook(&bot, chat_id, &args, &deps).await?;
        }
        Command::Testwebhook(args) => {
            metrics::record_command("testwebhook");
            cmd_test_webhook(&bot, chat_id, &args, &deps).await?;
        }
        Command::Myid | Command::Help => {} // handled above
    }

    Ok(())
}

/// Resolves a tracking-number argument or reports the problem to the
/// chat. Returns `None` after replying.
async fn require_tracking_number(bot: &Bot, chat_id: ChatId, raw: &str) -> ResponseResult<Option<String>> {
    match sanitize_tracking_number(raw) {
        Some(tn) => Ok(Some(tn)),
        None => {
            bot.send_message(chat_id, "Usage: provide a valid tracking number (letters, digits, dashes).")
                .await?;
            Ok(None)
        }
    }
}

async fn cmd_track(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let Some(tn) = require_tracking_number(bot, chat_id, args.trim()).await? else {
        return Ok(());
    };

    match shipments::get_shipment_details(&deps.db, &deps.cache, &tn).await {
        Ok(Some(details)) => {
            bot.send_message(chat_id, menu::format_shipment_details(&details)).await?;
        }
        Ok(None) => {
            bot.send_message(chat_id, format!("Shipment {} not found.", tn)).await?;
        }
        Err(e) => {
            log::error!("Failed to fetch {}: {}", tn, e);
            bot.send_message(chat_id, format!("Error fetching {}: {}", tn, e)).await?;
        }
    }
    Ok(())
}

async fn cmd_generate(bot: &Bot, chat_id: ChatId, deps: &AppDeps) -> ResponseResult<()> {
    let generated = db::get_connection(&deps.db)
        .map_err(crate::AppError::from)
        .and_then(|conn| db::generate_unique_id(&conn));

    match generated {
        Ok(id) => {
            bot.send_message(chat_id, format!("Generated tracking ID: {}", id)).await?;
        }
        Err(e) => {
            log::error!("Failed to generate tracking ID: {}", e);
            bot.send_message(chat_id, format!("Failed to generate ID: {}", e)).await?;
        }
    }
    Ok(())
}

async fn cmd_add(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    if tokens.len() < 3 {
        bot.send_message(
            chat_id,
            format!(
                "Usage: /add <tn> <status> <location> [email]\nLocations: {}",
                deps.routes.known_locations().join(", ")
            ),
        )
        .await?;
        return Ok(());
    }

    let tracking_number = tokens[0].to_string();
    let status = tokens[1].to_string();
    // A trailing token with '@' is the recipient email; the rest is the
    // (possibly multi-word) delivery location.
    let (location_tokens, email) = match tokens.last() {
        Some(last) if last.contains('@') => (&tokens[2..tokens.len() - 1], Some(last.to_string())),
        _ => (&tokens[2..], None),
    };
    let delivery_location = location_tokens.join(" ");

    let draft = ShipmentDraft {
        tracking_number,
        status,
        checkpoints: None,
        delivery_location,
        recipient_email: email,
        origin_location: None,
        webhook_url: None,
        email_notifications: true,
    };

    match shipments::save_shipment(&deps.db, &deps.cache, &deps.queue, &deps.routes, draft).await {
        Ok(details) => {
            bot.send_message(
                chat_id,
                format!("Saved shipment {} ({}).", details.tracking_number, details.status),
            )
            .await?;
        }
        Err(e) => {
            bot.send_message(chat_id, format!("Failed to save shipment: {}", e)).await?;
        }
    }
    Ok(())
}

async fn cmd_update(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    if tokens.len() < 3 {
        bot.send_message(chat_id, "Usage: /update <tn> <status|location|email|webhook> <value>")
            .await?;
        return Ok(());
    }

    let Some(tn) = require_tracking_number(bot, chat_id, tokens[0]).await? else {
        return Ok(());
    };
    let field = tokens[1].to_lowercase();
    let value = tokens[2..].join(" ");

    let Ok(Some(existing)) = shipments::get_shipment_details(&deps.db, &deps.cache, &tn).await else {
        bot.send_message(chat_id, format!("Shipment {} not found.", tn)).await?;
        return Ok(());
    };

    let mut draft = ShipmentDraft {
        tracking_number: existing.tracking_number.clone(),
        status: existing.status.clone(),
        checkpoints: Some(existing.checkpoints.clone()),
        delivery_location: existing.delivery_location.clone(),
        recipient_email: existing.recipient_email.clone(),
        origin_location: existing.origin_location.clone(),
        webhook_url: existing.webhook_url.clone(),
        email_notifications: existing.email_notifications,
    };

    match field.as_str() {
        "status" => draft.status = value,
        "location" => draft.delivery_location = value,
        "origin" => draft.origin_location = Some(value),
        "email" => {
            if !validate_email(&value) {
                bot.send_message(chat_id, "Invalid email address.").await?;
                return Ok(());
            }
            draft.recipient_email = Some(value);
        }
        "webhook" => {
            if !validate_webhook_url(&value) {
                bot.send_message(chat_id, "Invalid webhook URL.").await?;
                return Ok(());
            }
            draft.webhook_url = Some(value);
        }
        other => {
            bot.send_message(chat_id, format!("Unknown field {:?}.", other)).await?;
            return Ok(());
        }
    }

    match shipments::save_shipment(&deps.db, &deps.cache, &deps.queue, &deps.routes, draft).await {
        Ok(details) => {
            bot.send_message(chat_id, format!("Updated {} ({}).", details.tracking_number, field))
                .await?;
        }
        Err(e) => {
            bot.send_message(chat_id, format!("Update failed: {}", e)).await?;
        }
    }
    Ok(())
}

async fn cmd_delete(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let Some(tn) = require_tracking_number(bot, chat_id, args.trim()).await? else {
        return Ok(());
    };

    let deleted = db::get_connection(&deps.db)
        .map_err(crate::AppError::from)
        .and_then(|conn| db::delete_shipment(&conn, &tn).map_err(crate::AppError::from));

    match deleted {
        Ok(true) => {
            deps.cache.invalidate_shipment(&tn).await;
            let _ = deps.cache.set_paused(&tn, false).await;
            let _ = deps.cache.clear_speed_multiplier(&tn).await;
            bot.send_message(chat_id, format!("Shipment {} deleted.", tn)).await?;
        }
        Ok(false) => {
            bot.send_message(chat_id, format!("Shipment {} not found.", tn)).await?;
        }
        Err(e) => {
            log::error!("Failed to delete {}: {}", tn, e);
            bot.send_message(chat_id, format!("Delete failed: {}", e)).await?;
        }
    }
    Ok(())
}

async fn cmd_list(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let page: u32 = args.trim().parse().unwrap_or(1).max(1);

    let listed = db::get_connection(&deps.db)
        .map_err(crate::AppError::from)
        .and_then(|conn| db::list_tracking_numbers(&conn, page, PAGE_SIZE, None).map_err(crate::AppError::from));

    match listed {
        Ok((numbers, total)) if numbers.is_empty() => {
            bot.send_message(chat_id, format!("No shipments on page {} ({} total).", page, total))
                .await?;
        }
        Ok((numbers, total)) => {
            let lines: Vec<String> = numbers.iter().map(|tn| format!("• {}", tn)).collect();
            bot.send_message(
                chat_id,
                format!("Shipments (page {}, {} total):\n{}", page, total, lines.join("\n")),
            )
            .await?;
        }
        Err(e) => {
            bot.send_message(chat_id, format!("List failed: {}", e)).await?;
        }
    }
    Ok(())
}

async fn cmd_search(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let query = sanitize_input(args);
    if query.is_empty() {
        bot.send_message(chat_id, "Usage: /search <query>").await?;
        return Ok(());
    }

    let found = db::get_connection(&deps.db)
        .map_err(crate::AppError::from)
        .and_then(|conn| db::search_shipments(&conn, &query, 1, 10).map_err(crate::AppError::from));

    match found {
        Ok((numbers, 0)) if numbers.is_empty() => {
            bot.send_message(chat_id, format!("No shipments matching {:?}.", query)).await?;
        }
        Ok((numbers, total)) => {
            let lines: Vec<String> = numbers.iter().map(|tn| format!("• {}", tn)).collect();
            bot.send_message(
                chat_id,
                format!("{} match(es) for {:?}:\n{}", total, query, lines.join("\n")),
            )
            .await?;
        }
        Err(e) => {
            bot.send_message(chat_id, format!("Search failed: {}", e)).await?;
        }
    }
    Ok(())
}

async fn cmd_stats(bot: &Bot, chat_id: ChatId, deps: &AppDeps) -> ResponseResult<()> {
    let db_stats = db::get_connection(&deps.db).map_err(crate::AppError::from).and_then(|conn| {
        let by_status = db::count_by_status(&conn)?;
        let total = db::count_all(&conn)?;
        Ok((by_status, total))
    });

    match db_stats {
        Ok((by_status, total)) => {
            let mut lines = vec![
                "Signment system stats".to_string(),
                format!("Shipments: {}", total),
            ];
            for (status, count) in &by_status {
                metrics::SHIPMENTS_BY_STATUS
                    .with_label_values(&[status])
                    .set(*count as f64);
                lines.push(format!("  {}: {}", status, count));
            }
            lines.push(format!("Active simulations: {}", deps.sims.count()));
            lines.push(format!("Queued notifications: {}", deps.queue.depth().await));
            lines.push(format!(
                "Cache backend: {}",
                if deps.cache.is_redis() { "redis" } else { "memory" }
            ));
            bot.send_message(chat_id, lines.join("\n")).await?;
        }
        Err(e) => {
            bot.send_message(chat_id, format!("Stats failed: {}", e)).await?;
        }
    }
    Ok(())
}

async fn cmd_notify(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let Some(tn) = require_tracking_number(bot, chat_id, args.trim()).await? else {
        return Ok(());
    };

    match shipments::get_shipment_details(&deps.db, &deps.cache, &tn).await {
        Ok(Some(details)) => match menu::queue_manual_email(deps, &details).await {
            Ok(()) => {
                bot.send_message(chat_id, format!("Email notification queued for {}.", tn))
                    .await?;
            }
            Err(reason) => {
                bot.send_message(chat_id, reason).await?;
            }
        },
        Ok(None) => {
            bot.send_message(chat_id, format!("Shipment {} not found.", tn)).await?;
        }
        Err(e) => {
            bot.send_message(chat_id, format!("Error: {}", e)).await?;
        }
    }
    Ok(())
}

async fn cmd_pause(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let Some(tn) = require_tracking_number(bot, chat_id, args.trim()).await? else {
        return Ok(());
    };
    let reply = menu::pause_simulation(deps, &tn).await;
    bot.send_message(chat_id, reply).await?;
    Ok(())
}

async fn cmd_resume(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let Some(tn) = require_tracking_number(bot, chat_id, args.trim()).await? else {
        return Ok(());
    };
    let reply = menu::resume_simulation(deps, &tn).await;
    bot.send_message(chat_id, reply).await?;
    Ok(())
}

async fn cmd_set_speed(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    if tokens.len() != 2 {
        bot.send_message(chat_id, "Usage: /setspeed <tn> <multiplier>").await?;
        return Ok(());
    }
    let Some(tn) = require_tracking_number(bot, chat_id, tokens[0]).await? else {
        return Ok(());
    };
    let Ok(multiplier) = tokens[1].parse::<f64>() else {
        bot.send_message(chat_id, "Multiplier must be a number.").await?;
        return Ok(());
    };

    match deps.cache.set_speed_multiplier(&tn, multiplier).await {
        Ok(stored) => {
            deps.cache.invalidate_shipment(&tn).await;
            bot.send_message(chat_id, format!("Simulation speed for {} set to {}x.", tn, stored))
                .await?;
        }
        Err(e) => {
            bot.send_message(chat_id, format!("Failed to set speed: {}", e)).await?;
        }
    }
    Ok(())
}

async fn cmd_get_speed(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let Some(tn) = require_tracking_number(bot, chat_id, args.trim()).await? else {
        return Ok(());
    };
    let speed = deps.cache.speed_multiplier(&tn).await;
    bot.send_message(chat_id, format!("Simulation speed for {} is {}x.", tn, speed))
        .await?;
    Ok(())
}

async fn cmd_debug(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let Some(tn) = require_tracking_number(bot, chat_id, args.trim()).await? else {
        return Ok(());
    };

    match shipments::get_shipment_details(&deps.db, &deps.cache, &tn).await {
        Ok(Some(details)) => {
            let raw = serde_json::to_string_pretty(&details).unwrap_or_else(|e| e.to_string());
            bot.send_message(chat_id, format!("Raw state for {}:\n{}", tn, raw)).await?;
        }
        Ok(None) => {
            bot.send_message(chat_id, format!("Shipment {} not found.", tn)).await?;
        }
        Err(e) => {
            bot.send_message(chat_id, format!("Error: {}", e)).await?;
        }
    }
    Ok(())
}

async fn cmd_set_webhook(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    if tokens.len() != 2 {
        bot.send_message(chat_id, "Usage: /setwebhook <tn> <url>").await?;
        return Ok(());
    }
    let Some(tn) = require_tracking_number(bot, chat_id, tokens[0]).await? else {
        return Ok(());
    };
    if !validate_webhook_url(tokens[1]) {
        bot.send_message(chat_id, "Invalid webhook URL.").await?;
        return Ok(());
    }

    let updated = db::get_connection(&deps.db)
        .map_err(crate::AppError::from)
        .and_then(|conn| db::set_webhook_url(&conn, &tn, tokens[1]).map_err(crate::AppError::from));

    match updated {
        Ok(0) => {
            bot.send_message(chat_id, format!("Shipment {} not found.", tn)).await?;
        }
        Ok(_) => {
            deps.cache.invalidate_shipment(&tn).await;
            bot.send_message(chat_id, format!("Webhook for {} set to {}.", tn, tokens[1]))
                .await?;
        }
        Err(e) => {
            bot.send_message(chat_id, format!("Failed to set webhook: {}", e)).await?;
        }
    }
    Ok(())
}

async fn cmd_test_webhook(bot: &Bot, chat_id: ChatId, args: &str, deps: &AppDeps) -> ResponseResult<()> {
    let Some(tn) = require_tracking_number(bot, chat_id, args.trim()).await? else {
        return Ok(());
    };

    match shipments::get_shipment_details(&deps.db, &deps.cache, &tn).await {
        Ok(Some(details)) => {
            let webhook_url = details
                .webhook_url
                .clone()
                .or_else(|| config::GLOBAL_WEBHOOK_URL.clone());
            let Some(webhook_url) = webhook_url else {
                bot.send_message(chat_id, format!("No webhook configured for {}.", tn)).await?;
                return Ok(());
            };

            let notification = Notification {
                tracking_number: details.tracking_number.clone(),
                kind: NotificationKind::Webhook(WebhookPayload {
                    status: details.status.clone(),
                    checkpoints: details.checkpoints.clone(),
                    delivery_location: details.delivery_location.clone(),
                    webhook_url,
                }),
                attempts: 0,
            };
            match deps.queue.enqueue(&notification).await {
                Ok(()) => {
                    bot.send_message(chat_id, format!("Webhook notification queued for {}.", tn))
                        .await?;
                }
                Err(e) => {
                    bot.send_message(chat_id, format!("Failed to queue webhook: {}", e)).await?;
                }
            }
        }
        Ok(None) => {
            bot.send_message(chat_id, format!("Shipment {} not found.", tn)).await?;
        }
        Err(e) => {
            bot.send_message(chat_id, format!("Error: {}", e)).await?;
        }
    }
    Ok(())
}
