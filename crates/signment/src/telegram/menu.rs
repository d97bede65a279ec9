//! Inline-keyboard menu and callback routing.
//!
//! Callback data is `action[:arg[:arg]]`; tracking numbers never
//! contain `:` so a plain split is unambiguous.

use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId};

use crate::app::AppDeps;
use crate::core::metrics;
use crate::notify::{EmailPayload, Notification, NotificationKind};
use crate::shipments::{self, ShipmentDetails};
use crate::sim;
use crate::storage::db;
use crate::telegram::bot::{is_admin, Bot};
use crate::telegram::commands::PAGE_SIZE;
use crate::web::ws;

/// Speed presets offered in the details view.
const SPEED_PRESETS: [f64; 4] = [0.5, 1.0, 2.0, 5.0];

/// Renders the paginated shipment menu, either as a new message or by
/// editing an existing one.
pub async fn send_dynamic_menu(
    bot: &Bot,
    chat_id: ChatId,
    message_id: Option<MessageId>,
    page: u32,
    deps: &AppDeps,
) -> ResponseResult<()> {
    let (numbers, total) = match db::get_connection(&deps.db)
        .map_err(crate::AppError::from)
        .and_then(|conn| db::list_tracking_numbers(&conn, page, PAGE_SIZE, None).map_err(crate::AppError::from))
    {
        Ok(listed) => listed,
        Err(e) => {
            log::error!("Failed to list shipments for menu: {}", e);
            bot.send_message(chat_id, format!("Failed to load shipments: {}", e)).await?;
            return Ok(());
        }
    };

    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();
    for tn in &numbers {
        rows.push(vec![InlineKeyboardButton::callback(
            tn.clone(),
            format!("view:{}", tn),
        )]);
    }

    let mut nav = Vec::new();
    if page > 1 {
        nav.push(InlineKeyboardButton::callback("Previous", format!("page:{}", page - 1)));
    }
    if u64::from(page) * u64::from(PAGE_SIZE) < total {
        nav.push(InlineKeyboardButton::callback("Next", format!("page:{}", page + 1)));
    }
    if !nav.is_empty() {
        rows.push(nav);
    }

    rows.push(vec![
        InlineKeyboardButton::callback("Batch delete", format!("batchmenu:{}", page)),
        InlineKeyboardButton::callback("Refresh", format!("page:{}", page)),
    ]);

    let markup = InlineKeyboardMarkup::new(rows);
    let text = format!("Shipments (page {})\nAvailable shipments: {}", page, total);

    match message_id {
        Some(message_id) => {
            bot.edit_message_text(chat_id, message_id, text)
                .reply_markup(markup)
                .await?;
        }
        None => {
            bot.send_message(chat_id, text).reply_markup(markup).await?;
        }
    }
    Ok(())
}

/// Shipment details as a chat message.
pub fn format_shipment_details(details: &ShipmentDetails) -> String {
    let checkpoints = details.checkpoint_list();
    let checkpoint_lines = if checkpoints.is_empty() {
        "  (none)".to_string()
    } else {
        checkpoints
            .iter()
            .map(|cp| format!("  {}", cp))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Shipment: {tn}\nStatus: {status}\nPaused: {paused}\nSpeed: {speed}x\n\
         Delivery: {delivery}\nOrigin: {origin}\nRecipient: {recipient}\n\
         Webhook: {webhook}\nEmail notifications: {email}\nLast updated: {updated}\nCheckpoints:\n{checkpoints}",
        tn = details.tracking_number,
        status = details.status,
        paused = details.paused,
        speed = details.speed_multiplier,
        delivery = details.delivery_location,
        origin = details.origin_location.as_deref().unwrap_or("-"),
        recipient = details.recipient_email.as_deref().unwrap_or("-"),
        webhook = details.webhook_url.as_deref().unwrap_or("default"),
        email = if details.email_notifications { "enabled" } else { "disabled" },
        updated = details.last_updated,
        checkpoints = checkpoint_lines,
    )
}

fn details_keyboard(details: &ShipmentDetails) -> InlineKeyboardMarkup {
    let tn = &details.tracking_number;
    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();

    if !details.is_terminal() {
        rows.push(vec![
            if details.paused {
                InlineKeyboardButton::callback("Resume", format!("resume:{}", tn))
            } else {
                InlineKeyboardButton::callback("Pause", format!("pause:{}", tn))
            },
            InlineKeyboardButton::callback("Set speed", format!("speedmenu:{}", tn)),
        ]);
    }

    rows.push(vec![
        InlineKeyboardButton::callback("Broadcast", format!("broadcast:{}", tn)),
        InlineKeyboardButton::callback("Send email", format!("notify:{}", tn)),
    ]);
    rows.push(vec![
        InlineKeyboardButton::callback("Test webhook", format!("webhook:{}", tn)),
        InlineKeyboardButton::callback("Toggle email", format!("email:{}", tn)),
    ]);
    rows.push(vec![
        InlineKeyboardButton::callback("Delete", format!("delask:{}", tn)),
        InlineKeyboardButton::callback("Home", "page:1".to_string()),
    ]);

    InlineKeyboardMarkup::new(rows)
}

async fn show_shipment_details(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    tracking_number: &str,
    deps: &AppDeps,
) -> ResponseResult<()> {
    match shipments::get_shipment_details(&deps.db, &deps.cache, tracking_number).await {
        Ok(Some(details)) => {
            bot.edit_message_text(chat_id, message_id, format_shipment_details(&details))
                .reply_markup(details_keyboard(&details))
                .await?;
        }
        Ok(None) => {
            bot.edit_message_text(chat_id, message_id, format!("Shipment {} not found.", tracking_number))
                .await?;
        }
        Err(e) => {
            log::error!("Failed to show details for {}: {}", tracking_number, e);
            bot.edit_message_text(chat_id, message_id, format!("Error: {}", e)).await?;
        }
    }
    Ok(())
}

async fn show_batch_menu(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    page: u32,
    deps: &AppDeps,
) -> ResponseResult<()> {
    let (numbers, total) = match db::get_connection(&deps.db)
        .map_err(crate::AppError::from)
        .and_then(|conn| db::list_tracking_numbers(&conn, page, PAGE_SIZE, None).map_err(crate::AppError::from))
    {
        Ok(listed) => listed,
        Err(e) => {
            bot.edit_message_text(chat_id, message_id, format!("Failed to load shipments: {}", e))
                .await?;
            return Ok(());
        }
    };

    let selected = deps.cache.batch_selection(chat_id.0).await.unwrap_or_default();

    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();
    for tn in &numbers {
        let marker = if selected.contains(tn) { "☑" } else { "☐" };
        rows.push(vec![InlineKeyboardButton::callback(
            format!("{} {}", marker, tn),
            format!("batch:{}:{}", tn, page),
        )]);
    }

    let mut nav = Vec::new();
    if page > 1 {
        nav.push(InlineKeyboardButton::callback("Previous", format!("batchmenu:{}", page - 1)));
    }
    if u64::from(page) * u64::from(PAGE_SIZE) < total {
        nav.push(InlineKeyboardButton::callback("Next", format!("batchmenu:{}", page + 1)));
    }
    if !nav.is_empty() {
        rows.push(nav);
    }

    rows.push(vec![
        InlineKeyboardButton::callback("Delete selected", format!("batchdelask:{}", page)),
        InlineKeyboardButton::callback("Home", "page:1".to_string()),
    ]);

    bot.edit_message_text(
        chat_id,
        message_id,
        format!("Select shipments to delete ({} selected)", selected.len()),
    )
    .reply_markup(InlineKeyboardMarkup::new(rows))
    .await?;
    Ok(())
}

/// Pauses a simulation, reporting the outcome as user-facing text.
pub async fn pause_simulation(deps: &AppDeps, tracking_number: &str) -> String {
    match shipments::get_shipment_details(&deps.db, &deps.cache, tracking_number).await {
        Ok(Some(details)) => {
            if details.is_terminal() {
                return format!("Shipment {} is already completed ({}).", tracking_number, details.status);
            }
            if details.paused {
                return format!("Simulation for {} is already paused.", tracking_number);
            }
            if let Err(e) = deps.cache.set_paused(tracking_number, true).await {
                return format!("Failed to pause {}: {}", tracking_number, e);
            }
            deps.cache.invalidate_shipment(tracking_number).await;
            log::info!("Paused simulation for {}", tracking_number);
            format!("Simulation paused for {}.", tracking_number)
        }
        Ok(None) => format!("Shipment {} not found.", tracking_number),
        Err(e) => format!("Error: {}", e),
    }
}

/// Resumes a simulation and restarts its task if needed.
pub async fn resume_simulation(deps: &AppDeps, tracking_number: &str) -> String {
    match shipments::get_shipment_details(&deps.db, &deps.cache, tracking_number).await {
        Ok(Some(details)) => {
            if details.is_terminal() {
                return format!("Shipment {} is already completed ({}).", tracking_number, details.status);
            }
            if !details.paused {
                return format!("Simulation for {} is not paused.", tracking_number);
            }
            if let Err(e) = deps.cache.set_paused(tracking_number, false).await {
                return format!("Failed to resume {}: {}", tracking_number, e);
            }
            deps.cache.invalidate_shipment(tracking_number).await;
            // The task may have died with the previous process
            sim::spawn_simulation(deps.clone(), tracking_number.to_string());
            log::info!("Resumed simulation for {}", tracking_number);
            format!("Simulation resumed for {}.", tracking_number)
        }
        Ok(None) => format!("Shipment {} not found.", tracking_number),
        Err(e) => format!("Error: {}", e),
    }
}

/// Queues a manual email notification. Err carries a user-facing reason.
pub async fn queue_manual_email(deps: &AppDeps, details: &ShipmentDetails) -> Result<(), String> {
    let Some(recipient) = details.recipient_email.as_deref().filter(|r| !r.is_empty()) else {
        return Err(format!("No recipient email on {}.", details.tracking_number));
    };
    if !details.email_notifications {
        return Err(format!("Email notifications are disabled for {}.", details.tracking_number));
    }

    let notification = Notification {
        tracking_number: details.tracking_number.clone(),
        kind: NotificationKind::Email(EmailPayload {
            status: details.status.clone(),
            checkpoints: details.checkpoints.clone(),
            delivery_location: details.delivery_location.clone(),
            recipient_email: recipient.to_string(),
        }),
        attempts: 0,
    };
    deps.queue
        .enqueue(&notification)
        .await
        .map_err(|e| format!("Failed to queue email: {}", e))
}

/// Routes inline-keyboard callbacks.
pub async fn handle_callback(bot: Bot, q: CallbackQuery, deps: AppDeps) -> ResponseResult<()> {
    let user_id = q.from.id.0 as i64;
    let callback_id = q.id.clone();

    if !is_admin(user_id) {
        bot.answer_callback_query(callback_id)
            .text("You are not authorized.")
            .show_alert(true)
            .await?;
        return Ok(());
    }

    let Some(data) = q.data.clone() else {
        bot.answer_callback_query(callback_id).await?;
        return Ok(());
    };

    let (chat_id, message_id) = match q.message.as_ref() {
        Some(message) => (message.chat().id, message.id()),
        None => {
            bot.answer_callback_query(callback_id).await?;
            return Ok(());
        }
    };

    metrics::record_command("callback");
    let parts: Vec<&str> = data.split(':').collect();
    let action = parts.first().copied().unwrap_or_default();

    match (action, parts.get(1), parts.get(2)) {
        ("page", Some(page), _) => {
            let page = page.parse().unwrap_or(1);
            bot.answer_callback_query(callback_id).await?;
            send_dynamic_menu(&bot, chat_id, Some(message_id), page, &deps).await?;
        }
        ("view", Some(tn), _) => {
            bot.answer_callback_query(callback_id).await?;
            show_shipment_details(&bot, chat_id, message_id, tn, &deps).await?;
        }
        ("pause", Some(tn), _) => {
            let outcome = pause_simulation(&deps, tn).await;
            bot.answer_callback_query(callback_id).text(outcome).show_alert(true).await?;
            show_shipment_details(&bot, chat_id, message_id, tn, &deps).await?;
        }
        ("resume", Some(tn), _) => {
            let outcome = resume_simulation(&deps, tn).await;
            bot.answer_callback_query(callback_id).text(outcome).show_alert(true).await?;
            show_shipment_details(&bot, chat_id, message_id, tn, &deps).await?;
        }
        ("speedmenu", Some(tn), _) => {
            bot.answer_callback_query(callback_id).await?;
            let buttons: Vec<InlineKeyboardButton> = SPEED_PRESETS
                .iter()
                .map(|speed| InlineKeyboardButton::callback(format!("{}x", speed), format!("speed:{}:{}", tn, speed)))
                .collect();
            let markup = InlineKeyboardMarkup::new(vec![
                buttons,
                vec![InlineKeyboardButton::callback("Back", format!("view:{}", tn))],
            ]);
            bot.edit_message_text(chat_id, message_id, format!("Pick a simulation speed for {}:", tn))
                .reply_markup(markup)
                .await?;
        }
        ("speed", Some(tn), Some(raw_speed)) => {
            let outcome = match raw_speed.parse::<f64>() {
                Ok(speed) => match deps.cache.set_speed_multiplier(tn, speed).await {
                    Ok(stored) => {
                        deps.cache.invalidate_shipment(tn).await;
                        format!("Speed for {} set to {}x.", tn, stored)
                    }
                    Err(e) => format!("Failed to set speed: {}", e),
                },
                Err(_) => "Invalid speed.".to_string(),
            };
            bot.answer_callback_query(callback_id).text(outcome).show_alert(true).await?;
            show_shipment_details(&bot, chat_id, message_id, tn, &deps).await?;
        }
        ("broadcast", Some(tn), _) => {
            ws::broadcast_update(&deps.db, &deps.cache, &deps.clients, &deps.http, tn).await;
            bot.answer_callback_query(callback_id)
                .text(format!("Broadcast triggered for {}.", tn))
                .show_alert(true)
                .await?;
        }
        ("notify", Some(tn), _) => {
            let outcome = match shipments::get_shipment_details(&deps.db, &deps.cache, tn).await {
                Ok(Some(details)) => match queue_manual_email(&deps, &details).await {
                    Ok(()) => format!("Email notification queued for {}.", tn),
                    Err(reason) => reason,
                },
                Ok(None) => format!("Shipment {} not found.", tn),
                Err(e) => format!("Error: {}", e),
            };
            bot.answer_callback_query(callback_id).text(outcome).show_alert(true).await?;
        }
        ("webhook", Some(tn), _) => {
            // Reuses the /testwebhook path through the shared queue
            let outcome = match shipments::get_shipment_details(&deps.db, &deps.cache, tn).await {
                Ok(Some(details)) => {
                    let webhook_url = details
                        .webhook_url
                        .clone()
                        .or_else(|| crate::core::config::GLOBAL_WEBHOOK_URL.clone());
                    match webhook_url {
                        Some(webhook_url) => {
                            let notification = Notification {
                                tracking_number: details.tracking_number.clone(),
                                kind: NotificationKind::Webhook(crate::notify::WebhookPayload {
                                    status: details.status.clone(),
                                    checkpoints: details.checkpoints.clone(),
                                    delivery_location: details.delivery_location.clone(),
                                    webhook_url,
                                }),
                                attempts: 0,
                            };
                            match deps.queue.enqueue(&notification).await {
                                Ok(()) => format!("Webhook notification queued for {}.", tn),
                                Err(e) => format!("Failed to queue webhook: {}", e),
                            }
                        }
                        None => format!("No webhook configured for {}.", tn),
                    }
                }
                Ok(None) => format!("Shipment {} not found.", tn),
                Err(e) => format!("Error: {}", e),
            };
            bot.answer_callback_query(callback_id).text(outcome).show_alert(true).await?;
        }
        ("email", Some(tn), _) => {
            let outcome = match db::get_connection(&deps.db)
                .map_err(crate::AppError::from)
                .and_then(|conn| db::toggle_email_notifications(&conn, tn).map_err(crate::AppError::from))
            {
                Ok(Some(enabled)) => {
                    deps.cache.invalidate_shipment(tn).await;
                    format!(
                        "Email notifications {} for {}.",
                        if enabled { "enabled" } else { "disabled" },
                        tn
                    )
                }
                Ok(None) => format!("Shipment {} not found.", tn),
                Err(e) => format!("Error: {}", e),
            };
            bot.answer_callback_query(callback_id).text(outcome).show_alert(true).await?;
            show_shipment_details(&bot, chat_id, message_id, tn, &deps).await?;
        }
        ("delask", Some(tn), _) => {
            bot.answer_callback_query(callback_id).await?;
            let markup = InlineKeyboardMarkup::new(vec![vec![
                InlineKeyboardButton::callback("Confirm delete", format!("del:{}", tn)),
                InlineKeyboardButton::callback("Cancel", format!("view:{}", tn)),
            ]]);
            bot.edit_message_text(chat_id, message_id, format!("Delete shipment {}?", tn))
                .reply_markup(markup)
                .await?;
        }
        ("del", Some(tn), _) => {
            let outcome = match db::get_connection(&deps.db)
                .map_err(crate::AppError::from)
                .and_then(|conn| db::delete_shipment(&conn, tn).map_err(crate::AppError::from))
            {
                Ok(true) => {
                    deps.cache.invalidate_shipment(tn).await;
                    let _ = deps.cache.set_paused(tn, false).await;
                    let _ = deps.cache.clear_speed_multiplier(tn).await;
                    format!("Shipment {} deleted.", tn)
                }
                Ok(false) => format!("Shipment {} not found.", tn),
                Err(e) => format!("Delete failed: {}", e),
            };
            bot.answer_callback_query(callback_id).text(outcome).show_alert(true).await?;
            send_dynamic_menu(&bot, chat_id, Some(message_id), 1, &deps).await?;
        }
        ("batchmenu", Some(page), _) => {
            let page = page.parse().unwrap_or(1);
            bot.answer_callback_query(callback_id).await?;
            show_batch_menu(&bot, chat_id, message_id, page, &deps).await?;
        }
        ("batch", Some(tn), Some(page)) => {
            let page = page.parse().unwrap_or(1);
            let outcome = match deps.cache.toggle_batch_selection(chat_id.0, tn).await {
                Ok(true) => format!("Selected {}.", tn),
                Ok(false) => format!("Deselected {}.", tn),
                Err(e) => format!("Error: {}", e),
            };
            bot.answer_callback_query(callback_id).text(outcome).await?;
            show_batch_menu(&bot, chat_id, message_id, page, &deps).await?;
        }
        ("batchdelask", Some(page), _) => {
            let page: u32 = page.parse().unwrap_or(1);
            let selected = deps.cache.batch_selection(chat_id.0).await.unwrap_or_default();
            if selected.is_empty() {
                bot.answer_callback_query(callback_id)
                    .text("No shipments selected.")
                    .show_alert(true)
                    .await?;
                return Ok(());
            }
            bot.answer_callback_query(callback_id).await?;
            let markup = InlineKeyboardMarkup::new(vec![vec![
                InlineKeyboardButton::callback("Confirm delete", format!("batchdel:{}", page)),
                InlineKeyboardButton::callback("Cancel", format!("batchmenu:{}", page)),
            ]]);
            bot.edit_message_text(chat_id, message_id, format!("Delete {} selected shipment(s)?", selected.len()))
                .reply_markup(markup)
                .await?;
        }
        ("batchdel", Some(_page), _) => {
            let selected = deps.cache.batch_selection(chat_id.0).await.unwrap_or_default();
            let mut deleted = 0usize;
            for tn in &selected {
                let removed = db::get_connection(&deps.db)
                    .map_err(crate::AppError::from)
                    .and_then(|conn| db::delete_shipment(&conn, tn).map_err(crate::AppError::from));
                match removed {
                    Ok(true) => {
                        deps.cache.invalidate_shipment(tn).await;
                        let _ = deps.cache.set_paused(tn, false).await;
                        let _ = deps.cache.clear_speed_multiplier(tn).await;
                        deleted += 1;
                    }
                    Ok(false) => {}
                    Err(e) => log::error!("Batch delete failed for {}: {}", tn, e),
                }
            }
            let _ = deps.cache.clear_batch_selection(chat_id.0).await;
            bot.answer_callback_query(callback_id)
                .text(format!("Deleted {} shipment(s).", deleted))
                .show_alert(true)
                .await?;
            send_dynamic_menu(&bot, chat_id, Some(message_id), 1, &deps).await?;
        }
        _ => {
            log::debug!("Unknown callback data: {:?}", data);
            bot.answer_callback_query(callback_id).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_data_parsing() {
        // The router splits on ':'; verify the grammar assumptions for
        // every action it emits.
        for data in [
            "page:2",
            "view:TRK123",
            "pause:TRK123",
            "resume:TRK123",
            "speedmenu:TRK123",
            "speed:TRK123:2",
            "broadcast:TRK123",
            "notify:TRK123",
            "webhook:TRK123",
            "email:TRK123",
            "delask:TRK123",
            "del:TRK123",
            "batchmenu:1",
            "batch:TRK123:1",
            "batchdelask:1",
            "batchdel:1",
        ] {
            let parts: Vec<&str> = data.split(':').collect();
            assert!(!parts[0].is_empty());
            assert!(parts.len() <= 3, "{} has too many segments", data);
        }
    }

    #[test]
    fn test_format_details_contains_key_fields() {
        let details = ShipmentDetails {
            tracking_number: "TRK9".to_string(),
            status: "In_Transit".to_string(),
            checkpoints: "2025-01-01 12:00 - Lagos, NG - Processed".to_string(),
            delivery_location: "Lagos, NG".to_string(),
            last_updated: "2025-01-01T12:00:00Z".to_string(),
            recipient_email: Some("user@example.com".to_string()),
            created_at: "2025-01-01T00:00:00Z".to_string(),
            origin_location: None,
            webhook_url: None,
            email_notifications: true,
            paused: false,
            speed_multiplier: 1.0,
        };

        let text = format_shipment_details(&details);
        assert!(text.contains("TRK9"));
        assert!(text.contains("In_Transit"));
        assert!(text.contains("user@example.com"));
        assert!(text.contains("Webhook: default"));
    }
}
