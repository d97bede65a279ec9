//! Bot startup and the dispatcher lifecycle.

use anyhow::Result;
use std::env;
use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::update_listeners::webhooks;
use tokio::time::{sleep, Duration};

use crate::app::AppDeps;
use crate::core::config;
use crate::core::metrics;
use crate::telegram::bot::{create_bot, setup_bot_commands, Command};
use crate::telegram::notifications::notify_admin_startup;
use crate::telegram::{commands, menu};

/// The dispatcher handler tree: commands plus inline-menu callbacks.
fn schema() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(commands::handle_command),
        )
        .branch(Update::filter_callback_query().endpoint(menu::handle_callback))
}

/// Runs the Telegram bot until shutdown.
///
/// Polling by default; webhook mode when `use_webhook` is set and
/// WEBHOOK_URL is configured. The dispatcher restarts with exponential
/// backoff when it dies from a transient panic (teloxide's listener can
/// blow up on connection resets).
pub async fn run_bot(deps: AppDeps, use_webhook: bool) -> Result<()> {
    let bot = create_bot()?;

    // The Bot API may still be warming up right after a deploy
    let bot_info = {
        let max_attempts = 30;
        let mut attempt = 0;
        loop {
            match bot.get_me().await {
                Ok(info) => break info,
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(anyhow::anyhow!("Failed to connect to Bot API after {} attempts: {}", attempt, e));
                    }
                    log::warn!("Bot API not ready (attempt {}/{}): {}. Retrying in 5s", attempt, max_attempts, e);
                    sleep(Duration::from_secs(5)).await;
                }
            }
        }
    };
    let bot_username = bot_info.username.as_deref();
    log::info!("Bot username: {:?}, Bot ID: {}", bot_username, bot_info.id);

    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to register bot commands: {}", e);
    }

    notify_admin_startup(&bot, bot_username).await;

    let webhook_url = if use_webhook { config::WEBHOOK_URL.clone() } else { None };

    if let Some(url) = webhook_url {
        let port: u16 = env::var("WEBHOOK_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8443);
        log::info!("Starting bot in webhook mode at {} (port {})", url, port);

        let listener = webhooks::axum(
            bot.clone(),
            webhooks::Options::new(([0, 0, 0, 0], port).into(), url.parse()?),
        )
        .await?;

        Dispatcher::builder(bot, schema())
            .dependencies(dptree::deps![deps])
            .enable_ctrlc_handler()
            .build()
            .dispatch_with_listener(
                listener,
                LoggingErrorHandler::with_custom_text("An error from the update listener"),
            )
            .await;
        return Ok(());
    }

    log::info!("Starting bot in long polling mode");
    let mut retry_count = 0;
    let max_retries = config::retry::MAX_DISPATCHER_RETRIES;

    loop {
        let bot_clone = bot.clone();
        let deps_clone = deps.clone();

        // Run the dispatcher in its own task so a panic is isolated and
        // observable through the JoinHandle.
        let handle = tokio::spawn(async move {
            use teloxide::update_listeners::Polling;

            let listener = Polling::builder(bot_clone.clone()).drop_pending_updates().build();

            Dispatcher::builder(bot_clone, schema())
                .dependencies(dptree::deps![deps_clone])
                .enable_ctrlc_handler()
                .build()
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await
        });

        match handle.await {
            Ok(()) => {
                log::info!("Dispatcher shutdown gracefully");
                break;
            }
            Err(join_err) if join_err.is_panic() => {
                log::error!("Dispatcher panicked: {}", join_err);
                metrics::DISPATCHER_RECONNECTIONS_TOTAL.inc();

                if retry_count >= max_retries {
                    log::error!("Max dispatcher retries reached. Exiting");
                    break;
                }
                retry_count += 1;
                let delay = Duration::from_secs(config::retry::EXPONENTIAL_BACKOFF_BASE.pow(retry_count));
                log::info!(
                    "Restarting dispatcher (attempt {}/{}) in {:?}",
                    retry_count,
                    max_retries,
                    delay
                );
                sleep(delay).await;
            }
            Err(join_err) => {
                log::warn!("Dispatcher task was cancelled: {}", join_err);
                break;
            }
        }
    }

    Ok(())
}
