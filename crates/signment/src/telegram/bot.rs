//! Bot initialization, the command surface and the admin gate.

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::core::config;

pub type Bot = teloxide::Bot;

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Signment admin bot commands:")]
pub enum Command {
    #[command(description = "show the shipment menu")]
    Start,
    #[command(description = "show the shipment menu")]
    Menu,
    #[command(description = "show your Telegram user ID")]
    Myid,
    #[command(description = "show shipment details: /track <tracking_number>")]
    Track(String),
    #[command(description = "generate a unique tracking ID")]
    Generate,
    #[command(description = "add a shipment: /add <tn> <status> <location> [email]")]
    Add(String),
    #[command(description = "update a field: /update <tn> <status|location|email|webhook> <value>")]
    Update(String),
    #[command(description = "delete a shipment: /delete <tn>")]
    Delete(String),
    #[command(description = "list shipments: /list [page]")]
    List(String),
    #[command(description = "search shipments: /search <query>")]
    Search(String),
    #[command(description = "system statistics")]
    Stats,
    #[command(description = "queue a manual email notification: /notify <tn>")]
    Notify(String),
    #[command(description = "pause a simulation: /stop <tn>")]
    Stop(String),
    #[command(description = "resume a simulation: /continue <tn>")]
    Continue(String),
    #[command(description = "set simulation speed: /setspeed <tn> <multiplier>")]
    Setspeed(String),
    #[command(description = "show simulation speed: /getspeed <tn>")]
    Getspeed(String),
    #[command(description = "raw shipment state: /debug <tn>")]
    Debug(String),
    #[command(description = "set a shipment webhook: /setwebhook <tn> <url>")]
    Setwebhook(String),
    #[command(description = "queue a test webhook: /testwebhook <tn>")]
    Testwebhook(String),
    #[command(description = "show this help")]
    Help,
}

/// Creates a Bot instance with the configured token and a request
/// timeout suited to the Bot API.
///
/// # Returns
/// * `Ok(Bot)` - Successfully created bot instance
/// * `Err(anyhow::Error)` - Token missing or HTTP client build failed
pub fn create_bot() -> anyhow::Result<Bot> {
    let token = config::BOT_TOKEN.clone();
    if token.is_empty() {
        return Err(anyhow::anyhow!("TELEGRAM_BOT_TOKEN environment variable not set"));
    }

    let client = ClientBuilder::new().timeout(config::network::telegram_timeout()).build()?;
    Ok(Bot::with_client(token, client))
}

/// Admin gate: only IDs listed in ALLOWED_ADMINS may manage shipments.
pub fn is_admin(user_id: i64) -> bool {
    config::admin::ALLOWED_ADMINS.contains(&user_id)
}

/// Registers the command list in the Telegram UI.
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    bot.set_my_commands(Command::bot_commands()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_descriptions_present() {
        let descriptions = Command::descriptions().to_string();
        assert!(descriptions.contains("Signment admin bot commands"));
        assert!(descriptions.contains("/track"));
        assert!(descriptions.contains("/setspeed"));
        assert!(descriptions.contains("/testwebhook"));
    }

    #[test]
    fn test_command_parsing() {
        let cmd = Command::parse("/track TRK123", "signment_bot").unwrap();
        assert_eq!(cmd, Command::Track("TRK123".to_string()));

        let cmd = Command::parse("/stop TRK123", "signment_bot").unwrap();
        assert_eq!(cmd, Command::Stop("TRK123".to_string()));

        let cmd = Command::parse("/stats", "signment_bot").unwrap();
        assert_eq!(cmd, Command::Stats);
    }
}
