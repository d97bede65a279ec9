use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "signment")]
#[command(author, version, about = "Shipment-tracking simulator: web tracker, Telegram admin bot and notification worker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands map one-to-one onto the deployment's process roles.
/// Running without a subcommand starts every role in one process.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the public web server (tracking page, track API, WebSocket)
    Serve {
        /// Port to listen on (overrides the PORT environment variable)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the Telegram admin bot
    Bot {
        /// Use webhook mode instead of long polling
        #[arg(long)]
        webhook: bool,
    },

    /// Run the notification worker (drains the queue, sends email/webhooks)
    Worker,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
