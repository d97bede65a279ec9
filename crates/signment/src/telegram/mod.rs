//! Telegram admin bot: shipment CRUD, simulation control and
//! notification triggers over commands and inline menus.

pub mod bot;
pub mod commands;
pub mod menu;
pub mod notifications;
pub mod runner;

pub use bot::{create_bot, is_admin, Bot, Command};
pub use runner::run_bot;
