//! A modular Telegram bot: a small host runtime plus feature modules.

pub mod config;
pub mod kernel;
pub mod modules;
pub mod telegram_log;
