// Notification sink implementations
pub mod discord;
pub mod log;
pub mod telegram;

pub use discord::DiscordNotifier;
pub use log::{LogNotifier, NoopNotifier};
pub use telegram::TelegramNotifier;
