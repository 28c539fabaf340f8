//! Host runtime shared by all feature modules.

pub mod callback;
pub mod context;
pub mod database;
pub mod pending;
pub mod reply;
pub mod router;
pub mod secrets;
pub mod settings;
pub mod telegram;

pub use callback::CallbackData;
pub use context::{Incoming, ModuleContext};
pub use database::Database;
pub use pending::Pending;
pub use reply::{Button, Keyboard, Outcome, Reply, html_escape};
pub use router::{CallbackInvocation, CommandSpec, Invocation, Module, Router};
pub use secrets::SecretBox;
pub use settings::JsonStore;
pub use telegram::TelegramClient;
