// Public modules
pub mod client;
pub mod client_logger;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod error;
pub mod navigation;
pub mod observability;
pub mod prompts;
pub mod render;
pub mod roles;
pub mod store;
pub mod stream;
pub mod types;
pub mod utils;

// Re-exports
pub use client::{ChatBackend, ChatClient};
pub use client_logger::ClientLogger;
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use conversation::{Conversation, TurnState};
pub use error::{Error, Result};
pub use navigation::{ChatSummary, Navigator, Route, chat_list};
pub use observability::register_biometrics;
pub use prompts::{DEFAULT_ROLE, PromptOverrides, SystemPromptTable};
pub use render::{PlainTextRenderer, Renderer};
pub use roles::RolePreset;
pub use store::{
    FileStorage, MemoryStorage, SessionStore, Storage, StoreChange, StoreObserver, SubscriptionId,
    TurnTicket,
};
pub use stream::{StreamFormat, TextStream};
pub use types::*;
