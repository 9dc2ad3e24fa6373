pub mod chat_controller;
pub mod directory;

pub use chat_controller::{ActiveChat, Backends, ChatController, SendError, SharedActiveChat};
pub use directory::ChatDirectory;
