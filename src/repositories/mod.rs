pub mod chat_repository;
pub mod error;
pub mod in_memory_repository;

pub use chat_repository::{
    ChatRecord, ChatRepository, ChatSummary, MessageRecord, NewChat,
};
pub use error::{RepositoryError, RepositoryResult};
pub use in_memory_repository::InMemoryChatRepository;
