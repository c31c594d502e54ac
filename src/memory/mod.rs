//! 记忆层：对话消息、会话轮次模型、会话存储（内存 / SQLite）

pub mod conversation;
pub mod sqlite;
pub mod store;
pub mod turn;

pub use conversation::{last_content, Message, Role};
pub use sqlite::SqliteMemoryStore;
pub use store::{InMemoryStore, MemoryStore, StorageError};
pub use turn::{NewTurn, PriorContext, Session, Turn};
