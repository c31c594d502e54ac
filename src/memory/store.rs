//! 会话存储抽象层
//!
//! 只追加的轮次日志，按 session_id 分区：append 分配序号，recent_context 返回最近 N 轮（时间正序）。
//! 同一会话的追加由编排器的会话锁串行化；不同会话互不影响。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::memory::{NewTurn, Session, Turn};

/// 存储层错误：对外统一表现为 StorageUnavailable
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt turn record in session {session_id}: {reason}")]
    Corrupt { session_id: String, reason: String },
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::Unavailable(e.to_string())
    }
}

/// 会话存储接口
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// 获取会话，不存在时创建
    async fn create_if_absent(&self, session_id: &str) -> Result<Session, StorageError>;

    /// 追加一轮，返回带序号的 Turn；返回 Ok 即已落盘
    async fn append(&self, session_id: &str, turn: NewTurn) -> Result<Turn, StorageError>;

    /// 最近 window 轮（时间正序）
    async fn recent_context(&self, session_id: &str, window: usize)
        -> Result<Vec<Turn>, StorageError>;

    /// 完整历史（时间正序）
    async fn history(&self, session_id: &str) -> Result<Vec<Turn>, StorageError>;
}

struct SessionLog {
    session: Session,
    turns: Vec<Turn>,
}

/// 内存存储：进程内有效，用于测试与离线演示
#[derive(Default)]
pub struct InMemoryStore {
    sessions: Mutex<HashMap<String, SessionLog>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储故障：之后的所有调用返回 Unavailable
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("in-memory store offline".into()));
        }
        Ok(())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, SessionLog>>, StorageError> {
        self.sessions
            .lock()
            .map_err(|_| StorageError::Unavailable("session map poisoned".into()))
    }
}

fn new_log(session_id: &str) -> SessionLog {
    let now = Utc::now();
    SessionLog {
        session: Session {
            id: session_id.to_string(),
            created_at: now,
            updated_at: now,
        },
        turns: Vec::new(),
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn create_if_absent(&self, session_id: &str) -> Result<Session, StorageError> {
        self.check()?;
        let mut sessions = self.lock()?;
        let log = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| new_log(session_id));
        Ok(log.session.clone())
    }

    async fn append(&self, session_id: &str, turn: NewTurn) -> Result<Turn, StorageError> {
        self.check()?;
        let mut sessions = self.lock()?;
        let log = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| new_log(session_id));
        let now = Utc::now();
        let seq = log.turns.last().map(|t| t.seq).unwrap_or(0) + 1;
        let turn = Turn::from_new(seq, now, turn);
        log.turns.push(turn.clone());
        log.session.updated_at = now;
        Ok(turn)
    }

    async fn recent_context(
        &self,
        session_id: &str,
        window: usize,
    ) -> Result<Vec<Turn>, StorageError> {
        self.check()?;
        let sessions = self.lock()?;
        Ok(sessions
            .get(session_id)
            .map(|log| {
                let start = log.turns.len().saturating_sub(window);
                log.turns[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn history(&self, session_id: &str) -> Result<Vec<Turn>, StorageError> {
        self.check()?;
        let sessions = self.lock()?;
        Ok(sessions
            .get(session_id)
            .map(|log| log.turns.clone())
            .unwrap_or_default())
    }
}
