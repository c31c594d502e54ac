//! 异步 SQLite 会话日志（sqlx）
//!
//! 两张表：sessions（元数据）与 turns（每轮一行，payload 为 Turn 的 JSON）。
//! 追加在单个事务内完成，首条语句即写入以直接拿到写锁；`UNIQUE(session_id, seq)` 兜底序号唯一。

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::memory::{MemoryStore, NewTurn, Session, StorageError, Turn};

/// SQLite 持久化的会话存储
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    /// 打开（必要时创建）数据库文件并建表
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            }
        }
        let url = format!("sqlite:{}", db_path.as_ref().display());
        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        tracing::info!(path = %db_path.as_ref().display(), "SQLite memory store ready");
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (session_id, seq),
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_turns_session_seq ON turns(session_id, seq)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn decode_turns(session_id: &str, rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<Turn>, StorageError> {
        rows.into_iter()
            .map(|row| {
                let payload: String = row.get("payload");
                serde_json::from_str::<Turn>(&payload).map_err(|e| StorageError::Corrupt {
                    session_id: session_id.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

fn parse_time(session_id: &str, raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            session_id: session_id.to_string(),
            reason: format!("bad timestamp {raw}: {e}"),
        })
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn create_if_absent(&self, session_id: &str) -> Result<Session, StorageError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("INSERT OR IGNORE INTO sessions (id, created_at, updated_at) VALUES (?, ?, ?)")
            .bind(session_id)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query("SELECT created_at, updated_at FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        let created: String = row.get("created_at");
        let updated: String = row.get("updated_at");

        Ok(Session {
            id: session_id.to_string(),
            created_at: parse_time(session_id, &created)?,
            updated_at: parse_time(session_id, &updated)?,
        })
    }

    async fn append(&self, session_id: &str, turn: NewTurn) -> Result<Turn, StorageError> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO sessions (id, created_at, updated_at) VALUES (?, ?, ?)")
            .bind(session_id)
            .bind(&now_str)
            .bind(&now_str)
            .execute(&mut *tx)
            .await?;

        let last: i64 = sqlx::query("SELECT COALESCE(MAX(seq), 0) AS last FROM turns WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await?
            .get("last");
        let seq = (last + 1) as u64;

        let turn = Turn::from_new(seq, now, turn);
        let payload = serde_json::to_string(&turn).map_err(|e| StorageError::Corrupt {
            session_id: session_id.to_string(),
            reason: e.to_string(),
        })?;

        sqlx::query("INSERT INTO turns (session_id, seq, payload, created_at) VALUES (?, ?, ?, ?)")
            .bind(session_id)
            .bind(seq as i64)
            .bind(&payload)
            .bind(&now_str)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(&now_str)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(session_id, seq, "turn appended");
        Ok(turn)
    }

    async fn recent_context(
        &self,
        session_id: &str,
        window: usize,
    ) -> Result<Vec<Turn>, StorageError> {
        if window == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT payload FROM turns WHERE session_id = ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(window as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = Self::decode_turns(session_id, rows)?;
        turns.reverse();
        Ok(turns)
    }

    async fn history(&self, session_id: &str) -> Result<Vec<Turn>, StorageError> {
        let rows = sqlx::query("SELECT payload FROM turns WHERE session_id = ? ORDER BY seq ASC")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
        Self::decode_turns(session_id, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::RawInput;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sqlite_append_and_recent() {
        let dir = TempDir::new().unwrap();
        let store = SqliteMemoryStore::new(dir.path().join("memory.db")).await.unwrap();

        for i in 0..4 {
            let t = store
                .append("sess", NewTurn::new(RawInput::from_text(format!("q{i}"))))
                .await
                .unwrap();
            assert_eq!(t.seq, i + 1);
        }

        let recent = store.recent_context("sess", 3).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|t| t.input.text.as_str()).collect();
        assert_eq!(texts, vec!["q1", "q2", "q3"]);
        assert_eq!(store.history("sess").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_sqlite_creates_missing_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("nested").join("memory.db");
        let store = SqliteMemoryStore::new(&path).await.unwrap();
        store.create_if_absent("sess").await.unwrap();
        assert!(path.exists());

        let blocker = dir.path().join("plain-file");
        std::fs::write(&blocker, b"x").unwrap();
        let err = SqliteMemoryStore::new(blocker.join("memory.db")).await;
        assert!(matches!(err, Err(StorageError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_sqlite_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.db");
        {
            let store = SqliteMemoryStore::new(&path).await.unwrap();
            store
                .append("sess", NewTurn::new(RawInput::from_text("first")))
                .await
                .unwrap();
            store.close().await;
        }

        let store = SqliteMemoryStore::new(&path).await.unwrap();
        let history = store.history("sess").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].input.text, "first");

        let next = store
            .append("sess", NewTurn::new(RawInput::from_text("second")))
            .await
            .unwrap();
        assert_eq!(next.seq, 2);
    }

    #[tokio::test]
    async fn test_sqlite_sessions_are_independent() {
        let dir = TempDir::new().unwrap();
        let store = SqliteMemoryStore::new(dir.path().join("memory.db")).await.unwrap();
        let session = store.create_if_absent("a").await.unwrap();
        assert_eq!(session.id, "a");

        store.append("a", NewTurn::new(RawInput::from_text("a1"))).await.unwrap();
        let b = store.append("b", NewTurn::new(RawInput::from_text("b1"))).await.unwrap();
        assert_eq!(b.seq, 1);
        assert!(store.recent_context("c", 5).await.unwrap().is_empty());
    }
}
