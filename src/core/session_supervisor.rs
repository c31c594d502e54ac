//! 会话监管：同会话串行、取消与阶段跟踪
//!
//! 每个会话一把 FIFO 的 tokio Mutex，从读取上下文一直持有到持久化结束，
//! 保证同会话的轮次按提交顺序执行、seq 连续。不同会话互不阻塞。
//! 每轮持有一个 CancellationToken，`cancel(session_id)` 取消该会话当前的轮次；
//! 全局 token 用于进程关闭时取消所有轮次（包括调用方自带令牌的轮次）。
//! 会话槽在最后一个轮次结束且无人排队时移除。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::core::TurnPhase;

#[derive(Debug)]
struct SessionSlot {
    order: Arc<AsyncMutex<()>>,
    phase: Mutex<TurnPhase>,
    current: Mutex<Option<CancellationToken>>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            order: Arc::new(AsyncMutex::new(())),
            phase: Mutex::new(TurnPhase::Idle),
            current: Mutex::new(None),
        }
    }
}

type SessionMap = Arc<Mutex<HashMap<String, Arc<SessionSlot>>>>;

/// 一轮的占用凭证：drop 时释放会话锁并复位为 Idle
pub struct TurnGuard {
    session_id: String,
    sessions: SessionMap,
    slot: Arc<SessionSlot>,
    token: CancellationToken,
    /// 结束调用方令牌的转发任务
    _link: Option<DropGuard>,
    _permit: OwnedMutexGuard<()>,
}

impl TurnGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn set_phase(&self, phase: TurnPhase) {
        *self.slot.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        *self.slot.phase.lock().unwrap_or_else(|e| e.into_inner()) = TurnPhase::Idle;
        *self.slot.current.lock().unwrap_or_else(|e| e.into_inner()) = None;

        // 新的排队者必须先拿到 map 锁，所以在锁内计数是稳定的：map + 本凭证 = 2 即无人等待
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let idle = sessions
            .get(&self.session_id)
            .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2);
        if idle {
            sessions.remove(&self.session_id);
        }
    }
}

/// 会话级生命周期管理
#[derive(Debug)]
pub struct SessionSupervisor {
    sessions: SessionMap,
    /// 进程关闭时触发
    shutdown: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    fn slot(&self, session_id: &str) -> Arc<SessionSlot> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionSlot::new()))
            .clone()
    }

    /// 等待该会话的前序轮次结束后开始新一轮
    ///
    /// 轮次令牌总是派生自全局 token；调用方提供的令牌被取消时转发到轮次令牌。
    pub async fn begin_turn(
        &self,
        session_id: &str,
        caller: Option<CancellationToken>,
    ) -> TurnGuard {
        let slot = self.slot(session_id);
        let permit = slot.order.clone().lock_owned().await;
        let token = self.shutdown.child_token();
        let link = caller.map(|caller| {
            if caller.is_cancelled() {
                token.cancel();
            }
            let done = CancellationToken::new();
            let (turn, finished) = (token.clone(), done.clone());
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller.cancelled() => turn.cancel(),
                    _ = finished.cancelled() => {}
                }
            });
            done.drop_guard()
        });
        *slot.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        TurnGuard {
            session_id: session_id.to_string(),
            sessions: self.sessions.clone(),
            slot,
            token,
            _link: link,
            _permit: permit,
        }
    }

    /// 取消会话当前轮次；没有进行中的轮次返回 false
    pub fn cancel(&self, session_id: &str) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let current = sessions
            .get(session_id)
            .and_then(|slot| slot.current.lock().unwrap_or_else(|e| e.into_inner()).clone());
        match current {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消所有进行中的轮次
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn phase(&self, session_id: &str) -> TurnPhase {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .map(|slot| *slot.phase.lock().unwrap_or_else(|e| e.into_inner()))
            .unwrap_or(TurnPhase::Idle)
    }

    /// 当前有轮次进行或排队的会话数
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
