//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 支持固定回复、按序回复、固定失败、自定义函数，以及人为延迟（并发测试用）。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::Message;

type Responder = Box<dyn Fn(&[Message]) -> Result<String, String> + Send + Sync>;

/// Mock 客户端
pub struct MockLlmClient {
    queue: Mutex<VecDeque<Result<String, String>>>,
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::fixed("{}")
    }
}

impl MockLlmClient {
    /// 每次返回同一内容
    pub fn fixed(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::from_fn(move |_| Ok(reply.clone()))
    }

    /// 每次都失败
    pub fn failing(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::from_fn(move |_| Err(error.clone()))
    }

    /// 依次返回给定回复；用完后返回错误
    pub fn sequence<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::from_fn(|_| Err("mock replies exhausted".to_string()));
        if let Ok(mut queue) = client.queue.lock() {
            queue.extend(replies.into_iter().map(|r| Ok(r.into())));
        }
        client
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&[Message]) -> Result<String, String> + Send + Sync + 'static,
    {
        Self {
            queue: Mutex::new(VecDeque::new()),
            responder: Box::new(f),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        match queued {
            Some(reply) => reply,
            None => (self.responder)(messages),
        }
    }
}
