//! 并发测试：同会话串行、跨会话并行

use std::sync::Arc;
use std::time::{Duration, Instant};

use logistics_agents::agents::RawInput;
use logistics_agents::config::AppConfig;
use logistics_agents::core::{offline_reply, LogisticsService, ServiceBuilder};
use logistics_agents::llm::MockLlmClient;
use logistics_agents::memory::{InMemoryStore, MemoryStore};

async fn delayed_service(store: Arc<dyn MemoryStore>, delay_ms: u64) -> Arc<LogisticsService> {
    let mut config = AppConfig::default();
    config.business.offline = true;
    let llm = MockLlmClient::from_fn(offline_reply).with_delay(Duration::from_millis(delay_ms));
    Arc::new(
        ServiceBuilder::new(config)
            .with_llm(Arc::new(llm))
            .with_store(store)
            .build()
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn test_same_session_turns_follow_submission_order() {
    let store = Arc::new(InMemoryStore::new());
    let service = delayed_service(store.clone(), 20).await;

    let mut handles = Vec::new();
    for i in 0..5 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .handle_turn("s-1", RawInput::from_text(format!("第{i}条 查询 SF1234567890")))
                .await
        }));
        // 保证按提交顺序排队
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for handle in handles {
        let envelope = handle.await.unwrap();
        assert!(envelope.success, "{}", envelope.message);
    }

    let history = store.history("s-1").await.unwrap();
    assert_eq!(history.len(), 5);
    for (i, turn) in history.iter().enumerate() {
        assert_eq!(turn.seq, i as u64 + 1);
        assert_eq!(turn.input.text, format!("第{i}条 查询 SF1234567890"));
    }
}

#[tokio::test]
async fn test_sessions_run_in_parallel() {
    let store = Arc::new(InMemoryStore::new());
    let service = delayed_service(store.clone(), 50).await;

    let start = Instant::now();
    let mut handles = Vec::new();
    for session in 0..4 {
        for turn in 0..3 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .handle_turn(
                        &format!("s-{session}"),
                        RawInput::from_text(format!("{turn} SF1234567890")),
                    )
                    .await
            }));
        }
    }
    for handle in handles {
        assert!(handle.await.unwrap().success);
    }
    // 每轮三次后端调用；12 轮串行约 1.8s，按会话并行约 0.45s
    assert!(start.elapsed() < Duration::from_millis(1000));

    for session in 0..4 {
        let history = store.history(&format!("s-{session}")).await.unwrap();
        let seqs: Vec<u64> = history.iter().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
