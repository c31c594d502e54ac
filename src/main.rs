//! logi：物流多智能体命令行
//!
//! 从标准输入逐行读取用户消息，在同一会话中处理并打印回复。
//!
//! 用法: logi [--config <path>] [--session <id>]
//!
//! 环境变量:
//! - DASHSCOPE_API_KEY 或 OPENAI_API_KEY: LLM API Key
//! - LOGI__LLM__PROVIDER=mock: 离线运行（规则后端 + 示例运单）
//!
//! 行内命令: `/history` 打印会话历史，`/quit` 退出

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use logistics_agents::agents::RawInput;
use logistics_agents::config::load_config;
use logistics_agents::{observability, ServiceBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};

struct Args {
    config: Option<PathBuf>,
    session: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        config: None,
        session: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => args.config = Some(iter.next().context("--config needs a path")?.into()),
            "--session" => args.session = Some(iter.next().context("--session needs an id")?),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = parse_args()?;
    let config = load_config(args.config).context("Failed to load config")?;
    let service = Arc::new(
        ServiceBuilder::new(config)
            .build()
            .await
            .context("Failed to build service")?,
    );

    let session_id = args
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    tracing::info!(session_id = %session_id, "session started");

    // 中断时取消进行中的轮次，等它落库后再退出
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut interrupted = false;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut interrupt => {
                interrupted = true;
                None
            }
        };
        let Some(line) = line else { break };
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/history" => {
                let turns = service
                    .history(&session_id)
                    .await
                    .context("Failed to read history")?;
                for turn in turns {
                    println!("#{} > {}", turn.seq, turn.input.text);
                    println!("{}\n", turn.dialog.reply);
                }
            }
            text => {
                let turn = service.handle_turn(&session_id, RawInput::from_text(text));
                tokio::pin!(turn);
                let envelope = tokio::select! {
                    envelope = &mut turn => envelope,
                    _ = &mut interrupt => {
                        tracing::info!("interrupt received, cancelling in-flight turn");
                        interrupted = true;
                        service.shutdown();
                        turn.await
                    }
                };
                println!("{}\n", envelope.message);
                if interrupted {
                    break;
                }
            }
        }
    }

    if interrupted {
        tracing::info!(session_id = %session_id, "exiting after interrupt");
        std::process::exit(130);
    }
    Ok(())
}
