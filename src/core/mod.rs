//! 核心层：错误分类、单轮状态机、会话监管、编排器与服务装配

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod session_supervisor;
pub mod state;

pub use builder::{offline_reply, ServiceBuilder};
pub use error::{ErrorKind, PipelineError};
pub use orchestrator::{LogisticsService, TurnOutcome};
pub use session_supervisor::{SessionSupervisor, TurnGuard};
pub use state::{TurnMachine, TurnPhase};
