//! 工具层：注册表、Schema 校验、调用协议、执行器与内置地址匹配工具

pub mod address_match;
pub mod executor;
pub mod protocol;
pub mod registry;
pub mod remote;
pub mod schema;

use thiserror::Error;

pub use address_match::{address_match_plan, AddressMatchTool, ADDRESS_MATCH_TOOL};
pub use executor::ToolExecutor;
pub use protocol::{ToolHandle, ToolRequest, ToolResponse};
pub use registry::{RegisteredTool, ToolRegistry};
pub use remote::HttpToolHandle;
pub use schema::ToolSchema;

/// 工具调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool {tool} failed ({kind}): {detail}")]
    Remote {
        tool: String,
        kind: String,
        detail: String,
    },

    #[error("Tool timeout: {0}")]
    Timeout(String),

    #[error("Tool transport error: {0}")]
    Transport(String),
}
