//! JSON-RPC tool surfaces.

mod dispatch;
mod registry;

pub use dispatch::{map_tool_error, RpcDispatcher};
pub use registry::{ServerInfo, ToolDescriptor, ToolError, ToolRegistry};
