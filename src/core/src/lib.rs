mod config;
mod connection;
mod huddle_config;
mod outbound;
mod paths;
mod server;

pub mod chat;
pub mod events;
pub mod rpc;
pub mod runs;
pub mod tools;

pub use chat::{
    ChatProvider, ConversationDirectory, EchoProvider, MemoryConversations, RunCoordinator,
};
pub use config::ServerConfig;
pub use connection::IDLE_CLOSE_CODE;
pub use events::{EventHub, HubConnection, INITIAL_SEQ};
pub use huddle_config::{HuddleConfig, ProviderKind};
pub use outbound::OutboundMessage;
pub use rpc::{RpcDispatcher, ToolRegistry};
pub use runs::{ConversationLocks, InflightRegistry, RetryPolicy};
pub use server::{build_router, default_surfaces, RpcSurface};
