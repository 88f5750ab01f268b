//! Chat runs: provider abstraction, conversation directory, and the
//! coordinator tying them to the run primitives and the event hub.

mod coordinator;
mod directory;
mod echo;
mod provider;

pub use coordinator::RunCoordinator;
pub use directory::{ConversationDirectory, MemoryConversations};
pub use echo::EchoProvider;
pub use provider::{
    is_reconnect_notice, BoxFuture, ChatProvider, ProviderError, ProviderEvent, TurnOutput,
    TurnRequest,
};
