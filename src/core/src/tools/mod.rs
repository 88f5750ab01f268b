//! Tool registries mounted as JSON-RPC surfaces.

mod args;
mod chat;
mod runs;

pub use chat::ChatTools;
pub use runs::RunTools;
