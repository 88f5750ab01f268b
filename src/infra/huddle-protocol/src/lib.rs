mod envelope;
mod error;
mod jsonrpc;
mod payload;
mod version;

pub use envelope::*;
pub use error::*;
pub use jsonrpc::*;
pub use payload::*;
pub use version::*;
