/// Current persistent-connection protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// JSON-RPC envelope tag.
pub const JSONRPC_VERSION: &str = "2.0";

/// Tool-calling protocol revision advertised by `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Returns true if a client-declared `protocolVersion` is served here.
pub fn is_supported_version(version: u64) -> bool {
    version == u64::from(PROTOCOL_VERSION)
}
