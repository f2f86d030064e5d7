//! Protocol layer for the pw-mcp server.
//!
//! Everything here is transport-agnostic:
//!
//! - **Envelope**: JSON-RPC 2.0 request/response shapes and validation
//! - **Handshake**: MCP version negotiation, pure and idempotent
//! - **Dispatch**: per-peer state machine routing `initialize`,
//!   `tools/list` and `tools/call` to registered handlers
//! - **Context**: caller identity and per-call correlation
//!
//! Transports decode frames, call [`parse_envelope`], and hand the result to
//! a [`Dispatcher`]. What they do with envelope errors is up to them.

pub mod context;
pub mod dispatch;
pub mod jsonrpc;
pub mod mcp;
pub mod negotiate;

pub use context::{CallerIdentity, RequestContext};
pub use dispatch::{Dispatcher, Handlers, ProtocolState, ToolCallHandler, ToolListHandler};
pub use jsonrpc::{
	EnvelopeError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, JsonRpcError, JsonRpcId,
	JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND, PARSE_ERROR, parse_envelope, recover_id,
};
pub use mcp::{
	CallToolParams, CallToolResult, ContentBlock, InitializeParams, InitializeResult, ListToolsResult,
	ServerCapabilities, ServerInfo, ToolDescriptor,
};
pub use negotiate::{Negotiation, SERVER_NAME, SERVER_VERSION, SUPPORTED_PROTOCOL_VERSIONS, negotiate};
