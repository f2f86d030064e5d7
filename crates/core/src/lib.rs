//! Team-scoped routing of MCP tool calls onto the browser pool.
//!
//! - [`SessionRegistry`]: opaque session handle → owning team
//! - [`Router`]: authorises, allocates, invokes, and releases
//! - [`McpToolHandler`]: plugs the router into the protocol dispatcher

pub mod error;
pub mod handler;
pub mod registry;
pub mod router;
pub mod tools;

pub use error::{ErrorCode, Result, RouteError, RouterError};
pub use handler::McpToolHandler;
pub use registry::{RegistryStatistics, SessionRecord, SessionRegistry};
pub use router::{RouteMetadata, RouteRequest, RouteResponse, Router};
pub use tools::{ToolCall, catalog};
