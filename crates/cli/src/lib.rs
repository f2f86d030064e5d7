//! pw-mcp server: transports, configuration, and process wiring.
//!
//! ```text
//! client ── stdio | socket | fifo | http ── Dispatcher (initialize, tools/*)
//!                                              └─ McpToolHandler ── Router ── PoolManager
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod transport;

pub use app::App;
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use transport::Transport;
