//! Browser pool runtime for pw-mcp.
//!
//! - **Instance seam**: [`BrowserInstance`] / [`BrowserFactory`], the only
//!   contact between the pool and an automation backend
//! - **Strategies**: round-robin, least-used, and team-isolated allocation
//! - **Pool**: [`PoolManager`], sized, health-checked, idle-evicted
//! - **Chromium**: [`ChromeFactory`], headless Chromium driven over CDP
//!
//! ```text
//! allocate(request)
//!   └─ PoolManager ── strategy.select / should_create_new
//!                  └─ BrowserFactory::create ── ChromeInstance (CDP)
//! ```

pub mod cdp;
pub mod chrome;
pub mod config;
pub mod error;
pub mod events;
pub mod inspect;
pub mod instance;
pub mod metrics;
pub mod pool;
pub mod strategy;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chrome::{BrowserSettings, ChromeFactory, ChromeInstance};
pub use config::{AllocationStrategyKind, PoolConfig};
pub use error::{InstanceError, PoolError, Result};
pub use events::{PoolEvent, RemovalReason};
pub use inspect::ProcessInspector;
pub use instance::{BrowserFactory, BrowserInstance, BrowserKind, HealthStatus, InstanceState};
pub use metrics::PoolMetrics;
pub use pool::{Allocation, InstanceSnapshot, PoolManager, PoolStatus, ShutdownSummary};
pub use strategy::{AllocationRequest, AllocationStrategy};
