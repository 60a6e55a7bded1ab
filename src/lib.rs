//! # Vulpo
//!
//! Session coordination core for anti-detect browser automation.
//!
//! Vulpo owns the single mutable browser session behind an automation
//! surface: the lifecycle state machine, a registry of logical pages, a
//! bounded network log fed by passive request/response correlation, health
//! probes with crash recovery, and lock-guarded call metrics with
//! percentile statistics.
//!
//! The browser itself is an external collaborator reached through the
//! [`driver`] traits; any automation backend (or a test double) can sit
//! behind them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vulpo::{Config, LaunchOptions, LogFilter, MetricsCollector, Session};
//! # use vulpo::driver::Driver;
//! # async fn example<D: Driver>(driver: D) -> vulpo::Result<()> {
//! let config = Config::from_env();
//! let metrics = Arc::new(MetricsCollector::new());
//! let session = Session::new(driver, config, Arc::clone(&metrics));
//!
//! // Launch: page "main" is created and set active
//! session.launch(LaunchOptions::default()).await?;
//!
//! // Traffic lands in the bounded log as pages load
//! let entries = session.get_log(&LogFilter::default()).await;
//!
//! // Liveness and metrics
//! let health = session.health_check().await;
//! let summary = metrics.summary();
//! # let _ = (entries, health, summary);
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod instrument;
pub mod metrics;
pub mod network;
pub mod session;

// Re-exports
pub use config::{BrowserConfig, Config, NetworkConfig, TimeoutConfig};
pub use driver::{LaunchOptions, PageEvent, ProxyConfig, RequestEvent, ResponseEvent};
pub use error::{Error, Result};
pub use instrument::{traced, ToolCall};
pub use metrics::{MetricsCollector, MetricsSnapshot, ToolMetrics};
pub use network::{LogFilter, NetworkEntry};
pub use session::{
    HealthReport, HealthStatus, PageInfo, Recovery, Session, SessionInfo, SessionState,
};
