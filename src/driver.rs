//! Driver Seam
//!
//! The browser itself is an external collaborator. The session core talks to
//! it through these traits and consumes its network traffic as a stream of
//! [`PageEvent`]s, so any automation backend (and any test double) can sit
//! behind them.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Proxy settings forwarded to the driver at launch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Options for launching a browser.
///
/// `None` fields fall back to the configured browser defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchOptions {
    pub headless: Option<bool>,
    pub humanize: Option<bool>,
    pub proxy: Option<ProxyConfig>,
    /// OS fingerprint to present (e.g. "windows", "macos", "linux")
    pub os_profile: Option<String>,
    /// Derive geolocation from the egress IP
    pub geoip: bool,
    pub block_images: bool,
    /// Browser locale (e.g. "en-US")
    pub locale: Option<String>,
}

/// One observed request, emitted when the browser sends it
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    /// Post data, when the driver has it at hand
    pub body: Option<String>,
    /// Resource type as reported by the driver (document, script, xhr, ...)
    pub resource_type: String,
    /// Opaque per-request id, when the driver's protocol provides one
    pub correlation_id: Option<String>,
}

/// One observed response, emitted when headers (and best-effort body) arrive
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub url: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Body text, absent when the driver could not read it
    pub body: Option<String>,
    /// Timing breakdown; `requestStart` and `responseEnd` drive the computed
    /// duration when both are present
    pub timing: HashMap<String, f64>,
    /// Matches the `correlation_id` of the originating request event
    pub correlation_id: Option<String>,
}

/// Network traffic events for a single page
#[derive(Debug, Clone)]
pub enum PageEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
}

/// Launches browsers
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Browser: BrowserHandle<Page = Self::Page>;
    type Page: PageHandle;

    /// Launch a browser process. The core bounds this call with the
    /// configured launch timeout.
    async fn launch(&self, options: &LaunchOptions) -> Result<Self::Browser>;
}

/// A running browser owned by the session
#[async_trait]
pub trait BrowserHandle: Send + Sync + 'static {
    type Page: PageHandle;

    /// Open a fresh page at about:blank
    async fn new_page(&self) -> Result<Self::Page>;

    /// Tear the browser down. Best-effort; the core bounds and ignores
    /// failures here.
    async fn close(&self) -> Result<()>;
}

/// A single page within the browser
#[async_trait]
pub trait PageHandle: Send + Sync + 'static {
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Evaluate a JavaScript expression and return its JSON value
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;

    /// Current URL of the page
    async fn current_url(&self) -> Result<String>;

    async fn set_viewport(&self, width: u32, height: u32) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Subscribe to this page's network traffic.
    ///
    /// Events arrive in the order the driver emitted them. The core attaches
    /// exactly one consumer per page, at page creation time.
    fn network_events(&self) -> mpsc::UnboundedReceiver<PageEvent>;
}
