//! Browser Session
//!
//! Owns the single mutable browser session: the lifecycle state machine, the
//! page registry, network capture wiring, health probes, and crash recovery.
//!
//! Driver calls are awaited outside the session lock, so tool calls may
//! interleave at those suspension points; the state machine transitions are
//! the only hard ordering guarantee.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::Config;
use crate::driver::{BrowserHandle, Driver, LaunchOptions, PageHandle};
use crate::error::{Error, Result};
use crate::metrics::MetricsCollector;
use crate::network::{
    CaptureSettings, LogFilter, NetworkCorrelator, NetworkEntry, NetworkLog,
};

/// Page id registered at launch and never closable on its own
pub const MAIN_PAGE_ID: &str = "main";

/// Lifecycle of the browser session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Stopped,
    Launching,
    Running,
    Recovering,
    Crashed,
}

/// Probe outcome categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Stopped,
    Degraded,
    Running,
    Unresponsive,
    Error,
}

/// Result of a health probe. Never mutates session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub status: HealthStatus,
    pub latency_ms: Option<f64>,
    pub uptime_seconds: Option<f64>,
    pub page_count: Option<usize>,
    pub network_log_size: Option<usize>,
    pub message: Option<String>,
}

impl HealthReport {
    /// Error-kind view of an unhealthy report, for handlers that branch on
    /// kinds instead of status strings
    pub fn as_error(&self) -> Option<Error> {
        let message = || self.message.clone().unwrap_or_default();
        match self.status {
            HealthStatus::Running => None,
            HealthStatus::Stopped | HealthStatus::Degraded => Some(Error::NotRunning),
            HealthStatus::Unresponsive => Some(Error::Unresponsive(message())),
            HealthStatus::Error => Some(Error::Probe(message())),
        }
    }

    fn unhealthy(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            status,
            latency_ms: None,
            uptime_seconds: None,
            page_count: None,
            network_log_size: None,
            message: Some(message.into()),
        }
    }
}

/// Outcome of a successful recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Recovery {
    /// Relaunched; there was no prior URL to restore
    Relaunched,
    /// Relaunched and navigated back to the prior URL
    Restored { url: String },
    /// Relaunched, but navigating back to the prior URL failed. The browser
    /// itself is usable, so this still counts as a recovery.
    UrlNotRestored { url: String, reason: String },
}

/// One page as seen from the outside
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    pub id: String,
    pub url: String,
    pub is_active: bool,
}

/// Read-only snapshot of the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub state: SessionState,
    pub pages: Vec<PageInfo>,
    pub active_page_id: Option<String>,
    pub capture_enabled: bool,
    pub capture_bodies: bool,
    pub network_log_size: usize,
    pub uptime_seconds: f64,
    pub total_calls: u64,
    pub total_errors: u64,
}

/// Insertion-ordered page registry.
///
/// Iteration order is creation order, which pins "first remaining key" to a
/// deterministic choice when the active page is closed. Re-registering an
/// existing id replaces the handle in place (last writer wins).
struct PageRegistry<P> {
    pages: Vec<(String, Arc<P>)>,
}

impl<P> PageRegistry<P> {
    fn new() -> Self {
        Self { pages: Vec::new() }
    }

    fn len(&self) -> usize {
        self.pages.len()
    }

    fn contains(&self, id: &str) -> bool {
        self.pages.iter().any(|(pid, _)| pid == id)
    }

    fn get(&self, id: &str) -> Option<Arc<P>> {
        self.pages
            .iter()
            .find(|(pid, _)| pid == id)
            .map(|(_, page)| Arc::clone(page))
    }

    fn insert(&mut self, id: &str, page: Arc<P>) {
        match self.pages.iter_mut().find(|(pid, _)| pid == id) {
            Some(slot) => slot.1 = page,
            None => self.pages.push((id.to_string(), page)),
        }
    }

    fn remove(&mut self, id: &str) -> Option<Arc<P>> {
        let index = self.pages.iter().position(|(pid, _)| pid == id)?;
        Some(self.pages.remove(index).1)
    }

    fn first_id(&self) -> Option<&str> {
        self.pages.first().map(|(id, _)| id.as_str())
    }

    fn ids(&self) -> Vec<String> {
        self.pages.iter().map(|(id, _)| id.clone()).collect()
    }

    fn snapshot(&self) -> Vec<(String, Arc<P>)> {
        self.pages
            .iter()
            .map(|(id, page)| (id.clone(), Arc::clone(page)))
            .collect()
    }

    fn clear(&mut self) {
        self.pages.clear();
    }
}

struct Inner<D: Driver> {
    state: SessionState,
    browser: Option<Arc<D::Browser>>,
    pages: PageRegistry<D::Page>,
    active_page_id: Option<String>,
    launch_time: Option<DateTime<Utc>>,
    last_options: LaunchOptions,
    correlator_tasks: Vec<JoinHandle<()>>,
}

/// The single browser session.
///
/// Construct one per process and hand a reference into every tool handler;
/// tests construct their own instances against a mock driver.
pub struct Session<D: Driver> {
    driver: D,
    config: Config,
    metrics: Arc<MetricsCollector>,
    capture: Arc<CaptureSettings>,
    log: Arc<Mutex<NetworkLog>>,
    inner: Mutex<Inner<D>>,
}

impl<D: Driver> Session<D> {
    pub fn new(driver: D, config: Config, metrics: Arc<MetricsCollector>) -> Self {
        let capture = Arc::new(CaptureSettings::new(
            config.network.capture_by_default,
            config.network.capture_bodies_by_default,
        ));
        let log = Arc::new(Mutex::new(NetworkLog::new(config.network.max_log_entries)));

        Self {
            driver,
            config,
            metrics,
            capture,
            log,
            inner: Mutex::new(Inner {
                state: SessionState::Stopped,
                browser: None,
                pages: PageRegistry::new(),
                active_page_id: None,
                launch_time: None,
                last_options: LaunchOptions::default(),
                correlator_tasks: Vec::new(),
            }),
        }
    }

    /// Shared metrics collector
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == SessionState::Running
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Launch a browser session.
    ///
    /// Fails with [`Error::AlreadyRunning`] unless the session is Stopped.
    /// The driver call is bounded by the configured launch timeout; on
    /// timeout or failure the session is cleaned back up to Stopped.
    pub async fn launch(&self, options: LaunchOptions) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Stopped {
                return Err(Error::AlreadyRunning);
            }
            inner.state = SessionState::Launching;
            inner.last_options = options.clone();
        }

        self.launch_inner(&options).await
    }

    /// Launch without the Stopped guard; shared by launch() and recover().
    /// On success the state is Running, on failure Stopped.
    async fn launch_inner(&self, options: &LaunchOptions) -> Result<()> {
        let options = self.effective_options(options);
        let launch_ms = self.config.timeouts.browser_launch_ms;

        let browser = match timeout(
            Duration::from_millis(launch_ms),
            self.driver.launch(&options),
        )
        .await
        {
            Ok(Ok(browser)) => Arc::new(browser),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "browser_launch_error");
                self.cleanup_to(SessionState::Stopped).await;
                return Err(Error::LaunchFailure(e.to_string()));
            }
            Err(_) => {
                tracing::error!(timeout_ms = launch_ms, "browser_launch_timeout");
                self.cleanup_to(SessionState::Stopped).await;
                return Err(Error::LaunchTimeout {
                    timeout_ms: launch_ms,
                });
            }
        };

        // Capture switches reset to configured defaults on every launch.
        self.capture.set(
            self.config.network.capture_by_default,
            self.config.network.capture_bodies_by_default,
        );

        let page = match self.prepare_page(&browser).await {
            Ok(page) => page,
            Err(e) => {
                self.discard_browser(&browser).await;
                self.cleanup_to(SessionState::Stopped).await;
                return Err(Error::LaunchFailure(e.to_string()));
            }
        };
        let task = self.wire_capture(&page);

        {
            let mut inner = self.inner.lock().await;
            inner.browser = Some(browser);
            inner.pages.insert(MAIN_PAGE_ID, page);
            inner.active_page_id = Some(MAIN_PAGE_ID.to_string());
            inner.launch_time = Some(Utc::now());
            inner.correlator_tasks.push(task);
            inner.state = SessionState::Running;
        }

        self.metrics.record_browser_launch();
        self.metrics.record_page_created();
        tracing::info!(
            headless = options.headless,
            humanize = options.humanize,
            proxy_enabled = options.proxy.is_some(),
            "browser_launched"
        );
        Ok(())
    }

    /// Close the browser session and clean up resources. Idempotent.
    pub async fn close(&self) {
        self.cleanup_to(SessionState::Stopped).await;
        tracing::info!("browser_closed");
    }

    /// Best-effort teardown: abort correlator tasks, close the browser
    /// bounded by the page-close timeout, clear registry and log. Failures
    /// are warned, never escalated.
    async fn cleanup_to(&self, state: SessionState) {
        let (browser, tasks) = {
            let mut inner = self.inner.lock().await;
            let browser = inner.browser.take();
            let tasks = std::mem::take(&mut inner.correlator_tasks);
            inner.pages.clear();
            inner.active_page_id = None;
            inner.launch_time = None;
            inner.state = state;
            (browser, tasks)
        };

        for task in tasks {
            task.abort();
        }

        if let Some(browser) = browser {
            self.discard_browser(&browser).await;
        }

        self.log.lock().await.clear();
    }

    async fn discard_browser(&self, browser: &D::Browser) {
        let close_ms = self.config.timeouts.page_close_ms;
        match timeout(Duration::from_millis(close_ms), browser.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "browser_cleanup_error"),
            Err(_) => tracing::warn!(timeout_ms = close_ms, "browser_cleanup_timeout"),
        }
    }

    /// Create a page, wire capture, and apply the default viewport
    async fn prepare_page(&self, browser: &D::Browser) -> Result<Arc<D::Page>> {
        let page = Arc::new(browser.new_page().await?);
        page.set_viewport(
            self.config.browser.default_viewport_width,
            self.config.browser.default_viewport_height,
        )
        .await?;
        Ok(page)
    }

    fn wire_capture(&self, page: &Arc<D::Page>) -> JoinHandle<()> {
        let correlator = Arc::new(NetworkCorrelator::new(
            Arc::clone(&self.log),
            Arc::clone(&self.capture),
            Arc::clone(&self.metrics),
            self.config.network.max_body_bytes,
        ));
        correlator.attach(page.network_events())
    }

    fn effective_options(&self, options: &LaunchOptions) -> LaunchOptions {
        let mut options = options.clone();
        options.headless = options
            .headless
            .or(Some(self.config.browser.default_headless));
        options.humanize = options
            .humanize
            .or(Some(self.config.browser.default_humanize));
        options
    }

    // =========================================================================
    // Pages
    // =========================================================================

    /// Create a new page and make it active.
    ///
    /// Registering an id twice replaces the previous mapping.
    pub async fn new_page(&self, id: &str) -> Result<()> {
        let browser = {
            let inner = self.inner.lock().await;
            if inner.state != SessionState::Running {
                return Err(Error::NotRunning);
            }
            if inner.pages.len() >= self.config.browser.max_pages {
                return Err(Error::PageLimitExceeded {
                    max_pages: self.config.browser.max_pages,
                });
            }
            match inner.browser {
                Some(ref browser) => Arc::clone(browser),
                None => return Err(Error::NotRunning),
            }
        };

        let page = self.prepare_page(&browser).await?;
        let task = self.wire_capture(&page);

        {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Running {
                // Session was torn down while the page was being created.
                task.abort();
                return Err(Error::NotRunning);
            }
            inner.pages.insert(id, page);
            inner.active_page_id = Some(id.to_string());
            inner.correlator_tasks.push(task);
        }

        self.metrics.record_page_created();
        tracing::info!(page_id = %id, "page_created");
        Ok(())
    }

    /// Make an existing page the active one
    pub async fn switch_page(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.pages.contains(id) {
            return Err(Error::PageNotFound(id.to_string()));
        }
        inner.active_page_id = Some(id.to_string());
        tracing::debug!(page_id = %id, "page_switched");
        Ok(())
    }

    /// Close one page.
    ///
    /// The last remaining page can never be closed here, whatever its id;
    /// only [`Session::close`] tears everything down. Closing the active
    /// page reassigns the first remaining page as active.
    pub async fn close_page(&self, id: &str) -> Result<()> {
        let page = {
            let mut inner = self.inner.lock().await;
            if !inner.pages.contains(id) {
                return Err(Error::PageNotFound(id.to_string()));
            }
            if inner.pages.len() == 1 {
                return Err(Error::CannotCloseLastPage);
            }
            let page = inner.pages.remove(id);
            if inner.active_page_id.as_deref() == Some(id) {
                inner.active_page_id = inner.pages.first_id().map(str::to_owned);
            }
            page
        };

        if let Some(page) = page {
            let close_ms = self.config.timeouts.page_close_ms;
            match timeout(Duration::from_millis(close_ms), page.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(page_id = %id, error = %e, "page_close_error"),
                Err(_) => tracing::warn!(page_id = %id, "page_close_timeout"),
            }
        }

        self.metrics.record_page_closed();
        tracing::info!(page_id = %id, "page_closed");
        Ok(())
    }

    /// Handle of the page untargeted operations act upon
    pub async fn active_page(&self) -> Result<Arc<D::Page>> {
        let inner = self.inner.lock().await;
        if inner.state != SessionState::Running {
            return Err(Error::NotRunning);
        }
        inner
            .active_page_id
            .as_ref()
            .and_then(|id| inner.pages.get(id))
            .ok_or(Error::NotRunning)
    }

    /// Registered page ids, in creation order
    pub async fn page_ids(&self) -> Vec<String> {
        self.inner.lock().await.pages.ids()
    }

    // =========================================================================
    // Info / Health / Recovery
    // =========================================================================

    /// Read-only snapshot of the session
    pub async fn get_info(&self) -> SessionInfo {
        let (state, pages, active_page_id, launch_time) = {
            let inner = self.inner.lock().await;
            (
                inner.state,
                inner.pages.snapshot(),
                inner.active_page_id.clone(),
                inner.launch_time,
            )
        };

        let mut page_infos = Vec::with_capacity(pages.len());
        for (id, page) in pages {
            let url = page
                .current_url()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            page_infos.push(PageInfo {
                is_active: active_page_id.as_deref() == Some(id.as_str()),
                id,
                url,
            });
        }

        let (total_calls, total_errors) = self.metrics.totals();

        SessionInfo {
            state,
            pages: page_infos,
            active_page_id,
            capture_enabled: self.capture.enabled(),
            capture_bodies: self.capture.bodies(),
            network_log_size: self.log.lock().await.len(),
            uptime_seconds: uptime_seconds(launch_time),
            total_calls,
            total_errors,
        }
    }

    /// Probe browser responsiveness. Never mutates state.
    pub async fn health_check(&self) -> HealthReport {
        let (state, active_page, page_count, launch_time) = {
            let inner = self.inner.lock().await;
            let active = inner
                .active_page_id
                .as_ref()
                .and_then(|id| inner.pages.get(id));
            (inner.state, active, inner.pages.len(), inner.launch_time)
        };

        if matches!(state, SessionState::Stopped | SessionState::Launching) {
            return HealthReport::unhealthy(HealthStatus::Stopped, "Browser not running");
        }

        let Some(page) = active_page else {
            return HealthReport::unhealthy(HealthStatus::Degraded, "No active page");
        };

        let probe_ms = self.config.timeouts.health_probe_ms;
        let start = std::time::Instant::now();
        match timeout(Duration::from_millis(probe_ms), page.evaluate("1 + 1")).await {
            Ok(Ok(_)) => {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                HealthReport {
                    healthy: true,
                    status: HealthStatus::Running,
                    latency_ms: Some(latency_ms),
                    uptime_seconds: Some(uptime_seconds(launch_time)),
                    page_count: Some(page_count),
                    network_log_size: Some(self.log.lock().await.len()),
                    message: None,
                }
            }
            Err(_) => HealthReport::unhealthy(
                HealthStatus::Unresponsive,
                format!("Browser not responding (timeout after {probe_ms}ms)"),
            ),
            Ok(Err(e)) => HealthReport::unhealthy(HealthStatus::Error, e.to_string()),
        }
    }

    /// Mark a running session as crashed.
    ///
    /// For the embedding layer's process watcher; recover() accepts the
    /// session from here.
    pub async fn mark_crashed(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Running {
            inner.state = SessionState::Crashed;
            tracing::warn!("browser_marked_crashed");
        }
    }

    /// Tear down and relaunch after a crash or hang, restoring the prior
    /// URL when possible.
    ///
    /// Requires the state to be Running or Crashed; the Recovering state
    /// held for the duration serializes reentrant calls.
    pub async fn recover(&self) -> Result<Recovery> {
        if !self.config.browser.auto_recover {
            return Err(Error::RecoveryDisabled);
        }

        let (options, active_page) = {
            let mut inner = self.inner.lock().await;
            if !matches!(inner.state, SessionState::Running | SessionState::Crashed) {
                return Err(Error::NotRunning);
            }
            inner.state = SessionState::Recovering;
            let active = inner
                .active_page_id
                .as_ref()
                .and_then(|id| inner.pages.get(id));
            (inner.last_options.clone(), active)
        };

        tracing::info!("browser_recovery_attempt");
        self.metrics.record_browser_crash();

        // Best-effort: remember where the active page was.
        let last_url = match active_page {
            Some(page) => {
                let probe_ms = self.config.timeouts.health_probe_ms;
                timeout(Duration::from_millis(probe_ms), page.current_url())
                    .await
                    .ok()
                    .and_then(|r| r.ok())
            }
            None => None,
        };

        self.cleanup_to(SessionState::Recovering).await;

        if let Err(e) = self.launch_inner(&options).await {
            // launch_inner already put the state back to Stopped.
            return Err(Error::recovery_failed(e.to_string()));
        }

        let Some(url) = last_url.filter(|u| u != "about:blank") else {
            return Ok(Recovery::Relaunched);
        };

        let Ok(page) = self.active_page().await else {
            return Ok(Recovery::Relaunched);
        };

        let nav_ms = self.config.timeouts.navigation_ms;
        match timeout(Duration::from_millis(nav_ms), page.navigate(&url)).await {
            Ok(Ok(())) => {
                tracing::info!(restored_url = %url, "browser_recovered");
                Ok(Recovery::Restored { url })
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "recovery_navigation_failed");
                Ok(Recovery::UrlNotRestored {
                    url,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                tracing::warn!(timeout_ms = nav_ms, "recovery_navigation_timeout");
                Ok(Recovery::UrlNotRestored {
                    url,
                    reason: format!("navigation timed out after {nav_ms}ms"),
                })
            }
        }
    }

    // =========================================================================
    // Network log
    // =========================================================================

    /// Copy out log entries passing the filter, newest last
    pub async fn get_log(&self, filter: &LogFilter) -> Vec<NetworkEntry> {
        self.log.lock().await.filtered(filter)
    }

    /// Clear the log, returning how many entries were removed
    pub async fn clear_log(&self) -> usize {
        self.log.lock().await.clear()
    }

    /// Toggle capture at runtime
    pub fn set_capture(&self, enabled: bool, capture_bodies: bool) {
        self.capture.set(enabled, capture_bodies);
        tracing::debug!(enabled, capture_bodies, "network_capture_configured");
    }

    /// Wait until the log holds a request whose URL contains `pattern`.
    ///
    /// `timeout_ms` defaults to the configured network wait. Returns `None`
    /// on timeout.
    pub async fn wait_for_request(
        &self,
        pattern: &str,
        timeout_ms: Option<u64>,
    ) -> Option<NetworkEntry> {
        self.wait_for_entry(pattern, false, timeout_ms).await
    }

    /// Like [`Session::wait_for_request`], but requires a matched response
    pub async fn wait_for_response(
        &self,
        pattern: &str,
        timeout_ms: Option<u64>,
    ) -> Option<NetworkEntry> {
        self.wait_for_entry(pattern, true, timeout_ms).await
    }

    async fn wait_for_entry(
        &self,
        pattern: &str,
        resolved_only: bool,
        timeout_ms: Option<u64>,
    ) -> Option<NetworkEntry> {
        let timeout_ms = timeout_ms.unwrap_or(self.config.timeouts.network_wait_ms);
        let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            {
                let log = self.log.lock().await;
                let found = log
                    .filtered(&LogFilter {
                        url_contains: Some(pattern.to_string()),
                        limit: usize::MAX,
                        ..Default::default()
                    })
                    .into_iter()
                    .rev()
                    .find(|e| !resolved_only || e.is_resolved());
                if let Some(entry) = found {
                    return Some(entry);
                }
            }

            if std::time::Instant::now() >= deadline {
                return None;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

fn uptime_seconds(launch_time: Option<DateTime<Utc>>) -> f64 {
    launch_time
        .map(|t| ((Utc::now() - t).num_milliseconds() as f64 / 1000.0).max(0.0))
        .unwrap_or(0.0)
}
