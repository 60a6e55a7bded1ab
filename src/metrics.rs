//! Metrics Aggregation
//!
//! In-memory counters and duration samples per named operation, safe to call
//! from concurrent contexts. Everything lives behind one mutex; contention is
//! expected to be low. Percentiles are computed over a bounded sample ring,
//! so they are approximate over long runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Duration samples retained per tool for percentile computation
const MAX_DURATION_SAMPLES: usize = 1000;

/// Mutable per-tool state
#[derive(Debug, Default)]
struct ToolRecord {
    call_count: u64,
    error_count: u64,
    total_duration_ms: f64,
    durations: VecDeque<f64>,
    last_error: Option<String>,
    last_error_time: Option<DateTime<Utc>>,
    last_call_time: Option<DateTime<Utc>>,
}

impl ToolRecord {
    fn snapshot(&self, name: &str) -> ToolMetrics {
        let mut sorted: Vec<f64> = self.durations.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let avg = if self.call_count > 0 {
            self.total_duration_ms / self.call_count as f64
        } else {
            0.0
        };
        let error_rate = if self.call_count > 0 {
            self.error_count as f64 / self.call_count as f64 * 100.0
        } else {
            0.0
        };

        ToolMetrics {
            name: name.to_string(),
            call_count: self.call_count,
            error_count: self.error_count,
            error_rate_percent: error_rate,
            avg_duration_ms: avg,
            p50_duration_ms: median(&sorted),
            p95_duration_ms: quantile(&sorted, 0.95),
            p99_duration_ms: quantile(&sorted, 0.99),
            last_error: self.last_error.clone(),
            last_error_time: self.last_error_time,
            last_call_time: self.last_call_time,
        }
    }
}

/// Derived view of one tool's metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetrics {
    pub name: String,
    pub call_count: u64,
    pub error_count: u64,
    pub error_rate_percent: f64,
    pub avg_duration_ms: f64,
    pub p50_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub p99_duration_ms: f64,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub last_call_time: Option<DateTime<Utc>>,
}

/// Server-wide counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMetrics {
    pub start_time: DateTime<Utc>,
    pub uptime_seconds: f64,
    pub total_calls: u64,
    pub total_errors: u64,
    pub error_rate_percent: f64,
}

/// Browser lifecycle counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserMetrics {
    pub launches: u64,
    pub crashes: u64,
    pub pages_created: u64,
    pub pages_closed: u64,
}

/// Network traffic counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub requests_by_domain: HashMap<String, u64>,
    pub requests_by_type: HashMap<String, u64>,
    pub errors: u64,
}

/// Full point-in-time view of every counter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub server: ServerMetrics,
    pub browser: BrowserMetrics,
    pub network: NetworkMetrics,
    /// Sorted by call count, busiest first
    pub tools: Vec<ToolMetrics>,
}

#[derive(Debug)]
struct Inner {
    start_time: DateTime<Utc>,
    total_calls: u64,
    total_errors: u64,
    tools: HashMap<String, ToolRecord>,
    network: NetworkMetrics,
    browser: BrowserMetrics,
}

impl Inner {
    fn new() -> Self {
        Self {
            start_time: Utc::now(),
            total_calls: 0,
            total_errors: 0,
            tools: HashMap::new(),
            network: NetworkMetrics::default(),
            browser: BrowserMetrics::default(),
        }
    }
}

/// Collects and aggregates call, browser, and network metrics
#[derive(Debug)]
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves counters usable, just stale.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one tool call with its outcome
    pub fn record_tool_call(
        &self,
        tool_name: &str,
        duration_ms: f64,
        success: bool,
        error: Option<&str>,
    ) {
        let mut inner = self.lock();
        inner.total_calls += 1;
        if !success {
            inner.total_errors += 1;
        }

        let record = inner.tools.entry(tool_name.to_string()).or_default();
        record.call_count += 1;
        record.total_duration_ms += duration_ms;
        record.last_call_time = Some(Utc::now());

        record.durations.push_back(duration_ms);
        if record.durations.len() > MAX_DURATION_SAMPLES {
            record.durations.pop_front();
        }

        if !success {
            record.error_count += 1;
            record.last_error = error.map(str::to_owned);
            record.last_error_time = Some(Utc::now());
        }
    }

    /// Record one observed network request
    pub fn record_network_request(&self, domain: &str, resource_type: &str, success: bool) {
        let mut inner = self.lock();
        *inner
            .network
            .requests_by_domain
            .entry(domain.to_string())
            .or_insert(0) += 1;
        *inner
            .network
            .requests_by_type
            .entry(resource_type.to_string())
            .or_insert(0) += 1;
        if !success {
            inner.network.errors += 1;
        }
    }

    pub fn record_browser_launch(&self) {
        self.lock().browser.launches += 1;
    }

    pub fn record_browser_crash(&self) {
        self.lock().browser.crashes += 1;
    }

    pub fn record_page_created(&self) {
        self.lock().browser.pages_created += 1;
    }

    pub fn record_page_closed(&self) {
        self.lock().browser.pages_closed += 1;
    }

    /// Aggregate call and error totals (calls, errors)
    pub fn totals(&self) -> (u64, u64) {
        let inner = self.lock();
        (inner.total_calls, inner.total_errors)
    }

    /// Full snapshot of every counter, tools sorted busiest-first
    pub fn summary(&self) -> MetricsSnapshot {
        let inner = self.lock();

        let mut tools: Vec<ToolMetrics> = inner
            .tools
            .iter()
            .map(|(name, record)| record.snapshot(name))
            .collect();
        tools.sort_by(|a, b| b.call_count.cmp(&a.call_count).then(a.name.cmp(&b.name)));

        let error_rate = if inner.total_calls > 0 {
            inner.total_errors as f64 / inner.total_calls as f64 * 100.0
        } else {
            0.0
        };

        MetricsSnapshot {
            server: ServerMetrics {
                start_time: inner.start_time,
                uptime_seconds: (Utc::now() - inner.start_time).num_milliseconds() as f64 / 1000.0,
                total_calls: inner.total_calls,
                total_errors: inner.total_errors,
                error_rate_percent: error_rate,
            },
            browser: inner.browser.clone(),
            network: inner.network.clone(),
            tools,
        }
    }

    /// Metrics for one named tool, if it has been called
    pub fn tool_metrics(&self, tool_name: &str) -> Option<ToolMetrics> {
        let inner = self.lock();
        inner
            .tools
            .get(tool_name)
            .map(|record| record.snapshot(tool_name))
    }

    /// Clear all counters and restart the uptime clock
    pub fn reset(&self) {
        *self.lock() = Inner::new();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Median of pre-sorted samples
fn median(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2],
        n => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Exclusive-method quantile over pre-sorted samples.
///
/// Position is `(n + 1) * q` with linear interpolation, clamped to the
/// sample range. Fewer than two samples degrade to the single sample or 0.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let h = (n + 1) as f64 * q;
            if h <= 1.0 {
                sorted[0]
            } else if h >= n as f64 {
                sorted[n - 1]
            } else {
                let j = h.floor() as usize;
                let g = h - j as f64;
                sorted[j - 1] + g * (sorted[j] - sorted[j - 1])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tool_call_success() {
        let metrics = MetricsCollector::new();
        metrics.record_tool_call("navigate", 123.0, true, None);

        let tool = metrics.tool_metrics("navigate").unwrap();
        assert_eq!(tool.call_count, 1);
        assert_eq!(tool.error_count, 0);
        assert_eq!(tool.avg_duration_ms, 123.0);
        assert!(tool.last_call_time.is_some());
        assert!(tool.last_error.is_none());
    }

    #[test]
    fn test_record_tool_call_failure() {
        let metrics = MetricsCollector::new();
        metrics.record_tool_call("click", 50.0, false, Some("element not found"));

        let tool = metrics.tool_metrics("click").unwrap();
        assert_eq!(tool.error_count, 1);
        assert_eq!(tool.last_error.as_deref(), Some("element not found"));
        assert!(tool.last_error_time.is_some());

        let (calls, errors) = metrics.totals();
        assert_eq!(calls, 1);
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_average_and_median_over_three_calls() {
        let metrics = MetricsCollector::new();
        for duration in [100.0, 200.0, 300.0] {
            metrics.record_tool_call("x", duration, true, None);
        }

        let tool = metrics.tool_metrics("x").unwrap();
        assert_eq!(tool.avg_duration_ms, 200.0);
        assert_eq!(tool.p50_duration_ms, 200.0);
        assert_eq!(tool.error_count, 0);
    }

    #[test]
    fn test_error_rate() {
        let metrics = MetricsCollector::new();
        metrics.record_tool_call("fill", 10.0, true, None);
        metrics.record_tool_call("fill", 10.0, true, None);
        metrics.record_tool_call("fill", 10.0, false, Some("boom"));
        metrics.record_tool_call("fill", 10.0, false, Some("boom"));

        let tool = metrics.tool_metrics("fill").unwrap();
        assert!((tool.error_rate_percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percentiles_over_1_to_100() {
        let metrics = MetricsCollector::new();
        for i in 1..=100 {
            metrics.record_tool_call("evaluate", i as f64, true, None);
        }

        let tool = metrics.tool_metrics("evaluate").unwrap();
        assert!(tool.p50_duration_ms >= 45.0 && tool.p50_duration_ms <= 55.0);
        assert!(tool.p95_duration_ms >= 90.0 && tool.p95_duration_ms <= 100.0);
        assert!(tool.p99_duration_ms >= 95.0 && tool.p99_duration_ms <= 100.0);
    }

    #[test]
    fn test_percentiles_single_sample() {
        let metrics = MetricsCollector::new();
        metrics.record_tool_call("scroll", 42.0, true, None);

        let tool = metrics.tool_metrics("scroll").unwrap();
        assert_eq!(tool.p50_duration_ms, 42.0);
        assert_eq!(tool.p95_duration_ms, 42.0);
        assert_eq!(tool.p99_duration_ms, 42.0);
    }

    #[test]
    fn test_duration_ring_is_bounded() {
        let metrics = MetricsCollector::new();
        for i in 0..(MAX_DURATION_SAMPLES + 100) {
            metrics.record_tool_call("type", i as f64, true, None);
        }

        let inner = metrics.lock();
        assert_eq!(inner.tools["type"].durations.len(), MAX_DURATION_SAMPLES);
        // Oldest samples were dropped.
        assert_eq!(inner.tools["type"].durations.front().copied(), Some(100.0));
    }

    #[test]
    fn test_network_and_browser_counters() {
        let metrics = MetricsCollector::new();
        metrics.record_network_request("api.example.com", "xhr", true);
        metrics.record_network_request("api.example.com", "fetch", false);
        metrics.record_browser_launch();
        metrics.record_browser_crash();
        metrics.record_page_created();
        metrics.record_page_closed();

        let summary = metrics.summary();
        assert_eq!(summary.network.requests_by_domain["api.example.com"], 2);
        assert_eq!(summary.network.requests_by_type["xhr"], 1);
        assert_eq!(summary.network.errors, 1);
        assert_eq!(summary.browser.launches, 1);
        assert_eq!(summary.browser.crashes, 1);
        assert_eq!(summary.browser.pages_created, 1);
        assert_eq!(summary.browser.pages_closed, 1);
    }

    #[test]
    fn test_summary_sorted_by_call_count() {
        let metrics = MetricsCollector::new();
        metrics.record_tool_call("rare", 1.0, true, None);
        for _ in 0..5 {
            metrics.record_tool_call("busy", 1.0, true, None);
        }

        let summary = metrics.summary();
        assert_eq!(summary.tools[0].name, "busy");
        assert_eq!(summary.tools[1].name, "rare");
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let metrics = MetricsCollector::new();
        metrics.record_tool_call("navigate", 10.0, false, Some("err"));
        metrics.record_network_request("example.com", "document", true);
        metrics.record_browser_launch();

        metrics.reset();

        assert_eq!(metrics.totals(), (0, 0));
        assert!(metrics.tool_metrics("navigate").is_none());
        let summary = metrics.summary();
        assert!(summary.tools.is_empty());
        assert_eq!(summary.browser.launches, 0);
        assert!(summary.network.requests_by_domain.is_empty());
        assert_eq!(summary.server.total_calls, 0);
        assert_eq!(summary.server.error_rate_percent, 0.0);
    }

    #[test]
    fn test_tool_metrics_not_found() {
        let metrics = MetricsCollector::new();
        assert!(metrics.tool_metrics("never-called").is_none());
    }
}
