//! Network Capture
//!
//! Passively correlates request/response events from a page into a bounded
//! structured log. Entries are created on request and completed by the
//! matching response; the log never grows past its configured capacity.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::driver::{PageEvent, RequestEvent, ResponseEvent};
use crate::metrics::MetricsCollector;

/// Runtime capture switches, shared between the session and the correlator
#[derive(Debug, Default)]
pub struct CaptureSettings {
    enabled: AtomicBool,
    bodies: AtomicBool,
}

impl CaptureSettings {
    pub fn new(enabled: bool, bodies: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            bodies: AtomicBool::new(bodies),
        }
    }

    pub fn set(&self, enabled: bool, bodies: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        self.bodies.store(bodies, Ordering::Relaxed);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn bodies(&self) -> bool {
        self.bodies.load(Ordering::Relaxed)
    }
}

/// One captured HTTP exchange.
///
/// `status` stays `None` until a response is matched; an entry with a status
/// is resolved and never matched again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub url: String,
    pub method: String,
    pub status: Option<u16>,
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub resource_type: String,
    pub timing: HashMap<String, f64>,
    pub duration_ms: Option<f64>,
    pub timestamp: DateTime<Utc>,
    /// Driver-supplied request id, used for exact matching when present
    #[serde(skip)]
    correlation_id: Option<String>,
}

impl NetworkEntry {
    fn from_request(event: RequestEvent, body: Option<String>) -> Self {
        Self {
            url: event.url,
            method: event.method,
            status: None,
            request_headers: event.headers,
            response_headers: HashMap::new(),
            request_body: body,
            response_body: None,
            resource_type: event.resource_type,
            timing: HashMap::new(),
            duration_ms: None,
            timestamp: Utc::now(),
            correlation_id: event.correlation_id,
        }
    }

    /// True once a response has been matched
    pub fn is_resolved(&self) -> bool {
        self.status.is_some()
    }
}

/// Filters for reading the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFilter {
    /// Case-insensitive URL substring
    pub url_contains: Option<String>,
    /// Case-insensitive HTTP method equality
    pub method: Option<String>,
    pub status: Option<u16>,
    pub resource_type: Option<String>,
    /// At most this many entries, newest last
    pub limit: usize,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            url_contains: None,
            method: None,
            status: None,
            resource_type: None,
            limit: 50,
        }
    }
}

/// Bounded FIFO of network entries
#[derive(Debug)]
pub struct NetworkLog {
    entries: VecDeque<NetworkEntry>,
    capacity: usize,
}

impl NetworkLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest one at capacity
    pub fn push(&mut self, entry: NetworkEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, returning how many were removed
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Copy out the entries passing the filter, newest last
    pub fn filtered(&self, filter: &LogFilter) -> Vec<NetworkEntry> {
        let url_needle = filter.url_contains.as_ref().map(|u| u.to_lowercase());
        let method = filter.method.as_ref().map(|m| m.to_uppercase());

        let matching: Vec<&NetworkEntry> = self
            .entries
            .iter()
            .filter(|e| {
                if let Some(ref needle) = url_needle {
                    if !e.url.to_lowercase().contains(needle) {
                        return false;
                    }
                }
                if let Some(ref m) = method {
                    if !e.method.eq_ignore_ascii_case(m) {
                        return false;
                    }
                }
                if let Some(status) = filter.status {
                    if e.status != Some(status) {
                        return false;
                    }
                }
                if let Some(ref rt) = filter.resource_type {
                    if &e.resource_type != rt {
                        return false;
                    }
                }
                true
            })
            .collect();

        let skip = matching.len().saturating_sub(filter.limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Find the most recent unresolved entry for a response.
    ///
    /// Matches by correlation id when the driver supplied one, otherwise by
    /// URL equality, scanning newest-first. The URL fallback can pair the
    /// wrong entry when duplicate requests to one URL are in flight.
    fn unresolved_match(&mut self, response: &ResponseEvent) -> Option<&mut NetworkEntry> {
        let by_id = response.correlation_id.as_ref().and_then(|id| {
            self.entries
                .iter()
                .rposition(|e| !e.is_resolved() && e.correlation_id.as_deref() == Some(id.as_str()))
        });
        let index = by_id.or_else(|| {
            self.entries
                .iter()
                .rposition(|e| !e.is_resolved() && e.url == response.url)
        })?;
        self.entries.get_mut(index)
    }
}

/// Matches response events to their originating request entries.
///
/// One correlator is wired per page; its event task is the only writer of
/// the log it holds, so entries update in delivery order.
pub struct NetworkCorrelator {
    log: Arc<Mutex<NetworkLog>>,
    capture: Arc<CaptureSettings>,
    metrics: Arc<MetricsCollector>,
    max_body_bytes: usize,
}

impl NetworkCorrelator {
    pub fn new(
        log: Arc<Mutex<NetworkLog>>,
        capture: Arc<CaptureSettings>,
        metrics: Arc<MetricsCollector>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            log,
            capture,
            metrics,
            max_body_bytes,
        }
    }

    /// Consume a page's event stream on a dedicated task.
    ///
    /// The task ends when the driver drops its sender (page closed); the
    /// session aborts it on teardown.
    pub fn attach(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PageEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PageEvent::Request(request) => self.on_request(request).await,
                    PageEvent::Response(response) => self.on_response(response).await,
                }
            }
        })
    }

    async fn on_request(&self, event: RequestEvent) {
        if !self.capture.enabled() {
            return;
        }

        let domain = domain_of(&event.url);
        let resource_type = event.resource_type.clone();

        let body = if self.capture.bodies() {
            event.body.clone().map(|b| truncate_body(b, self.max_body_bytes))
        } else {
            None
        };

        let entry = NetworkEntry::from_request(event, body);
        self.log.lock().await.push(entry);

        self.metrics
            .record_network_request(&domain, &resource_type, true);
    }

    async fn on_response(&self, event: ResponseEvent) {
        if !self.capture.enabled() {
            return;
        }

        let mut log = self.log.lock().await;
        let Some(entry) = log.unresolved_match(&event) else {
            // No unresolved request for this response; drop it.
            return;
        };

        entry.status = Some(event.status);
        entry.response_headers = event.headers;

        if self.capture.bodies() {
            entry.response_body = event.body.map(|b| truncate_body(b, self.max_body_bytes));
        }

        entry.timing = event.timing;
        if let (Some(start), Some(end)) = (
            entry.timing.get("requestStart"),
            entry.timing.get("responseEnd"),
        ) {
            entry.duration_ms = Some(end - start);
        }
    }
}

/// Host part of a URL, or "" when it has none
pub(crate) fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_default()
}

/// Cap a body at `max` bytes without splitting a character
fn truncate_body(body: String, max: usize) -> String {
    if body.len() <= max {
        return body;
    }
    let mut end = max;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> RequestEvent {
        RequestEvent {
            url: url.to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
            resource_type: "xhr".to_string(),
            correlation_id: None,
        }
    }

    fn response(url: &str, status: u16) -> ResponseEvent {
        ResponseEvent {
            url: url.to_string(),
            status,
            headers: HashMap::new(),
            body: None,
            timing: HashMap::new(),
            correlation_id: None,
        }
    }

    fn correlator(capacity: usize) -> (NetworkCorrelator, Arc<Mutex<NetworkLog>>) {
        let log = Arc::new(Mutex::new(NetworkLog::new(capacity)));
        let correlator = NetworkCorrelator::new(
            Arc::clone(&log),
            Arc::new(CaptureSettings::new(true, false)),
            Arc::new(MetricsCollector::new()),
            10_000,
        );
        (correlator, log)
    }

    #[test]
    fn test_log_bounded_eviction() {
        let mut log = NetworkLog::new(3);
        for i in 0..5 {
            log.push(NetworkEntry::from_request(
                request(&format!("https://example.com/{i}")),
                None,
            ));
        }

        assert_eq!(log.len(), 3);
        let urls: Vec<_> = log.filtered(&LogFilter::default());
        assert_eq!(urls[0].url, "https://example.com/2");
        assert_eq!(urls[2].url, "https://example.com/4");
    }

    #[tokio::test]
    async fn test_request_then_response_resolves_single_entry() {
        let (correlator, log) = correlator(10);

        correlator.on_request(request("https://api.example.com/users")).await;
        correlator
            .on_response(response("https://api.example.com/users", 200))
            .await;

        let log = log.lock().await;
        assert_eq!(log.len(), 1);
        let entries = log.filtered(&LogFilter::default());
        assert_eq!(entries[0].status, Some(200));
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped() {
        let (correlator, log) = correlator(10);

        correlator
            .on_response(response("https://example.com/orphan", 404))
            .await;

        assert!(log.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_capture_disabled_is_noop() {
        let (mut correlator, log) = correlator(10);
        correlator.capture = Arc::new(CaptureSettings::new(false, false));

        correlator.on_request(request("https://example.com/")).await;

        assert!(log.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_reverse_scan_picks_most_recent_unresolved() {
        let (correlator, log) = correlator(10);

        correlator.on_request(request("https://example.com/a")).await;
        correlator.on_request(request("https://example.com/a")).await;
        correlator
            .on_response(response("https://example.com/a", 200))
            .await;

        let log = log.lock().await;
        let entries = log.filtered(&LogFilter::default());
        // Newest-first scan resolves the second entry, leaving the first pending.
        assert_eq!(entries[0].status, None);
        assert_eq!(entries[1].status, Some(200));
    }

    #[tokio::test]
    async fn test_correlation_id_beats_reverse_scan() {
        let (correlator, log) = correlator(10);

        let mut first = request("https://example.com/dup");
        first.correlation_id = Some("req-1".to_string());
        let mut second = request("https://example.com/dup");
        second.correlation_id = Some("req-2".to_string());
        correlator.on_request(first).await;
        correlator.on_request(second).await;

        let mut resp = response("https://example.com/dup", 201);
        resp.correlation_id = Some("req-1".to_string());
        correlator.on_response(resp).await;

        let log = log.lock().await;
        let entries = log.filtered(&LogFilter::default());
        assert_eq!(entries[0].status, Some(201));
        assert_eq!(entries[1].status, None);
    }

    #[tokio::test]
    async fn test_resolved_entry_never_matched_again() {
        let (correlator, log) = correlator(10);

        correlator.on_request(request("https://example.com/x")).await;
        correlator
            .on_response(response("https://example.com/x", 200))
            .await;
        correlator
            .on_response(response("https://example.com/x", 500))
            .await;

        let log = log.lock().await;
        let entries = log.filtered(&LogFilter::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, Some(200));
    }

    #[tokio::test]
    async fn test_bodies_captured_only_when_enabled() {
        let (mut correlator, log) = correlator(10);
        correlator.capture = Arc::new(CaptureSettings::new(true, true));
        correlator.max_body_bytes = 8;

        let mut req = request("https://example.com/post");
        req.method = "POST".to_string();
        req.body = Some("0123456789abcdef".to_string());
        correlator.on_request(req).await;

        let mut resp = response("https://example.com/post", 200);
        resp.body = Some("response body text".to_string());
        correlator.on_response(resp).await;

        let log = log.lock().await;
        let entries = log.filtered(&LogFilter::default());
        assert_eq!(entries[0].request_body.as_deref(), Some("01234567"));
        assert_eq!(entries[0].response_body.as_deref(), Some("response"));
    }

    #[tokio::test]
    async fn test_duration_from_timing_markers() {
        let (correlator, log) = correlator(10);

        correlator.on_request(request("https://example.com/t")).await;

        let mut resp = response("https://example.com/t", 200);
        resp.timing.insert("requestStart".to_string(), 10.0);
        resp.timing.insert("responseEnd".to_string(), 85.5);
        correlator.on_response(resp).await;

        let log = log.lock().await;
        let entries = log.filtered(&LogFilter::default());
        assert_eq!(entries[0].duration_ms, Some(75.5));
    }

    #[test]
    fn test_filters() {
        let mut log = NetworkLog::new(10);
        let mut a = NetworkEntry::from_request(request("https://api.example.com/users"), None);
        a.status = Some(200);
        let mut b = NetworkEntry::from_request(request("https://cdn.example.com/app.js"), None);
        b.method = "POST".to_string();
        b.resource_type = "script".to_string();
        log.push(a);
        log.push(b);

        let by_url = log.filtered(&LogFilter {
            url_contains: Some("API.example".to_string()),
            ..Default::default()
        });
        assert_eq!(by_url.len(), 1);

        let by_method = log.filtered(&LogFilter {
            method: Some("post".to_string()),
            ..Default::default()
        });
        assert_eq!(by_method.len(), 1);
        assert_eq!(by_method[0].resource_type, "script");

        let by_status = log.filtered(&LogFilter {
            status: Some(200),
            ..Default::default()
        });
        assert_eq!(by_status.len(), 1);

        let limited = log.filtered(&LogFilter {
            limit: 1,
            ..Default::default()
        });
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].url, "https://cdn.example.com/app.js");
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("https://api.example.com/users"), "api.example.com");
        assert_eq!(domain_of("not a url"), "");
    }

    #[test]
    fn test_truncate_body_char_boundary() {
        let truncated = truncate_body("héllo".to_string(), 2);
        assert_eq!(truncated, "h");
    }
}
