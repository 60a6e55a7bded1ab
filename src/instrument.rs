//! Tool Instrumentation
//!
//! Timing, structured logging, and metrics for exposed operations. Tool
//! handlers wrap each call so every operation shows up in the collector with
//! a correlatable call id.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::MetricsCollector;

/// Parameter names whose values are never logged
const SENSITIVE_KEYS: [&str; 4] = ["password", "token", "secret", "proxy_password"];

/// Unique id for one tool call (12 hex chars)
pub fn generate_call_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// In-flight instrumentation for a single tool call.
///
/// Created at entry; finished with [`ToolCall::succeed`] or
/// [`ToolCall::fail`], which log the outcome and record it into the
/// collector.
pub struct ToolCall {
    name: String,
    call_id: String,
    metrics: Arc<MetricsCollector>,
    started: Instant,
}

impl ToolCall {
    pub fn start(name: impl Into<String>, metrics: Arc<MetricsCollector>) -> Self {
        let name = name.into();
        let call_id = generate_call_id();
        tracing::info!(tool = %name, call_id = %call_id, "tool_call_start");
        Self {
            name,
            call_id,
            metrics,
            started: Instant::now(),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn succeed(self, output: Option<&str>) {
        let duration_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let output_preview = output.map(|o| preview(o, 500));
        tracing::info!(
            tool = %self.name,
            call_id = %self.call_id,
            duration_ms,
            output_preview = ?output_preview,
            "tool_call_success"
        );
        self.metrics
            .record_tool_call(&self.name, duration_ms, true, None);
    }

    pub fn fail(self, error: &str) {
        let duration_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        tracing::error!(
            tool = %self.name,
            call_id = %self.call_id,
            duration_ms,
            error = %error,
            "tool_call_error"
        );
        self.metrics
            .record_tool_call(&self.name, duration_ms, false, Some(error));
    }
}

/// Run a fallible future under instrumentation
pub async fn traced<T, E, F>(
    name: &str,
    metrics: Arc<MetricsCollector>,
    fut: F,
) -> std::result::Result<T, E>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let call = ToolCall::start(name, metrics);
    match fut.await {
        Ok(value) => {
            call.succeed(None);
            Ok(value)
        }
        Err(e) => {
            call.fail(&e.to_string());
            Err(e)
        }
    }
}

/// Render a parameter value for logging: sensitive keys masked, long
/// values truncated
pub fn sanitize_param(key: &str, value: &str) -> String {
    if SENSITIVE_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k)) {
        "***REDACTED***".to_string()
    } else {
        preview(value, 200)
    }
}

fn preview(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_call_id_is_short_hex() {
        let id = generate_call_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sanitize_redacts_sensitive_keys() {
        assert_eq!(sanitize_param("password", "hunter2"), "***REDACTED***");
        assert_eq!(sanitize_param("Token", "abc"), "***REDACTED***");
        assert_eq!(sanitize_param("url", "https://example.com"), "https://example.com");
    }

    #[test]
    fn test_preview_truncates_long_values() {
        let long = "x".repeat(300);
        let rendered = sanitize_param("selector", &long);
        assert_eq!(rendered.len(), 203);
        assert!(rendered.ends_with("..."));
    }

    #[tokio::test]
    async fn test_traced_records_success() {
        let metrics = Arc::new(MetricsCollector::new());
        let result: Result<i32, Error> =
            traced("navigate", Arc::clone(&metrics), async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
        let tool = metrics.tool_metrics("navigate").unwrap();
        assert_eq!(tool.call_count, 1);
        assert_eq!(tool.error_count, 0);
    }

    #[tokio::test]
    async fn test_traced_records_failure() {
        let metrics = Arc::new(MetricsCollector::new());
        let result: Result<i32, Error> = traced("click", Arc::clone(&metrics), async {
            Err(Error::PageNotFound("t1".to_string()))
        })
        .await;

        assert!(result.is_err());
        let tool = metrics.tool_metrics("click").unwrap();
        assert_eq!(tool.error_count, 1);
        assert!(tool.last_error.unwrap().contains("t1"));
    }
}
