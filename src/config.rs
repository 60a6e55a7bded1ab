//! Configuration
//!
//! Typed settings with defaults, overridable through `VULPO_*` environment
//! variables. The core treats configuration as read-only.

use serde::{Deserialize, Serialize};

/// Timeout settings in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub navigation_ms: u64,
    pub selector_wait_ms: u64,
    pub network_wait_ms: u64,
    pub element_action_ms: u64,
    pub screenshot_ms: u64,
    pub js_evaluation_ms: u64,
    pub browser_launch_ms: u64,
    pub page_close_ms: u64,
    pub health_probe_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation_ms: 30_000,
            selector_wait_ms: 30_000,
            network_wait_ms: 30_000,
            element_action_ms: 5_000,
            screenshot_ms: 10_000,
            js_evaluation_ms: 5_000,
            browser_launch_ms: 60_000,
            page_close_ms: 5_000,
            health_probe_ms: 5_000,
        }
    }
}

/// Network capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub capture_by_default: bool,
    pub capture_bodies_by_default: bool,
    /// Bounded log capacity; the oldest entry is evicted beyond this
    pub max_log_entries: usize,
    /// Captured bodies are truncated to this many bytes
    pub max_body_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            capture_by_default: true,
            capture_bodies_by_default: false,
            max_log_entries: 1000,
            max_body_bytes: 10_000,
        }
    }
}

/// Browser launch defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub default_headless: bool,
    pub default_humanize: bool,
    pub default_viewport_width: u32,
    pub default_viewport_height: u32,
    /// Attempt a relaunch when recover() is called
    pub auto_recover: bool,
    pub max_pages: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            default_headless: true,
            default_humanize: true,
            default_viewport_width: 1920,
            default_viewport_height: 1080,
            auto_recover: true,
            max_pages: 10,
        }
    }
}

/// Complete core configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub timeouts: TimeoutConfig,
    pub network: NetworkConfig,
    pub browser: BrowserConfig,
}

impl Config {
    /// Load configuration from `VULPO_*` environment variables.
    ///
    /// Absent or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self {
            timeouts: TimeoutConfig {
                navigation_ms: env_u64("VULPO_TIMEOUT_NAVIGATION", 30_000),
                selector_wait_ms: env_u64("VULPO_TIMEOUT_SELECTOR", 30_000),
                network_wait_ms: env_u64("VULPO_TIMEOUT_NETWORK", 30_000),
                element_action_ms: env_u64("VULPO_TIMEOUT_ACTION", 5_000),
                screenshot_ms: env_u64("VULPO_TIMEOUT_SCREENSHOT", 10_000),
                js_evaluation_ms: env_u64("VULPO_TIMEOUT_JS", 5_000),
                browser_launch_ms: env_u64("VULPO_TIMEOUT_LAUNCH", 60_000),
                page_close_ms: env_u64("VULPO_TIMEOUT_PAGE_CLOSE", 5_000),
                health_probe_ms: env_u64("VULPO_TIMEOUT_HEALTH_PROBE", 5_000),
            },
            network: NetworkConfig {
                capture_by_default: env_bool("VULPO_NETWORK_CAPTURE", true),
                capture_bodies_by_default: env_bool("VULPO_NETWORK_BODIES", false),
                max_log_entries: env_usize("VULPO_NETWORK_MAX_LOG", 1000),
                max_body_bytes: env_usize("VULPO_NETWORK_MAX_BODY", 10_000),
            },
            browser: BrowserConfig {
                default_headless: env_bool("VULPO_HEADLESS", true),
                default_humanize: env_bool("VULPO_HUMANIZE", true),
                default_viewport_width: env_u32("VULPO_VIEWPORT_WIDTH", 1920),
                default_viewport_height: env_u32("VULPO_VIEWPORT_HEIGHT", 1080),
                auto_recover: env_bool("VULPO_AUTO_RECOVER", true),
                max_pages: env_usize("VULPO_MAX_PAGES", 10),
            },
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.timeouts.browser_launch_ms, 60_000);
        assert_eq!(config.network.max_log_entries, 1000);
        assert_eq!(config.network.max_body_bytes, 10_000);
        assert!(config.network.capture_by_default);
        assert!(!config.network.capture_bodies_by_default);
        assert_eq!(config.browser.max_pages, 10);
        assert!(config.browser.auto_recover);
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("VULPO_NETWORK_MAX_LOG", "50");
        std::env::set_var("VULPO_AUTO_RECOVER", "false");
        let config = Config::from_env();
        assert_eq!(config.network.max_log_entries, 50);
        assert!(!config.browser.auto_recover);
        std::env::remove_var("VULPO_NETWORK_MAX_LOG");
        std::env::remove_var("VULPO_AUTO_RECOVER");
    }

    #[test]
    fn test_from_env_ignores_garbage() {
        std::env::set_var("VULPO_VIEWPORT_WIDTH", "not-a-number");
        let config = Config::from_env();
        assert_eq!(config.browser.default_viewport_width, 1920);
        std::env::remove_var("VULPO_VIEWPORT_WIDTH");
    }
}
