use std::env;

/// Runtime configuration for the dispatch pipeline, derived from the
/// environment with sensible defaults.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Base URL for subscription-management links embedded in unsubscribe
    /// headers.
    pub dashboard_base_url: String,
    /// Look-ahead window (seconds) within which per-occupant OAuth tokens are
    /// refreshed before they expire.
    pub oauth_refresh_window_secs: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dashboard_base_url: "https://app.peregrine.dev".to_string(),
            oauth_refresh_window_secs: 600,
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = env::var("PEREGRINE_DASHBOARD_BASE_URL") {
            if !url.trim().is_empty() {
                cfg.dashboard_base_url = url.trim_end_matches('/').to_string();
            }
        }
        if let Ok(window) = env::var("PEREGRINE_OAUTH_REFRESH_WINDOW_SECS") {
            if let Ok(parsed) = window.parse::<i64>() {
                cfg.oauth_refresh_window_secs = parsed.max(0);
            }
        }
        cfg
    }
}
