//! Best-effort dashboard cache invalidation after successful sends

use hj_common::config::DashboardSettings;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct DashboardNotifier {
    client: Option<reqwest::Client>,
    url: String,
}

impl DashboardNotifier {
    pub fn new(settings: &DashboardSettings) -> Self {
        if !settings.enabled {
            return Self::disabled();
        }
        match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
            Ok(client) => Self {
                client: Some(client),
                url: settings.cache_clear_url.clone(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "HTTP client unavailable; dashboard notifications disabled");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self {
            client: None,
            url: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// POST to the cache-clear endpoint; failures are logged and ignored
    pub async fn cache_clear(&self) {
        let Some(client) = &self.client else {
            return;
        };
        match client.post(&self.url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(url = %self.url, "Dashboard cache cleared");
            }
            Ok(response) => {
                tracing::debug!(url = %self.url, status = %response.status(), "Dashboard cache clear refused");
            }
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Dashboard unreachable");
            }
        }
    }
}
