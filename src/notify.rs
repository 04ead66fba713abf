//! Bark push notification client

use crate::config::NotifyConfig;
use crate::events::{Event, EventSink};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TITLE: &str = "SubHub";

/// Push client for the Bark notification service
pub struct BarkNotifier {
    url: String,
    title: String,
    client: reqwest::Client,
}

impl BarkNotifier {
    /// Build from config; `None` when no Bark endpoint is configured
    pub fn from_config(config: &NotifyConfig) -> Option<Self> {
        let url = config.bark_url.clone()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        Some(BarkNotifier {
            url: url.trim_end_matches('/').to_string(),
            title: config
                .bark_title
                .clone()
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            client,
        })
    }

    fn push_url(&self, event: &Event) -> String {
        format!(
            "{}/{}/{}",
            self.url,
            urlencoding::encode(&format!("{} · {}", self.title, event.title)),
            urlencoding::encode(&event.body)
        )
    }
}

#[async_trait]
impl EventSink for BarkNotifier {
    /// Push failures are logged, never fatal
    async fn emit(&self, event: &Event) {
        let url = self.push_url(event);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("bark notification delivered");
            }
            Ok(response) => {
                warn!("bark returned HTTP {}", response.status().as_u16());
            }
            Err(e) => {
                warn!("bark notification failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_url() {
        assert!(BarkNotifier::from_config(&NotifyConfig::default()).is_none());
    }

    #[test]
    fn test_push_url_encoding() {
        let notifier = BarkNotifier::from_config(&NotifyConfig {
            bark_url: Some("https://api.day.app/KEY/".to_string()),
            bark_title: Some("My Hub".to_string()),
        })
        .unwrap();
        let event = Event::system_error("it broke / badly");
        let url = notifier.push_url(&event);
        assert!(url.starts_with("https://api.day.app/KEY/"));
        assert!(url.contains("My%20Hub"));
        // Path segments are fully percent-encoded
        assert!(!url.split('/').last().unwrap().contains(' '));
    }
}
