//! Operational alerting over a webhook.
//!
//! Alerts are strictly best-effort: delivery failures are logged and
//! swallowed so a broken webhook can never fail a deployment or a sweep.

use serde_json::json;
use tracing::{debug, warn};

use crate::config::AlertConfig;

/// Sends operational alerts to a configured webhook.
#[derive(Debug, Clone)]
pub struct AlertNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl AlertNotifier {
    /// Create a notifier from configuration.
    #[must_use]
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: config.webhook_url.clone(),
        }
    }

    /// Create a notifier that never sends anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: None,
        }
    }

    /// Send an alert with an optional structured fields payload.
    ///
    /// Never returns an error; failures end up in the log.
    pub async fn notify(&self, title: &str, description: &str, fields: Option<serde_json::Value>) {
        let Some(url) = &self.webhook_url else {
            debug!(title, "alert webhook not configured, dropping alert");
            return;
        };

        let mut embed = json!({
            "title": title,
            "description": description,
            "color": 15_158_332,
        });
        if let (Some(fields), Some(embed)) = (fields, embed.as_object_mut()) {
            embed.insert("fields".to_owned(), fields);
        }

        let payload = json!({ "embeds": [embed] });

        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(title, "alert delivered");
            }
            Ok(response) => {
                warn!(title, status = %response.status(), "alert webhook rejected payload");
            }
            Err(e) => {
                warn!(title, error = %e, "alert webhook unreachable");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_notifier_is_a_no_op() {
        let notifier = AlertNotifier::disabled();
        notifier.notify("title", "description", None).await;
    }
}
