//! Client for the custom-domain registration authority.
//!
//! The authority (the boundary-node registration API) owns certificate
//! issuance and DNS verification; this client only submits, polls, and
//! deletes registrations. State transitions are mirrored into the store by
//! the domain manager.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RegistrationConfig;
use crate::error::{CanopyError, CanopyResult};
use crate::types::RegistrationStatus;

/// Registration state as reported by the authority.
#[derive(Debug, Clone)]
pub struct RegistrationResponse {
    /// Domain name the registration is for.
    pub name: String,
    /// Current state.
    pub status: RegistrationStatus,
    /// Failure payload, present only when the state is `Failed`.
    pub error: Option<String>,
}

/// Client for the registration authority API.
#[async_trait]
pub trait RegistrationClient: Send + Sync {
    /// Submit a new registration and return its authority-assigned id.
    async fn register(&self, name: &str) -> CanopyResult<String>;

    /// Fetch the current state of a registration.
    async fn status(&self, registration_id: &str) -> CanopyResult<RegistrationResponse>;

    /// Delete a registration.
    async fn delete(&self, registration_id: &str) -> CanopyResult<()>;
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct RegisterReply {
    id: String,
}

/// Wire form of the registration state.
///
/// Pending and available states come back as plain strings; failure comes
/// back as an object carrying the error payload.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireState {
    Named(RegistrationStatus),
    Failed {
        #[serde(rename = "Failed")]
        failed: String,
    },
}

#[derive(Deserialize)]
struct RawRegistration {
    name: String,
    state: WireState,
}

/// HTTP implementation of [`RegistrationClient`].
#[derive(Debug, Clone)]
pub struct HttpRegistrationClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRegistrationClient {
    /// Create a new client from configuration.
    pub fn new(config: &RegistrationConfig) -> CanopyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn registrations_url(&self) -> String {
        format!("{}/registrations", self.base_url)
    }

    fn registration_url(&self, registration_id: &str) -> String {
        format!("{}/registrations/{registration_id}", self.base_url)
    }
}

#[async_trait]
impl RegistrationClient for HttpRegistrationClient {
    async fn register(&self, name: &str) -> CanopyResult<String> {
        let response = self
            .client
            .post(self.registrations_url())
            .json(&RegisterRequest { name })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CanopyError::registration(format!(
                "registration of {name} rejected ({status}): {body}"
            )));
        }

        let reply: RegisterReply = response.json().await?;
        debug!(domain = name, registration_id = %reply.id, "registration submitted");
        Ok(reply.id)
    }

    async fn status(&self, registration_id: &str) -> CanopyResult<RegistrationResponse> {
        let response = self
            .client
            .get(self.registration_url(registration_id))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CanopyError::registration(format!(
                "registration {registration_id} not found"
            )));
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(CanopyError::registration(format!(
                "status check for {registration_id} failed ({status})"
            )));
        }

        let raw: RawRegistration = response.json().await?;
        let (status, error) = match raw.state {
            WireState::Named(status) => (status, None),
            WireState::Failed { failed } => (RegistrationStatus::Failed, Some(failed)),
        };

        Ok(RegistrationResponse {
            name: raw.name,
            status,
            error,
        })
    }

    async fn delete(&self, registration_id: &str) -> CanopyResult<()> {
        let response = self
            .client
            .delete(self.registration_url(registration_id))
            .send()
            .await?;

        // A registration already gone upstream is fine.
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            let status = response.status();
            return Err(CanopyError::registration(format!(
                "deletion of {registration_id} failed ({status})"
            )));
        }

        Ok(())
    }
}

pub use mock::MockRegistrationClient;

mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::{CanopyError, CanopyResult};
    use crate::types::RegistrationStatus;

    use super::{RegistrationClient, RegistrationResponse};

    #[derive(Default)]
    struct MockState {
        next_id: u64,
        registrations: HashMap<String, RegistrationResponse>,
        deleted: Vec<String>,
    }

    /// In-memory registration authority for tests.
    #[derive(Default)]
    pub struct MockRegistrationClient {
        state: Mutex<MockState>,
    }

    impl MockRegistrationClient {
        /// Create an empty mock.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> CanopyResult<std::sync::MutexGuard<'_, MockState>> {
            self.state
                .lock()
                .map_err(|_| CanopyError::internal("lock poisoned"))
        }

        /// Force a registration into a specific state.
        pub fn set_state(
            &self,
            registration_id: &str,
            status: RegistrationStatus,
            error: Option<String>,
        ) {
            if let Ok(mut state) = self.lock() {
                if let Some(reg) = state.registrations.get_mut(registration_id) {
                    reg.status = status;
                    reg.error = error;
                }
            }
        }

        /// Registration ids deleted so far.
        pub fn deleted(&self) -> Vec<String> {
            self.lock().map(|s| s.deleted.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl RegistrationClient for MockRegistrationClient {
        async fn register(&self, name: &str) -> CanopyResult<String> {
            let mut state = self.lock()?;
            state.next_id += 1;
            let id = format!("mock-reg-{}", state.next_id);
            state.registrations.insert(
                id.clone(),
                RegistrationResponse {
                    name: name.to_owned(),
                    status: RegistrationStatus::PendingOrder,
                    error: None,
                },
            );
            Ok(id)
        }

        async fn status(&self, registration_id: &str) -> CanopyResult<RegistrationResponse> {
            let state = self.lock()?;
            state
                .registrations
                .get(registration_id)
                .cloned()
                .ok_or_else(|| {
                    CanopyError::registration(format!(
                        "registration {registration_id} not found"
                    ))
                })
        }

        async fn delete(&self, registration_id: &str) -> CanopyResult<()> {
            let mut state = self.lock()?;
            state.registrations.remove(registration_id);
            state.deleted.push(registration_id.to_owned());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_state_parses_named_states() {
        let raw: RawRegistration = serde_json::from_str(
            r#"{"name": "example.com", "state": "PendingChallengeResponse"}"#,
        )
        .expect("parse failed");
        assert!(matches!(
            raw.state,
            WireState::Named(RegistrationStatus::PendingChallengeResponse)
        ));
    }

    #[test]
    fn wire_state_parses_failure_object() {
        let raw: RawRegistration = serde_json::from_str(
            r#"{"name": "example.com", "state": {"Failed": "missing DNS CNAME record"}}"#,
        )
        .expect("parse failed");
        match raw.state {
            WireState::Failed { failed } => assert_eq!(failed, "missing DNS CNAME record"),
            WireState::Named(_) => panic!("expected failure object"),
        }
    }

    #[tokio::test]
    async fn mock_round_trip() {
        let client = MockRegistrationClient::new();
        let id = client.register("example.com").await.expect("register failed");

        let response = client.status(&id).await.expect("status failed");
        assert_eq!(response.status, RegistrationStatus::PendingOrder);

        client.set_state(&id, RegistrationStatus::Available, None);
        let response = client.status(&id).await.expect("status failed");
        assert_eq!(response.status, RegistrationStatus::Available);

        client.delete(&id).await.expect("delete failed");
        assert!(client.status(&id).await.is_err());
        assert_eq!(client.deleted(), vec![id]);
    }
}
