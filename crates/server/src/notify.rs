//! Outcome notification dispatch to the surrounding CRM.
//!
//! Dispatch happens once, after the atomic transition committed; the
//! payload is a compact projection without the raster bytes, which
//! downstream consumers fetch through the outcome API when needed.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use standsign_core::domain::kind::DocumentKind;
use standsign_core::domain::outcome::ApprovalOutcome;
use standsign_core::signing::{NotificationDispatcher, ProviderError};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutcomeNotification<'a> {
    pub token: &'a str,
    pub document_kind: DocumentKind,
    pub document_ref: &'a str,
    pub decision: &'a str,
    pub signer_name: &'a str,
    pub signature_digest: Option<&'a str>,
    pub submitted_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl<'a> OutcomeNotification<'a> {
    pub fn from_outcome(outcome: &'a ApprovalOutcome) -> Self {
        Self {
            token: &outcome.token,
            document_kind: outcome.document_kind,
            document_ref: &outcome.document_ref.0,
            decision: outcome.record.decision.as_str(),
            signer_name: &outcome.record.signer_name,
            signature_digest: outcome.signature_digest.as_deref(),
            submitted_at: outcome.record.submitted_at,
            recorded_at: outcome.recorded_at,
        }
    }
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: String,
    bearer_token: Option<SecretString>,
}

impl WebhookNotifier {
    pub fn new(
        webhook_url: impl Into<String>,
        bearer_token: Option<SecretString>,
        timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()?;
        Ok(Self { client, webhook_url: webhook_url.into(), bearer_token })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotifier {
    async fn outcome_recorded(&self, outcome: &ApprovalOutcome) -> Result<(), ProviderError> {
        let mut request =
            self.client.post(&self.webhook_url).json(&OutcomeNotification::from_outcome(outcome));
        if let Some(bearer_token) = &self.bearer_token {
            request = request.bearer_auth(bearer_token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::new(format!("notification request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ProviderError::new(format!(
                "notification endpoint returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Used when no webhook is configured; outcomes stay queryable via the API.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationDispatcher for NoopNotifier {
    async fn outcome_recorded(&self, _outcome: &ApprovalOutcome) -> Result<(), ProviderError> {
        Ok(())
    }
}
