//! Snapshot provider backed by the surrounding CRM's document service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use standsign_core::domain::kind::DocumentKind;
use standsign_core::domain::snapshot::DocumentSnapshot;
use standsign_core::domain::token::DocumentRef;
use standsign_core::signing::{ProviderError, SnapshotProvider};

pub struct HttpSnapshotProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotProvider {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()?;
        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl SnapshotProvider for HttpSnapshotProvider {
    async fn fetch(
        &self,
        kind: DocumentKind,
        document_ref: &DocumentRef,
    ) -> Result<Option<DocumentSnapshot>, ProviderError> {
        let url = format!(
            "{}/documents/{}/{}",
            self.base_url,
            kind.as_route_segment(),
            document_ref.0
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::new(format!("snapshot request failed: {e}")))?;

        // The provider reporting a missing document is a data answer, not a
        // transport failure; the resolver treats it as fatal.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ProviderError::new(format!(
                "snapshot provider returned status {}",
                response.status()
            )));
        }

        let snapshot = response
            .json::<DocumentSnapshot>()
            .await
            .map_err(|e| ProviderError::new(format!("snapshot body decode failed: {e}")))?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use rust_decimal::Decimal;

    use standsign_core::domain::kind::DocumentKind;
    use standsign_core::domain::snapshot::{DocumentSnapshot, Party, PrefillHints};
    use standsign_core::domain::token::DocumentRef;
    use standsign_core::signing::SnapshotProvider;

    use super::HttpSnapshotProvider;

    fn snapshot(document_ref: &str) -> DocumentSnapshot {
        DocumentSnapshot {
            document_kind: DocumentKind::CollectionReceipt,
            document_ref: DocumentRef(document_ref.to_string()),
            title: format!("Collection receipt {document_ref}"),
            currency: "TRY".to_string(),
            total_amount: Decimal::new(150_000, 2),
            issuer: Party { name: "Expo Stand Works".to_string(), contact_name: None, email: None },
            counterparty: Party {
                name: "Fairline Logistics".to_string(),
                contact_name: Some("Deniz Aksoy".to_string()),
                email: None,
            },
            line_items: vec![],
            prefill: PrefillHints::default(),
        }
    }

    async fn spawn_document_service() -> String {
        let app = Router::new().route(
            "/documents/{kind}/{document_ref}",
            get(|Path((_kind, document_ref)): Path<(String, String)>| async move {
                if document_ref == "CR-KNOWN" {
                    Ok(Json(snapshot("CR-KNOWN")))
                } else {
                    Err(StatusCode::NOT_FOUND)
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{address}")
    }

    #[tokio::test]
    async fn fetch_decodes_a_known_document() {
        let base_url = spawn_document_service().await;
        let provider = HttpSnapshotProvider::new(base_url, 5).expect("build provider");

        let fetched = provider
            .fetch(DocumentKind::CollectionReceipt, &DocumentRef("CR-KNOWN".to_string()))
            .await
            .expect("fetch");

        let fetched = fetched.expect("document should exist");
        assert_eq!(fetched.document_ref.0, "CR-KNOWN");
        assert_eq!(fetched.currency, "TRY");
    }

    #[tokio::test]
    async fn missing_document_maps_to_none() {
        let base_url = spawn_document_service().await;
        let provider = HttpSnapshotProvider::new(base_url, 5).expect("build provider");

        let fetched = provider
            .fetch(DocumentKind::CollectionReceipt, &DocumentRef("CR-GONE".to_string()))
            .await
            .expect("fetch");
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn unreachable_service_is_a_provider_error() {
        // Reserved TEST-NET address, nothing listens there.
        let provider =
            HttpSnapshotProvider::new("http://192.0.2.1:9", 1).expect("build provider");

        let result = provider
            .fetch(DocumentKind::Handover, &DocumentRef("HND-1".to_string()))
            .await;
        assert!(result.is_err());
    }
}
