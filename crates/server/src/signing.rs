//! Link resolution and the submission transition engine.
//!
//! One engine serves all three document kinds; kinds differ only in the
//! policy data attached to `DocumentKind`. The engine is the sole arbiter of
//! the winning submission: clients render whatever the atomic transition
//! reports, never an optimistic local state.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use standsign_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use standsign_core::domain::kind::DocumentKind;
use standsign_core::domain::outcome::ApprovalOutcome;
use standsign_core::domain::token::{ApprovalToken, DocumentRef, TokenStatus};
use standsign_core::errors::ApprovalError;
use standsign_core::signing::{
    LinkResolution, NotificationDispatcher, SnapshotProvider, SubmissionInput,
    SubmissionValidator,
};
use standsign_db::repositories::{ConsumeResult, RepositoryError, TokenStore};

/// Submission failure, carrying the already-persisted outcome when the
/// token was settled by someone else so the caller can render the existing
/// confirmation instead of a bare error.
#[derive(Debug)]
pub struct SubmitFailure {
    pub error: ApprovalError,
    pub existing_outcome: Option<ApprovalOutcome>,
}

impl SubmitFailure {
    fn from_error(error: ApprovalError) -> Self {
        Self { error, existing_outcome: None }
    }
}

impl From<ApprovalError> for SubmitFailure {
    fn from(error: ApprovalError) -> Self {
        Self::from_error(error)
    }
}

pub struct SigningService {
    store: Arc<dyn TokenStore>,
    snapshots: Arc<dyn SnapshotProvider>,
    notifier: Arc<dyn NotificationDispatcher>,
    audit: Arc<dyn AuditSink>,
    validator: SubmissionValidator,
    max_signature_bytes: usize,
}

impl SigningService {
    pub fn new(
        store: Arc<dyn TokenStore>,
        snapshots: Arc<dyn SnapshotProvider>,
        notifier: Arc<dyn NotificationDispatcher>,
        audit: Arc<dyn AuditSink>,
        max_signature_bytes: usize,
    ) -> Self {
        Self {
            store,
            snapshots,
            notifier,
            audit,
            validator: SubmissionValidator,
            max_signature_bytes,
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Issue a fresh signing link for a document, verifying the document
    /// exists before binding a token to it.
    pub async fn issue_link(
        &self,
        kind: DocumentKind,
        document_ref: DocumentRef,
        ttl_override: Option<chrono::Duration>,
        correlation_id: &str,
    ) -> Result<ApprovalToken, ApprovalError> {
        let snapshot = self
            .snapshots
            .fetch(kind, &document_ref)
            .await
            .map_err(|_| ApprovalError::ProviderUnavailable)?;
        if snapshot.is_none() {
            return Err(ApprovalError::DocumentNotFound);
        }

        let token = ApprovalToken::issue(kind, document_ref, Utc::now(), ttl_override);
        self.store.issue(&token).await.map_err(map_repository_error)?;

        info!(
            event_name = "signing.link.issued",
            correlation_id = %correlation_id,
            document_kind = %kind,
            document_ref = %token.document_ref.0,
            "signing link issued"
        );
        self.audit.emit(AuditEvent::new(
            Some(kind),
            Some(token.document_ref.clone()),
            correlation_id,
            "link.issued",
            AuditCategory::Link,
            "link-resolver",
            AuditOutcome::Success,
        ));

        Ok(token)
    }

    /// Resolve an inbound link into a render-ready view model.
    pub async fn resolve(
        &self,
        kind: DocumentKind,
        token_value: &str,
        correlation_id: &str,
    ) -> Result<LinkResolution, ApprovalError> {
        match self.checked_token(kind, token_value).await? {
            CheckedToken::Settled(outcome) => Ok(LinkResolution::completed(outcome)),
            CheckedToken::Live(token) => {
                let snapshot = self
                    .snapshots
                    .fetch(kind, &token.document_ref)
                    .await
                    .map_err(|provider_error| {
                        warn!(
                            event_name = "signing.snapshot.unavailable",
                            correlation_id = %correlation_id,
                            document_ref = %token.document_ref.0,
                            error = %provider_error,
                            "snapshot provider call failed during link resolution"
                        );
                        ApprovalError::ProviderUnavailable
                    })?;

                let Some(document) = snapshot else {
                    // Valid token, missing document: a data-integrity fault,
                    // surfaced as a permanent failure rather than retried.
                    self.emit_link_rejected(&token, correlation_id, "DocumentNotFound");
                    return Err(ApprovalError::DocumentNotFound);
                };

                let prefill = document.effective_prefill();
                Ok(LinkResolution::Pending {
                    prefill,
                    policy: kind.policy().into(),
                    document,
                })
            }
        }
    }

    /// Validate a submission and apply the atomic conditional transition.
    pub async fn submit(
        &self,
        kind: DocumentKind,
        token_value: &str,
        input: SubmissionInput,
        source_ip: Option<String>,
        correlation_id: &str,
    ) -> Result<ApprovalOutcome, SubmitFailure> {
        // Step 1: re-validate the token exactly as resolution does, guarding
        // against drift between rendering and submitting.
        let token = match self.checked_token(kind, token_value).await? {
            CheckedToken::Settled(outcome) => {
                return Err(SubmitFailure {
                    error: ApprovalError::TokenAlreadyConsumed,
                    existing_outcome: Some(outcome),
                });
            }
            CheckedToken::Live(token) => token,
        };

        // Steps 2-4: form-local validation; failures here never reach the
        // token store, so resubmission stays free of side effects.
        self.validator.validate(kind, &input).map_err(|validation_error| {
            self.emit_submission_rejected(&token, correlation_id, validation_error.code());
            SubmitFailure::from_error(validation_error)
        })?;
        self.check_signature_size(&token, &input, correlation_id)?;

        let now = Utc::now();
        let record = self.validator.into_record(input, now, source_ip);
        let decision = record.decision;
        let outcome = ApprovalOutcome::new(
            token.token.clone(),
            token.document_kind,
            token.document_ref.clone(),
            record,
            now,
        );

        match self.store.consume(outcome).await.map_err(map_repository_error)? {
            ConsumeResult::Won(outcome) => {
                info!(
                    event_name = "signing.submission.accepted",
                    correlation_id = %correlation_id,
                    document_kind = %kind,
                    document_ref = %outcome.document_ref.0,
                    decision = decision.as_str(),
                    "approval outcome recorded"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(kind),
                        Some(outcome.document_ref.clone()),
                        correlation_id,
                        "submission.accepted",
                        AuditCategory::Submission,
                        "transition-engine",
                        AuditOutcome::Success,
                    )
                    .with_metadata("decision", decision.as_str()),
                );

                self.dispatch_notification(&outcome, correlation_id).await;
                Ok(outcome)
            }
            ConsumeResult::AlreadyConsumed => {
                // Lost the double-submit race. Surface the winner's outcome
                // so the loser sees the document is settled.
                let existing_outcome =
                    self.store.find_outcome(token_value).await.map_err(map_repository_error)?;
                self.emit_submission_rejected(&token, correlation_id, "TokenAlreadyConsumed");
                Err(SubmitFailure {
                    error: ApprovalError::TokenAlreadyConsumed,
                    existing_outcome,
                })
            }
            ConsumeResult::Expired => {
                self.emit_submission_rejected(&token, correlation_id, "TokenExpired");
                Err(SubmitFailure::from_error(ApprovalError::TokenExpired))
            }
            ConsumeResult::NotFound => {
                Err(SubmitFailure::from_error(ApprovalError::TokenNotFound))
            }
        }
    }

    /// Shared token re-validation for resolution and submission.
    async fn checked_token(
        &self,
        kind: DocumentKind,
        token_value: &str,
    ) -> Result<CheckedToken, ApprovalError> {
        let token = self
            .store
            .find_by_token(token_value)
            .await
            .map_err(map_repository_error)?
            .ok_or(ApprovalError::TokenNotFound)?;

        // A token presented under the wrong kind's route is not that kind's
        // link.
        if token.document_kind != kind {
            return Err(ApprovalError::TokenNotFound);
        }

        if token.status == TokenStatus::Consumed {
            return match self
                .store
                .find_outcome(token_value)
                .await
                .map_err(map_repository_error)?
            {
                Some(outcome) => Ok(CheckedToken::Settled(outcome)),
                None => Err(ApprovalError::TokenAlreadyConsumed),
            };
        }

        if token.is_expired(Utc::now()) {
            return Err(ApprovalError::TokenExpired);
        }

        Ok(CheckedToken::Live(token))
    }

    fn check_signature_size(
        &self,
        token: &ApprovalToken,
        input: &SubmissionInput,
        correlation_id: &str,
    ) -> Result<(), SubmitFailure> {
        let oversized = input
            .signature_image
            .as_ref()
            .is_some_and(|image| image.len() > self.max_signature_bytes);
        if oversized {
            self.emit_submission_rejected(token, correlation_id, "SignatureTooLarge");
            return Err(SubmitFailure::from_error(ApprovalError::SignatureTooLarge));
        }
        Ok(())
    }

    async fn dispatch_notification(&self, outcome: &ApprovalOutcome, correlation_id: &str) {
        // The transition is already durable; a failed dispatch is logged and
        // audited but never unwinds the outcome.
        if let Err(dispatch_error) = self.notifier.outcome_recorded(outcome).await {
            error!(
                event_name = "signing.notification.failed",
                correlation_id = %correlation_id,
                document_ref = %outcome.document_ref.0,
                error = %dispatch_error,
                "notification dispatch failed after recorded outcome"
            );
            self.audit.emit(AuditEvent::new(
                Some(outcome.document_kind),
                Some(outcome.document_ref.clone()),
                correlation_id,
                "notification.failed",
                AuditCategory::Notification,
                "notifier",
                AuditOutcome::Failed,
            ));
        }
    }

    fn emit_link_rejected(&self, token: &ApprovalToken, correlation_id: &str, reason: &str) {
        self.audit.emit(
            AuditEvent::new(
                Some(token.document_kind),
                Some(token.document_ref.clone()),
                correlation_id,
                "link.rejected",
                AuditCategory::Link,
                "link-resolver",
                AuditOutcome::Rejected,
            )
            .with_metadata("reason", reason),
        );
    }

    fn emit_submission_rejected(
        &self,
        token: &ApprovalToken,
        correlation_id: &str,
        reason: &str,
    ) {
        self.audit.emit(
            AuditEvent::new(
                Some(token.document_kind),
                Some(token.document_ref.clone()),
                correlation_id,
                "submission.rejected",
                AuditCategory::Submission,
                "transition-engine",
                AuditOutcome::Rejected,
            )
            .with_metadata("reason", reason),
        );
    }
}

enum CheckedToken {
    Live(ApprovalToken),
    Settled(ApprovalOutcome),
}

fn map_repository_error(repository_error: RepositoryError) -> ApprovalError {
    error!(
        event_name = "signing.store.error",
        error = %repository_error,
        "token store operation failed"
    );
    ApprovalError::ProviderUnavailable
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use standsign_core::audit::InMemoryAuditSink;
    use standsign_core::domain::kind::DocumentKind;
    use standsign_core::domain::outcome::{Decision, SignatureImage};
    use standsign_core::domain::snapshot::{
        DocumentSnapshot, LineItem, Party, PrefillHints,
    };
    use standsign_core::domain::token::{ApprovalToken, DocumentRef, TokenStatus};
    use standsign_core::errors::ApprovalError;
    use standsign_core::signing::{
        InMemorySnapshotProvider, LinkResolution, RecordingNotificationDispatcher,
        SubmissionInput,
    };
    use standsign_db::repositories::{DocumentState, InMemoryTokenStore, TokenStore};

    use super::SigningService;

    const MAX_SIGNATURE_BYTES: usize = 1024;

    fn snapshot(kind: DocumentKind, document_ref: &str) -> DocumentSnapshot {
        DocumentSnapshot {
            document_kind: kind,
            document_ref: DocumentRef(document_ref.to_string()),
            title: format!("{} {document_ref}", kind.display_name()),
            currency: "TRY".to_string(),
            total_amount: Decimal::new(150_000, 2),
            issuer: Party {
                name: "Expo Stand Works".to_string(),
                contact_name: None,
                email: Some("billing@expostand.example".to_string()),
            },
            counterparty: Party {
                name: "Fairline Logistics".to_string(),
                contact_name: Some("Deniz Aksoy".to_string()),
                email: None,
            },
            line_items: vec![LineItem {
                description: "Stand assembly, hall 3".to_string(),
                quantity: 1,
                unit_amount: Decimal::new(150_000, 2),
                total_amount: Decimal::new(150_000, 2),
            }],
            prefill: PrefillHints::default(),
        }
    }

    struct Harness {
        service: SigningService,
        store: InMemoryTokenStore,
        notifier: RecordingNotificationDispatcher,
        audit: InMemoryAuditSink,
    }

    fn harness_with(documents: Vec<DocumentSnapshot>) -> Harness {
        let store = InMemoryTokenStore::default();
        let notifier = RecordingNotificationDispatcher::default();
        let audit = InMemoryAuditSink::default();
        let service = SigningService::new(
            Arc::new(store.clone()),
            Arc::new(InMemorySnapshotProvider::with_documents(documents)),
            Arc::new(notifier.clone()),
            Arc::new(audit.clone()),
            MAX_SIGNATURE_BYTES,
        );
        Harness { service, store, notifier, audit }
    }

    async fn issued_token(harness: &Harness, kind: DocumentKind, document_ref: &str) -> String {
        let token =
            ApprovalToken::issue(kind, DocumentRef(document_ref.to_string()), Utc::now(), None);
        harness.store.issue(&token).await.expect("issue");
        token.token
    }

    fn approval(signer: &str) -> SubmissionInput {
        SubmissionInput {
            decision: Decision::Approved,
            signer_name: signer.to_string(),
            signer_title: None,
            signer_company: None,
            signature_image: Some(SignatureImage(vec![0x42, 0x4d, 7, 7, 7])),
            accepted_terms: false,
            comments: None,
        }
    }

    fn rejection(signer: &str) -> SubmissionInput {
        SubmissionInput {
            decision: Decision::Rejected,
            signer_name: signer.to_string(),
            signer_title: None,
            signer_company: None,
            signature_image: None,
            accepted_terms: false,
            comments: Some("amount does not match the site report".to_string()),
        }
    }

    #[tokio::test]
    async fn issue_link_binds_a_token_to_an_existing_document() {
        let harness = harness_with(vec![snapshot(DocumentKind::Handover, "HND-44")]);

        let token = harness
            .service
            .issue_link(DocumentKind::Handover, DocumentRef("HND-44".to_string()), None, "req-1")
            .await
            .expect("issue");

        assert_eq!(token.document_kind, DocumentKind::Handover);
        assert!(token.is_consumable(Utc::now()));
        assert!(harness
            .store
            .find_by_token(&token.token)
            .await
            .expect("find")
            .is_some());
    }

    #[tokio::test]
    async fn issue_link_refuses_missing_documents() {
        let harness = harness_with(vec![]);

        let error = harness
            .service
            .issue_link(DocumentKind::Handover, DocumentRef("HND-NOPE".to_string()), None, "req-1")
            .await
            .expect_err("should fail");
        assert_eq!(error, ApprovalError::DocumentNotFound);
    }

    #[tokio::test]
    async fn resolving_unknown_token_fails_with_not_found() {
        let harness = harness_with(vec![]);
        let error = harness
            .service
            .resolve(DocumentKind::CollectionReceipt, "zz-bogus", "req-1")
            .await
            .expect_err("should fail");
        assert_eq!(error, ApprovalError::TokenNotFound);
    }

    #[tokio::test]
    async fn resolving_a_live_link_returns_snapshot_and_prefill() {
        let harness =
            harness_with(vec![snapshot(DocumentKind::CollectionReceipt, "CR-2026-0042")]);
        let token =
            issued_token(&harness, DocumentKind::CollectionReceipt, "CR-2026-0042").await;

        let resolution = harness
            .service
            .resolve(DocumentKind::CollectionReceipt, &token, "req-1")
            .await
            .expect("resolve");

        match resolution {
            LinkResolution::Pending { document, prefill, policy } => {
                assert_eq!(document.document_ref.0, "CR-2026-0042");
                assert_eq!(prefill.signer_name.as_deref(), Some("Deniz Aksoy"));
                assert!(policy.requires_drawn_signature);
            }
            other => panic!("expected pending resolution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn token_under_wrong_kind_route_is_not_found() {
        let harness = harness_with(vec![snapshot(DocumentKind::Handover, "HND-9")]);
        let token = issued_token(&harness, DocumentKind::Handover, "HND-9").await;

        let error = harness
            .service
            .resolve(DocumentKind::ExpenseReceipt, &token, "req-1")
            .await
            .expect_err("should fail");
        assert_eq!(error, ApprovalError::TokenNotFound);
    }

    #[tokio::test]
    async fn expired_link_resolves_to_token_expired() {
        let harness = harness_with(vec![snapshot(DocumentKind::Handover, "HND-OLD")]);
        let mut token = ApprovalToken::issue(
            DocumentKind::Handover,
            DocumentRef("HND-OLD".to_string()),
            Utc::now(),
            None,
        );
        token.expires_at = Some(Utc::now() - Duration::hours(2));
        harness.store.issue(&token).await.expect("issue");

        let error = harness
            .service
            .resolve(DocumentKind::Handover, &token.token, "req-1")
            .await
            .expect_err("should fail");
        assert_eq!(error, ApprovalError::TokenExpired);
    }

    #[tokio::test]
    async fn missing_document_is_fatal_even_with_valid_token() {
        let harness = harness_with(vec![]);
        let token = issued_token(&harness, DocumentKind::Handover, "HND-GONE").await;

        let error = harness
            .service
            .resolve(DocumentKind::Handover, &token, "req-1")
            .await
            .expect_err("should fail");
        assert_eq!(error, ApprovalError::DocumentNotFound);
    }

    #[tokio::test]
    async fn unreachable_provider_is_transient() {
        let store = InMemoryTokenStore::default();
        let service = SigningService::new(
            Arc::new(store.clone()),
            Arc::new(InMemorySnapshotProvider::unavailable()),
            Arc::new(RecordingNotificationDispatcher::default()),
            Arc::new(InMemoryAuditSink::default()),
            MAX_SIGNATURE_BYTES,
        );
        let token = ApprovalToken::issue(
            DocumentKind::CollectionReceipt,
            DocumentRef("CR-1".to_string()),
            Utc::now(),
            None,
        );
        store.issue(&token).await.expect("issue");

        let error = service
            .resolve(DocumentKind::CollectionReceipt, &token.token, "req-1")
            .await
            .expect_err("should fail");
        assert_eq!(error, ApprovalError::ProviderUnavailable);
    }

    #[tokio::test]
    async fn approved_submission_consumes_token_and_notifies() {
        let harness =
            harness_with(vec![snapshot(DocumentKind::CollectionReceipt, "CR-2026-0042")]);
        let token =
            issued_token(&harness, DocumentKind::CollectionReceipt, "CR-2026-0042").await;

        let outcome = harness
            .service
            .submit(
                DocumentKind::CollectionReceipt,
                &token,
                approval("Deniz Aksoy"),
                Some("203.0.113.7".to_string()),
                "req-1",
            )
            .await
            .expect("submit");

        assert_eq!(outcome.record.decision, Decision::Approved);
        assert_eq!(outcome.record.source_ip.as_deref(), Some("203.0.113.7"));

        let stored = harness.store.find_by_token(&token).await.expect("find").expect("exists");
        assert_eq!(stored.status, TokenStatus::Consumed);
        assert_eq!(
            harness
                .store
                .document_state(DocumentKind::CollectionReceipt, &outcome.document_ref)
                .await
                .expect("state"),
            Some(DocumentState::Signed)
        );

        let dispatched = harness.notifier.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].token, outcome.token);

        assert!(harness
            .audit
            .events()
            .iter()
            .any(|event| event.event_type == "submission.accepted"));
    }

    #[tokio::test]
    async fn submitted_signature_bytes_round_trip_into_the_outcome() {
        let harness = harness_with(vec![snapshot(DocumentKind::Handover, "HND-3")]);
        let token = issued_token(&harness, DocumentKind::Handover, "HND-3").await;

        let mut input = approval("Deniz Aksoy");
        let captured = SignatureImage(vec![9, 8, 7, 6, 5, 4, 3, 2, 1]);
        input.signature_image = Some(captured.clone());

        let outcome = harness
            .service
            .submit(DocumentKind::Handover, &token, input, None, "req-1")
            .await
            .expect("submit");

        assert_eq!(outcome.record.signature_image, Some(captured));
    }

    #[tokio::test]
    async fn validation_failure_leaves_token_issued() {
        let harness =
            harness_with(vec![snapshot(DocumentKind::CollectionReceipt, "CR-2026-0042")]);
        let token =
            issued_token(&harness, DocumentKind::CollectionReceipt, "CR-2026-0042").await;

        let mut input = approval("");
        input.signature_image = None;
        let failure = harness
            .service
            .submit(DocumentKind::CollectionReceipt, &token, input, None, "req-1")
            .await
            .expect_err("should fail");
        assert_eq!(failure.error, ApprovalError::MissingSignerName);

        let stored = harness.store.find_by_token(&token).await.expect("find").expect("exists");
        assert_eq!(stored.status, TokenStatus::Issued);
    }

    #[tokio::test]
    async fn approval_without_drawn_signature_is_rejected_and_harmless() {
        let harness =
            harness_with(vec![snapshot(DocumentKind::CollectionReceipt, "CR-2026-0042")]);
        let token =
            issued_token(&harness, DocumentKind::CollectionReceipt, "CR-2026-0042").await;

        let mut input = approval("Deniz Aksoy");
        input.signature_image = Some(SignatureImage(Vec::new()));
        let failure = harness
            .service
            .submit(DocumentKind::CollectionReceipt, &token, input, None, "req-1")
            .await
            .expect_err("should fail");
        assert_eq!(failure.error, ApprovalError::SignatureRequired);

        let stored = harness.store.find_by_token(&token).await.expect("find").expect("exists");
        assert_eq!(stored.status, TokenStatus::Issued);
    }

    #[tokio::test]
    async fn expense_receipt_approval_takes_acceptance_instead_of_signature() {
        let harness = harness_with(vec![snapshot(DocumentKind::ExpenseReceipt, "ER-17")]);
        let token = issued_token(&harness, DocumentKind::ExpenseReceipt, "ER-17").await;

        let mut input = approval("Mert Kaya");
        input.signature_image = None;

        let failure = harness
            .service
            .submit(DocumentKind::ExpenseReceipt, &token, input.clone(), None, "req-1")
            .await
            .expect_err("acceptance missing");
        assert_eq!(failure.error, ApprovalError::MissingAcceptance);

        input.accepted_terms = true;
        let outcome = harness
            .service
            .submit(DocumentKind::ExpenseReceipt, &token, input, None, "req-2")
            .await
            .expect("submit");
        assert_eq!(outcome.record.signature_image, None);
        assert!(outcome.record.accepted_terms);
    }

    #[tokio::test]
    async fn oversized_signature_is_rejected_before_any_write() {
        let harness = harness_with(vec![snapshot(DocumentKind::Handover, "HND-3")]);
        let token = issued_token(&harness, DocumentKind::Handover, "HND-3").await;

        let mut input = approval("Deniz Aksoy");
        input.signature_image = Some(SignatureImage(vec![0u8; MAX_SIGNATURE_BYTES + 1]));

        let failure = harness
            .service
            .submit(DocumentKind::Handover, &token, input, None, "req-1")
            .await
            .expect_err("should fail");
        assert_eq!(failure.error, ApprovalError::SignatureTooLarge);

        let stored = harness.store.find_by_token(&token).await.expect("find").expect("exists");
        assert_eq!(stored.status, TokenStatus::Issued);
    }

    #[tokio::test]
    async fn losing_submission_receives_the_existing_outcome() {
        let harness =
            harness_with(vec![snapshot(DocumentKind::CollectionReceipt, "CR-2026-0042")]);
        let token =
            issued_token(&harness, DocumentKind::CollectionReceipt, "CR-2026-0042").await;

        harness
            .service
            .submit(
                DocumentKind::CollectionReceipt,
                &token,
                approval("Winning Signer"),
                None,
                "req-1",
            )
            .await
            .expect("first submit");

        let failure = harness
            .service
            .submit(
                DocumentKind::CollectionReceipt,
                &token,
                rejection("Losing Signer"),
                None,
                "req-2",
            )
            .await
            .expect_err("second submit loses");

        assert_eq!(failure.error, ApprovalError::TokenAlreadyConsumed);
        let existing = failure.existing_outcome.expect("existing outcome is surfaced");
        assert_eq!(existing.record.signer_name, "Winning Signer");
        assert_eq!(existing.record.decision, Decision::Approved);
    }

    #[tokio::test]
    async fn concurrent_submissions_settle_exactly_once() {
        let harness =
            harness_with(vec![snapshot(DocumentKind::CollectionReceipt, "CR-RACE")]);
        let service = Arc::new(harness.service);
        let token = {
            let token = ApprovalToken::issue(
                DocumentKind::CollectionReceipt,
                DocumentRef("CR-RACE".to_string()),
                Utc::now(),
                None,
            );
            harness.store.issue(&token).await.expect("issue");
            token.token
        };

        let (first, second) = tokio::join!(
            {
                let service = service.clone();
                let token = token.clone();
                async move {
                    service
                        .submit(
                            DocumentKind::CollectionReceipt,
                            &token,
                            approval("Approver"),
                            None,
                            "req-a",
                        )
                        .await
                }
            },
            {
                let service = service.clone();
                let token = token.clone();
                async move {
                    service
                        .submit(
                            DocumentKind::CollectionReceipt,
                            &token,
                            rejection("Rejecter"),
                            None,
                            "req-b",
                        )
                        .await
                }
            },
        );

        let results = [first, second];
        let wins = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(wins, 1, "exactly one concurrent submission may win");

        let loss = results
            .iter()
            .find_map(|result| result.as_ref().err())
            .expect("one submission loses");
        assert_eq!(loss.error, ApprovalError::TokenAlreadyConsumed);
        assert!(loss.existing_outcome.is_some());
    }

    #[tokio::test]
    async fn resolving_a_settled_link_returns_the_original_outcome() {
        let harness =
            harness_with(vec![snapshot(DocumentKind::CollectionReceipt, "CR-2026-0042")]);
        let token =
            issued_token(&harness, DocumentKind::CollectionReceipt, "CR-2026-0042").await;

        let submitted = harness
            .service
            .submit(
                DocumentKind::CollectionReceipt,
                &token,
                approval("Deniz Aksoy"),
                None,
                "req-1",
            )
            .await
            .expect("submit");

        let resolution = harness
            .service
            .resolve(DocumentKind::CollectionReceipt, &token, "req-2")
            .await
            .expect("resolve settled link");

        match resolution {
            LinkResolution::AlreadyCompleted { already_completed, outcome } => {
                assert!(already_completed);
                assert_eq!(outcome, submitted);
            }
            other => panic!("expected completed resolution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_notification_does_not_unwind_the_outcome() {
        let store = InMemoryTokenStore::default();
        let audit = InMemoryAuditSink::default();
        let service = SigningService::new(
            Arc::new(store.clone()),
            Arc::new(InMemorySnapshotProvider::with_documents(vec![snapshot(
                DocumentKind::Handover,
                "HND-3",
            )])),
            Arc::new(RecordingNotificationDispatcher::failing()),
            Arc::new(audit.clone()),
            MAX_SIGNATURE_BYTES,
        );
        let token = ApprovalToken::issue(
            DocumentKind::Handover,
            DocumentRef("HND-3".to_string()),
            Utc::now(),
            None,
        );
        store.issue(&token).await.expect("issue");

        let outcome = service
            .submit(DocumentKind::Handover, &token.token, approval("Deniz Aksoy"), None, "req-1")
            .await
            .expect("submission succeeds despite notifier failure");

        assert_eq!(
            store.find_outcome(&token.token).await.expect("find").map(|o| o.token),
            Some(outcome.token)
        );
        assert!(audit
            .events()
            .iter()
            .any(|event| event.event_type == "notification.failed"));
    }
}
