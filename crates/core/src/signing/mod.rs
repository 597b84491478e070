use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::kind::{DocumentKind, SigningPolicy};
use crate::domain::outcome::{ApprovalOutcome, Decision, SignatureImage, SignatureRecord};
use crate::domain::snapshot::{DocumentSnapshot, PrefillHints};
use crate::domain::token::DocumentRef;
use crate::errors::ApprovalError;

/// Signer form contents as submitted, before validation. Field names follow
/// the wire contract of the signing form (`signerName`, `signatureImage`...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionInput {
    pub decision: Decision,
    pub signer_name: String,
    pub signer_title: Option<String>,
    pub signer_company: Option<String>,
    pub signature_image: Option<SignatureImage>,
    #[serde(default)]
    pub accepted_terms: bool,
    pub comments: Option<String>,
}

/// Stateless, policy-driven validation of a submission.
///
/// The transition engine re-validates the token first; everything here is
/// local to the form and never touches the token store, so failed
/// validations can be retried indefinitely without affecting token state.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubmissionValidator;

impl SubmissionValidator {
    /// Checks run in order and short-circuit on the first failure.
    pub fn validate(
        &self,
        kind: DocumentKind,
        input: &SubmissionInput,
    ) -> Result<(), ApprovalError> {
        let policy = kind.policy();

        if input.signer_name.trim().is_empty() {
            return Err(ApprovalError::MissingSignerName);
        }

        if input.decision == Decision::Approved {
            if policy.requires_drawn_signature && !has_drawn_signature(input) {
                return Err(ApprovalError::SignatureRequired);
            }
            if policy.requires_acceptance && !input.accepted_terms {
                return Err(ApprovalError::MissingAcceptance);
            }
        }

        Ok(())
    }

    /// Normalizes a validated submission into the record embedded in the
    /// outcome. Rejections never carry an image, preserving the per-kind
    /// signature-iff-approved invariant.
    pub fn into_record(
        &self,
        input: SubmissionInput,
        submitted_at: DateTime<Utc>,
        source_ip: Option<String>,
    ) -> SignatureRecord {
        let signature_image = match input.decision {
            Decision::Approved => input.signature_image.filter(|image| !image.is_empty()),
            Decision::Rejected => None,
        };

        SignatureRecord {
            signer_name: input.signer_name.trim().to_string(),
            signer_title: non_blank(input.signer_title),
            signer_company: non_blank(input.signer_company),
            signature_image,
            decision: input.decision,
            accepted_terms: input.accepted_terms,
            comments: non_blank(input.comments),
            source_ip,
            submitted_at,
        }
    }
}

fn has_drawn_signature(input: &SubmissionInput) -> bool {
    input.signature_image.as_ref().is_some_and(|image| !image.is_empty())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Render-ready result of resolving a signing link.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LinkResolution {
    Pending {
        document: DocumentSnapshot,
        prefill: PrefillHints,
        policy: PolicyView,
    },
    /// Idempotent re-visit of a settled link: the confirmation view, not an
    /// error.
    AlreadyCompleted {
        #[serde(rename = "alreadyCompleted")]
        already_completed: bool,
        outcome: ApprovalOutcome,
    },
}

impl LinkResolution {
    pub fn completed(outcome: ApprovalOutcome) -> Self {
        Self::AlreadyCompleted { already_completed: true, outcome }
    }
}

/// Policy flags the signing form needs to render the right controls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PolicyView {
    pub requires_drawn_signature: bool,
    pub requires_acceptance: bool,
}

impl From<SigningPolicy> for PolicyView {
    fn from(policy: SigningPolicy) -> Self {
        Self {
            requires_drawn_signature: policy.requires_drawn_signature,
            requires_acceptance: policy.requires_acceptance,
        }
    }
}

/// Failure talking to an external collaborator. Always transient from the
/// signer's point of view; nothing was written.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("provider unavailable: {reason}")]
pub struct ProviderError {
    pub reason: String,
}

impl ProviderError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// External source of the immutable document data rendered for review.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// `Ok(None)` means the document is gone even though the token was
    /// valid: a data-integrity fault the resolver treats as fatal.
    async fn fetch(
        &self,
        kind: DocumentKind,
        document_ref: &DocumentRef,
    ) -> Result<Option<DocumentSnapshot>, ProviderError>;
}

/// Invoked after a successful transition; failures are logged by callers,
/// never unwound, because the transition is already durable.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn outcome_recorded(&self, outcome: &ApprovalOutcome) -> Result<(), ProviderError>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemorySnapshotProvider {
    documents: HashMap<(DocumentKind, String), DocumentSnapshot>,
    unavailable: bool,
}

impl InMemorySnapshotProvider {
    pub fn with_documents(documents: Vec<DocumentSnapshot>) -> Self {
        let documents = documents
            .into_iter()
            .map(|doc| ((doc.document_kind, doc.document_ref.0.clone()), doc))
            .collect();
        Self { documents, unavailable: false }
    }

    /// Simulates an unreachable provider for timeout-path tests.
    pub fn unavailable() -> Self {
        Self { documents: HashMap::new(), unavailable: true }
    }
}

#[async_trait]
impl SnapshotProvider for InMemorySnapshotProvider {
    async fn fetch(
        &self,
        kind: DocumentKind,
        document_ref: &DocumentRef,
    ) -> Result<Option<DocumentSnapshot>, ProviderError> {
        if self.unavailable {
            return Err(ProviderError::new("snapshot provider offline"));
        }
        Ok(self.documents.get(&(kind, document_ref.0.clone())).cloned())
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotificationDispatcher {
    dispatched: Arc<Mutex<Vec<ApprovalOutcome>>>,
    fail: bool,
}

impl RecordingNotificationDispatcher {
    pub fn failing() -> Self {
        Self { dispatched: Arc::default(), fail: true }
    }

    pub fn dispatched(&self) -> Vec<ApprovalOutcome> {
        match self.dispatched.lock() {
            Ok(dispatched) => dispatched.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotificationDispatcher {
    async fn outcome_recorded(&self, outcome: &ApprovalOutcome) -> Result<(), ProviderError> {
        if self.fail {
            return Err(ProviderError::new("notification endpoint rejected the call"));
        }
        match self.dispatched.lock() {
            Ok(mut dispatched) => dispatched.push(outcome.clone()),
            Err(poisoned) => poisoned.into_inner().push(outcome.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{SubmissionInput, SubmissionValidator};
    use crate::domain::kind::DocumentKind;
    use crate::domain::outcome::{Decision, SignatureImage};
    use crate::errors::ApprovalError;

    fn input(decision: Decision) -> SubmissionInput {
        SubmissionInput {
            decision,
            signer_name: "Deniz Aksoy".to_string(),
            signer_title: None,
            signer_company: None,
            signature_image: Some(SignatureImage(vec![1, 2, 3])),
            accepted_terms: false,
            comments: None,
        }
    }

    #[test]
    fn blank_signer_name_fails_first() {
        let mut submission = input(Decision::Approved);
        submission.signer_name = "   ".to_string();
        submission.signature_image = None;

        // Name check precedes the signature check.
        let error = SubmissionValidator
            .validate(DocumentKind::Handover, &submission)
            .expect_err("should fail");
        assert_eq!(error, ApprovalError::MissingSignerName);
    }

    #[test]
    fn approval_without_image_fails_for_mandating_kinds() {
        let mut submission = input(Decision::Approved);
        submission.signature_image = None;

        for kind in [DocumentKind::CollectionReceipt, DocumentKind::Handover] {
            let error =
                SubmissionValidator.validate(kind, &submission).expect_err("should fail");
            assert_eq!(error, ApprovalError::SignatureRequired);
        }
    }

    #[test]
    fn empty_image_bytes_count_as_missing() {
        let mut submission = input(Decision::Approved);
        submission.signature_image = Some(SignatureImage(Vec::new()));

        let error = SubmissionValidator
            .validate(DocumentKind::CollectionReceipt, &submission)
            .expect_err("should fail");
        assert_eq!(error, ApprovalError::SignatureRequired);
    }

    #[test]
    fn rejection_does_not_need_an_image() {
        let mut submission = input(Decision::Rejected);
        submission.signature_image = None;

        SubmissionValidator
            .validate(DocumentKind::Handover, &submission)
            .expect("rejection without image is valid");
    }

    #[test]
    fn expense_receipt_approval_needs_acceptance_not_image() {
        let mut submission = input(Decision::Approved);
        submission.signature_image = None;

        let error = SubmissionValidator
            .validate(DocumentKind::ExpenseReceipt, &submission)
            .expect_err("should fail");
        assert_eq!(error, ApprovalError::MissingAcceptance);

        submission.accepted_terms = true;
        SubmissionValidator
            .validate(DocumentKind::ExpenseReceipt, &submission)
            .expect("acceptance plus name suffices");
    }

    #[test]
    fn record_drops_image_on_rejection() {
        let record = SubmissionValidator.into_record(input(Decision::Rejected), Utc::now(), None);
        assert_eq!(record.signature_image, None);
    }

    #[test]
    fn record_trims_and_drops_blank_optionals() {
        let mut submission = input(Decision::Approved);
        submission.signer_name = "  Deniz Aksoy  ".to_string();
        submission.signer_title = Some("  ".to_string());
        submission.comments = Some(" looks good ".to_string());

        let record = SubmissionValidator.into_record(
            submission,
            Utc::now(),
            Some("203.0.113.7".to_string()),
        );

        assert_eq!(record.signer_name, "Deniz Aksoy");
        assert_eq!(record.signer_title, None);
        assert_eq!(record.comments.as_deref(), Some("looks good"));
        assert_eq!(record.source_ip.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn record_preserves_image_bytes_on_approval() {
        let submission = input(Decision::Approved);
        let expected = submission.signature_image.clone();

        let record = SubmissionValidator.into_record(submission, Utc::now(), None);
        assert_eq!(record.signature_image, expected);
    }

    mod collaborators {
        use chrono::Utc;
        use rust_decimal::Decimal;

        use crate::domain::kind::DocumentKind;
        use crate::domain::outcome::{ApprovalOutcome, Decision, SignatureRecord};
        use crate::domain::snapshot::{DocumentSnapshot, Party, PrefillHints};
        use crate::domain::token::DocumentRef;
        use crate::signing::{
            InMemorySnapshotProvider, NotificationDispatcher, RecordingNotificationDispatcher,
            SnapshotProvider,
        };

        fn snapshot(document_ref: &str) -> DocumentSnapshot {
            DocumentSnapshot {
                document_kind: DocumentKind::ExpenseReceipt,
                document_ref: DocumentRef(document_ref.to_string()),
                title: format!("Expense receipt {document_ref}"),
                currency: "TRY".to_string(),
                total_amount: Decimal::new(42_50, 2),
                issuer: Party {
                    name: "Expo Stand Works".to_string(),
                    contact_name: None,
                    email: None,
                },
                counterparty: Party {
                    name: "Fairline Logistics".to_string(),
                    contact_name: None,
                    email: None,
                },
                line_items: vec![],
                prefill: PrefillHints::default(),
            }
        }

        fn outcome() -> ApprovalOutcome {
            let now = Utc::now();
            ApprovalOutcome::new(
                "tok".to_string(),
                DocumentKind::ExpenseReceipt,
                DocumentRef("ER-1".to_string()),
                SignatureRecord {
                    signer_name: "Mert Kaya".to_string(),
                    signer_title: None,
                    signer_company: None,
                    signature_image: None,
                    decision: Decision::Approved,
                    accepted_terms: true,
                    comments: None,
                    source_ip: None,
                    submitted_at: now,
                },
                now,
            )
        }

        #[tokio::test]
        async fn in_memory_provider_serves_seeded_documents() {
            let provider = InMemorySnapshotProvider::with_documents(vec![snapshot("ER-1")]);

            let found = provider
                .fetch(DocumentKind::ExpenseReceipt, &DocumentRef("ER-1".to_string()))
                .await
                .expect("fetch");
            assert!(found.is_some());

            let missing = provider
                .fetch(DocumentKind::ExpenseReceipt, &DocumentRef("ER-2".to_string()))
                .await
                .expect("fetch");
            assert!(missing.is_none());

            assert!(InMemorySnapshotProvider::unavailable()
                .fetch(DocumentKind::ExpenseReceipt, &DocumentRef("ER-1".to_string()))
                .await
                .is_err());
        }

        #[tokio::test]
        async fn recording_dispatcher_captures_outcomes_and_can_fail() {
            let dispatcher = RecordingNotificationDispatcher::default();
            dispatcher.outcome_recorded(&outcome()).await.expect("dispatch");
            assert_eq!(dispatcher.dispatched().len(), 1);

            let failing = RecordingNotificationDispatcher::failing();
            assert!(failing.outcome_recorded(&outcome()).await.is_err());
            assert!(failing.dispatched().is_empty());
        }
    }
}
