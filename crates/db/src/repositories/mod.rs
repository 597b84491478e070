use async_trait::async_trait;
use thiserror::Error;

use standsign_core::domain::kind::DocumentKind;
use standsign_core::domain::outcome::ApprovalOutcome;
use standsign_core::domain::token::{ApprovalToken, DocumentRef};

pub mod memory;
pub mod token_store;

pub use memory::InMemoryTokenStore;
pub use token_store::SqlTokenStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Externally-visible approval status of a bound document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentState {
    Pending,
    Signed,
    Rejected,
}

impl DocumentState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Signed => "signed",
            Self::Rejected => "rejected",
        }
    }
}

/// Result of the atomic conditional transition on a token.
///
/// `Won` means this submission consumed the token and its outcome is now the
/// one persisted record; every other variant means nothing was written.
#[derive(Clone, Debug, PartialEq)]
pub enum ConsumeResult {
    Won(ApprovalOutcome),
    AlreadyConsumed,
    Expired,
    NotFound,
}

/// Persistence seam for single-use approval tokens and their outcomes.
///
/// `consume` is the only mutation after issuance and must behave as a
/// compare-and-swap: the token transitions `issued -> consumed` together
/// with the outcome insert and document status update, in one atomic step,
/// only if the status is still `issued` at write time.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn issue(&self, token: &ApprovalToken) -> Result<(), RepositoryError>;

    async fn find_by_token(&self, token: &str)
        -> Result<Option<ApprovalToken>, RepositoryError>;

    async fn consume(&self, outcome: ApprovalOutcome) -> Result<ConsumeResult, RepositoryError>;

    async fn find_outcome(
        &self,
        token: &str,
    ) -> Result<Option<ApprovalOutcome>, RepositoryError>;

    async fn document_state(
        &self,
        kind: DocumentKind,
        document_ref: &DocumentRef,
    ) -> Result<Option<DocumentState>, RepositoryError>;
}

pub(crate) fn parse_document_state(raw: &str) -> Result<DocumentState, RepositoryError> {
    match raw {
        "pending" => Ok(DocumentState::Pending),
        "signed" => Ok(DocumentState::Signed),
        "rejected" => Ok(DocumentState::Rejected),
        other => Err(RepositoryError::Decode(format!("unknown document state `{other}`"))),
    }
}
