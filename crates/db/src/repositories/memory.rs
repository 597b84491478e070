use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use standsign_core::domain::kind::DocumentKind;
use standsign_core::domain::outcome::{ApprovalOutcome, Decision};
use standsign_core::domain::token::{ApprovalToken, DocumentRef, TokenStatus};

use super::{ConsumeResult, DocumentState, RepositoryError, TokenStore};

#[derive(Default)]
struct State {
    tokens: HashMap<String, ApprovalToken>,
    outcomes: HashMap<String, ApprovalOutcome>,
    documents: HashMap<(DocumentKind, String), DocumentState>,
}

/// In-memory token store for tests and dev mode.
///
/// One mutex guards tokens and outcomes together, so `consume` has the same
/// atomicity as the SQL transaction: the status check and all writes happen
/// under a single lock acquisition.
#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryTokenStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn issue(&self, token: &ApprovalToken) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        state.tokens.insert(token.token.clone(), token.clone());
        state
            .documents
            .entry((token.document_kind, token.document_ref.0.clone()))
            .or_insert(DocumentState::Pending);
        Ok(())
    }

    async fn find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<ApprovalToken>, RepositoryError> {
        Ok(self.lock().tokens.get(token).cloned())
    }

    async fn consume(&self, outcome: ApprovalOutcome) -> Result<ConsumeResult, RepositoryError> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(token) = state.tokens.get_mut(&outcome.token) else {
            return Ok(ConsumeResult::NotFound);
        };

        match token.status {
            TokenStatus::Consumed => return Ok(ConsumeResult::AlreadyConsumed),
            TokenStatus::Expired => return Ok(ConsumeResult::Expired),
            TokenStatus::Issued => {}
        }
        if token.is_expired(outcome.recorded_at) {
            return Ok(ConsumeResult::Expired);
        }

        token.status = TokenStatus::Consumed;
        let document_state = match outcome.record.decision {
            Decision::Approved => DocumentState::Signed,
            Decision::Rejected => DocumentState::Rejected,
        };
        state
            .documents
            .insert((outcome.document_kind, outcome.document_ref.0.clone()), document_state);
        state.outcomes.insert(outcome.token.clone(), outcome.clone());

        Ok(ConsumeResult::Won(outcome))
    }

    async fn find_outcome(
        &self,
        token: &str,
    ) -> Result<Option<ApprovalOutcome>, RepositoryError> {
        Ok(self.lock().outcomes.get(token).cloned())
    }

    async fn document_state(
        &self,
        kind: DocumentKind,
        document_ref: &DocumentRef,
    ) -> Result<Option<DocumentState>, RepositoryError> {
        Ok(self.lock().documents.get(&(kind, document_ref.0.clone())).copied())
    }
}
