use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::kind::DocumentKind;

/// Identifier of the business document a token is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Issued,
    Consumed,
    Expired,
}

impl TokenStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Consumed => "consumed",
            Self::Expired => "expired",
        }
    }
}

/// Single-use credential embedded in an approval link.
///
/// `Issued -> Consumed` happens at most once; `Consumed` and `Expired` are
/// terminal. Expiry is evaluated lazily against `expires_at`, so a stored
/// status of `Issued` is not sufficient on its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalToken {
    pub token: String,
    pub document_kind: DocumentKind,
    pub document_ref: DocumentRef,
    pub status: TokenStatus,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApprovalToken {
    /// Issue a fresh token for a document, applying the kind's default TTL
    /// unless the caller overrides it.
    pub fn issue(
        document_kind: DocumentKind,
        document_ref: DocumentRef,
        now: DateTime<Utc>,
        ttl_override: Option<chrono::Duration>,
    ) -> Self {
        let ttl = ttl_override.or(document_kind.policy().default_ttl);
        Self {
            token: generate_token(),
            document_kind,
            document_ref,
            status: TokenStatus::Issued,
            issued_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    /// Effective expiry: either stored terminal state or elapsed deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.status == TokenStatus::Expired {
            return true;
        }
        matches!(self.expires_at, Some(deadline) if now > deadline)
    }

    pub fn is_consumable(&self, now: DateTime<Utc>) -> bool {
        self.status == TokenStatus::Issued && !self.is_expired(now)
    }
}

const TOKEN_LENGTH: usize = 40;

/// URL-safe opaque token. Alphanumeric from the thread RNG keeps links
/// unguessable without introducing separator characters.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
