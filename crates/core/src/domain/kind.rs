use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Business document a signing link is bound to.
///
/// Each kind carries its own signing policy; the transition engine is written
/// once and kinds differ only in policy data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    CollectionReceipt,
    ExpenseReceipt,
    Handover,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SigningPolicy {
    /// A drawn signature image must accompany an approval.
    pub requires_drawn_signature: bool,
    /// An explicit acceptance confirmation must accompany an approval.
    pub requires_acceptance: bool,
    /// Link lifetime applied at issuance when the caller does not override it.
    pub default_ttl: Option<Duration>,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] =
        [Self::CollectionReceipt, Self::ExpenseReceipt, Self::Handover];

    /// Per-kind signing policy.
    ///
    /// Handovers and collection receipts mandate a drawn signature on
    /// approval. Expense receipts instead take an acceptance confirmation
    /// plus the signer name; the asymmetry is deliberate and must not be
    /// unified.
    pub fn policy(self) -> SigningPolicy {
        match self {
            Self::CollectionReceipt => SigningPolicy {
                requires_drawn_signature: true,
                requires_acceptance: false,
                default_ttl: Some(Duration::days(30)),
            },
            Self::ExpenseReceipt => SigningPolicy {
                requires_drawn_signature: false,
                requires_acceptance: true,
                default_ttl: Some(Duration::days(30)),
            },
            Self::Handover => SigningPolicy {
                requires_drawn_signature: true,
                requires_acceptance: false,
                default_ttl: Some(Duration::days(14)),
            },
        }
    }

    /// Path segment used in approval URLs, e.g. `collection-receipt`.
    pub fn as_route_segment(self) -> &'static str {
        match self {
            Self::CollectionReceipt => "collection-receipt",
            Self::ExpenseReceipt => "expense-receipt",
            Self::Handover => "handover",
        }
    }

    /// Storage key, stable across releases.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CollectionReceipt => "collection_receipt",
            Self::ExpenseReceipt => "expense_receipt",
            Self::Handover => "handover",
        }
    }

    /// Human-facing label for signing pages and notifications.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::CollectionReceipt => "Collection Receipt",
            Self::ExpenseReceipt => "Expense Receipt",
            Self::Handover => "Project Handover",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown document kind `{0}`")]
pub struct UnknownDocumentKind(pub String);

impl FromStr for DocumentKind {
    type Err = UnknownDocumentKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "collection_receipt" | "collection-receipt" => Ok(Self::CollectionReceipt),
            "expense_receipt" | "expense-receipt" => Ok(Self::ExpenseReceipt),
            "handover" => Ok(Self::Handover),
            other => Err(UnknownDocumentKind(other.to_string())),
        }
    }
}
