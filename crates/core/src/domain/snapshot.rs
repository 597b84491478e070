use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::kind::DocumentKind;
use crate::domain::token::DocumentRef;

/// Read-only projection of a document as the external signer reviews it.
///
/// Supplied by the surrounding CRM through a `SnapshotProvider`; this core
/// never mutates it. Amounts are already converted to the document currency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub document_kind: DocumentKind,
    pub document_ref: DocumentRef,
    pub title: String,
    pub currency: String,
    pub total_amount: Decimal,
    pub issuer: Party,
    pub counterparty: Party,
    pub line_items: Vec<LineItem>,
    /// Pre-fill hints for the signer form, e.g. the supplier contact name.
    pub prefill: PrefillHints,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: u32,
    pub unit_amount: Decimal,
    pub total_amount: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefillHints {
    pub signer_name: Option<String>,
    pub signer_title: Option<String>,
    pub signer_company: Option<String>,
}

impl DocumentSnapshot {
    /// Hints default from the counterparty contact when the provider sends
    /// none, matching what the review form pre-fills.
    pub fn effective_prefill(&self) -> PrefillHints {
        PrefillHints {
            signer_name: self
                .prefill
                .signer_name
                .clone()
                .or_else(|| self.counterparty.contact_name.clone()),
            signer_title: self.prefill.signer_title.clone(),
            signer_company: self
                .prefill
                .signer_company
                .clone()
                .or_else(|| Some(self.counterparty.name.clone())),
        }
    }
}
