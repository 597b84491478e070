use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::domain::kind::DocumentKind;
use crate::domain::token::DocumentRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Raster image captured from the drawing surface.
///
/// Carried over the wire as a base64 string; stored as raw bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SignatureImage(pub Vec<u8>);

impl SignatureImage {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Hex-encoded SHA-256 of the raw image bytes, recorded on the outcome
    /// so the stored raster can be verified against what was captured.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.0);
        let digest = hasher.finalize();
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

impl std::fmt::Debug for SignatureImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureImage").field("bytes", &self.0.len()).finish()
    }
}

impl Serialize for SignatureImage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for SignatureImage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| D::Error::custom(format!("invalid base64 signature image: {e}")))?;
        Ok(Self(bytes))
    }
}

/// What the external party submitted, exactly as validated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub signer_name: String,
    pub signer_title: Option<String>,
    pub signer_company: Option<String>,
    pub signature_image: Option<SignatureImage>,
    pub decision: Decision,
    pub accepted_terms: bool,
    pub comments: Option<String>,
    pub source_ip: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Persisted, immutable result of a completed approval or rejection.
///
/// Created exactly once, at the moment the token is consumed; corrections
/// require a new document and a new token issued by the surrounding CRM.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub token: String,
    pub document_kind: DocumentKind,
    pub document_ref: DocumentRef,
    pub record: SignatureRecord,
    pub signature_digest: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ApprovalOutcome {
    pub fn new(
        token: String,
        document_kind: DocumentKind,
        document_ref: DocumentRef,
        record: SignatureRecord,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        let signature_digest =
            record.signature_image.as_ref().map(SignatureImage::digest);
        Self { token, document_kind, document_ref, record, signature_digest, recorded_at }
    }
}
