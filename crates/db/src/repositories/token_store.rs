use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use standsign_core::domain::kind::DocumentKind;
use standsign_core::domain::outcome::{ApprovalOutcome, Decision, SignatureImage, SignatureRecord};
use standsign_core::domain::token::{ApprovalToken, DocumentRef, TokenStatus};

use super::{ConsumeResult, DocumentState, RepositoryError, TokenStore};
use crate::DbPool;

pub struct SqlTokenStore {
    pool: DbPool,
}

impl SqlTokenStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_kind(raw: &str) -> Result<DocumentKind, RepositoryError> {
    raw.parse().map_err(|_| RepositoryError::Decode(format!("unknown document kind `{raw}`")))
}

fn parse_token_status(raw: &str) -> Result<TokenStatus, RepositoryError> {
    match raw {
        "issued" => Ok(TokenStatus::Issued),
        "consumed" => Ok(TokenStatus::Consumed),
        "expired" => Ok(TokenStatus::Expired),
        other => Err(RepositoryError::Decode(format!("unknown token status `{other}`"))),
    }
}

fn parse_decision(raw: &str) -> Result<Decision, RepositoryError> {
    match raw {
        "approved" => Ok(Decision::Approved),
        "rejected" => Ok(Decision::Rejected),
        other => Err(RepositoryError::Decode(format!("unknown decision `{other}`"))),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {e}")))
}

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_token(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalToken, RepositoryError> {
    let token: String = decode(row.try_get("token"))?;
    let kind: String = decode(row.try_get("document_kind"))?;
    let document_ref: String = decode(row.try_get("document_ref"))?;
    let status: String = decode(row.try_get("status"))?;
    let issued_at: String = decode(row.try_get("issued_at"))?;
    let expires_at: Option<String> = decode(row.try_get("expires_at"))?;

    Ok(ApprovalToken {
        token,
        document_kind: parse_kind(&kind)?,
        document_ref: DocumentRef(document_ref),
        status: parse_token_status(&status)?,
        issued_at: parse_timestamp(&issued_at)?,
        expires_at: expires_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn row_to_outcome(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalOutcome, RepositoryError> {
    let token: String = decode(row.try_get("token"))?;
    let kind: String = decode(row.try_get("document_kind"))?;
    let document_ref: String = decode(row.try_get("document_ref"))?;
    let decision: String = decode(row.try_get("decision"))?;
    let signer_name: String = decode(row.try_get("signer_name"))?;
    let signer_title: Option<String> = decode(row.try_get("signer_title"))?;
    let signer_company: Option<String> = decode(row.try_get("signer_company"))?;
    let signature_image: Option<Vec<u8>> = decode(row.try_get("signature_image"))?;
    let signature_digest: Option<String> = decode(row.try_get("signature_digest"))?;
    let accepted_terms: i64 = decode(row.try_get("accepted_terms"))?;
    let comments: Option<String> = decode(row.try_get("comments"))?;
    let source_ip: Option<String> = decode(row.try_get("source_ip"))?;
    let submitted_at: String = decode(row.try_get("submitted_at"))?;
    let recorded_at: String = decode(row.try_get("recorded_at"))?;

    Ok(ApprovalOutcome {
        token,
        document_kind: parse_kind(&kind)?,
        document_ref: DocumentRef(document_ref),
        record: SignatureRecord {
            signer_name,
            signer_title,
            signer_company,
            signature_image: signature_image.map(SignatureImage),
            decision: parse_decision(&decision)?,
            accepted_terms: accepted_terms != 0,
            comments,
            source_ip,
            submitted_at: parse_timestamp(&submitted_at)?,
        },
        signature_digest,
        recorded_at: parse_timestamp(&recorded_at)?,
    })
}

#[async_trait]
impl TokenStore for SqlTokenStore {
    async fn issue(&self, token: &ApprovalToken) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_token
                (token, document_kind, document_ref, status, issued_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&token.token)
        .bind(token.document_kind.as_str())
        .bind(&token.document_ref.0)
        .bind(token.status.as_str())
        .bind(token.issued_at.to_rfc3339())
        .bind(token.expires_at.map(|dt| dt.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        // A settled document keeps its state; only first issuance seeds it.
        sqlx::query(
            "INSERT INTO document_status (document_kind, document_ref, status, updated_at)
             VALUES (?, ?, 'pending', ?)
             ON CONFLICT(document_kind, document_ref) DO NOTHING",
        )
        .bind(token.document_kind.as_str())
        .bind(&token.document_ref.0)
        .bind(token.issued_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<ApprovalToken>, RepositoryError> {
        let row = sqlx::query(
            "SELECT token, document_kind, document_ref, status, issued_at, expires_at
             FROM approval_token WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_token(r)?)),
            None => Ok(None),
        }
    }

    async fn consume(&self, outcome: ApprovalOutcome) -> Result<ConsumeResult, RepositoryError> {
        let now = outcome.recorded_at.to_rfc3339();
        let mut tx = self.pool.begin().await?;

        // The compare-and-swap: succeeds only while the token is still
        // `issued` and inside its validity window.
        let updated = sqlx::query(
            "UPDATE approval_token SET status = 'consumed'
             WHERE token = ? AND status = 'issued'
               AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(&outcome.token)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let row = sqlx::query("SELECT status FROM approval_token WHERE token = ?")
                .bind(&outcome.token)
                .fetch_optional(&mut *tx)
                .await?;

            let result = match row {
                None => ConsumeResult::NotFound,
                Some(r) => {
                    let status: String = decode(r.try_get("status"))?;
                    match parse_token_status(&status)? {
                        TokenStatus::Consumed => ConsumeResult::AlreadyConsumed,
                        // Stored `expired`, or `issued` past its deadline.
                        TokenStatus::Expired | TokenStatus::Issued => ConsumeResult::Expired,
                    }
                }
            };

            tx.rollback().await?;
            return Ok(result);
        }

        sqlx::query(
            "INSERT INTO approval_outcome
                (token, document_kind, document_ref, decision, signer_name, signer_title,
                 signer_company, signature_image, signature_digest, accepted_terms, comments,
                 source_ip, submitted_at, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&outcome.token)
        .bind(outcome.document_kind.as_str())
        .bind(&outcome.document_ref.0)
        .bind(outcome.record.decision.as_str())
        .bind(&outcome.record.signer_name)
        .bind(&outcome.record.signer_title)
        .bind(&outcome.record.signer_company)
        .bind(outcome.record.signature_image.as_ref().map(|image| image.0.clone()))
        .bind(&outcome.signature_digest)
        .bind(i64::from(outcome.record.accepted_terms))
        .bind(&outcome.record.comments)
        .bind(&outcome.record.source_ip)
        .bind(outcome.record.submitted_at.to_rfc3339())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let document_state = match outcome.record.decision {
            Decision::Approved => DocumentState::Signed,
            Decision::Rejected => DocumentState::Rejected,
        };

        sqlx::query(
            "INSERT INTO document_status (document_kind, document_ref, status, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(document_kind, document_ref) DO UPDATE SET
                 status = excluded.status,
                 updated_at = excluded.updated_at",
        )
        .bind(outcome.document_kind.as_str())
        .bind(&outcome.document_ref.0)
        .bind(document_state.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ConsumeResult::Won(outcome))
    }

    async fn find_outcome(
        &self,
        token: &str,
    ) -> Result<Option<ApprovalOutcome>, RepositoryError> {
        let row = sqlx::query(
            "SELECT token, document_kind, document_ref, decision, signer_name, signer_title,
                    signer_company, signature_image, signature_digest, accepted_terms, comments,
                    source_ip, submitted_at, recorded_at
             FROM approval_outcome WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_outcome(r)?)),
            None => Ok(None),
        }
    }

    async fn document_state(
        &self,
        kind: DocumentKind,
        document_ref: &DocumentRef,
    ) -> Result<Option<DocumentState>, RepositoryError> {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM document_status WHERE document_kind = ? AND document_ref = ?",
        )
        .bind(kind.as_str())
        .bind(&document_ref.0)
        .fetch_optional(&self.pool)
        .await?;

        status.as_deref().map(super::parse_document_state).transpose()
    }
}
