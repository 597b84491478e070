//! Audit sink persisting workflow events to the `audit_event` table.

use serde_json::json;
use tracing::error;

use standsign_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use standsign_db::DbPool;

#[derive(Clone)]
pub struct SqlAuditSink {
    pool: DbPool,
}

impl SqlAuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn category_as_str(category: &AuditCategory) -> &'static str {
    match category {
        AuditCategory::Link => "link",
        AuditCategory::Submission => "submission",
        AuditCategory::Notification => "notification",
        AuditCategory::System => "system",
    }
}

fn outcome_as_str(outcome: &AuditOutcome) -> &'static str {
    match outcome {
        AuditOutcome::Success => "success",
        AuditOutcome::Rejected => "rejected",
        AuditOutcome::Failed => "failed",
    }
}

pub async fn write_event(pool: &DbPool, event: &AuditEvent) -> Result<(), sqlx::Error> {
    let payload = json!({
        "correlation_id": event.correlation_id,
        "metadata": event.metadata,
    })
    .to_string();

    sqlx::query(
        "INSERT INTO audit_event
            (id, occurred_at, actor, document_kind, document_ref, event_type,
             event_category, outcome, payload_json)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.event_id)
    .bind(event.occurred_at.to_rfc3339())
    .bind(&event.actor)
    .bind(event.document_kind.map(|kind| kind.as_str()))
    .bind(event.document_ref.as_ref().map(|document_ref| document_ref.0.clone()))
    .bind(&event.event_type)
    .bind(category_as_str(&event.category))
    .bind(outcome_as_str(&event.outcome))
    .bind(payload)
    .execute(pool)
    .await?;

    Ok(())
}

impl AuditSink for SqlAuditSink {
    /// Fire-and-forget: audit writes never block or fail the signing path.
    fn emit(&self, event: AuditEvent) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(e) = write_event(&pool, &event).await {
                error!(
                    event_name = "audit.write_failed",
                    event_type = %event.event_type,
                    error = %e,
                    "failed to persist audit event"
                );
            }
        });
    }
}
