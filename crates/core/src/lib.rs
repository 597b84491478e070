pub mod audit;
pub mod capture;
pub mod config;
pub mod domain;
pub mod errors;
pub mod signing;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use capture::{CaptureState, Point, SignatureCanvas, Stroke};
pub use domain::kind::{DocumentKind, SigningPolicy, UnknownDocumentKind};
pub use domain::outcome::{ApprovalOutcome, Decision, SignatureImage, SignatureRecord};
pub use domain::snapshot::{DocumentSnapshot, LineItem, Party, PrefillHints};
pub use domain::token::{generate_token, ApprovalToken, DocumentRef, TokenStatus};
pub use errors::{ApprovalError, ErrorDisposition};
pub use signing::{
    InMemorySnapshotProvider, LinkResolution, NotificationDispatcher, PolicyView, ProviderError,
    RecordingNotificationDispatcher, SnapshotProvider, SubmissionInput, SubmissionValidator,
};
