use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy of the approval workflow.
///
/// Split along retry semantics: token-state and data-integrity errors are
/// terminal for the link, validation errors are correctable by the signer,
/// and provider failures are transient.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "PascalCase")]
pub enum ApprovalError {
    #[error("approval token not found")]
    TokenNotFound,
    #[error("approval token has expired")]
    TokenExpired,
    #[error("approval token was already consumed")]
    TokenAlreadyConsumed,
    #[error("document bound to the token no longer exists")]
    DocumentNotFound,
    #[error("signer name is required")]
    MissingSignerName,
    #[error("a drawn signature is required to approve this document")]
    SignatureRequired,
    #[error("acceptance confirmation is required to approve this document")]
    MissingAcceptance,
    #[error("the drawn signature image exceeds the size limit")]
    SignatureTooLarge,
    #[error("an external provider is unavailable, try again")]
    ProviderUnavailable,
}

/// How the caller should treat the failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// The link will never work; render a permanent "link invalid" page.
    Terminal,
    /// The form can be corrected and resubmitted without side effects.
    Correctable,
    /// Nothing was written; the same submission may be retried.
    Transient,
}

impl ApprovalError {
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            Self::TokenNotFound
            | Self::TokenExpired
            | Self::TokenAlreadyConsumed
            | Self::DocumentNotFound => ErrorDisposition::Terminal,
            Self::MissingSignerName
            | Self::SignatureRequired
            | Self::MissingAcceptance
            | Self::SignatureTooLarge => ErrorDisposition::Correctable,
            Self::ProviderUnavailable => ErrorDisposition::Transient,
        }
    }

    /// Wire name used in HTTP error bodies, e.g. `"TokenAlreadyConsumed"`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TokenNotFound => "TokenNotFound",
            Self::TokenExpired => "TokenExpired",
            Self::TokenAlreadyConsumed => "TokenAlreadyConsumed",
            Self::DocumentNotFound => "DocumentNotFound",
            Self::MissingSignerName => "MissingSignerName",
            Self::SignatureRequired => "SignatureRequired",
            Self::MissingAcceptance => "MissingAcceptance",
            Self::SignatureTooLarge => "SignatureTooLarge",
            Self::ProviderUnavailable => "ProviderUnavailable",
        }
    }

    /// Message safe to show the external signer.
    pub fn user_message(&self) -> &'static str {
        match self.disposition() {
            ErrorDisposition::Terminal => "This signing link is no longer valid.",
            ErrorDisposition::Correctable => {
                "The submission is incomplete. Correct the form and try again."
            }
            ErrorDisposition::Transient => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ApprovalError, ErrorDisposition};

    #[test]
    fn token_state_errors_are_terminal() {
        for error in [
            ApprovalError::TokenNotFound,
            ApprovalError::TokenExpired,
            ApprovalError::TokenAlreadyConsumed,
            ApprovalError::DocumentNotFound,
        ] {
            assert_eq!(error.disposition(), ErrorDisposition::Terminal);
        }
    }

    #[test]
    fn validation_errors_are_correctable() {
        for error in [
            ApprovalError::MissingSignerName,
            ApprovalError::SignatureRequired,
            ApprovalError::MissingAcceptance,
            ApprovalError::SignatureTooLarge,
        ] {
            assert_eq!(error.disposition(), ErrorDisposition::Correctable);
        }
    }

    #[test]
    fn provider_failure_is_transient_with_retry_message() {
        let error = ApprovalError::ProviderUnavailable;
        assert_eq!(error.disposition(), ErrorDisposition::Transient);
        assert!(error.user_message().contains("retry"));
    }

    #[test]
    fn codes_serialize_as_wire_tags() {
        let json = serde_json::to_value(ApprovalError::TokenAlreadyConsumed).expect("serialize");
        assert_eq!(json["error"], "TokenAlreadyConsumed");
        assert_eq!(ApprovalError::TokenAlreadyConsumed.code(), "TokenAlreadyConsumed");
    }
}
