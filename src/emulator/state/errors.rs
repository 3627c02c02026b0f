//! Errors raised by the Terminal State Core, mapped 1:1 onto wire
//! `{errorCode, errorMessage}` pairs the same way the teacher maps
//! [`crate::... TransactionError`]-style leaf errors onto reply fields.

use thiserror::Error;

/// A validation or lookup failure from [`super::core::StateCore`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Void/refund/tip-adjust target not found.
    #[error("referenced transaction not found")]
    ReferenceNotFound,
    /// Referenced refund target not found.
    #[error("refund target not found")]
    RefundTargetNotFound,
    /// Transaction is already voided.
    #[error("transaction already voided")]
    AlreadyVoided,
    /// Transaction is already settled and cannot be voided.
    #[error("transaction already settled")]
    AlreadySettled,
    /// Transaction status does not allow the requested transition.
    #[error("transaction status does not allow this operation")]
    NotAdjustable,
    /// Requested amount is missing or could not be parsed.
    #[error("invalid amount")]
    InvalidAmount,
    /// Requested amount is not strictly positive.
    #[error("amount must be positive")]
    NonPositiveAmount,
    /// Refund amount exceeds the original transaction's total.
    #[error("refund amount exceeds original total")]
    RefundExceedsOriginal,
    /// Tip adjustment target is not eligible for a tip adjustment.
    #[error("transaction not eligible for tip adjustment")]
    NotTipAdjustable,
    /// Generic "transaction not found" for non-void/refund lookups (status
    /// inquiry, tip adjust by identifier, and similar).
    #[error("transaction not found")]
    TransactionNotFound,
}

impl StateError {
    /// The wire `errorCode` for this failure.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ReferenceNotFound => "REF001",
            Self::RefundTargetNotFound => "REF002",
            Self::AlreadyVoided => "VOID001",
            Self::AlreadySettled => "VOID002",
            Self::NotAdjustable => "VOID003",
            Self::InvalidAmount => "AMT001",
            Self::NonPositiveAmount => "AMT002",
            Self::RefundExceedsOriginal => "AMT003",
            Self::NotTipAdjustable => "TIP001",
            Self::TransactionNotFound => "TRAN009",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_requirement_identifiers() {
        assert_eq!(StateError::ReferenceNotFound.code(), "REF001");
        assert_eq!(StateError::AlreadyVoided.code(), "VOID001");
        assert_eq!(StateError::RefundExceedsOriginal.code(), "AMT003");
        assert_eq!(StateError::NotTipAdjustable.code(), "TIP001");
    }
}
