// SPDX-License-Identifier: MIT
//
// Unified error types for Scanbooth.

use thiserror::Error;

/// Top-level error type for all Scanbooth operations.
#[derive(Debug, Error)]
pub enum KioskError {
    // -- Vision errors --
    #[error("image processing failed: {0}")]
    ImageError(String),

    #[error("boundary detection failed: {0}")]
    Detection(String),

    // -- Scanner errors --
    #[error("scanner error: {0}")]
    Scanner(String),

    #[error("scan timed out after {0} seconds")]
    ScanTimeout(u64),

    #[error("no scanner detected")]
    NoScanner,

    // -- Payment errors --
    #[error("payment provider error: {0}")]
    Payment(String),

    #[error("no price configured for quantity {0}")]
    InvalidQuantity(u32),

    #[error("payment timed out")]
    PaymentTimeout,

    // -- Delivery errors --
    #[error("mail delivery failed: {0}")]
    Delivery(String),

    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),

    // -- Session errors --
    #[error("no active session")]
    NoActiveSession,

    #[error("operation not valid in state {0}")]
    InvalidState(String),

    // -- Storage / serialization --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KioskError>;

/// Classification of failures for UI surfacing and retry eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Bad input (unknown quantity, malformed config) — rejected up front,
    /// no side effects.
    Input,
    /// Scanner or network hiccup — the operator may retry the step.
    TransientIo,
    /// Payment or scan attempt ran out of time — terminal for the attempt,
    /// a new attempt must be started.
    Timeout,
    /// Outbound delivery failed — local-save fallback applies, the session
    /// still completes.
    Delivery,
}

/// Classify a `KioskError` for error-surfacing decisions.
///
/// Transient failures are never auto-retried by the core; the operator
/// re-triggers the step from the UI.
pub fn classify(err: &KioskError) -> FailureKind {
    match err {
        KioskError::InvalidQuantity(_)
        | KioskError::InvalidRecipient(_)
        | KioskError::InvalidState(_)
        | KioskError::NoActiveSession
        | KioskError::Serialization(_) => FailureKind::Input,

        KioskError::ScanTimeout(_) | KioskError::PaymentTimeout => FailureKind::Timeout,

        KioskError::Delivery(_) => FailureKind::Delivery,

        KioskError::ImageError(_)
        | KioskError::Detection(_)
        | KioskError::Scanner(_)
        | KioskError::NoScanner
        | KioskError::Payment(_) => FailureKind::TransientIo,

        KioskError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::TimedOut => FailureKind::Timeout,
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                FailureKind::Input
            }
            _ => FailureKind::TransientIo,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_quantity_is_input_error() {
        assert_eq!(classify(&KioskError::InvalidQuantity(3)), FailureKind::Input);
    }

    #[test]
    fn payment_timeout_is_timeout() {
        assert_eq!(classify(&KioskError::PaymentTimeout), FailureKind::Timeout);
    }

    #[test]
    fn scanner_fault_is_transient() {
        let err = KioskError::Scanner("feeder jam".into());
        assert_eq!(classify(&err), FailureKind::TransientIo);
    }

    #[test]
    fn io_timeout_maps_to_timeout() {
        let err = KioskError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert_eq!(classify(&err), FailureKind::Timeout);
    }

    #[test]
    fn delivery_failure_is_delivery() {
        let err = KioskError::Delivery("relay refused".into());
        assert_eq!(classify(&err), FailureKind::Delivery);
    }
}
