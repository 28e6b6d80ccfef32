//! Client errors; numeric [`ClientError`] and fatal [`InitError`].

//---------------------------------------------------------------------------------------------------- ClientError
/// A numeric error reported by the binding surface.
///
/// Every error a transaction can produce is identified by its decimal code,
/// matching what the wire protocol reports. The subset of codes this crate
/// produces itself have named constants; [`ClientError::name`] covers those,
/// any other code is carried through untouched.
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("client error {code}: {}", self.name())]
pub struct ClientError {
    /// The decimal error code.
    pub code: i32,
}

impl ClientError {
    /// Transaction not committed due to a conflict with another transaction.
    pub const NOT_COMMITTED: Self = Self::new(1020);
    /// Transaction is too old to perform reads or be committed.
    pub const TRANSACTION_TOO_OLD: Self = Self::new(1007);
    /// Request for a future version.
    pub const FUTURE_VERSION: Self = Self::new(1009);
    /// Transaction may or may not have committed.
    pub const COMMIT_UNKNOWN_RESULT: Self = Self::new(1021);
    /// Operation aborted because the transaction was cancelled.
    pub const TRANSACTION_CANCELLED: Self = Self::new(1025);
    /// Operation aborted because the transaction timed out.
    pub const TRANSACTION_TIMED_OUT: Self = Self::new(1031);
    /// Key outside legal range.
    pub const KEY_OUTSIDE_LEGAL_RANGE: Self = Self::new(2003);
    /// Range begin key exceeds end key.
    pub const INVERTED_RANGE: Self = Self::new(2005);
    /// Option not valid in this context.
    pub const INVALID_OPTION: Self = Self::new(2006);
    /// Version not valid.
    pub const VERSION_INVALID: Self = Self::new(2011);
    /// Operation issued while a commit was outstanding.
    pub const USED_DURING_COMMIT: Self = Self::new(2017);
    /// API version not valid.
    pub const API_VERSION_INVALID: Self = Self::new(2200);

    /// Create an error from a raw decimal code.
    pub const fn new(code: i32) -> Self {
        Self { code }
    }

    /// Whether retrying the transaction (after a reset) may succeed.
    ///
    /// This is the set of codes [`Transaction::on_error`](crate::Transaction::on_error)
    /// recovers from and the retry loop in [`run_retriable`](crate::run_retriable)
    /// spins on.
    pub const fn retryable(self) -> bool {
        matches!(self.code, 1020 | 1007 | 1009)
    }

    /// Whether the transaction may have committed despite the error.
    pub const fn maybe_committed(self) -> bool {
        matches!(self.code, 1021 | 1031)
    }

    /// The canonical short name for codes this crate produces.
    pub const fn name(self) -> &'static str {
        match self.code {
            1007 => "transaction_too_old",
            1009 => "future_version",
            1020 => "not_committed",
            1021 => "commit_unknown_result",
            1025 => "transaction_cancelled",
            1031 => "transaction_timed_out",
            2003 => "key_outside_legal_range",
            2005 => "inverted_range",
            2006 => "invalid_option",
            2011 => "version_invalid",
            2017 => "used_during_commit",
            2200 => "api_version_invalid",
            _ => "unknown",
        }
    }
}

//---------------------------------------------------------------------------------------------------- InitError
/// Fatal errors raised before any transaction can run.
///
/// These abort the host process; they are never translated into
/// [`ClientError`] envelopes.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    /// The cluster file could not be read.
    #[error("cluster file could not be read: {0}")]
    ClusterFile(#[from] std::io::Error),

    /// The requested API version is not usable.
    #[error("requested API version {0} is invalid")]
    ApiVersion(u32),
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_codes() {
        assert!(ClientError::NOT_COMMITTED.retryable());
        assert!(ClientError::TRANSACTION_TOO_OLD.retryable());
        assert!(ClientError::FUTURE_VERSION.retryable());
        assert!(!ClientError::TRANSACTION_CANCELLED.retryable());
        assert!(!ClientError::INVERTED_RANGE.retryable());
    }

    #[test]
    fn display_carries_code_and_name() {
        assert_eq!(
            ClientError::INVERTED_RANGE.to_string(),
            "client error 2005: inverted_range"
        );
        assert_eq!(ClientError::new(1234).to_string(), "client error 1234: unknown");
    }
}
