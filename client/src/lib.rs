//! Galena client binding surface.
//!
//! This crate defines the capability traits a Galena binding exposes to its
//! consumers ([`Database`], [`Transaction`]) together with the value types
//! used at that seam: key selectors, streaming modes, mutation types,
//! transaction options, and numeric [`ClientError`]s.
//!
//! It also ships a hermetic in-memory engine ([`MemDatabase`]) implementing
//! the full surface, including snapshot isolation, conflict detection and
//! atomic mutations, so binding-level code can be driven and tested without
//! a running cluster.

mod backend;
mod error;
mod key;
mod options;
mod selector;
mod transaction;

pub use backend::mem::MemDatabase;
pub use error::{ClientError, InitError};
pub use key::{prefix_range_end, strinc};
pub use options::{ConflictRangeType, MutationType, StreamingMode, TransactionOption};
pub use selector::KeySelector;
pub use transaction::{run_retriable, Database, KeyValue, Transaction, Versionstamp};

/// Highest API version this client speaks.
///
/// Callers asking for more are clamped down to this,
/// see [`select_api_version`].
pub const MAX_API_VERSION: u32 = 710;

/// Validate a requested API version, clamping it to [`MAX_API_VERSION`].
pub fn select_api_version(requested: u32) -> Result<u32, InitError> {
    if requested == 0 {
        return Err(InitError::ApiVersion(requested));
    }
    Ok(requested.min(MAX_API_VERSION))
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_clamps() {
        assert_eq!(select_api_version(MAX_API_VERSION + 100).unwrap(), MAX_API_VERSION);
        assert_eq!(select_api_version(200).unwrap(), 200);
        assert!(select_api_version(0).is_err());
    }
}
