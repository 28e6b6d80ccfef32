//! Embedded literals and limits of the stack tester.

/// Pushed in place of an absent database result.
pub const RESULT_NOT_PRESENT: &[u8] = b"RESULT_NOT_PRESENT";

/// Pushed after a successful `GET_READ_VERSION`.
pub const GOT_READ_VERSION: &[u8] = b"GOT_READ_VERSION";

/// Pushed after a successful `GET_COMMITTED_VERSION`.
pub const GOT_COMMITTED_VERSION: &[u8] = b"GOT_COMMITTED_VERSION";

/// Pushed after adding a key conflict.
pub const SET_CONFLICT_KEY: &[u8] = b"SET_CONFLICT_KEY";

/// Pushed after adding a range conflict.
pub const SET_CONFLICT_RANGE: &[u8] = b"SET_CONFLICT_RANGE";

/// Pushed once `WAIT_EMPTY` observes an empty range.
pub const WAITED_FOR_EMPTY: &[u8] = b"WAITED_FOR_EMPTY";

/// First element of the tuple-packed error envelope.
pub const ERROR_TAG: &[u8] = b"ERROR";

/// `LOG_STACK` values are truncated to this many bytes.
pub const LOG_VALUE_LIMIT: usize = 40_000;
