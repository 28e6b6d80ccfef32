//! Tuple decoding errors.

//---------------------------------------------------------------------------------------------------- Error
/// Convenience alias for tuple decoding results.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when unpacking tuple bytes.
///
/// Packing is infallible; only [`crate::unpack`] returns these.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The input ended in the middle of an element.
    #[error("input ended in the middle of an element")]
    UnexpectedEnd,

    /// A type code that this library does not know about.
    #[error("unknown element type code: {0:#04x}")]
    UnknownTypeCode(u8),

    /// An integer element outside the `i64` domain.
    #[error("integer element does not fit in 64 bits")]
    IntOutOfRange,

    /// A string element whose contents are not valid UTF-8.
    #[error("string element is not valid UTF-8")]
    InvalidUtf8,
}
