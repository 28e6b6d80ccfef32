//! Key selectors; `struct KeySelector`.

//---------------------------------------------------------------------------------------------------- KeySelector
/// A lexicographic anchor plus an offset walk, describing a key position.
///
/// Resolution first finds the base position relative to `key`:
/// - `or_equal == false`: the last key strictly less than `key`
/// - `or_equal == true`: the last key less than or equal to `key`
///
/// then walks `offset` keys forward (positive) or backward (negative).
/// Walking past the first key resolves to the empty key; walking past the
/// last key resolves to the end-of-keyspace marker `\xff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySelector {
    /// The anchor key.
    pub key: Vec<u8>,
    /// Whether a key equal to the anchor counts as the base position.
    pub or_equal: bool,
    /// How many keys to walk from the base position.
    pub offset: i64,
}

impl KeySelector {
    pub const fn new(key: Vec<u8>, or_equal: bool, offset: i64) -> Self {
        Self {
            key,
            or_equal,
            offset,
        }
    }

    /// The last key strictly less than `key`.
    pub const fn last_less_than(key: Vec<u8>) -> Self {
        Self::new(key, false, 0)
    }

    /// The last key less than or equal to `key`.
    pub const fn last_less_or_equal(key: Vec<u8>) -> Self {
        Self::new(key, true, 0)
    }

    /// The first key strictly greater than `key`.
    pub const fn first_greater_than(key: Vec<u8>) -> Self {
        Self::new(key, true, 1)
    }

    /// The first key greater than or equal to `key`.
    pub const fn first_greater_or_equal(key: Vec<u8>) -> Self {
        Self::new(key, false, 1)
    }
}
