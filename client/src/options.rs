//! Small-integer keyed enums of the binding surface.

//---------------------------------------------------------------------------------------------------- StreamingMode
/// Batching heuristic for multi-page range reads.
///
/// Keyed by the small integers the wire protocol uses; [`Self::from_code`]
/// is the only way numbers enter, so an out-of-range number is caught at the
/// boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamingMode {
    /// The client intends to consume the entire range; transfer it as fast
    /// as possible.
    WantAll,
    /// The default: the client is iterating and batches grow adaptively.
    Iterator,
    /// Infrequently used; batches are exactly the requested row limit.
    Exact,
    /// Small fixed batches.
    Small,
    /// Medium fixed batches.
    Medium,
    /// Large fixed batches.
    Large,
    /// Maximum-size batches.
    Serial,
}

impl StreamingMode {
    /// Look up a streaming mode by its wire number.
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            -2 => Some(Self::WantAll),
            -1 => Some(Self::Iterator),
            0 => Some(Self::Exact),
            1 => Some(Self::Small),
            2 => Some(Self::Medium),
            3 => Some(Self::Large),
            4 => Some(Self::Serial),
            _ => None,
        }
    }

    /// The wire number of this mode.
    pub const fn code(self) -> i64 {
        match self {
            Self::WantAll => -2,
            Self::Iterator => -1,
            Self::Exact => 0,
            Self::Small => 1,
            Self::Medium => 2,
            Self::Large => 3,
            Self::Serial => 4,
        }
    }
}

//---------------------------------------------------------------------------------------------------- MutationType
/// Atomic mutation operations, keyed by wire codes `0..=20`.
///
/// The unpopulated codes in that span belong to deprecated operations this
/// client no longer speaks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MutationType {
    /// Little-endian wrapping addition.
    Add,
    /// Bitwise `and`.
    BitAnd,
    /// Bitwise `or`.
    BitOr,
    /// Bitwise `xor`.
    BitXor,
    /// Append, dropped entirely if the result would exceed the value limit.
    AppendIfFits,
    /// Little-endian unsigned maximum.
    Max,
    /// Little-endian unsigned minimum.
    Min,
    /// Replace a 10-byte placeholder in the key with the commit versionstamp.
    SetVersionstampedKey,
    /// Replace a 10-byte placeholder in the value with the commit versionstamp.
    SetVersionstampedValue,
    /// Lexicographic byte-wise minimum.
    ByteMin,
    /// Lexicographic byte-wise maximum.
    ByteMax,
    /// Clear the key if its value equals the parameter.
    CompareAndClear,
}

impl MutationType {
    /// Look up a mutation by its wire code.
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            2 => Some(Self::Add),
            6 => Some(Self::BitAnd),
            7 => Some(Self::BitOr),
            8 => Some(Self::BitXor),
            9 => Some(Self::AppendIfFits),
            12 => Some(Self::Max),
            13 => Some(Self::Min),
            14 => Some(Self::SetVersionstampedKey),
            15 => Some(Self::SetVersionstampedValue),
            16 => Some(Self::ByteMin),
            17 => Some(Self::ByteMax),
            20 => Some(Self::CompareAndClear),
            _ => None,
        }
    }

    /// The wire code of this mutation.
    pub const fn code(self) -> i64 {
        match self {
            Self::Add => 2,
            Self::BitAnd => 6,
            Self::BitOr => 7,
            Self::BitXor => 8,
            Self::AppendIfFits => 9,
            Self::Max => 12,
            Self::Min => 13,
            Self::SetVersionstampedKey => 14,
            Self::SetVersionstampedValue => 15,
            Self::ByteMin => 16,
            Self::ByteMax => 17,
            Self::CompareAndClear => 20,
        }
    }

    /// Look up a mutation by its `SCREAMING_SNAKE_CASE` wire name.
    ///
    /// `AND`/`OR`/`XOR` are accepted as the legacy aliases of the `BIT_*`
    /// operations.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "ADD" => Some(Self::Add),
            "BIT_AND" | "AND" => Some(Self::BitAnd),
            "BIT_OR" | "OR" => Some(Self::BitOr),
            "BIT_XOR" | "XOR" => Some(Self::BitXor),
            "APPEND_IF_FITS" => Some(Self::AppendIfFits),
            "MAX" => Some(Self::Max),
            "MIN" => Some(Self::Min),
            "SET_VERSIONSTAMPED_KEY" => Some(Self::SetVersionstampedKey),
            "SET_VERSIONSTAMPED_VALUE" => Some(Self::SetVersionstampedValue),
            "BYTE_MIN" => Some(Self::ByteMin),
            "BYTE_MAX" => Some(Self::ByteMax),
            "COMPARE_AND_CLEAR" => Some(Self::CompareAndClear),
            _ => None,
        }
    }
}

//---------------------------------------------------------------------------------------------------- TransactionOption
/// Options applied to a single transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransactionOption {
    /// The next write performed on this transaction will not generate a
    /// write conflict range.
    NextWriteNoWriteConflictRange,
    /// Timeout in milliseconds which, when elapsed, rejects the transaction.
    Timeout(i64),
    /// Maximum number of retries after which additional `on_error` calls
    /// rethrow their input error.
    RetryLimit(i64),
}

//---------------------------------------------------------------------------------------------------- ConflictRangeType
/// Which conflict set a manually added range joins.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConflictRangeType {
    /// Pretend the range was read.
    Read,
    /// Pretend the range was written.
    Write,
}
