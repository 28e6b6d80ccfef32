//! Instruction decoding; `enum Opcode` & `struct Command`.

//---------------------------------------------------------------------------------------------------- Import
use std::fmt;

use galena_tuple::Element;

use crate::{error::MachineError, value::StackValue};

//---------------------------------------------------------------------------------------------------- Opcode
/// Every operation the stack machine implements.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Opcode {
    // Stack.
    Push,
    Dup,
    EmptyStack,
    Swap,
    Pop,
    Sub,
    Concat,
    LogStack,
    // Transactions.
    NewTransaction,
    UseTransaction,
    OnError,
    Commit,
    Reset,
    Cancel,
    GetReadVersion,
    SetReadVersion,
    GetCommittedVersion,
    GetVersionstamp,
    WaitFuture,
    // Reads.
    Get,
    GetKey,
    GetRange,
    GetRangeStartsWith,
    GetRangeSelector,
    // Writes.
    Set,
    Clear,
    ClearRange,
    ClearRangeStartsWith,
    AtomicOp,
    // Conflicts.
    ReadConflictKey,
    ReadConflictRange,
    WriteConflictKey,
    WriteConflictRange,
    DisableWriteConflict,
    // Tuple layer.
    TuplePack,
    TupleUnpack,
    TupleRange,
    TupleSort,
    // Float helpers.
    EncodeFloat,
    EncodeDouble,
    DecodeFloat,
    DecodeDouble,
    // Threading.
    StartThread,
    WaitEmpty,
    // Out-of-band unit test hook; a no-op here.
    UnitTests,
}

impl Opcode {
    /// Look up an opcode by its bare instruction name, without the
    /// `_SNAPSHOT`/`_DATABASE` suffix.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "PUSH" => Self::Push,
            "DUP" => Self::Dup,
            "EMPTY_STACK" => Self::EmptyStack,
            "SWAP" => Self::Swap,
            "POP" => Self::Pop,
            "SUB" => Self::Sub,
            "CONCAT" => Self::Concat,
            "LOG_STACK" => Self::LogStack,
            "NEW_TRANSACTION" => Self::NewTransaction,
            "USE_TRANSACTION" => Self::UseTransaction,
            "ON_ERROR" => Self::OnError,
            "COMMIT" => Self::Commit,
            "RESET" => Self::Reset,
            "CANCEL" => Self::Cancel,
            "GET_READ_VERSION" => Self::GetReadVersion,
            "SET_READ_VERSION" => Self::SetReadVersion,
            "GET_COMMITTED_VERSION" => Self::GetCommittedVersion,
            "GET_VERSIONSTAMP" => Self::GetVersionstamp,
            "WAIT_FUTURE" => Self::WaitFuture,
            "GET" => Self::Get,
            "GET_KEY" => Self::GetKey,
            "GET_RANGE" => Self::GetRange,
            "GET_RANGE_STARTS_WITH" => Self::GetRangeStartsWith,
            "GET_RANGE_SELECTOR" => Self::GetRangeSelector,
            "SET" => Self::Set,
            "CLEAR" => Self::Clear,
            "CLEAR_RANGE" => Self::ClearRange,
            "CLEAR_RANGE_STARTS_WITH" => Self::ClearRangeStartsWith,
            "ATOMIC_OP" => Self::AtomicOp,
            "READ_CONFLICT_KEY" => Self::ReadConflictKey,
            "READ_CONFLICT_RANGE" => Self::ReadConflictRange,
            "WRITE_CONFLICT_KEY" => Self::WriteConflictKey,
            "WRITE_CONFLICT_RANGE" => Self::WriteConflictRange,
            "DISABLE_WRITE_CONFLICT" => Self::DisableWriteConflict,
            "TUPLE_PACK" => Self::TuplePack,
            "TUPLE_UNPACK" => Self::TupleUnpack,
            "TUPLE_RANGE" => Self::TupleRange,
            "TUPLE_SORT" => Self::TupleSort,
            "ENCODE_FLOAT" => Self::EncodeFloat,
            "ENCODE_DOUBLE" => Self::EncodeDouble,
            "DECODE_FLOAT" => Self::DecodeFloat,
            "DECODE_DOUBLE" => Self::DecodeDouble,
            "START_THREAD" => Self::StartThread,
            "WAIT_EMPTY" => Self::WaitEmpty,
            "UNIT_TESTS" => Self::UnitTests,
            _ => return None,
        })
    }

    /// The bare instruction name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Push => "PUSH",
            Self::Dup => "DUP",
            Self::EmptyStack => "EMPTY_STACK",
            Self::Swap => "SWAP",
            Self::Pop => "POP",
            Self::Sub => "SUB",
            Self::Concat => "CONCAT",
            Self::LogStack => "LOG_STACK",
            Self::NewTransaction => "NEW_TRANSACTION",
            Self::UseTransaction => "USE_TRANSACTION",
            Self::OnError => "ON_ERROR",
            Self::Commit => "COMMIT",
            Self::Reset => "RESET",
            Self::Cancel => "CANCEL",
            Self::GetReadVersion => "GET_READ_VERSION",
            Self::SetReadVersion => "SET_READ_VERSION",
            Self::GetCommittedVersion => "GET_COMMITTED_VERSION",
            Self::GetVersionstamp => "GET_VERSIONSTAMP",
            Self::WaitFuture => "WAIT_FUTURE",
            Self::Get => "GET",
            Self::GetKey => "GET_KEY",
            Self::GetRange => "GET_RANGE",
            Self::GetRangeStartsWith => "GET_RANGE_STARTS_WITH",
            Self::GetRangeSelector => "GET_RANGE_SELECTOR",
            Self::Set => "SET",
            Self::Clear => "CLEAR",
            Self::ClearRange => "CLEAR_RANGE",
            Self::ClearRangeStartsWith => "CLEAR_RANGE_STARTS_WITH",
            Self::AtomicOp => "ATOMIC_OP",
            Self::ReadConflictKey => "READ_CONFLICT_KEY",
            Self::ReadConflictRange => "READ_CONFLICT_RANGE",
            Self::WriteConflictKey => "WRITE_CONFLICT_KEY",
            Self::WriteConflictRange => "WRITE_CONFLICT_RANGE",
            Self::DisableWriteConflict => "DISABLE_WRITE_CONFLICT",
            Self::TuplePack => "TUPLE_PACK",
            Self::TupleUnpack => "TUPLE_UNPACK",
            Self::TupleRange => "TUPLE_RANGE",
            Self::TupleSort => "TUPLE_SORT",
            Self::EncodeFloat => "ENCODE_FLOAT",
            Self::EncodeDouble => "ENCODE_DOUBLE",
            Self::DecodeFloat => "DECODE_FLOAT",
            Self::DecodeDouble => "DECODE_DOUBLE",
            Self::StartThread => "START_THREAD",
            Self::WaitEmpty => "WAIT_EMPTY",
            Self::UnitTests => "UNIT_TESTS",
        }
    }
}

//---------------------------------------------------------------------------------------------------- Command
/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub opcode: Opcode,
    /// The literal argument; only ever present for `PUSH`.
    pub argument: Option<StackValue>,
    /// Read without taking a read conflict (`_SNAPSHOT` suffix).
    pub snapshot: bool,
    /// Run inside a throw-away auto-committed transaction (`_DATABASE`
    /// suffix).
    pub direct: bool,
}

impl Command {
    /// Decode a stored instruction tuple.
    ///
    /// The first element must be a string naming the opcode, optionally
    /// suffixed `_SNAPSHOT` or `_DATABASE`. `PUSH` carries its literal as
    /// the second element; other opcodes take no elements (extras are
    /// ignored).
    pub fn decode(tuple: &[Element]) -> Result<Self, MachineError> {
        let Some(Element::String(raw)) = tuple.first() else {
            return Err(MachineError::IllegalValueType);
        };

        let (name, snapshot, direct) = if let Some(name) = raw.strip_suffix("_SNAPSHOT") {
            (name, true, false)
        } else if let Some(name) = raw.strip_suffix("_DATABASE") {
            (name, false, true)
        } else {
            (raw.as_str(), false, false)
        };

        let opcode = Opcode::from_name(name)
            .ok_or_else(|| MachineError::CommandNotSupported(raw.clone()))?;

        let argument = if opcode == Opcode::Push {
            let element = tuple.get(1).ok_or(MachineError::PushedEmptyValue)?;
            Some(StackValue::from(element.clone()))
        } else {
            None
        };

        Ok(Self {
            opcode,
            argument,
            snapshot,
            direct,
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode.name())?;
        if self.snapshot {
            f.write_str("_SNAPSHOT")?;
        }
        if self.direct {
            f.write_str("_DATABASE")?;
        }
        Ok(())
    }
}
