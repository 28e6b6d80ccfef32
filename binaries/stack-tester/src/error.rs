//! Machine errors; `enum MachineError`.

//---------------------------------------------------------------------------------------------------- Import
use galena_client::ClientError;

//---------------------------------------------------------------------------------------------------- MachineError
/// Everything that can go wrong while the stack machine runs.
///
/// The variants fall into two policies (see [`MachineError::is_binding`]):
/// binding errors are translated into an `("ERROR", code)` envelope when the
/// slot carrying them is popped; every other variant surfaces on the trace
/// and ends the run.
///
/// `Clone` is required because slot values are memoised shared futures and
/// every holder of a duplicated slot observes the same failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    /// A pop was issued against an empty stack.
    #[error("popped from an empty stack")]
    PoppedEmptyStack,

    /// A `PUSH` instruction arrived without its literal argument.
    #[error("push instruction carries no argument")]
    PushedEmptyValue,

    /// A swap distance pointing outside the current stack.
    #[error("swap distance {distance} is outside a stack of length {len}")]
    SwappedBeyondBounds { distance: usize, len: usize },

    /// A value had the wrong type for the operation consuming it.
    #[error("value has an illegal type for this operation")]
    IllegalValueType,

    /// A range read named a streaming mode number that does not exist.
    #[error("illegal streaming mode number: {0}")]
    IllegalStreamingMode(i64),

    /// An instruction named an opcode this machine does not implement.
    #[error("command is not supported: {0}")]
    CommandNotSupported(String),

    /// An error reported by the binding surface, identified by code.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A stored tuple that does not decode.
    #[error("tuple decode failed: {0}")]
    Tuple(#[from] galena_tuple::Error),
}

impl MachineError {
    /// Whether this error came from the binding surface, i.e. whether the
    /// pop-time translator turns it into an error envelope instead of
    /// ending the run.
    pub const fn is_binding(&self) -> bool {
        matches!(self, Self::Client(_))
    }
}
