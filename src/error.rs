// VM error taxonomy.
//
// Primitives do not unwind: they set the VM error flag and return. The inner
// interpreter polls the flag after every dispatch and the outer interpreter
// turns it into a `Result` at the embedding boundary.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("division by zero")]
    DivideByZero,
    #[error("address out of bounds")]
    AddressOutOfBounds,
    #[error("compile-only word used while interpreting")]
    CompileOnly,
    #[error("interpret-only word used while compiling")]
    InterpretOnly,
    #[error("unknown word")]
    UnknownWord,
    #[error("dictionary full")]
    DictionaryFull,
    #[error("FORGET would cross the dictionary fence")]
    DictionaryFenceViolation,
    #[error("unbalanced control structure")]
    ControlFlowMismatch,
    #[error("no heartbeat snapshot published yet")]
    SnapshotUnavailable,
}

impl VmError {
    /// Stable integer tag, used where a numeric error code is wanted
    /// (diagnostic words, embedding callers that log the raw flag).
    pub fn tag(self) -> i32 {
        match self {
            VmError::StackUnderflow => 1,
            VmError::StackOverflow => 2,
            VmError::DivideByZero => 3,
            VmError::AddressOutOfBounds => 4,
            VmError::CompileOnly => 5,
            VmError::InterpretOnly => 6,
            VmError::UnknownWord => 7,
            VmError::DictionaryFull => 8,
            VmError::DictionaryFenceViolation => 9,
            VmError::ControlFlowMismatch => 10,
            VmError::SnapshotUnavailable => 11,
        }
    }
}
