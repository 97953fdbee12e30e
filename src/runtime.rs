//! Runtimes read a compiled [`Chunk`] and execute it, one independent
//! [`Executor`] per run.

use crate::{
    compiler::bytecode::{Chunk, DecodeError, OpCode},
    value::{Type, Value},
};

pub mod executor;
pub mod fuel;

pub use executor::Executor;
pub use fuel::Fuel;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("{op} cannot be applied to a '{found}' value")]
    TypeMismatch { op: OpCode, found: Type },
    #[error("{op} cannot be applied to '{left}' and '{right}'")]
    OperandMismatch { op: OpCode, left: Type, right: Type },
    #[error("jump target {target} is outside the chunk")]
    InvalidJump { target: isize },
    #[error("slot {slot} is read before anything was stored in it")]
    UninitializedSlot { slot: u8 },
    #[error("slot {slot} does not exist, the chunk has {slot_count} slots")]
    InvalidSlot { slot: u8, slot_count: usize },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("{op} overflowed")]
    ArithmeticOverflow { op: OpCode },
}

/// A fatal error during execution, located at the faulting instruction.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} (offset {at}{})", .line.map(|line| format!(", line {line}")).unwrap_or_default())]
pub struct RuntimeFault {
    pub kind: FaultKind,
    /// Byte offset of the instruction, or the chunk length for faults
    /// raised once the end is reached
    pub at: usize,
    pub line: Option<usize>,
}

impl RuntimeFault {
    pub fn new(kind: FaultKind, at: usize, chunk: &Chunk) -> Self {
        Self {
            kind,
            at,
            line: chunk.line_at(at),
        }
    }
}

/// Run `chunk` to completion and return the final value of `OUTPUT`.
pub fn run(chunk: &Chunk) -> Result<Value, RuntimeFault> {
    Executor::new(chunk).run()
}
