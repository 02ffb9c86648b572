//! Runtime errors.

#![allow(missing_docs)]

use smol_str::SmolStr;
use thiserror::Error;

/// Errors raised while executing a code unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Operand stack underflow.
    #[error("operand stack underflow at offset {0}")]
    StackUnderflow(usize),

    /// Constant table index out of range.
    #[error("constant index {0} out of range")]
    InvalidConst(u32),

    /// Names table index out of range.
    #[error("name index {0} out of range")]
    InvalidName(u32),

    /// Local slot index out of range.
    #[error("local slot {0} out of range")]
    InvalidLocal(u32),

    /// Jump target outside the instruction stream.
    #[error("jump target {0} out of range")]
    InvalidJump(u32),

    /// Unknown opcode byte.
    #[error("invalid opcode 0x{0:02X}")]
    InvalidOpcode(u8),

    /// Truncated instruction stream.
    #[error("truncated instruction at offset {0}")]
    TruncatedInstruction(usize),

    /// Undefined global name.
    #[error("undefined name '{0}'")]
    UndefinedName(SmolStr),

    /// Local slot read before assignment.
    #[error("unbound local '{0}'")]
    UnboundLocal(SmolStr),

    /// Operation applied to incompatible value types.
    #[error("unsupported operand types")]
    TypeMismatch,

    /// Executed instruction budget exhausted (runaway loop guard).
    #[error("instruction budget exhausted")]
    BudgetExhausted,
}

/// Errors raised while evaluating a breakpoint condition or watch
/// expression against a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// Expression text could not be parsed.
    #[error("invalid expression '{0}'")]
    InvalidExpression(SmolStr),

    /// Name not present in the frame.
    #[error("undefined name '{0}'")]
    UndefinedName(SmolStr),

    /// Comparison between incompatible value types.
    #[error("incomparable operands")]
    Incomparable,
}
