//! Bytecode representation, execution, and live patching.

pub mod code;
pub mod interp;
pub mod opcode;
pub mod patch;

pub use code::{CodeBuilder, CodeUnit, Instr, LineEntry};
pub use interp::Interpreter;
pub use opcode::{CompareOp, Opcode, OperandKind, EXTENDED_OPERAND, INSTR_SIZE};
pub use patch::{patch_before_line, PatchError};
