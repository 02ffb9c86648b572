//! Opcode definitions and operand classification.

#![allow(missing_docs)]

use crate::error::RuntimeError;

/// Prefix opcode carrying the high bits of the following instruction's
/// operand. Chained prefixes shift the accumulated value left by eight
/// bits each.
pub const EXTENDED_OPERAND: u8 = 0x90;

/// One instruction occupies two bytes: opcode then operand.
pub const INSTR_SIZE: usize = 2;

/// Instruction opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Pop = 0x01,
    Return = 0x02,
    LoadConst = 0x10,
    LoadLocal = 0x11,
    StoreLocal = 0x12,
    LoadGlobal = 0x13,
    StoreGlobal = 0x14,
    Add = 0x20,
    Sub = 0x21,
    Mul = 0x22,
    Compare = 0x23,
    Emit = 0x30,
    Jump = 0x40,
    JumpIfFalse = 0x41,
    Call = 0x50,
    ExtendedOperand = EXTENDED_OPERAND,
}

/// What an instruction's operand refers to. Relocation in the patcher
/// is driven entirely by this classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Operand unused.
    None,
    /// Index into the constants table.
    ConstIndex,
    /// Index into the names table.
    NameIndex,
    /// Index into the local-variable table.
    LocalSlot,
    /// Absolute jump target, in instruction units.
    JumpTarget,
    /// Immediate value interpreted by the instruction itself.
    Immediate,
}

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_raw(byte: u8) -> Result<Self, RuntimeError> {
        match byte {
            0x00 => Ok(Self::Nop),
            0x01 => Ok(Self::Pop),
            0x02 => Ok(Self::Return),
            0x10 => Ok(Self::LoadConst),
            0x11 => Ok(Self::LoadLocal),
            0x12 => Ok(Self::StoreLocal),
            0x13 => Ok(Self::LoadGlobal),
            0x14 => Ok(Self::StoreGlobal),
            0x20 => Ok(Self::Add),
            0x21 => Ok(Self::Sub),
            0x22 => Ok(Self::Mul),
            0x23 => Ok(Self::Compare),
            0x30 => Ok(Self::Emit),
            0x40 => Ok(Self::Jump),
            0x41 => Ok(Self::JumpIfFalse),
            0x50 => Ok(Self::Call),
            EXTENDED_OPERAND => Ok(Self::ExtendedOperand),
            other => Err(RuntimeError::InvalidOpcode(other)),
        }
    }

    /// Raw opcode byte.
    #[must_use]
    pub fn as_raw(self) -> u8 {
        self as u8
    }

    /// Operand classification for this opcode.
    #[must_use]
    pub fn operand_kind(self) -> OperandKind {
        match self {
            Self::Nop | Self::Pop | Self::Return | Self::Add | Self::Sub | Self::Mul
            | Self::Emit => OperandKind::None,
            Self::LoadConst => OperandKind::ConstIndex,
            Self::LoadGlobal | Self::StoreGlobal | Self::Call => OperandKind::NameIndex,
            Self::LoadLocal | Self::StoreLocal => OperandKind::LocalSlot,
            Self::Jump | Self::JumpIfFalse => OperandKind::JumpTarget,
            Self::Compare | Self::ExtendedOperand => OperandKind::Immediate,
        }
    }

    /// Whether the operand is an absolute jump target.
    #[must_use]
    pub fn is_jump(self) -> bool {
        matches!(self.operand_kind(), OperandKind::JumpTarget)
    }
}

/// Comparison selectors carried in a `Compare` operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompareOp {
    Eq = 0,
    Ne = 1,
    Lt = 2,
    Le = 3,
    Gt = 4,
    Ge = 5,
}

impl CompareOp {
    /// Decode a comparison selector, defaulting to equality for
    /// out-of-range operands.
    #[must_use]
    pub fn from_operand(operand: u32) -> Self {
        match operand {
            1 => Self::Ne,
            2 => Self::Lt,
            3 => Self::Le,
            4 => Self::Gt,
            5 => Self::Ge,
            _ => Self::Eq,
        }
    }
}
