//! Decoded CIL instructions and their operands.
//!
//! An [`Instruction`] pairs an [`OpCode`] with a resolved [`Operand`]. Metadata tokens are
//! resolved at decode time into the names they refer to ([`TypeRef`], [`MemberRef`] or the
//! user string itself), so instructions can be matched, moved and re-encoded independently
//! of the token tables they came from.
//!
//! Branch targets are kept as the IL offset of the destination instruction in the body the
//! branch was decoded from. Together with [`Instruction::offset`] this gives every decoded
//! instruction a stable identity that survives removals around it; the encoder maps these
//! original offsets to the new layout.

use std::fmt;

use crate::{
    assembly::{OpCode, OperandType},
    metadata::{MemberRef, Token, TypeRef},
};

/// Immediate value embedded in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub enum Immediate {
    Int8(i8),
    UInt8(u8),
    UInt16(u16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
}

impl Immediate {
    /// The integer value of an integral immediate.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Immediate::Int8(v) => Some(i64::from(v)),
            Immediate::UInt8(v) => Some(i64::from(v)),
            Immediate::UInt16(v) => Some(i64::from(v)),
            Immediate::Int32(v) => Some(i64::from(v)),
            Immediate::Int64(v) => Some(v),
            Immediate::Float32(_) | Immediate::Float64(_) => None,
        }
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(v) => write!(f, "{v}"),
            Immediate::UInt8(v) => write!(f, "{v}"),
            Immediate::UInt16(v) => write!(f, "{v}"),
            Immediate::Int32(v) => write!(f, "{v}"),
            Immediate::Int64(v) => write!(f, "{v}"),
            Immediate::Float32(v) => write!(f, "{v}"),
            Immediate::Float64(v) => write!(f, "{v}"),
        }
    }
}

/// Operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Integer or floating point immediate
    Immediate(Immediate),
    /// Original IL offset of the branch destination
    Target(u32),
    /// Original IL offsets of the switch destinations
    Switch(Vec<u32>),
    /// User string loaded by `ldstr`
    String(String),
    /// Type reference
    Type(TypeRef),
    /// Field reference
    Field(MemberRef),
    /// Method reference
    Method(MemberRef),
    /// Token that is carried through unchanged (signatures, type specs)
    Token(Token),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Immediate(value) => write!(f, "{value}"),
            Operand::Target(offset) => write!(f, "IL_{offset:04x}"),
            Operand::Switch(targets) => {
                f.write_str("(")?;
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "IL_{target:04x}")?;
                }
                f.write_str(")")
            }
            Operand::String(value) => write!(f, "{value:?}"),
            Operand::Type(ty) => write!(f, "{ty}"),
            Operand::Field(member) | Operand::Method(member) => write!(f, "{member}"),
            Operand::Token(token) => write!(f, "{token}"),
        }
    }
}

/// A single CIL instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The opcode
    pub opcode: OpCode,
    /// The resolved operand
    pub operand: Operand,
    /// IL offset this instruction was decoded from, `None` if it was created by a patch
    pub offset: Option<u32>,
}

impl Instruction {
    /// Create an instruction without an operand.
    #[must_use]
    pub fn new(opcode: OpCode) -> Self {
        Self::with_operand(opcode, Operand::None)
    }

    /// Create an instruction with the given operand.
    #[must_use]
    pub fn with_operand(opcode: OpCode, operand: Operand) -> Self {
        Instruction {
            opcode,
            operand,
            offset: None,
        }
    }

    /// `ldc.i4 value`
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        Self::with_operand(OpCode::LDC_I4, Operand::Immediate(Immediate::Int32(value)))
    }

    /// `ret`
    #[must_use]
    pub fn ret() -> Self {
        Self::new(OpCode::RET)
    }

    /// The instruction mnemonic.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.opcode.mnemonic()
    }

    /// Encoded size in bytes, opcode and operand included.
    #[must_use]
    pub fn size(&self) -> usize {
        let operand = match self.opcode.operand_type() {
            OperandType::Switch => match &self.operand {
                Operand::Switch(targets) => 4 + 4 * targets.len(),
                _ => 4,
            },
            other => other.size().unwrap_or(0),
        };
        self.opcode.size() + operand
    }

    /// The integer constant this instruction pushes or carries, if any.
    ///
    /// Covers explicit integer immediates as well as the `ldc.i4.<n>` shorthand forms.
    #[must_use]
    pub fn int_value(&self) -> Option<i64> {
        if let Some(value) = self.opcode.implicit_i4() {
            return Some(i64::from(value));
        }
        match &self.operand {
            Operand::Immediate(imm) => imm.as_i64(),
            _ => None,
        }
    }

    /// Original IL offsets this instruction can transfer control to.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<u32> {
        match &self.operand {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())?;
        if self.operand != Operand::None {
            write!(f, " {}", self.operand)?;
        }
        Ok(())
    }
}
