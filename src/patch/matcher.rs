//! Anchor search over instruction sequences.
//!
//! A [`Pattern`] is an opcode plus an optional [`OperandPredicate`]. [`find_anchor`] returns
//! the index of the first instruction matching it, scanning from the start every time: an
//! index is only meaningful until the next edit of the sequence.

use std::fmt;

use crate::{
    assembly::{Instruction, OpCode, Operand},
    patch::FailureReason,
};

/// Condition on the operand of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandPredicate {
    /// Integer constant, including the implicit value of `ldc.i4.<n>` forms
    Int(i64),
    /// User string loaded by `ldstr`
    Str(String),
    /// A field defined by the assembly itself
    Field {
        /// Full name of the declaring type
        declaring_type: String,
        /// Field name
        name: String,
    },
    /// A method by declaring type and name, whatever its signature or defining assembly
    Method {
        /// Full name of the declaring type
        declaring_type: String,
        /// Method name
        name: String,
    },
    /// A type reference by full name
    Type(String),
}

impl OperandPredicate {
    /// Evaluate the predicate against `instruction`.
    #[must_use]
    pub fn matches(&self, instruction: &Instruction) -> bool {
        match (self, &instruction.operand) {
            (OperandPredicate::Int(expected), _) => instruction.int_value() == Some(*expected),
            (OperandPredicate::Str(expected), Operand::String(value)) => value == expected,
            (
                OperandPredicate::Field {
                    declaring_type,
                    name,
                },
                Operand::Field(field),
            ) => field.parent.scope.is_none() && field.is(declaring_type, name),
            (
                OperandPredicate::Method {
                    declaring_type,
                    name,
                },
                Operand::Method(method),
            ) => method.is(declaring_type, name),
            (OperandPredicate::Type(expected), Operand::Type(ty)) => &ty.full_name == expected,
            _ => false,
        }
    }
}

impl fmt::Display for OperandPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandPredicate::Int(value) => write!(f, "{value}"),
            OperandPredicate::Str(value) => write!(f, "{value:?}"),
            OperandPredicate::Field {
                declaring_type,
                name,
            }
            | OperandPredicate::Method {
                declaring_type,
                name,
            } => write!(f, "{declaring_type}::{name}"),
            OperandPredicate::Type(name) => f.write_str(name),
        }
    }
}

/// An anchor pattern: opcode equality plus an optional operand predicate.
///
/// # Examples
///
/// ```rust
/// use dotpatch::{
///     assembly::{Instruction, OpCode},
///     patch::{find_anchor, Pattern},
/// };
///
/// let body = [
///     Instruction::new(OpCode::NOP),
///     Instruction::ldc_i4(7),
///     Instruction::ldc_i4(504230),
///     Instruction::ret(),
/// ];
///
/// assert_eq!(find_anchor(&body, &Pattern::ldc_i4(504230)), Some(2));
/// assert_eq!(find_anchor(&body, &Pattern::new(OpCode::LDC_I4)), Some(1));
/// assert_eq!(find_anchor(&body, &Pattern::ldc_i4(1)), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    /// Required opcode
    pub opcode: OpCode,
    /// Optional operand condition
    pub operand: Option<OperandPredicate>,
}

impl Pattern {
    /// Match any instruction with `opcode`.
    #[must_use]
    pub fn new(opcode: OpCode) -> Self {
        Pattern {
            opcode,
            operand: None,
        }
    }

    /// Match instructions with `opcode` whose operand satisfies `predicate`.
    #[must_use]
    pub fn with(opcode: OpCode, predicate: OperandPredicate) -> Self {
        Pattern {
            opcode,
            operand: Some(predicate),
        }
    }

    /// `ldc.i4 value`
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        Self::with(OpCode::LDC_I4, OperandPredicate::Int(i64::from(value)))
    }

    /// `call declaring_type::name`
    #[must_use]
    pub fn call(declaring_type: &str, name: &str) -> Self {
        Self::with(
            OpCode::CALL,
            OperandPredicate::Method {
                declaring_type: declaring_type.to_string(),
                name: name.to_string(),
            },
        )
    }

    /// `ldsfld declaring_type::name`
    #[must_use]
    pub fn ldsfld(declaring_type: &str, name: &str) -> Self {
        Self::with(
            OpCode::LDSFLD,
            OperandPredicate::Field {
                declaring_type: declaring_type.to_string(),
                name: name.to_string(),
            },
        )
    }

    /// Returns `true` if `instruction` matches this pattern.
    #[must_use]
    pub fn matches(&self, instruction: &Instruction) -> bool {
        instruction.opcode == self.opcode
            && self
                .operand
                .as_ref()
                .map_or(true, |predicate| predicate.matches(instruction))
    }

    /// Index of the first matching instruction.
    ///
    /// # Errors
    /// Returns [`FailureReason::AnchorNotFound`] if no instruction matches.
    pub fn locate(&self, instructions: &[Instruction]) -> Result<usize, FailureReason> {
        find_anchor(instructions, self).ok_or_else(|| FailureReason::AnchorNotFound(self.to_string()))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode.mnemonic())?;
        if let Some(predicate) = &self.operand {
            write!(f, " {predicate}")?;
        }
        Ok(())
    }
}

/// Index of the first instruction in `instructions` matching `pattern`.
#[must_use]
pub fn find_anchor(instructions: &[Instruction], pattern: &Pattern) -> Option<usize> {
    instructions
        .iter()
        .position(|instruction| pattern.matches(instruction))
}
