//! CIL byte stream decoding.
//!
//! [`decode_instruction`] reads one instruction at the parser position, [`decode_stream`]
//! reads a complete method body. Token operands are handed to a [`TokenResolver`] which
//! turns them into names; branch displacements become the absolute IL offset of their
//! destination.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::{
//!     assembly::{decode_stream, OpCode, Operand, RawTokens},
//!     Parser,
//! };
//!
//! // ldc.i4.1; brtrue.s +1; nop; ret
//! let code = [0x17, 0x2D, 0x01, 0x00, 0x2A];
//! let instructions = decode_stream(&mut Parser::new(&code), &RawTokens)?;
//!
//! assert_eq!(instructions.len(), 4);
//! assert_eq!(instructions[1].operand, Operand::Target(4));
//! assert_eq!(instructions[3].opcode, OpCode::RET);
//! # Ok::<(), dotpatch::Error>(())
//! ```

use std::collections::HashSet;

use crate::{
    assembly::{Immediate, Instruction, OpCode, Operand, OperandType, FE_PREFIX},
    metadata::Token,
    Parser, Result,
};

/// Resolves metadata tokens found in the instruction stream.
pub trait TokenResolver {
    /// Produce the operand that `token`, used by `opcode`, refers to.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for tokens that do not refer to a valid row.
    fn resolve(&self, opcode: OpCode, token: Token) -> Result<Operand>;
}

/// A [`TokenResolver`] that keeps every token as [`Operand::Token`].
pub struct RawTokens;

impl TokenResolver for RawTokens {
    fn resolve(&self, _opcode: OpCode, token: Token) -> Result<Operand> {
        Ok(Operand::Token(token))
    }
}

/// Decode the instruction at the parser position.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for invalid or reserved opcodes and branch targets
/// outside the addressable range, [`crate::Error::OutOfBounds`] for truncated operands.
pub fn decode_instruction(parser: &mut Parser, resolver: &dyn TokenResolver) -> Result<Instruction> {
    let offset = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let opcode = if first_byte == FE_PREFIX {
        let second_byte = parser.read_le::<u8>()?;
        OpCode::from_bytes(FE_PREFIX, second_byte)
            .ok_or_else(|| malformed_error!("Invalid opcode: FE {:02X}", second_byte))?
    } else {
        OpCode::from_bytes(0, first_byte)
            .ok_or_else(|| malformed_error!("Invalid opcode: {:02X}", first_byte))?
    };

    let operand = match opcode.operand_type() {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
        OperandType::UInt16 => Operand::Immediate(Immediate::UInt16(parser.read_le::<u16>()?)),
        OperandType::Int32 => Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => resolver.resolve(opcode, Token::new(parser.read_le::<u32>()?))?,
        OperandType::Target8 => {
            let displacement = i64::from(parser.read_le::<i8>()?);
            Operand::Target(branch_target(parser.pos(), displacement)?)
        }
        OperandType::Target32 => {
            let displacement = i64::from(parser.read_le::<i32>()?);
            Operand::Target(branch_target(parser.pos(), displacement)?)
        }
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            if case_count.saturating_mul(4) > parser.remaining() {
                return Err(malformed_error!(
                    "Switch at offset {} has {} cases but only {} bytes remain",
                    offset,
                    case_count,
                    parser.remaining()
                ));
            }

            let mut displacements = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                displacements.push(i64::from(parser.read_le::<i32>()?));
            }

            // Displacements are relative to the end of the whole jump table
            let next = parser.pos();
            let targets = displacements
                .into_iter()
                .map(|displacement| branch_target(next, displacement))
                .collect::<Result<Vec<_>>>()?;
            Operand::Switch(targets)
        }
    };

    Ok(Instruction {
        opcode,
        operand,
        offset: Some(il_offset(offset)?),
    })
}

/// Decode every instruction in the parser's data.
///
/// Every branch and switch target must be the start of a decoded instruction.
///
/// # Errors
/// Returns the errors of [`decode_instruction`], and [`crate::Error::Malformed`] for
/// branches into the middle of an instruction or past the end of the stream.
pub fn decode_stream(parser: &mut Parser, resolver: &dyn TokenResolver) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut starts = HashSet::new();

    while parser.has_more_data() {
        starts.insert(il_offset(parser.pos())?);
        instructions.push(decode_instruction(parser, resolver)?);
    }

    for instruction in &instructions {
        for target in instruction.branch_targets() {
            if !starts.contains(&target) {
                return Err(malformed_error!(
                    "{} at IL_{:04x} branches to IL_{:04x}, which is not an instruction",
                    instruction.mnemonic(),
                    instruction.offset.unwrap_or_default(),
                    target
                ));
            }
        }
    }

    Ok(instructions)
}

fn branch_target(next: usize, displacement: i64) -> Result<u32> {
    let target = (next as i64).saturating_add(displacement);
    u32::try_from(target).map_err(|_| malformed_error!("Branch target {} is out of range", target))
}

fn il_offset(position: usize) -> Result<u32> {
    u32::try_from(position).map_err(|_| malformed_error!("IL offset {} is too large", position))
}
