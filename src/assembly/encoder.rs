//! CIL byte stream encoding.
//!
//! Encoding happens in two passes. [`Layout::compute`] assigns every instruction its new
//! offset and records where each originally decoded instruction ended up; [`encode_stream`]
//! then writes the bytes, translating branch and switch targets from original offsets to
//! new ones and asking a [`TokenEncoder`] for the tokens of metadata operands.
//!
//! Instructions keep their encoded form: a short branch stays short. If a patched body
//! moves a short branch target out of range the encoding fails instead of silently
//! switching forms.

use std::collections::HashMap;

use crate::{
    assembly::{Immediate, Instruction, OpCode, Operand, OperandType},
    file::io::write_le,
    metadata::Token,
    Result,
};

/// Produces tokens for metadata operands while a body is encoded.
pub trait TokenEncoder {
    /// Return the token `opcode` should carry for `operand`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the operand cannot be expressed as a token.
    fn token_for(&mut self, opcode: OpCode, operand: &Operand) -> Result<Token>;
}

/// New offsets of a sequence of instructions.
#[derive(Debug)]
pub struct Layout {
    offsets: Vec<u32>,
    by_original: HashMap<u32, u32>,
    code_size: u32,
    original_code_size: u32,
}

impl Layout {
    /// Lay out `instructions`, which were decoded from a body of `original_code_size` bytes
    /// (`0` if none of them were decoded).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body exceeds the 32-bit offset range.
    pub fn compute(instructions: &[Instruction], original_code_size: u32) -> Result<Layout> {
        let mut offsets = Vec::with_capacity(instructions.len());
        let mut by_original = HashMap::with_capacity(instructions.len());
        let mut position = 0u32;

        for instruction in instructions {
            offsets.push(position);
            if let Some(original) = instruction.offset {
                by_original.entry(original).or_insert(position);
            }

            let size = u32::try_from(instruction.size())
                .map_err(|_| malformed_error!("Instruction too large"))?;
            position = position
                .checked_add(size)
                .ok_or_else(|| malformed_error!("Method body exceeds 4 GiB"))?;
        }

        Ok(Layout {
            offsets,
            by_original,
            code_size: position,
            original_code_size,
        })
    }

    /// Size of the encoded code in bytes.
    #[must_use]
    pub fn code_size(&self) -> u32 {
        self.code_size
    }

    /// New offset of the instruction at `index`.
    #[must_use]
    pub fn offset_of(&self, index: usize) -> Option<u32> {
        self.offsets.get(index).copied()
    }

    /// New offset of the instruction originally at `original`, if it still exists.
    #[must_use]
    pub fn resolve(&self, original: u32) -> Option<u32> {
        self.by_original.get(&original).copied()
    }

    /// Like [`Layout::resolve`], but also maps the original end of the code to the new end.
    ///
    /// Region ends of exception handlers may point one past the last instruction.
    #[must_use]
    pub fn resolve_end(&self, original: u32) -> Option<u32> {
        if original == self.original_code_size && self.original_code_size > 0 {
            return Some(self.code_size);
        }
        self.resolve(original)
    }

    /// Translate an original `[offset, offset + length)` region, e.g. a protected block,
    /// into the new layout as `(offset, length)`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if either boundary was removed or the region
    /// would be inverted.
    pub fn region(&self, offset: u32, length: u32) -> Result<(u32, u32)> {
        let original_end = offset
            .checked_add(length)
            .ok_or_else(|| malformed_error!("Exception handler region overflows"))?;

        let start = self.resolve(offset).ok_or_else(|| {
            malformed_error!("Exception region start IL_{:04x} was removed", offset)
        })?;
        let end = self.resolve_end(original_end).ok_or_else(|| {
            malformed_error!("Exception region end IL_{:04x} was removed", original_end)
        })?;
        if end < start {
            return Err(malformed_error!(
                "Exception region IL_{:04x}-IL_{:04x} is inverted",
                offset,
                original_end
            ));
        }

        Ok((start, end - start))
    }
}

/// Encode `instructions` according to `layout`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if an operand does not fit its opcode, a branch
/// target no longer exists or a short branch displacement no longer fits in a byte.
pub fn encode_stream(
    instructions: &[Instruction],
    layout: &Layout,
    tokens: &mut dyn TokenEncoder,
) -> Result<Vec<u8>> {
    let mut code = Vec::with_capacity(layout.code_size() as usize);

    for (index, instruction) in instructions.iter().enumerate() {
        let start = layout
            .offset_of(index)
            .ok_or_else(|| malformed_error!("Layout does not cover instruction {}", index))?;
        let end = start.saturating_add(u32::try_from(instruction.size()).unwrap_or(u32::MAX));

        if instruction.opcode.size() == 2 {
            code.push(instruction.opcode.prefix());
        }
        code.push(instruction.opcode.code());

        encode_operand(&mut code, instruction, layout, end, tokens)?;
    }

    Ok(code)
}

fn encode_operand(
    code: &mut Vec<u8>,
    instruction: &Instruction,
    layout: &Layout,
    end: u32,
    tokens: &mut dyn TokenEncoder,
) -> Result<()> {
    let expected = instruction.opcode.operand_type();
    match (expected, &instruction.operand) {
        (OperandType::None, Operand::None) => {}
        (OperandType::Int8, Operand::Immediate(Immediate::Int8(value))) => write_le(code, *value),
        (OperandType::UInt8, Operand::Immediate(Immediate::UInt8(value))) => {
            write_le(code, *value);
        }
        (OperandType::UInt16, Operand::Immediate(Immediate::UInt16(value))) => {
            write_le(code, *value);
        }
        (OperandType::Int32, Operand::Immediate(Immediate::Int32(value))) => {
            write_le(code, *value);
        }
        (OperandType::Int64, Operand::Immediate(Immediate::Int64(value))) => {
            write_le(code, *value);
        }
        (OperandType::Float32, Operand::Immediate(Immediate::Float32(value))) => {
            write_le(code, *value);
        }
        (OperandType::Float64, Operand::Immediate(Immediate::Float64(value))) => {
            write_le(code, *value);
        }
        (
            OperandType::Token,
            Operand::String(_)
            | Operand::Type(_)
            | Operand::Field(_)
            | Operand::Method(_)
            | Operand::Token(_),
        ) => {
            let token = tokens.token_for(instruction.opcode, &instruction.operand)?;
            write_le(code, token.value());
        }
        (OperandType::Target8, Operand::Target(target)) => {
            let displacement = displacement(instruction, layout, *target, end)?;
            let short = i8::try_from(displacement).map_err(|_| {
                malformed_error!(
                    "{} displacement {} no longer fits a short branch",
                    instruction.mnemonic(),
                    displacement
                )
            })?;
            write_le(code, short);
        }
        (OperandType::Target32, Operand::Target(target)) => {
            let displacement = displacement(instruction, layout, *target, end)?;
            let long = i32::try_from(displacement)
                .map_err(|_| malformed_error!("Branch displacement {} too large", displacement))?;
            write_le(code, long);
        }
        (OperandType::Switch, Operand::Switch(targets)) => {
            let count = u32::try_from(targets.len())
                .map_err(|_| malformed_error!("Too many switch targets"))?;
            write_le(code, count);
            for target in targets {
                let displacement = displacement(instruction, layout, *target, end)?;
                let long = i32::try_from(displacement).map_err(|_| {
                    malformed_error!("Switch displacement {} too large", displacement)
                })?;
                write_le(code, long);
            }
        }
        (expected, operand) => {
            return Err(malformed_error!(
                "{} expects a {:?} operand, found {:?}",
                instruction.mnemonic(),
                expected,
                operand
            ))
        }
    }
    Ok(())
}

fn displacement(instruction: &Instruction, layout: &Layout, target: u32, end: u32) -> Result<i64> {
    let new_target = layout.resolve(target).ok_or_else(|| {
        malformed_error!(
            "{} targets IL_{:04x}, which is not the start of an instruction",
            instruction.mnemonic(),
            target
        )
    })?;
    Ok(i64::from(new_target) - i64::from(end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{decode_stream, RawTokens},
        Error, Parser,
    };

    struct PassThrough;

    impl TokenEncoder for PassThrough {
        fn token_for(&mut self, _opcode: OpCode, operand: &Operand) -> Result<Token> {
            match operand {
                Operand::Token(token) => Ok(*token),
                other => Err(malformed_error!("No token for {:?}", other)),
            }
        }
    }

    fn decode(code: &[u8]) -> Vec<Instruction> {
        decode_stream(&mut Parser::new(code), &RawTokens).unwrap()
    }

    fn encode(instructions: &[Instruction], original_size: u32) -> Result<Vec<u8>> {
        let layout = Layout::compute(instructions, original_size)?;
        encode_stream(instructions, &layout, &mut PassThrough)
    }

    #[test]
    fn unchanged_body_encodes_identically() {
        let code = [
            0x00, // nop
            0x2C, 0x05, // brfalse.s +5
            0x00, // nop
            0x2B, 0x01, // br.s +1
            0x00, // nop
            0x2A, // ret
            0x20, 0xA6, 0xB1, 0x07, 0x00, // ldc.i4 504230
            0xD0, 0x01, 0x00, 0x00, 0x02, // ldtoken 0x02000001
            0x26, // pop
            0x2A, // ret
        ];

        let instructions = decode(&code);
        assert_eq!(encode(&instructions, code.len() as u32).unwrap(), code);
    }

    #[test]
    fn branch_over_removed_instructions_is_shortened() {
        let code = [
            0x2B, 0x02, // br.s +2 -> ret
            0x00, // nop
            0x00, // nop
            0x2A, // ret
        ];

        let mut instructions = decode(&code);
        instructions.remove(1);

        assert_eq!(encode(&instructions, 5).unwrap(), [0x2B, 0x01, 0x00, 0x2A]);
    }

    #[test]
    fn backward_branch() {
        let code = [
            0x00, // nop
            0x00, // nop
            0x2B, 0xFC, // br.s -4 -> first nop
        ];

        let mut instructions = decode(&code);
        instructions.remove(1);

        assert_eq!(encode(&instructions, 4).unwrap(), [0x00, 0x2B, 0xFD]);
    }

    #[test]
    fn removed_branch_target_fails() {
        let code = [
            0x2B, 0x01, // br.s +1 -> ret
            0x00, // nop
            0x2A, // ret
        ];

        let mut instructions = decode(&code);
        instructions.pop();

        assert!(matches!(encode(&instructions, 4), Err(Error::Malformed { .. })));
    }

    #[test]
    fn switch_targets_are_remapped() {
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00, // switch (2 cases)
            0x02, 0x00, 0x00, 0x00, // +2 -> ret at 15
            0x00, 0x00, 0x00, 0x00, // +0 -> nop at 13
            0x00, // nop
            0x00, // nop
            0x2A, // ret
        ];

        let mut instructions = decode(&code);
        assert_eq!(instructions[0].operand, Operand::Switch(vec![15, 13]));
        instructions.remove(2);

        assert_eq!(
            encode(&instructions, code.len() as u32).unwrap(),
            [
                0x45, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x2A
            ]
            .as_slice()
        );
    }

    #[test]
    fn mismatched_operand_fails() {
        let wrong = Instruction::with_operand(
            OpCode::LDC_I4,
            Operand::Immediate(Immediate::Int8(1)),
        );

        assert!(matches!(encode(&[wrong], 0), Err(Error::Malformed { .. })));
    }

    #[test]
    fn synthesized_instructions() {
        let body = [Instruction::new(OpCode::LDC_I4_0), Instruction::ret()];
        assert_eq!(encode(&body, 0).unwrap(), [0x16, 0x2A]);

        let empty: [Instruction; 0] = [];
        assert!(encode(&empty, 0).unwrap().is_empty());
    }

    #[test]
    fn layout_resolves_region_end() {
        let code = [0x00, 0x00, 0x2A];
        let mut instructions = decode(&code);
        instructions.remove(0);

        let layout = Layout::compute(&instructions, 3).unwrap();
        assert_eq!(layout.code_size(), 2);
        assert_eq!(layout.resolve(0), None);
        assert_eq!(layout.resolve(1), Some(0));
        assert_eq!(layout.resolve_end(3), Some(2));
        assert_eq!(layout.resolve(3), None);
    }

    #[test]
    fn regions_follow_instructions() {
        // nop; nop; leave.s +1; nop; ret
        let code = [0x00, 0x00, 0xDE, 0x01, 0x00, 0x2A];
        let mut instructions = decode(&code);
        instructions.remove(0);

        let layout = Layout::compute(&instructions, 6).unwrap();
        assert_eq!(layout.region(1, 3).unwrap(), (0, 3));
        assert_eq!(layout.region(4, 2).unwrap(), (3, 2));
        assert!(layout.region(0, 4).is_err());
        assert!(layout.region(u32::MAX, 2).is_err());
    }

    #[test]
    fn branch_into_an_instruction_fails() {
        let branch = Instruction::with_operand(OpCode::BR_S, Operand::Target(1));
        let body = [branch, Instruction::ret()];

        let err = encode(&body, 0).unwrap_err();
        assert!(err.to_string().contains("not the start of an instruction"), "{err}");
    }
}
