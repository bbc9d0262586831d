//! Builders for method bodies in tests.

use std::collections::HashMap;

use crate::{
    assembly::{Immediate, Instruction, OpCode, Operand},
    metadata::{ExceptionHandler, ExceptionHandlerFlags, MemberRef, MethodBody, TypeRef},
};

struct PendingHandler {
    try_start: &'static str,
    handler_start: &'static str,
    handler_end: &'static str,
}

/// Builds a [`MethodBody`] that looks exactly like one decoded from an image: every
/// instruction carries its offset and branch targets are offsets, not labels.
pub struct BodyBuilder {
    max_stack: u16,
    locals: Option<String>,
    instructions: Vec<(Instruction, Option<&'static str>)>,
    labels: HashMap<&'static str, usize>,
    handlers: Vec<PendingHandler>,
}

impl BodyBuilder {
    pub fn new(max_stack: u16) -> Self {
        BodyBuilder {
            max_stack,
            locals: None,
            instructions: Vec::new(),
            labels: HashMap::new(),
            handlers: Vec::new(),
        }
    }

    pub fn locals(mut self, signature: &str) -> Self {
        self.locals = Some(signature.to_string());
        self
    }

    fn push(mut self, instruction: Instruction) -> Self {
        self.instructions.push((instruction, None));
        self
    }

    pub fn op(self, opcode: OpCode) -> Self {
        self.push(Instruction::new(opcode))
    }

    pub fn imm(self, opcode: OpCode, value: Immediate) -> Self {
        self.push(Instruction::with_operand(opcode, Operand::Immediate(value)))
    }

    pub fn ldc(self, value: i32) -> Self {
        self.push(Instruction::ldc_i4(value))
    }

    pub fn ldstr(self, value: &str) -> Self {
        self.push(Instruction::with_operand(
            OpCode::LDSTR,
            Operand::String(value.to_string()),
        ))
    }

    pub fn field(self, opcode: OpCode, parent: TypeRef, name: &str, signature: &str) -> Self {
        self.push(Instruction::with_operand(
            opcode,
            Operand::Field(MemberRef::new(parent, name, signature)),
        ))
    }

    pub fn method(self, opcode: OpCode, parent: TypeRef, name: &str, signature: &str) -> Self {
        self.push(Instruction::with_operand(
            opcode,
            Operand::Method(MemberRef::new(parent, name, signature)),
        ))
    }

    pub fn ty(self, opcode: OpCode, ty: TypeRef) -> Self {
        self.push(Instruction::with_operand(opcode, Operand::Type(ty)))
    }

    pub fn branch(mut self, opcode: OpCode, label: &'static str) -> Self {
        self.instructions
            .push((Instruction::with_operand(opcode, Operand::Target(0)), Some(label)));
        self
    }

    /// Attach `name` to the next instruction.
    pub fn label(mut self, name: &'static str) -> Self {
        self.labels.insert(name, self.instructions.len());
        self
    }

    pub fn try_finally(
        mut self,
        try_start: &'static str,
        handler_start: &'static str,
        handler_end: &'static str,
    ) -> Self {
        self.handlers.push(PendingHandler {
            try_start,
            handler_start,
            handler_end,
        });
        self
    }

    pub fn build(self) -> MethodBody {
        let mut offsets = Vec::with_capacity(self.instructions.len() + 1);
        let mut position = 0u32;
        for (instruction, _) in &self.instructions {
            offsets.push(position);
            position += u32::try_from(instruction.size()).unwrap();
        }
        offsets.push(position);

        let offset_of = |label: &str| offsets[self.labels[label]];

        let instructions = self
            .instructions
            .iter()
            .zip(&offsets)
            .map(|((instruction, target), &offset)| {
                let mut instruction = instruction.clone();
                if let Some(label) = target {
                    instruction.operand = Operand::Target(offset_of(label));
                }
                instruction.offset = Some(offset);
                instruction
            })
            .collect();

        let handlers = self
            .handlers
            .iter()
            .map(|pending| {
                let try_offset = offset_of(pending.try_start);
                let handler_offset = offset_of(pending.handler_start);
                ExceptionHandler {
                    flags: ExceptionHandlerFlags::FINALLY,
                    try_offset,
                    try_length: handler_offset - try_offset,
                    handler_offset,
                    handler_length: offset_of(pending.handler_end) - handler_offset,
                    class: None,
                    filter_offset: 0,
                }
            })
            .collect();

        let init_locals = self.locals.is_some();
        MethodBody::decoded(
            self.max_stack,
            init_locals,
            self.locals,
            instructions,
            handlers,
            position,
        )
    }
}
