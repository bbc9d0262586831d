//! Methods, method bodies and exception handlers.
//!
//! A [`MethodBody`] holds the decoded instruction stream of a method. Instructions keep the
//! IL offset they were decoded from, and branch operands as well as the
//! [`ExceptionHandler`] boundaries are expressed in those original offsets. When the body
//! is written back, the encoder lays out whatever instructions remain and translates every
//! original offset into the new one.

use bitflags::bitflags;

use crate::{
    assembly::Instruction,
    metadata::{Token, TypeRef},
};

bitflags! {
    /// Method attributes (ECMA-335 II.23.1.10).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAttributes: u16 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessible by anyone in the assembly
        const ASSEMBLY = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name+sig, else just by name
        const HIDE_BY_SIG = 0x0080;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// Implementation is forwarded through `PInvoke`
        const PINVOKE_IMPL = 0x2000;
        /// Runtime should check name encoding
        const RT_SPECIAL_NAME = 0x1000;
    }
}

bitflags! {
    /// Exception handler clause kind (ECMA-335 II.25.4.6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// A fault clause (finally that executes only on exception)
        const FAULT = 0x0004;
    }
}

/// A try block together with its handler.
///
/// All offsets are IL offsets in the body the handler was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// Start of the protected region
    pub try_offset: u32,
    /// Length of the protected region
    pub try_length: u32,
    /// Start of the handler
    pub handler_offset: u32,
    /// Length of the handler
    pub handler_length: u32,
    /// Caught exception type for typed clauses
    pub class: Option<TypeRef>,
    /// Start of the filter block for filter clauses
    pub filter_offset: u32,
}

/// The implementation of a method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Whether locals are zero-initialised
    pub init_locals: bool,
    /// Local variable signature text, if the method has locals
    pub locals: Option<String>,
    /// Exception handling clauses
    pub handlers: Vec<ExceptionHandler>,
    instructions: Vec<Instruction>,
    code_size: u32,
}

impl MethodBody {
    /// Create a body from freshly built instructions.
    #[must_use]
    pub fn new(max_stack: u16, instructions: Vec<Instruction>) -> Self {
        MethodBody {
            max_stack,
            init_locals: false,
            locals: None,
            handlers: Vec::new(),
            instructions,
            code_size: 0,
        }
    }

    /// Create a body decoded from `code_size` bytes of IL.
    #[must_use]
    pub(crate) fn decoded(
        max_stack: u16,
        init_locals: bool,
        locals: Option<String>,
        instructions: Vec<Instruction>,
        handlers: Vec<ExceptionHandler>,
        code_size: u32,
    ) -> Self {
        MethodBody {
            max_stack,
            init_locals,
            locals,
            handlers,
            instructions,
            code_size,
        }
    }

    /// The instruction stream.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Mutable access to the instruction stream.
    pub fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.instructions
    }

    /// Swap in a new instruction stream that forms a body of its own.
    ///
    /// The instructions are numbered by their position in the new stream, so branch
    /// targets are offsets into `instructions`. Returns the previous instructions.
    pub(crate) fn replace_instructions(&mut self, mut instructions: Vec<Instruction>) -> Vec<Instruction> {
        let mut position = 0u32;
        for instruction in &mut instructions {
            instruction.offset = Some(position);
            position = position.saturating_add(u32::try_from(instruction.size()).unwrap_or(u32::MAX));
        }
        self.code_size = position;
        std::mem::replace(&mut self.instructions, instructions)
    }

    /// Size in bytes of the IL the body was decoded from; `0` for built bodies.
    ///
    /// Exception handler regions that end at the end of the method refer to this offset.
    #[must_use]
    pub fn original_code_size(&self) -> u32 {
        self.code_size
    }
}

/// A method defined by a type.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Method name, e.g. `Update` or `.cctor`
    pub name: String,
    /// Method attributes
    pub flags: MethodAttributes,
    /// Raw implementation attributes
    pub impl_flags: u16,
    /// Signature text, e.g. `void(string[])`
    pub signature: String,
    /// The body; `None` for abstract, extern and runtime-provided methods
    pub body: Option<MethodBody>,
    /// Row the method was loaded from; `None` for methods built in memory
    pub token: Option<Token>,
}

impl MethodDef {
    /// Create a method with the given body.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        flags: MethodAttributes,
        signature: impl Into<String>,
        body: Option<MethodBody>,
    ) -> Self {
        MethodDef {
            name: name.into(),
            flags,
            impl_flags: 0,
            signature: signature.into(),
            body,
            token: None,
        }
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodAttributes::STATIC)
    }
}
