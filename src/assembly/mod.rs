//! CIL instruction model and byte stream codec.
//!
//! - [`OpCode`] and the static opcode table
//! - [`Instruction`], [`Operand`] and [`Immediate`]
//! - [`decode_stream`] / [`decode_instruction`] to turn method body bytes into instructions
//! - [`Layout`] and [`encode_stream`] to turn (possibly edited) instructions back into bytes
//!
//! Decoding and encoding are parameterised over how metadata tokens are handled, see
//! [`TokenResolver`] and [`TokenEncoder`]. The metadata image reader and writer provide the
//! implementations that map tokens to and from named references.

mod decoder;
mod encoder;
mod instruction;
mod opcodes;

pub use decoder::{decode_instruction, decode_stream, RawTokens, TokenResolver};
pub use encoder::{encode_stream, Layout, TokenEncoder};
pub use instruction::{Immediate, Instruction, Operand};
pub use opcodes::{FlowType, OpCode, OpCodeInfo, OperandType, FE_PREFIX, OPCODES};
