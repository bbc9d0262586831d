//! CIL opcodes (ECMA-335 Partition III).
//!
//! [`OpCode`] is a validated two-byte opcode value: single-byte opcodes are stored as
//! `0x00XX`, the `0xFE`-prefixed ones as `0xFEXX`. Every opcode has an associated constant
//! named after its mnemonic (e.g. [`OpCode::LDC_I4`] for `ldc.i4`) and an entry in the
//! static opcode table describing its mnemonic, operand encoding and control flow.
//!
//! ```rust
//! use dotpatch::assembly::{FlowType, OpCode, OperandType};
//!
//! assert_eq!(OpCode::LDC_I4.mnemonic(), "ldc.i4");
//! assert_eq!(OpCode::LDC_I4.operand_type(), OperandType::Int32);
//! assert_eq!(OpCode::from_mnemonic("br.s"), Some(OpCode::BR_S));
//! assert_eq!(OpCode::CEQ.size(), 2);
//! assert_eq!(OpCode::RET.flow_type(), FlowType::Return);
//! ```
#![allow(missing_docs)]

use std::{collections::HashMap, fmt, sync::OnceLock};

/// Encoding of the operand that follows an opcode in the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 8-bit immediate
    Int8,
    /// Unsigned 8-bit immediate (short argument / local indices, alignment)
    UInt8,
    /// Unsigned 16-bit immediate (long argument / local indices)
    UInt16,
    /// Signed 32-bit immediate
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 32-bit floating point immediate
    Float32,
    /// 64-bit floating point immediate
    Float64,
    /// Metadata token
    Token,
    /// Signed 8-bit branch displacement
    Target8,
    /// Signed 32-bit branch displacement
    Target32,
    /// Switch jump table: a 32-bit count followed by that many 32-bit displacements
    Switch,
}

impl OperandType {
    /// Encoded size in bytes, or `None` for the variable-sized switch table.
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8 | OperandType::UInt8 | OperandType::Target8 => Some(1),
            OperandType::UInt16 => Some(2),
            OperandType::Int32 | OperandType::Float32 | OperandType::Token | OperandType::Target32 => {
                Some(4)
            }
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch
    Switch,
    /// Exception throwing
    Throw,
    /// End of a finally or filter block
    EndFinally,
    /// Leave protected region
    Leave,
}

/// Static description of one opcode.
#[derive(Debug)]
pub struct OpCodeInfo {
    pub opcode: OpCode,
    pub mnemonic: &'static str,
    pub operand: OperandType,
    pub flow: FlowType,
}

/// A CIL opcode.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpCode(u16);

/// First byte of all two-byte opcodes.
pub const FE_PREFIX: u8 = 0xFE;

impl OpCode {
    pub const NOP: OpCode = OpCode(0x00);
    pub const BREAK: OpCode = OpCode(0x01);
    pub const LDARG_0: OpCode = OpCode(0x02);
    pub const LDARG_1: OpCode = OpCode(0x03);
    pub const LDARG_2: OpCode = OpCode(0x04);
    pub const LDARG_3: OpCode = OpCode(0x05);
    pub const LDLOC_0: OpCode = OpCode(0x06);
    pub const LDLOC_1: OpCode = OpCode(0x07);
    pub const LDLOC_2: OpCode = OpCode(0x08);
    pub const LDLOC_3: OpCode = OpCode(0x09);
    pub const STLOC_0: OpCode = OpCode(0x0A);
    pub const STLOC_1: OpCode = OpCode(0x0B);
    pub const STLOC_2: OpCode = OpCode(0x0C);
    pub const STLOC_3: OpCode = OpCode(0x0D);
    pub const LDARG_S: OpCode = OpCode(0x0E);
    pub const LDARGA_S: OpCode = OpCode(0x0F);
    pub const STARG_S: OpCode = OpCode(0x10);
    pub const LDLOC_S: OpCode = OpCode(0x11);
    pub const LDLOCA_S: OpCode = OpCode(0x12);
    pub const STLOC_S: OpCode = OpCode(0x13);
    pub const LDNULL: OpCode = OpCode(0x14);
    pub const LDC_I4_M1: OpCode = OpCode(0x15);
    pub const LDC_I4_0: OpCode = OpCode(0x16);
    pub const LDC_I4_1: OpCode = OpCode(0x17);
    pub const LDC_I4_2: OpCode = OpCode(0x18);
    pub const LDC_I4_3: OpCode = OpCode(0x19);
    pub const LDC_I4_4: OpCode = OpCode(0x1A);
    pub const LDC_I4_5: OpCode = OpCode(0x1B);
    pub const LDC_I4_6: OpCode = OpCode(0x1C);
    pub const LDC_I4_7: OpCode = OpCode(0x1D);
    pub const LDC_I4_8: OpCode = OpCode(0x1E);
    pub const LDC_I4_S: OpCode = OpCode(0x1F);
    pub const LDC_I4: OpCode = OpCode(0x20);
    pub const LDC_I8: OpCode = OpCode(0x21);
    pub const LDC_R4: OpCode = OpCode(0x22);
    pub const LDC_R8: OpCode = OpCode(0x23);
    pub const DUP: OpCode = OpCode(0x25);
    pub const POP: OpCode = OpCode(0x26);
    pub const JMP: OpCode = OpCode(0x27);
    pub const CALL: OpCode = OpCode(0x28);
    pub const CALLI: OpCode = OpCode(0x29);
    pub const RET: OpCode = OpCode(0x2A);
    pub const BR_S: OpCode = OpCode(0x2B);
    pub const BRFALSE_S: OpCode = OpCode(0x2C);
    pub const BRTRUE_S: OpCode = OpCode(0x2D);
    pub const BEQ_S: OpCode = OpCode(0x2E);
    pub const BGE_S: OpCode = OpCode(0x2F);
    pub const BGT_S: OpCode = OpCode(0x30);
    pub const BLE_S: OpCode = OpCode(0x31);
    pub const BLT_S: OpCode = OpCode(0x32);
    pub const BNE_UN_S: OpCode = OpCode(0x33);
    pub const BGE_UN_S: OpCode = OpCode(0x34);
    pub const BGT_UN_S: OpCode = OpCode(0x35);
    pub const BLE_UN_S: OpCode = OpCode(0x36);
    pub const BLT_UN_S: OpCode = OpCode(0x37);
    pub const BR: OpCode = OpCode(0x38);
    pub const BRFALSE: OpCode = OpCode(0x39);
    pub const BRTRUE: OpCode = OpCode(0x3A);
    pub const BEQ: OpCode = OpCode(0x3B);
    pub const BGE: OpCode = OpCode(0x3C);
    pub const BGT: OpCode = OpCode(0x3D);
    pub const BLE: OpCode = OpCode(0x3E);
    pub const BLT: OpCode = OpCode(0x3F);
    pub const BNE_UN: OpCode = OpCode(0x40);
    pub const BGE_UN: OpCode = OpCode(0x41);
    pub const BGT_UN: OpCode = OpCode(0x42);
    pub const BLE_UN: OpCode = OpCode(0x43);
    pub const BLT_UN: OpCode = OpCode(0x44);
    pub const SWITCH: OpCode = OpCode(0x45);
    pub const LDIND_I1: OpCode = OpCode(0x46);
    pub const LDIND_U1: OpCode = OpCode(0x47);
    pub const LDIND_I2: OpCode = OpCode(0x48);
    pub const LDIND_U2: OpCode = OpCode(0x49);
    pub const LDIND_I4: OpCode = OpCode(0x4A);
    pub const LDIND_U4: OpCode = OpCode(0x4B);
    pub const LDIND_I8: OpCode = OpCode(0x4C);
    pub const LDIND_I: OpCode = OpCode(0x4D);
    pub const LDIND_R4: OpCode = OpCode(0x4E);
    pub const LDIND_R8: OpCode = OpCode(0x4F);
    pub const LDIND_REF: OpCode = OpCode(0x50);
    pub const STIND_REF: OpCode = OpCode(0x51);
    pub const STIND_I1: OpCode = OpCode(0x52);
    pub const STIND_I2: OpCode = OpCode(0x53);
    pub const STIND_I4: OpCode = OpCode(0x54);
    pub const STIND_I8: OpCode = OpCode(0x55);
    pub const STIND_R4: OpCode = OpCode(0x56);
    pub const STIND_R8: OpCode = OpCode(0x57);
    pub const ADD: OpCode = OpCode(0x58);
    pub const SUB: OpCode = OpCode(0x59);
    pub const MUL: OpCode = OpCode(0x5A);
    pub const DIV: OpCode = OpCode(0x5B);
    pub const DIV_UN: OpCode = OpCode(0x5C);
    pub const REM: OpCode = OpCode(0x5D);
    pub const REM_UN: OpCode = OpCode(0x5E);
    pub const AND: OpCode = OpCode(0x5F);
    pub const OR: OpCode = OpCode(0x60);
    pub const XOR: OpCode = OpCode(0x61);
    pub const SHL: OpCode = OpCode(0x62);
    pub const SHR: OpCode = OpCode(0x63);
    pub const SHR_UN: OpCode = OpCode(0x64);
    pub const NEG: OpCode = OpCode(0x65);
    pub const NOT: OpCode = OpCode(0x66);
    pub const CONV_I1: OpCode = OpCode(0x67);
    pub const CONV_I2: OpCode = OpCode(0x68);
    pub const CONV_I4: OpCode = OpCode(0x69);
    pub const CONV_I8: OpCode = OpCode(0x6A);
    pub const CONV_R4: OpCode = OpCode(0x6B);
    pub const CONV_R8: OpCode = OpCode(0x6C);
    pub const CONV_U4: OpCode = OpCode(0x6D);
    pub const CONV_U8: OpCode = OpCode(0x6E);
    pub const CALLVIRT: OpCode = OpCode(0x6F);
    pub const CPOBJ: OpCode = OpCode(0x70);
    pub const LDOBJ: OpCode = OpCode(0x71);
    pub const LDSTR: OpCode = OpCode(0x72);
    pub const NEWOBJ: OpCode = OpCode(0x73);
    pub const CASTCLASS: OpCode = OpCode(0x74);
    pub const ISINST: OpCode = OpCode(0x75);
    pub const CONV_R_UN: OpCode = OpCode(0x76);
    pub const UNBOX: OpCode = OpCode(0x79);
    pub const THROW: OpCode = OpCode(0x7A);
    pub const LDFLD: OpCode = OpCode(0x7B);
    pub const LDFLDA: OpCode = OpCode(0x7C);
    pub const STFLD: OpCode = OpCode(0x7D);
    pub const LDSFLD: OpCode = OpCode(0x7E);
    pub const LDSFLDA: OpCode = OpCode(0x7F);
    pub const STSFLD: OpCode = OpCode(0x80);
    pub const STOBJ: OpCode = OpCode(0x81);
    pub const CONV_OVF_I1_UN: OpCode = OpCode(0x82);
    pub const CONV_OVF_I2_UN: OpCode = OpCode(0x83);
    pub const CONV_OVF_I4_UN: OpCode = OpCode(0x84);
    pub const CONV_OVF_I8_UN: OpCode = OpCode(0x85);
    pub const CONV_OVF_U1_UN: OpCode = OpCode(0x86);
    pub const CONV_OVF_U2_UN: OpCode = OpCode(0x87);
    pub const CONV_OVF_U4_UN: OpCode = OpCode(0x88);
    pub const CONV_OVF_U8_UN: OpCode = OpCode(0x89);
    pub const CONV_OVF_I_UN: OpCode = OpCode(0x8A);
    pub const CONV_OVF_U_UN: OpCode = OpCode(0x8B);
    pub const BOX: OpCode = OpCode(0x8C);
    pub const NEWARR: OpCode = OpCode(0x8D);
    pub const LDLEN: OpCode = OpCode(0x8E);
    pub const LDELEMA: OpCode = OpCode(0x8F);
    pub const LDELEM_I1: OpCode = OpCode(0x90);
    pub const LDELEM_U1: OpCode = OpCode(0x91);
    pub const LDELEM_I2: OpCode = OpCode(0x92);
    pub const LDELEM_U2: OpCode = OpCode(0x93);
    pub const LDELEM_I4: OpCode = OpCode(0x94);
    pub const LDELEM_U4: OpCode = OpCode(0x95);
    pub const LDELEM_I8: OpCode = OpCode(0x96);
    pub const LDELEM_I: OpCode = OpCode(0x97);
    pub const LDELEM_R4: OpCode = OpCode(0x98);
    pub const LDELEM_R8: OpCode = OpCode(0x99);
    pub const LDELEM_REF: OpCode = OpCode(0x9A);
    pub const STELEM_I: OpCode = OpCode(0x9B);
    pub const STELEM_I1: OpCode = OpCode(0x9C);
    pub const STELEM_I2: OpCode = OpCode(0x9D);
    pub const STELEM_I4: OpCode = OpCode(0x9E);
    pub const STELEM_I8: OpCode = OpCode(0x9F);
    pub const STELEM_R4: OpCode = OpCode(0xA0);
    pub const STELEM_R8: OpCode = OpCode(0xA1);
    pub const STELEM_REF: OpCode = OpCode(0xA2);
    pub const LDELEM: OpCode = OpCode(0xA3);
    pub const STELEM: OpCode = OpCode(0xA4);
    pub const UNBOX_ANY: OpCode = OpCode(0xA5);
    pub const CONV_OVF_I1: OpCode = OpCode(0xB3);
    pub const CONV_OVF_U1: OpCode = OpCode(0xB4);
    pub const CONV_OVF_I2: OpCode = OpCode(0xB5);
    pub const CONV_OVF_U2: OpCode = OpCode(0xB6);
    pub const CONV_OVF_I4: OpCode = OpCode(0xB7);
    pub const CONV_OVF_U4: OpCode = OpCode(0xB8);
    pub const CONV_OVF_I8: OpCode = OpCode(0xB9);
    pub const CONV_OVF_U8: OpCode = OpCode(0xBA);
    pub const REFANYVAL: OpCode = OpCode(0xC2);
    pub const CKFINITE: OpCode = OpCode(0xC3);
    pub const MKREFANY: OpCode = OpCode(0xC6);
    pub const LDTOKEN: OpCode = OpCode(0xD0);
    pub const CONV_U2: OpCode = OpCode(0xD1);
    pub const CONV_U1: OpCode = OpCode(0xD2);
    pub const CONV_I: OpCode = OpCode(0xD3);
    pub const CONV_OVF_I: OpCode = OpCode(0xD4);
    pub const CONV_OVF_U: OpCode = OpCode(0xD5);
    pub const ADD_OVF: OpCode = OpCode(0xD6);
    pub const ADD_OVF_UN: OpCode = OpCode(0xD7);
    pub const MUL_OVF: OpCode = OpCode(0xD8);
    pub const MUL_OVF_UN: OpCode = OpCode(0xD9);
    pub const SUB_OVF: OpCode = OpCode(0xDA);
    pub const SUB_OVF_UN: OpCode = OpCode(0xDB);
    pub const ENDFINALLY: OpCode = OpCode(0xDC);
    pub const LEAVE: OpCode = OpCode(0xDD);
    pub const LEAVE_S: OpCode = OpCode(0xDE);
    pub const STIND_I: OpCode = OpCode(0xDF);
    pub const CONV_U: OpCode = OpCode(0xE0);

    // Two-byte opcodes
    pub const ARGLIST: OpCode = OpCode(0xFE00);
    pub const CEQ: OpCode = OpCode(0xFE01);
    pub const CGT: OpCode = OpCode(0xFE02);
    pub const CGT_UN: OpCode = OpCode(0xFE03);
    pub const CLT: OpCode = OpCode(0xFE04);
    pub const CLT_UN: OpCode = OpCode(0xFE05);
    pub const LDFTN: OpCode = OpCode(0xFE06);
    pub const LDVIRTFTN: OpCode = OpCode(0xFE07);
    pub const LDARG: OpCode = OpCode(0xFE09);
    pub const LDARGA: OpCode = OpCode(0xFE0A);
    pub const STARG: OpCode = OpCode(0xFE0B);
    pub const LDLOC: OpCode = OpCode(0xFE0C);
    pub const LDLOCA: OpCode = OpCode(0xFE0D);
    pub const STLOC: OpCode = OpCode(0xFE0E);
    pub const LOCALLOC: OpCode = OpCode(0xFE0F);
    pub const ENDFILTER: OpCode = OpCode(0xFE11);
    pub const UNALIGNED: OpCode = OpCode(0xFE12);
    pub const VOLATILE: OpCode = OpCode(0xFE13);
    pub const TAIL: OpCode = OpCode(0xFE14);
    pub const INITOBJ: OpCode = OpCode(0xFE15);
    pub const CONSTRAINED: OpCode = OpCode(0xFE16);
    pub const CPBLK: OpCode = OpCode(0xFE17);
    pub const INITBLK: OpCode = OpCode(0xFE18);
    pub const NO: OpCode = OpCode(0xFE19);
    pub const RETHROW: OpCode = OpCode(0xFE1A);
    pub const SIZEOF: OpCode = OpCode(0xFE1C);
    pub const REFANYTYPE: OpCode = OpCode(0xFE1D);
    pub const READONLY: OpCode = OpCode(0xFE1E);

    /// Look up a valid opcode from its encoded bytes (`prefix` is `0` or [`FE_PREFIX`]).
    #[must_use]
    pub fn from_bytes(prefix: u8, code: u8) -> Option<OpCode> {
        let candidate = OpCode((u16::from(prefix) << 8) | u16::from(code));
        by_value().contains_key(&candidate).then_some(candidate)
    }

    /// Look up an opcode by its mnemonic (e.g. `"ldc.i4.s"`).
    #[must_use]
    pub fn from_mnemonic(mnemonic: &str) -> Option<OpCode> {
        by_mnemonic().get(mnemonic).copied()
    }

    /// The prefix byte, `0` for single-byte opcodes.
    #[must_use]
    pub const fn prefix(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// The opcode byte following the prefix.
    #[must_use]
    pub const fn code(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Encoded size of the opcode itself, excluding its operand.
    #[must_use]
    pub const fn size(self) -> usize {
        if self.prefix() == FE_PREFIX {
            2
        } else {
            1
        }
    }

    /// Table entry describing this opcode.
    #[must_use]
    pub fn info(self) -> Option<&'static OpCodeInfo> {
        by_value().get(&self).copied()
    }

    /// Mnemonic as written by ildasm.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.info().map_or("<invalid>", |info| info.mnemonic)
    }

    /// Operand encoding following this opcode.
    #[must_use]
    pub fn operand_type(self) -> OperandType {
        self.info().map_or(OperandType::None, |info| info.operand)
    }

    /// Control flow behaviour of this opcode.
    #[must_use]
    pub fn flow_type(self) -> FlowType {
        self.info().map_or(FlowType::Sequential, |info| info.flow)
    }

    /// Returns `true` for opcodes whose operand is a branch displacement or switch table.
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(
            self.operand_type(),
            OperandType::Target8 | OperandType::Target32 | OperandType::Switch
        )
    }

    /// The constant pushed by the `ldc.i4.<n>` shorthand forms.
    #[must_use]
    pub const fn implicit_i4(self) -> Option<i32> {
        match self.0 {
            0x15 => Some(-1),
            0x16..=0x1E => Some(self.0 as i32 - 0x16),
            _ => None,
        }
    }
}

impl fmt::Debug for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpCode({}, 0x{:04X})", self.mnemonic(), self.0)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

macro_rules! opcode_table {
    ($($op:ident => $mnemonic:literal, $operand:ident, $flow:ident;)*) => {
        /// Every valid CIL opcode in encoding order.
        pub static OPCODES: &[OpCodeInfo] = &[
            $(OpCodeInfo {
                opcode: OpCode::$op,
                mnemonic: $mnemonic,
                operand: OperandType::$operand,
                flow: FlowType::$flow,
            },)*
        ];
    };
}

opcode_table! {
    NOP => "nop", None, Sequential;
    BREAK => "break", None, Sequential;
    LDARG_0 => "ldarg.0", None, Sequential;
    LDARG_1 => "ldarg.1", None, Sequential;
    LDARG_2 => "ldarg.2", None, Sequential;
    LDARG_3 => "ldarg.3", None, Sequential;
    LDLOC_0 => "ldloc.0", None, Sequential;
    LDLOC_1 => "ldloc.1", None, Sequential;
    LDLOC_2 => "ldloc.2", None, Sequential;
    LDLOC_3 => "ldloc.3", None, Sequential;
    STLOC_0 => "stloc.0", None, Sequential;
    STLOC_1 => "stloc.1", None, Sequential;
    STLOC_2 => "stloc.2", None, Sequential;
    STLOC_3 => "stloc.3", None, Sequential;
    LDARG_S => "ldarg.s", UInt8, Sequential;
    LDARGA_S => "ldarga.s", UInt8, Sequential;
    STARG_S => "starg.s", UInt8, Sequential;
    LDLOC_S => "ldloc.s", UInt8, Sequential;
    LDLOCA_S => "ldloca.s", UInt8, Sequential;
    STLOC_S => "stloc.s", UInt8, Sequential;
    LDNULL => "ldnull", None, Sequential;
    LDC_I4_M1 => "ldc.i4.m1", None, Sequential;
    LDC_I4_0 => "ldc.i4.0", None, Sequential;
    LDC_I4_1 => "ldc.i4.1", None, Sequential;
    LDC_I4_2 => "ldc.i4.2", None, Sequential;
    LDC_I4_3 => "ldc.i4.3", None, Sequential;
    LDC_I4_4 => "ldc.i4.4", None, Sequential;
    LDC_I4_5 => "ldc.i4.5", None, Sequential;
    LDC_I4_6 => "ldc.i4.6", None, Sequential;
    LDC_I4_7 => "ldc.i4.7", None, Sequential;
    LDC_I4_8 => "ldc.i4.8", None, Sequential;
    LDC_I4_S => "ldc.i4.s", Int8, Sequential;
    LDC_I4 => "ldc.i4", Int32, Sequential;
    LDC_I8 => "ldc.i8", Int64, Sequential;
    LDC_R4 => "ldc.r4", Float32, Sequential;
    LDC_R8 => "ldc.r8", Float64, Sequential;
    DUP => "dup", None, Sequential;
    POP => "pop", None, Sequential;
    JMP => "jmp", Token, Call;
    CALL => "call", Token, Call;
    CALLI => "calli", Token, Call;
    RET => "ret", None, Return;
    BR_S => "br.s", Target8, UnconditionalBranch;
    BRFALSE_S => "brfalse.s", Target8, ConditionalBranch;
    BRTRUE_S => "brtrue.s", Target8, ConditionalBranch;
    BEQ_S => "beq.s", Target8, ConditionalBranch;
    BGE_S => "bge.s", Target8, ConditionalBranch;
    BGT_S => "bgt.s", Target8, ConditionalBranch;
    BLE_S => "ble.s", Target8, ConditionalBranch;
    BLT_S => "blt.s", Target8, ConditionalBranch;
    BNE_UN_S => "bne.un.s", Target8, ConditionalBranch;
    BGE_UN_S => "bge.un.s", Target8, ConditionalBranch;
    BGT_UN_S => "bgt.un.s", Target8, ConditionalBranch;
    BLE_UN_S => "ble.un.s", Target8, ConditionalBranch;
    BLT_UN_S => "blt.un.s", Target8, ConditionalBranch;
    BR => "br", Target32, UnconditionalBranch;
    BRFALSE => "brfalse", Target32, ConditionalBranch;
    BRTRUE => "brtrue", Target32, ConditionalBranch;
    BEQ => "beq", Target32, ConditionalBranch;
    BGE => "bge", Target32, ConditionalBranch;
    BGT => "bgt", Target32, ConditionalBranch;
    BLE => "ble", Target32, ConditionalBranch;
    BLT => "blt", Target32, ConditionalBranch;
    BNE_UN => "bne.un", Target32, ConditionalBranch;
    BGE_UN => "bge.un", Target32, ConditionalBranch;
    BGT_UN => "bgt.un", Target32, ConditionalBranch;
    BLE_UN => "ble.un", Target32, ConditionalBranch;
    BLT_UN => "blt.un", Target32, ConditionalBranch;
    SWITCH => "switch", Switch, Switch;
    LDIND_I1 => "ldind.i1", None, Sequential;
    LDIND_U1 => "ldind.u1", None, Sequential;
    LDIND_I2 => "ldind.i2", None, Sequential;
    LDIND_U2 => "ldind.u2", None, Sequential;
    LDIND_I4 => "ldind.i4", None, Sequential;
    LDIND_U4 => "ldind.u4", None, Sequential;
    LDIND_I8 => "ldind.i8", None, Sequential;
    LDIND_I => "ldind.i", None, Sequential;
    LDIND_R4 => "ldind.r4", None, Sequential;
    LDIND_R8 => "ldind.r8", None, Sequential;
    LDIND_REF => "ldind.ref", None, Sequential;
    STIND_REF => "stind.ref", None, Sequential;
    STIND_I1 => "stind.i1", None, Sequential;
    STIND_I2 => "stind.i2", None, Sequential;
    STIND_I4 => "stind.i4", None, Sequential;
    STIND_I8 => "stind.i8", None, Sequential;
    STIND_R4 => "stind.r4", None, Sequential;
    STIND_R8 => "stind.r8", None, Sequential;
    ADD => "add", None, Sequential;
    SUB => "sub", None, Sequential;
    MUL => "mul", None, Sequential;
    DIV => "div", None, Sequential;
    DIV_UN => "div.un", None, Sequential;
    REM => "rem", None, Sequential;
    REM_UN => "rem.un", None, Sequential;
    AND => "and", None, Sequential;
    OR => "or", None, Sequential;
    XOR => "xor", None, Sequential;
    SHL => "shl", None, Sequential;
    SHR => "shr", None, Sequential;
    SHR_UN => "shr.un", None, Sequential;
    NEG => "neg", None, Sequential;
    NOT => "not", None, Sequential;
    CONV_I1 => "conv.i1", None, Sequential;
    CONV_I2 => "conv.i2", None, Sequential;
    CONV_I4 => "conv.i4", None, Sequential;
    CONV_I8 => "conv.i8", None, Sequential;
    CONV_R4 => "conv.r4", None, Sequential;
    CONV_R8 => "conv.r8", None, Sequential;
    CONV_U4 => "conv.u4", None, Sequential;
    CONV_U8 => "conv.u8", None, Sequential;
    CALLVIRT => "callvirt", Token, Call;
    CPOBJ => "cpobj", Token, Sequential;
    LDOBJ => "ldobj", Token, Sequential;
    LDSTR => "ldstr", Token, Sequential;
    NEWOBJ => "newobj", Token, Call;
    CASTCLASS => "castclass", Token, Sequential;
    ISINST => "isinst", Token, Sequential;
    CONV_R_UN => "conv.r.un", None, Sequential;
    UNBOX => "unbox", Token, Sequential;
    THROW => "throw", None, Throw;
    LDFLD => "ldfld", Token, Sequential;
    LDFLDA => "ldflda", Token, Sequential;
    STFLD => "stfld", Token, Sequential;
    LDSFLD => "ldsfld", Token, Sequential;
    LDSFLDA => "ldsflda", Token, Sequential;
    STSFLD => "stsfld", Token, Sequential;
    STOBJ => "stobj", Token, Sequential;
    CONV_OVF_I1_UN => "conv.ovf.i1.un", None, Sequential;
    CONV_OVF_I2_UN => "conv.ovf.i2.un", None, Sequential;
    CONV_OVF_I4_UN => "conv.ovf.i4.un", None, Sequential;
    CONV_OVF_I8_UN => "conv.ovf.i8.un", None, Sequential;
    CONV_OVF_U1_UN => "conv.ovf.u1.un", None, Sequential;
    CONV_OVF_U2_UN => "conv.ovf.u2.un", None, Sequential;
    CONV_OVF_U4_UN => "conv.ovf.u4.un", None, Sequential;
    CONV_OVF_U8_UN => "conv.ovf.u8.un", None, Sequential;
    CONV_OVF_I_UN => "conv.ovf.i.un", None, Sequential;
    CONV_OVF_U_UN => "conv.ovf.u.un", None, Sequential;
    BOX => "box", Token, Sequential;
    NEWARR => "newarr", Token, Sequential;
    LDLEN => "ldlen", None, Sequential;
    LDELEMA => "ldelema", Token, Sequential;
    LDELEM_I1 => "ldelem.i1", None, Sequential;
    LDELEM_U1 => "ldelem.u1", None, Sequential;
    LDELEM_I2 => "ldelem.i2", None, Sequential;
    LDELEM_U2 => "ldelem.u2", None, Sequential;
    LDELEM_I4 => "ldelem.i4", None, Sequential;
    LDELEM_U4 => "ldelem.u4", None, Sequential;
    LDELEM_I8 => "ldelem.i8", None, Sequential;
    LDELEM_I => "ldelem.i", None, Sequential;
    LDELEM_R4 => "ldelem.r4", None, Sequential;
    LDELEM_R8 => "ldelem.r8", None, Sequential;
    LDELEM_REF => "ldelem.ref", None, Sequential;
    STELEM_I => "stelem.i", None, Sequential;
    STELEM_I1 => "stelem.i1", None, Sequential;
    STELEM_I2 => "stelem.i2", None, Sequential;
    STELEM_I4 => "stelem.i4", None, Sequential;
    STELEM_I8 => "stelem.i8", None, Sequential;
    STELEM_R4 => "stelem.r4", None, Sequential;
    STELEM_R8 => "stelem.r8", None, Sequential;
    STELEM_REF => "stelem.ref", None, Sequential;
    LDELEM => "ldelem", Token, Sequential;
    STELEM => "stelem", Token, Sequential;
    UNBOX_ANY => "unbox.any", Token, Sequential;
    CONV_OVF_I1 => "conv.ovf.i1", None, Sequential;
    CONV_OVF_U1 => "conv.ovf.u1", None, Sequential;
    CONV_OVF_I2 => "conv.ovf.i2", None, Sequential;
    CONV_OVF_U2 => "conv.ovf.u2", None, Sequential;
    CONV_OVF_I4 => "conv.ovf.i4", None, Sequential;
    CONV_OVF_U4 => "conv.ovf.u4", None, Sequential;
    CONV_OVF_I8 => "conv.ovf.i8", None, Sequential;
    CONV_OVF_U8 => "conv.ovf.u8", None, Sequential;
    REFANYVAL => "refanyval", Token, Sequential;
    CKFINITE => "ckfinite", None, Sequential;
    MKREFANY => "mkrefany", Token, Sequential;
    LDTOKEN => "ldtoken", Token, Sequential;
    CONV_U2 => "conv.u2", None, Sequential;
    CONV_U1 => "conv.u1", None, Sequential;
    CONV_I => "conv.i", None, Sequential;
    CONV_OVF_I => "conv.ovf.i", None, Sequential;
    CONV_OVF_U => "conv.ovf.u", None, Sequential;
    ADD_OVF => "add.ovf", None, Sequential;
    ADD_OVF_UN => "add.ovf.un", None, Sequential;
    MUL_OVF => "mul.ovf", None, Sequential;
    MUL_OVF_UN => "mul.ovf.un", None, Sequential;
    SUB_OVF => "sub.ovf", None, Sequential;
    SUB_OVF_UN => "sub.ovf.un", None, Sequential;
    ENDFINALLY => "endfinally", None, EndFinally;
    LEAVE => "leave", Target32, Leave;
    LEAVE_S => "leave.s", Target8, Leave;
    STIND_I => "stind.i", None, Sequential;
    CONV_U => "conv.u", None, Sequential;
    ARGLIST => "arglist", None, Sequential;
    CEQ => "ceq", None, Sequential;
    CGT => "cgt", None, Sequential;
    CGT_UN => "cgt.un", None, Sequential;
    CLT => "clt", None, Sequential;
    CLT_UN => "clt.un", None, Sequential;
    LDFTN => "ldftn", Token, Sequential;
    LDVIRTFTN => "ldvirtftn", Token, Sequential;
    LDARG => "ldarg", UInt16, Sequential;
    LDARGA => "ldarga", UInt16, Sequential;
    STARG => "starg", UInt16, Sequential;
    LDLOC => "ldloc", UInt16, Sequential;
    LDLOCA => "ldloca", UInt16, Sequential;
    STLOC => "stloc", UInt16, Sequential;
    LOCALLOC => "localloc", None, Sequential;
    ENDFILTER => "endfilter", None, EndFinally;
    UNALIGNED => "unaligned.", UInt8, Sequential;
    VOLATILE => "volatile.", None, Sequential;
    TAIL => "tail.", None, Sequential;
    INITOBJ => "initobj", Token, Sequential;
    CONSTRAINED => "constrained.", Token, Sequential;
    CPBLK => "cpblk", None, Sequential;
    INITBLK => "initblk", None, Sequential;
    NO => "no.", UInt8, Sequential;
    RETHROW => "rethrow", None, Throw;
    SIZEOF => "sizeof", Token, Sequential;
    REFANYTYPE => "refanytype", None, Sequential;
    READONLY => "readonly.", None, Sequential;
}

fn by_value() -> &'static HashMap<OpCode, &'static OpCodeInfo> {
    static LOOKUP: OnceLock<HashMap<OpCode, &'static OpCodeInfo>> = OnceLock::new();
    LOOKUP.get_or_init(|| OPCODES.iter().map(|info| (info.opcode, info)).collect())
}

fn by_mnemonic() -> &'static HashMap<&'static str, OpCode> {
    static LOOKUP: OnceLock<HashMap<&'static str, OpCode>> = OnceLock::new();
    LOOKUP.get_or_init(|| {
        OPCODES
            .iter()
            .map(|info| (info.mnemonic, info.opcode))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn table_has_no_duplicates() {
        let values: HashSet<OpCode> = OPCODES.iter().map(|info| info.opcode).collect();
        let mnemonics: HashSet<&str> = OPCODES.iter().map(|info| info.mnemonic).collect();

        assert_eq!(values.len(), OPCODES.len());
        assert_eq!(mnemonics.len(), OPCODES.len());
    }

    #[test]
    fn byte_lookup() {
        assert_eq!(OpCode::from_bytes(0, 0x2A), Some(OpCode::RET));
        assert_eq!(OpCode::from_bytes(FE_PREFIX, 0x01), Some(OpCode::CEQ));
        assert_eq!(OpCode::from_bytes(0, 0x24), None);
        assert_eq!(OpCode::from_bytes(FE_PREFIX, 0x08), None);
    }

    #[test]
    fn mnemonic_lookup() {
        for info in OPCODES {
            assert_eq!(OpCode::from_mnemonic(info.mnemonic), Some(info.opcode));
        }
        assert_eq!(OpCode::from_mnemonic("ldc.i4.9"), None);
    }

    #[test]
    fn implicit_constants() {
        assert_eq!(OpCode::LDC_I4_M1.implicit_i4(), Some(-1));
        assert_eq!(OpCode::LDC_I4_0.implicit_i4(), Some(0));
        assert_eq!(OpCode::LDC_I4_8.implicit_i4(), Some(8));
        assert_eq!(OpCode::LDC_I4_S.implicit_i4(), None);
    }

    #[test]
    fn branch_classification() {
        assert!(OpCode::BR_S.is_branch());
        assert!(OpCode::LEAVE.is_branch());
        assert!(OpCode::SWITCH.is_branch());
        assert!(!OpCode::CALL.is_branch());
        assert_eq!(OpCode::BRTRUE.flow_type(), FlowType::ConditionalBranch);
    }
}
