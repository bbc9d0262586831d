//! Rendering of `#Blob` signatures (ECMA-335 II.23.2) into the textual form used by the model,
//! e.g. `void(string[])`, `bool(string, int32&)` or `valuetype Celeste.Stat`.

use crate::{Parser, Result};

const ELEMENT_TYPE_VOID: u8 = 0x01;
const ELEMENT_TYPE_PTR: u8 = 0x0F;
const ELEMENT_TYPE_BYREF: u8 = 0x10;
const ELEMENT_TYPE_VALUETYPE: u8 = 0x11;
const ELEMENT_TYPE_CLASS: u8 = 0x12;
const ELEMENT_TYPE_VAR: u8 = 0x13;
const ELEMENT_TYPE_ARRAY: u8 = 0x14;
const ELEMENT_TYPE_GENERICINST: u8 = 0x15;
const ELEMENT_TYPE_TYPEDBYREF: u8 = 0x16;
const ELEMENT_TYPE_I: u8 = 0x18;
const ELEMENT_TYPE_U: u8 = 0x19;
const ELEMENT_TYPE_FNPTR: u8 = 0x1B;
const ELEMENT_TYPE_OBJECT: u8 = 0x1C;
const ELEMENT_TYPE_SZARRAY: u8 = 0x1D;
const ELEMENT_TYPE_MVAR: u8 = 0x1E;
const ELEMENT_TYPE_CMOD_REQD: u8 = 0x1F;
const ELEMENT_TYPE_CMOD_OPT: u8 = 0x20;
const ELEMENT_TYPE_SENTINEL: u8 = 0x41;
const ELEMENT_TYPE_PINNED: u8 = 0x45;

const SIGNATURE_FIELD: u8 = 0x06;
const SIGNATURE_LOCALS: u8 = 0x07;
const SIGNATURE_GENERIC: u8 = 0x10;

/// Type specs may nest other type specs; deeper chains are treated as corrupt.
const MAX_DEPTH: usize = 16;
/// Deepest element type nesting within one signature, e.g. `int32[]*&`.
const MAX_NESTING: usize = 64;

/// Names the `TypeDef`, `TypeRef` and `TypeSpec` rows signatures refer to.
pub(crate) trait TypeNames {
    /// Display name of row `rid` of `table`; `depth` counts the type specs being rendered.
    fn type_name(&self, table: u8, rid: u32, depth: usize) -> Result<String>;
}

struct SignatureParser<'a, 'n> {
    parser: Parser<'a>,
    names: &'n dyn TypeNames,
    depth: usize,
    nesting: usize,
}

impl<'a, 'n> SignatureParser<'a, 'n> {
    fn new(blob: &'a [u8], names: &'n dyn TypeNames, depth: usize) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(malformed_error!("Type specs nest deeper than {}", MAX_DEPTH));
        }
        Ok(SignatureParser {
            parser: Parser::new(blob),
            names,
            depth,
            nesting: 0,
        })
    }

    fn byte(&mut self) -> Result<u8> {
        self.parser.read_le::<u8>()
    }

    fn peek(&self) -> Option<u8> {
        self.parser.peek_byte().ok()
    }

    fn type_def_or_ref(&mut self) -> Result<String> {
        let coded = self.parser.read_compressed_uint()?;
        let table = match coded & 0x3 {
            0 => super::tables::id::TYPE_DEF,
            1 => super::tables::id::TYPE_REF,
            2 => super::tables::id::TYPE_SPEC,
            _ => return Err(malformed_error!("Invalid TypeDefOrRef encoding 0x{:x}", coded)),
        };
        self.names.type_name(table, coded >> 2, self.depth)
    }

    fn modifiers(&mut self) -> Result<String> {
        let mut suffix = String::new();
        while let Some(marker @ (ELEMENT_TYPE_CMOD_REQD | ELEMENT_TYPE_CMOD_OPT)) = self.peek() {
            self.byte()?;
            let modifier = self.type_def_or_ref()?;
            let keyword = if marker == ELEMENT_TYPE_CMOD_REQD {
                "modreq"
            } else {
                "modopt"
            };
            suffix.push_str(&format!(" {keyword}({modifier})"));
        }
        Ok(suffix)
    }

    fn ty(&mut self) -> Result<String> {
        if self.nesting == MAX_NESTING {
            return Err(malformed_error!("Signature nests deeper than {}", MAX_NESTING));
        }
        self.nesting += 1;
        let rendered = self.element();
        self.nesting -= 1;
        rendered
    }

    fn element(&mut self) -> Result<String> {
        let suffix = self.modifiers()?;
        let element = self.byte()?;
        let rendered = match element {
            ELEMENT_TYPE_VOID..=0x0E | ELEMENT_TYPE_TYPEDBYREF | ELEMENT_TYPE_I | ELEMENT_TYPE_U
            | ELEMENT_TYPE_OBJECT => primitive(element).to_string(),
            ELEMENT_TYPE_PTR => format!("{}*", self.ty()?),
            ELEMENT_TYPE_BYREF => format!("{}&", self.ty()?),
            ELEMENT_TYPE_PINNED => format!("{} pinned", self.ty()?),
            ELEMENT_TYPE_VALUETYPE => format!("valuetype {}", self.type_def_or_ref()?),
            ELEMENT_TYPE_CLASS => format!("class {}", self.type_def_or_ref()?),
            ELEMENT_TYPE_VAR => format!("!{}", self.parser.read_compressed_uint()?),
            ELEMENT_TYPE_MVAR => format!("!!{}", self.parser.read_compressed_uint()?),
            ELEMENT_TYPE_SZARRAY => format!("{}[]", self.ty()?),
            ELEMENT_TYPE_ARRAY => {
                let element_type = self.ty()?;
                let rank = self.parser.read_compressed_uint()?;
                for _ in 0..self.parser.read_count(1)? {
                    self.parser.read_compressed_uint()?;
                }
                for _ in 0..self.parser.read_count(1)? {
                    self.parser.read_compressed_uint()?;
                }
                let commas = ",".repeat(rank.saturating_sub(1).min(31) as usize);
                format!("{element_type}[{commas}]")
            }
            ELEMENT_TYPE_GENERICINST => {
                let generic = self.ty()?;
                let count = self.parser.read_count(1)?;
                let mut arguments = Vec::with_capacity(count);
                for _ in 0..count {
                    arguments.push(self.ty()?);
                }
                format!("{generic}<{}>", arguments.join(", "))
            }
            ELEMENT_TYPE_FNPTR => format!("method {}", self.method_tail(true)?),
            other => return Err(malformed_error!("Invalid element type 0x{:02x}", other)),
        };
        Ok(rendered + &suffix)
    }

    /// Everything after the calling convention byte of a method signature.
    fn method_tail(&mut self, pointer: bool) -> Result<String> {
        let convention = self.byte()?;
        if convention & SIGNATURE_GENERIC != 0 {
            self.parser.read_compressed_uint()?;
        }
        let count = self.parser.read_count(1)?;
        let return_type = self.ty()?;

        let mut parameters = Vec::with_capacity(count);
        for _ in 0..count {
            if self.peek() == Some(ELEMENT_TYPE_SENTINEL) {
                self.byte()?;
                parameters.push("...".to_string());
            }
            parameters.push(self.ty()?);
        }

        let star = if pointer { " *" } else { "" };
        Ok(format!("{return_type}{star}({})", parameters.join(", ")))
    }
}

fn primitive(element: u8) -> &'static str {
    match element {
        0x01 => "void",
        0x02 => "bool",
        0x03 => "char",
        0x04 => "int8",
        0x05 => "uint8",
        0x06 => "int16",
        0x07 => "uint16",
        0x08 => "int32",
        0x09 => "uint32",
        0x0A => "int64",
        0x0B => "uint64",
        0x0C => "float32",
        0x0D => "float64",
        0x0E => "string",
        ELEMENT_TYPE_TYPEDBYREF => "typedref",
        ELEMENT_TYPE_I => "native int",
        ELEMENT_TYPE_U => "native uint",
        _ => "object",
    }
}

/// Render a `MethodDefSig` or `MethodRefSig`, e.g. `int32(string, bool&)`.
pub(crate) fn method(blob: &[u8], names: &dyn TypeNames) -> Result<String> {
    SignatureParser::new(blob, names, 0)?.method_tail(false)
}

/// Render a `FieldSig` as the field type.
pub(crate) fn field(blob: &[u8], names: &dyn TypeNames) -> Result<String> {
    let mut signature = SignatureParser::new(blob, names, 0)?;
    if signature.byte()? != SIGNATURE_FIELD {
        return Err(malformed_error!("Field signature does not start with 0x06"));
    }
    signature.ty()
}

/// Render a `MemberRef` signature; returns `true` with the text for field references.
pub(crate) fn member(blob: &[u8], names: &dyn TypeNames) -> Result<(bool, String)> {
    if blob.first() == Some(&SIGNATURE_FIELD) {
        Ok((true, field(blob, names)?))
    } else {
        Ok((false, method(blob, names)?))
    }
}

/// Render a `LocalVarSig` as a comma separated type list.
pub(crate) fn locals(blob: &[u8], names: &dyn TypeNames) -> Result<String> {
    let mut signature = SignatureParser::new(blob, names, 0)?;
    if signature.byte()? != SIGNATURE_LOCALS {
        return Err(malformed_error!("Local signature does not start with 0x07"));
    }
    let count = signature.parser.read_count(1)?;
    let mut types = Vec::with_capacity(count);
    for _ in 0..count {
        types.push(signature.ty()?);
    }
    Ok(types.join(", "))
}

/// Render a `TypeSpec` blob nested `depth` type specs deep.
pub(crate) fn type_spec(blob: &[u8], names: &dyn TypeNames, depth: usize) -> Result<String> {
    SignatureParser::new(blob, names, depth + 1)?.ty()
}
