//! Encoding of a [`CilAssembly`] into a metadata image.
//!
//! Method bodies are encoded first, into a separate buffer, because the reference tables
//! that precede them in the image are only known once every remaining operand has been
//! interned. References that no instruction uses anymore simply never make it into the
//! tables.

use std::collections::HashMap;

use crate::{
    assembly::{encode_stream, Layout, OpCode, Operand, TokenEncoder},
    file::io::{write_count, write_le, write_prefixed_string},
    metadata::{
        image::{MEMBER_KIND_FIELD, MEMBER_KIND_METHOD, IMAGE_MAGIC, IMAGE_MAJOR, IMAGE_MINOR},
        AssemblyRef, AssemblyVersion, CilAssembly, ExceptionHandler, ExceptionHandlerFlags,
        MemberRef, MethodBody, MethodDef, TableId, Token, TypeDef, TypeRef,
    },
    Result,
};

/// Reference tables collected while encoding method bodies.
struct TableBuilder<'a> {
    refs: &'a [AssemblyRef],
    user_strings: Vec<String>,
    string_rows: HashMap<String, u32>,
    type_refs: Vec<TypeRef>,
    type_rows: HashMap<TypeRef, u32>,
    member_refs: Vec<(u8, MemberRef)>,
    member_rows: HashMap<(u8, MemberRef), u32>,
}

impl<'a> TableBuilder<'a> {
    fn new(refs: &'a [AssemblyRef]) -> Self {
        TableBuilder {
            refs,
            user_strings: Vec::new(),
            string_rows: HashMap::new(),
            type_refs: Vec::new(),
            type_rows: HashMap::new(),
            member_refs: Vec::new(),
            member_rows: HashMap::new(),
        }
    }

    fn string_row(&mut self, value: &str) -> Result<u32> {
        if let Some(row) = self.string_rows.get(value) {
            return Ok(*row);
        }
        let row = next_row(self.user_strings.len())?;
        self.user_strings.push(value.to_string());
        self.string_rows.insert(value.to_string(), row);
        Ok(row)
    }

    fn type_row(&mut self, type_ref: &TypeRef) -> Result<u32> {
        if let Some(row) = self.type_rows.get(type_ref) {
            return Ok(*row);
        }
        if let Some(scope) = &type_ref.scope {
            if !self.refs.iter().any(|r| &r.name == scope) {
                return Err(malformed_error!(
                    "{} is still referenced but assembly reference {} was removed",
                    type_ref,
                    scope
                ));
            }
        }
        let row = next_row(self.type_refs.len())?;
        self.type_refs.push(type_ref.clone());
        self.type_rows.insert(type_ref.clone(), row);
        Ok(row)
    }

    fn member_row(&mut self, kind: u8, member: &MemberRef) -> Result<u32> {
        let key = (kind, member.clone());
        if let Some(row) = self.member_rows.get(&key) {
            return Ok(*row);
        }
        self.type_row(&member.parent)?;
        let row = next_row(self.member_refs.len())?;
        self.member_refs.push(key.clone());
        self.member_rows.insert(key, row);
        Ok(row)
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        write_count(out, self.user_strings.len())?;
        for value in &self.user_strings {
            write_prefixed_string(out, value)?;
        }

        write_count(out, self.type_refs.len())?;
        for type_ref in &self.type_refs {
            let scope = match &type_ref.scope {
                None => 0,
                Some(scope) => self
                    .refs
                    .iter()
                    .position(|r| &r.name == scope)
                    .map_or(0, |index| index + 1),
            };
            write_count(out, scope)?;
            write_prefixed_string(out, &type_ref.full_name)?;
        }

        write_count(out, self.member_refs.len())?;
        for (kind, member) in &self.member_refs {
            let parent = self.type_rows.get(&member.parent).copied().ok_or_else(|| {
                malformed_error!("Parent of {} was not interned", member)
            })?;
            write_le(out, *kind);
            write_count(out, parent as usize)?;
            write_prefixed_string(out, &member.name)?;
            write_prefixed_string(out, &member.signature)?;
        }

        Ok(())
    }
}

impl TokenEncoder for TableBuilder<'_> {
    fn token_for(&mut self, opcode: OpCode, operand: &Operand) -> Result<Token> {
        match operand {
            Operand::String(value) => Ok(Token::from_parts(
                TableId::UserString,
                self.string_row(value)?,
            )),
            Operand::Type(type_ref) => Ok(Token::from_parts(
                TableId::TypeRef,
                self.type_row(type_ref)?,
            )),
            Operand::Field(member) => Ok(Token::from_parts(
                TableId::MemberRef,
                self.member_row(MEMBER_KIND_FIELD, member)?,
            )),
            Operand::Method(member) => Ok(Token::from_parts(
                TableId::MemberRef,
                self.member_row(MEMBER_KIND_METHOD, member)?,
            )),
            Operand::Token(token) => Ok(*token),
            other => Err(malformed_error!("{} cannot encode {:?} as a token", opcode, other)),
        }
    }
}

fn next_row(len: usize) -> Result<u32> {
    u32::try_from(len + 1)
        .ok()
        .filter(|row| *row <= 0x00FF_FFFF)
        .ok_or_else(|| malformed_error!("Too many rows in reference table"))
}

/// Encode `assembly` into a complete image.
pub(crate) fn write_image(assembly: &CilAssembly) -> Result<Vec<u8>> {
    let mut tables = TableBuilder::new(&assembly.refs);

    let mut types = Vec::new();
    write_count(&mut types, assembly.types.len())?;
    for ty in &assembly.types {
        write_type(&mut types, ty, &mut tables)?;
    }

    let mut out = Vec::with_capacity(types.len() + 256);
    write_le(&mut out, IMAGE_MAGIC);
    write_le(&mut out, IMAGE_MAJOR);
    write_le(&mut out, IMAGE_MINOR);
    write_prefixed_string(&mut out, &assembly.name)?;
    write_version(&mut out, assembly.version);

    write_count(&mut out, assembly.refs.len())?;
    for assembly_ref in &assembly.refs {
        write_prefixed_string(&mut out, &assembly_ref.name)?;
        write_version(&mut out, assembly_ref.version);
        write_count(&mut out, assembly_ref.public_key_token.len())?;
        out.extend_from_slice(&assembly_ref.public_key_token);
    }

    tables.write(&mut out)?;
    out.extend_from_slice(&types);
    Ok(out)
}

fn write_version(out: &mut Vec<u8>, version: AssemblyVersion) {
    write_le(out, version.major);
    write_le(out, version.minor);
    write_le(out, version.build);
    write_le(out, version.revision);
}

fn write_type(out: &mut Vec<u8>, ty: &TypeDef, tables: &mut TableBuilder) -> Result<()> {
    write_prefixed_string(out, &ty.full_name)?;
    write_le(out, ty.flags.bits());

    write_count(out, ty.fields.len())?;
    for field in &ty.fields {
        write_prefixed_string(out, &field.name)?;
        write_le(out, field.flags.bits());
        write_prefixed_string(out, &field.field_type)?;
    }

    write_count(out, ty.methods.len())?;
    for method in &ty.methods {
        write_method(out, method, tables).map_err(|error| match error {
            crate::Error::Malformed {
                message,
                file,
                line,
            } => crate::Error::Malformed {
                message: format!("{}::{}: {message}", ty.full_name, method.name),
                file,
                line,
            },
            other => other,
        })?;
    }

    Ok(())
}

fn write_method(out: &mut Vec<u8>, method: &MethodDef, tables: &mut TableBuilder) -> Result<()> {
    write_prefixed_string(out, &method.name)?;
    write_le(out, method.flags.bits());
    write_le(out, method.impl_flags);
    write_prefixed_string(out, &method.signature)?;

    match &method.body {
        None => write_le(out, 0u8),
        Some(body) => {
            write_le(out, 1u8);
            write_body(out, body, tables)?;
        }
    }
    Ok(())
}

fn write_body(out: &mut Vec<u8>, body: &MethodBody, tables: &mut TableBuilder) -> Result<()> {
    let instructions = body.instructions();
    let layout = Layout::compute(instructions, body.original_code_size())?;
    let code = encode_stream(instructions, &layout, tables)?;

    write_le(out, body.max_stack);
    write_le(out, u8::from(body.init_locals));
    write_prefixed_string(out, body.locals.as_deref().unwrap_or_default())?;
    write_count(out, code.len())?;
    out.extend_from_slice(&code);

    write_count(out, body.handlers.len())?;
    for handler in &body.handlers {
        write_handler(out, handler, &layout, tables)?;
    }
    Ok(())
}

fn write_handler(
    out: &mut Vec<u8>,
    handler: &ExceptionHandler,
    layout: &Layout,
    tables: &mut TableBuilder,
) -> Result<()> {
    let (try_offset, try_length) = layout.region(handler.try_offset, handler.try_length)?;
    let (handler_offset, handler_length) =
        layout.region(handler.handler_offset, handler.handler_length)?;

    let class_or_filter = if handler.flags.contains(ExceptionHandlerFlags::FILTER) {
        layout.resolve(handler.filter_offset).ok_or_else(|| {
            malformed_error!("Filter block at IL_{:04x} was removed", handler.filter_offset)
        })?
    } else if let Some(class) = &handler.class {
        tables.type_row(class)?
    } else {
        0
    };

    write_le(out, handler.flags.bits() as u8);
    write_le(out, try_offset);
    write_le(out, try_length);
    write_le(out, handler_offset);
    write_le(out, handler_length);
    write_le(out, class_or_filter);
    Ok(())
}
