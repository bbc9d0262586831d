//! Decoding of metadata images into a [`CilAssembly`].

use crate::{
    assembly::{decode_stream, OpCode, Operand, TokenResolver},
    metadata::{
        image::{MEMBER_KIND_FIELD, MEMBER_KIND_METHOD, IMAGE_MAGIC, IMAGE_MAJOR},
        AssemblyRef, AssemblyVersion, CilAssembly, ExceptionHandler, ExceptionHandlerFlags,
        FieldAttributes, FieldDef, MemberRef, MethodAttributes, MethodBody, MethodDef, TableId,
        Token, TypeAttributes, TypeDef, TypeRef,
    },
    file::io::read_le,
    Error, Parser, Result,
};

/// Reference tables that instruction tokens index into.
struct Tables {
    user_strings: Vec<String>,
    type_refs: Vec<TypeRef>,
    member_refs: Vec<(u8, MemberRef)>,
}

impl Tables {
    fn type_ref(&self, row: u32) -> Result<&TypeRef> {
        row_index(row)
            .and_then(|index| self.type_refs.get(index))
            .ok_or_else(|| malformed_error!("Type reference row {} does not exist", row))
    }
}

impl TokenResolver for Tables {
    fn resolve(&self, opcode: OpCode, token: Token) -> Result<Operand> {
        let row = token.row();
        match token.table_id() {
            Some(TableId::UserString) => row_index(row)
                .and_then(|index| self.user_strings.get(index))
                .map(|value| Operand::String(value.clone()))
                .ok_or_else(|| malformed_error!("{} uses missing user string {}", opcode, token)),
            Some(TableId::TypeRef) => Ok(Operand::Type(self.type_ref(row)?.clone())),
            Some(TableId::MemberRef) => {
                let Some((kind, member)) = row_index(row).and_then(|index| self.member_refs.get(index))
                else {
                    return Err(malformed_error!("{} uses missing member {}", opcode, token));
                };
                if *kind == MEMBER_KIND_FIELD {
                    Ok(Operand::Field(member.clone()))
                } else {
                    Ok(Operand::Method(member.clone()))
                }
            }
            Some(_) => Ok(Operand::Token(token)),
            None => Err(malformed_error!("{} uses invalid token {}", opcode, token)),
        }
    }
}

fn row_index(row: u32) -> Option<usize> {
    (row as usize).checked_sub(1)
}

/// Returns `true` if `data` starts with the image signature.
pub(crate) fn is_image(data: &[u8]) -> bool {
    matches!(read_le::<u32>(data), Ok(IMAGE_MAGIC))
}

/// Decode a complete image.
pub(crate) fn read_image(data: &[u8]) -> Result<CilAssembly> {
    if !is_image(data) {
        return Err(Error::NotSupported);
    }

    let mut parser = Parser::new(data);
    let _magic = parser.read_le::<u32>()?;
    let major = parser.read_le::<u16>()?;
    let _minor = parser.read_le::<u16>()?;
    if major != IMAGE_MAJOR {
        return Err(Error::NotSupported);
    }

    let name = parser.read_prefixed_string_utf8()?;
    let version = read_version(&mut parser)?;
    let mut assembly = CilAssembly::new(name, version);

    let ref_count = parser.read_count(10)?;
    for _ in 0..ref_count {
        assembly.refs.push(read_assembly_ref(&mut parser)?);
    }

    let tables = read_tables(&mut parser, &assembly.refs)?;

    let type_count = parser.read_count(7)?;
    for _ in 0..type_count {
        assembly.types.push(read_type(&mut parser, &tables)?);
    }

    if parser.has_more_data() {
        return Err(malformed_error!(
            "{} bytes of trailing data after the last type",
            parser.remaining()
        ));
    }

    Ok(assembly)
}

fn read_version(parser: &mut Parser) -> Result<AssemblyVersion> {
    Ok(AssemblyVersion::new(
        parser.read_le::<u16>()?,
        parser.read_le::<u16>()?,
        parser.read_le::<u16>()?,
        parser.read_le::<u16>()?,
    ))
}

fn read_assembly_ref(parser: &mut Parser) -> Result<AssemblyRef> {
    let name = parser.read_prefixed_string_utf8()?;
    let version = read_version(parser)?;
    let token_len = parser.read_count(1)?;
    let public_key_token = parser.read_bytes(token_len)?.to_vec();

    Ok(AssemblyRef {
        name,
        version,
        public_key_token,
    })
}

fn read_tables(parser: &mut Parser, refs: &[AssemblyRef]) -> Result<Tables> {
    let string_count = parser.read_count(1)?;
    let mut user_strings = Vec::with_capacity(string_count);
    for _ in 0..string_count {
        user_strings.push(parser.read_prefixed_string_utf8()?);
    }

    let type_ref_count = parser.read_count(2)?;
    let mut type_refs = Vec::with_capacity(type_ref_count);
    for _ in 0..type_ref_count {
        let scope = parser.read_compressed_uint()?;
        let full_name = parser.read_prefixed_string_utf8()?;

        let scope = match scope {
            0 => None,
            n => match refs.get(n as usize - 1) {
                Some(assembly_ref) => Some(assembly_ref.name.clone()),
                None => {
                    return Err(malformed_error!(
                        "Type reference {} is scoped to missing assembly reference {}",
                        full_name,
                        n
                    ))
                }
            },
        };
        type_refs.push(TypeRef { scope, full_name });
    }

    let member_ref_count = parser.read_count(4)?;
    let mut member_refs = Vec::with_capacity(member_ref_count);
    for _ in 0..member_ref_count {
        let kind = parser.read_le::<u8>()?;
        if kind != MEMBER_KIND_FIELD && kind != MEMBER_KIND_METHOD {
            return Err(malformed_error!("Invalid member reference kind {}", kind));
        }
        let parent_row = parser.read_compressed_uint()?;
        let name = parser.read_prefixed_string_utf8()?;
        let signature = parser.read_prefixed_string_utf8()?;

        let parent = row_index(parent_row)
            .and_then(|index| type_refs.get(index))
            .cloned()
            .ok_or_else(|| {
                malformed_error!("Member {} has missing parent type {}", name, parent_row)
            })?;
        member_refs.push((kind, MemberRef::new(parent, name, signature)));
    }

    Ok(Tables {
        user_strings,
        type_refs,
        member_refs,
    })
}

fn read_type(parser: &mut Parser, tables: &Tables) -> Result<TypeDef> {
    let full_name = parser.read_prefixed_string_utf8()?;
    let flags = TypeAttributes::from_bits_retain(parser.read_le::<u32>()?);
    let mut ty = TypeDef::new(full_name, flags);

    let field_count = parser.read_count(4)?;
    for _ in 0..field_count {
        let name = parser.read_prefixed_string_utf8()?;
        let flags = FieldAttributes::from_bits_retain(parser.read_le::<u16>()?);
        let field_type = parser.read_prefixed_string_utf8()?;
        ty.fields.push(FieldDef::new(name, flags, field_type));
    }

    let method_count = parser.read_count(7)?;
    for _ in 0..method_count {
        ty.methods.push(read_method(parser, tables)?);
    }

    Ok(ty)
}

fn read_method(parser: &mut Parser, tables: &Tables) -> Result<MethodDef> {
    let name = parser.read_prefixed_string_utf8()?;
    let flags = MethodAttributes::from_bits_retain(parser.read_le::<u16>()?);
    let impl_flags = parser.read_le::<u16>()?;
    let signature = parser.read_prefixed_string_utf8()?;

    let body = match parser.read_le::<u8>()? {
        0 => None,
        1 => Some(read_body(parser, tables).map_err(|error| match error {
            Error::Malformed { message, file, line } => Error::Malformed {
                message: format!("{name}: {message}"),
                file,
                line,
            },
            other => other,
        })?),
        other => return Err(malformed_error!("Invalid body marker {} for {}", other, name)),
    };

    Ok(MethodDef {
        name,
        flags,
        impl_flags,
        signature,
        body,
        token: None,
    })
}

fn read_body(parser: &mut Parser, tables: &Tables) -> Result<MethodBody> {
    let max_stack = parser.read_le::<u16>()?;
    let init_locals = parser.read_le::<u8>()? != 0;
    let locals = parser.read_prefixed_string_utf8()?;
    let locals = (!locals.is_empty()).then_some(locals);

    let code_size = parser.read_count(1)?;
    let code = parser.read_bytes(code_size)?;
    let instructions = decode_stream(&mut Parser::new(code), tables)?;

    let handler_count = parser.read_count(21)?;
    let mut handlers = Vec::with_capacity(handler_count);
    for _ in 0..handler_count {
        handlers.push(read_handler(parser, tables)?);
    }

    let code_size =
        u32::try_from(code_size).map_err(|_| malformed_error!("Method body too large"))?;
    Ok(MethodBody::decoded(
        max_stack,
        init_locals,
        locals,
        instructions,
        handlers,
        code_size,
    ))
}

fn read_handler(parser: &mut Parser, tables: &Tables) -> Result<ExceptionHandler> {
    let kind = parser.read_le::<u8>()?;
    let flags = ExceptionHandlerFlags::from_bits(u16::from(kind))
        .filter(|flags| flags.bits().count_ones() <= 1)
        .ok_or_else(|| malformed_error!("Invalid exception handler kind {}", kind))?;

    let try_offset = parser.read_le::<u32>()?;
    let try_length = parser.read_le::<u32>()?;
    let handler_offset = parser.read_le::<u32>()?;
    let handler_length = parser.read_le::<u32>()?;
    let class_or_filter = parser.read_le::<u32>()?;

    let (class, filter_offset) = if flags.contains(ExceptionHandlerFlags::FILTER) {
        (None, class_or_filter)
    } else if flags.is_empty() && class_or_filter != 0 {
        (Some(tables.type_ref(class_or_filter)?.clone()), 0)
    } else {
        (None, 0)
    };

    Ok(ExceptionHandler {
        flags,
        try_offset,
        try_length,
        handler_offset,
        handler_length,
        class,
        filter_offset,
    })
}
