//! Saving an assembly back into the PE image it was loaded from.
//!
//! The model is matched to the image row by row through the tokens it was loaded with.
//! Removed fields and assembly references become row deletions, flags and versions are
//! written into their cells, and every method body is re-encoded against the renumbered
//! tables. Anything that would need a new row or heap entry is refused.

use std::collections::HashSet;

use log::debug;

use crate::{
    assembly::{encode_stream, Layout, OpCode, Operand, TokenEncoder},
    metadata::{
        pe::{
            body::{self, RawBody, RawClause},
            index::OperandIndex,
            tables::{id, TableStream},
            BodySpan, PeImage,
        },
        CilAssembly, ExceptionHandler, ExceptionHandlerFlags, MethodBody, TableId, Token,
        TypeDef, TypeRef,
    },
    Error, Result,
};

/// Tokens of the saved image for the operands of re-encoded bodies.
struct PeEncoder<'a> {
    index: &'a OperandIndex,
    /// Removed rids per table, sorted
    removed: &'a [Vec<u32>],
    refs: HashSet<&'a str>,
}

impl PeEncoder<'_> {
    fn check_scope(&self, ty: &TypeRef) -> Result<()> {
        match &ty.scope {
            Some(scope) if !self.refs.contains(scope.as_str()) => Err(malformed_error!(
                "{} is still referenced but assembly reference {} was removed",
                ty,
                scope
            )),
            _ => Ok(()),
        }
    }

    /// The token of `token`'s row after the removals.
    fn remap(&self, token: Token) -> Result<Token> {
        if token.table_id() == Some(TableId::UserString) {
            return Ok(token);
        }
        let Some(gone) = self.removed.get(token.table() as usize) else {
            return Ok(token);
        };
        let rid = token.row();
        if gone.binary_search(&rid).is_ok() {
            return Err(malformed_error!("Token {} refers to a removed row", token));
        }
        let shift = gone.partition_point(|&removed| removed < rid) as u32;
        Ok(Token::new((u32::from(token.table()) << 24) | (rid - shift)))
    }

    fn type_token(&self, ty: &TypeRef) -> Result<Token> {
        self.check_scope(ty)?;
        let token = self
            .index
            .type_token(ty)
            .ok_or_else(|| malformed_error!("{} has no row in the image", ty))?;
        self.remap(token)
    }
}

impl TokenEncoder for PeEncoder<'_> {
    fn token_for(&mut self, opcode: OpCode, operand: &Operand) -> Result<Token> {
        let token = match operand {
            Operand::String(value) => self.index.string_token(value).ok_or_else(|| {
                malformed_error!("{} uses {:?}, which is not a user string of the image", opcode, value)
            })?,
            Operand::Type(ty) => return self.type_token(ty),
            Operand::Field(field) => {
                self.check_scope(&field.parent)?;
                self.index
                    .field_token(field)
                    .ok_or_else(|| malformed_error!("{} uses {}, which has no row in the image", opcode, field))?
            }
            Operand::Method(method) => {
                self.check_scope(&method.parent)?;
                self.index
                    .method_token(method)
                    .ok_or_else(|| malformed_error!("{} uses {}, which has no row in the image", opcode, method))?
            }
            Operand::Token(token) => *token,
            other => return Err(malformed_error!("{} cannot encode {:?} as a token", opcode, other)),
        };
        self.remap(token)
    }
}

/// Patch `image` with the current state of `assembly`.
pub(crate) fn write_image(assembly: &CilAssembly, image: &PeImage) -> Result<Vec<u8>> {
    let index = &image.index;
    let heaps = image.heaps();
    let mut tables = image.tables.clone();
    let mut requests = Vec::new();

    match image.tables.row(id::ASSEMBLY, 1) {
        Some(row) if heaps.string(row[7])? == assembly.name => {
            let version = assembly.version;
            for (column, value) in [version.major, version.minor, version.build, version.revision]
                .into_iter()
                .enumerate()
            {
                tables.set(id::ASSEMBLY, 1, column + 1, u32::from(value))?;
            }
        }
        Some(_) => return Err(malformed_error!("The assembly cannot be renamed")),
        None => {}
    }

    for (position, name) in index.assembly_refs().iter().enumerate() {
        let rid = position as u32 + 1;
        let Some(reference) = assembly.refs.iter().find(|r| &r.name == name) else {
            requests.push((id::ASSEMBLY_REF, rid));
            continue;
        };
        if heaps.blob(image.tables.get(id::ASSEMBLY_REF, rid)?[5])? != reference.public_key_token {
            return Err(malformed_error!("Public key of {} cannot be changed", name));
        }
        let version = reference.version;
        for (column, value) in [version.major, version.minor, version.build, version.revision]
            .into_iter()
            .enumerate()
        {
            tables.set(id::ASSEMBLY_REF, rid, column, u32::from(value))?;
        }
    }
    if let Some(added) = assembly
        .refs
        .iter()
        .find(|reference| !index.assembly_refs().contains(&reference.name))
    {
        return Err(malformed_error!("Assembly reference {} cannot be added", added.name));
    }

    if assembly.types.len() != image.tables.row_count(id::TYPE_DEF) as usize {
        return Err(malformed_error!("Types cannot be added or removed"));
    }
    let mut methods = Vec::new();
    for (position, ty) in assembly.types.iter().enumerate() {
        let rid = position as u32 + 1;
        match_type(image, &mut tables, &mut requests, ty, rid)?;

        let (start, end) = image.tables.run(id::TYPE_DEF, rid, 5, id::METHOD_DEF)?;
        for (method, method_rid) in ty.methods.iter().zip(start..end) {
            methods.push((ty, method, method_rid));
        }
    }

    let removed = tables.remove_rows(&requests)?;
    debug!(
        "Removing {} fields and {} assembly references",
        removed[id::FIELD as usize].len(),
        removed[id::ASSEMBLY_REF as usize].len()
    );

    let mut encoder = PeEncoder {
        index,
        removed: &removed,
        refs: assembly.refs.iter().map(|r| r.name.as_str()).collect(),
    };
    let mut out = image.data.clone();
    let mut overflow = Vec::new();
    let mut moved = Vec::new();

    for (ty, method, rid) in methods {
        let (body, span) = match (&method.body, image.bodies.get(&rid)) {
            (None, None) => continue,
            (Some(body), Some(span)) => (body, span),
            (Some(_), None) => {
                return Err(malformed_error!("{}::{} cannot gain a body", ty.full_name, method.name))
            }
            (None, Some(_)) => {
                return Err(malformed_error!("{}::{} cannot lose its body", ty.full_name, method.name))
            }
        };

        let bytes = encode_body(body, span, &mut encoder).map_err(|error| match error {
            Error::Malformed { message, file, line } => Error::Malformed {
                message: format!("{}::{}: {message}", ty.full_name, method.name),
                file,
                line,
            },
            other => other,
        })?;

        let slot = &mut out[span.offset..span.offset + span.size];
        if slot.get(..bytes.len()) == Some(bytes.as_slice()) {
            continue;
        }
        if !span.shared
            && bytes.len() <= span.size
            && (span.offset % 4 == 0 || body::is_tiny(&bytes))
        {
            slot[..bytes.len()].copy_from_slice(&bytes);
            slot[bytes.len()..].fill(0);
        } else {
            while overflow.len() % 4 != 0 {
                overflow.push(0);
            }
            moved.push((rid, overflow.len() as u32));
            overflow.extend_from_slice(&bytes);
        }
    }

    if !overflow.is_empty() {
        let mut headers = image.headers.clone();
        let rva = headers.add_section(&mut out, &overflow)?;
        for &(rid, offset) in &moved {
            let body_rva = rva.checked_add(offset).ok_or(Error::OutOfBounds)?;
            tables.set(id::METHOD_DEF, rid, 0, body_rva)?;
        }
        debug!("Moved {} method bodies to a new section at 0x{:08x}", moved.len(), rva);
    }

    let stream = tables.to_bytes()?;
    let range = image.table_stream.clone();
    if stream.len() > range.len() {
        return Err(malformed_error!(
            "Metadata tables grew from {} to {} bytes",
            range.len(),
            stream.len()
        ));
    }
    let slot = &mut out[range];
    slot[..stream.len()].copy_from_slice(&stream);
    slot[stream.len()..].fill(0);

    image.headers.update_checksum(&mut out)?;
    Ok(out)
}

/// Check `ty` against `TypeDef` row `rid` and record its flag and field changes.
fn match_type(
    image: &PeImage,
    tables: &mut TableStream,
    requests: &mut Vec<(u8, u32)>,
    ty: &TypeDef,
    rid: u32,
) -> Result<()> {
    let index = &image.index;
    if ty.token != Some(Token::from_parts(TableId::TypeDef, rid))
        || ty.full_name != index.type_def(rid)?.full_name
    {
        return Err(malformed_error!("Type {} was added, moved or renamed", ty.full_name));
    }
    tables.set(id::TYPE_DEF, rid, 0, ty.flags.bits())?;

    let (start, end) = image.tables.run(id::TYPE_DEF, rid, 4, id::FIELD)?;
    let mut kept = HashSet::new();
    for field in &ty.fields {
        let field_rid = field
            .token
            .filter(|token| token.table_id() == Some(TableId::Field))
            .map(|token| token.row())
            .filter(|field_rid| (start..end).contains(field_rid))
            .ok_or_else(|| malformed_error!("Field {}::{} cannot be added", ty.full_name, field.name))?;
        let original = index.field(field_rid)?;
        if original.name != field.name || original.signature != field.field_type {
            return Err(malformed_error!(
                "Field {}::{} cannot be renamed or retyped",
                ty.full_name,
                original.name
            ));
        }
        tables.set(id::FIELD, field_rid, 0, u32::from(field.flags.bits()))?;
        kept.insert(field_rid);
    }
    requests.extend(
        (start..end)
            .filter(|field_rid| !kept.contains(field_rid))
            .map(|field_rid| (id::FIELD, field_rid)),
    );

    let (start, end) = image.tables.run(id::TYPE_DEF, rid, 5, id::METHOD_DEF)?;
    if ty.methods.len() != (end - start) as usize {
        return Err(malformed_error!("Methods of {} cannot be added or removed", ty.full_name));
    }
    for (method, method_rid) in ty.methods.iter().zip(start..end) {
        let original = index.method(method_rid)?;
        if method.token != Some(Token::from_parts(TableId::MethodDef, method_rid))
            || original.name != method.name
            || original.signature != method.signature
        {
            return Err(malformed_error!(
                "Method {}::{} was added, moved or renamed",
                ty.full_name,
                method.name
            ));
        }
        tables.set(id::METHOD_DEF, method_rid, 1, u32::from(method.impl_flags))?;
        tables.set(id::METHOD_DEF, method_rid, 2, u32::from(method.flags.bits()))?;
    }
    Ok(())
}

fn encode_body(body: &MethodBody, span: &BodySpan, encoder: &mut PeEncoder) -> Result<Vec<u8>> {
    let instructions = body.instructions();
    let layout = Layout::compute(instructions, body.original_code_size())?;
    let code = encode_stream(instructions, &layout, encoder)?;

    let clauses = body
        .handlers
        .iter()
        .map(|handler| encode_clause(handler, &layout, encoder))
        .collect::<Result<Vec<_>>>()?;

    let local_sig = match (&body.locals, span.local_sig) {
        (None, _) => 0,
        (Some(_), 0) => return Err(malformed_error!("Local variables cannot be added")),
        (Some(_), local_sig) => local_sig,
    };

    body::encode(
        &RawBody {
            max_stack: body.max_stack,
            init_locals: body.init_locals,
            local_sig,
            code: &code,
            clauses,
            fat: span.fat,
            size: 0,
        },
        !span.fat,
    )
}

fn encode_clause(handler: &ExceptionHandler, layout: &Layout, encoder: &PeEncoder) -> Result<RawClause> {
    let (try_offset, try_length) = layout.region(handler.try_offset, handler.try_length)?;
    let (handler_offset, handler_length) =
        layout.region(handler.handler_offset, handler.handler_length)?;

    let class_or_filter = if handler.flags.contains(ExceptionHandlerFlags::FILTER) {
        layout.resolve(handler.filter_offset).ok_or_else(|| {
            malformed_error!("Filter block at IL_{:04x} was removed", handler.filter_offset)
        })?
    } else if let Some(class) = &handler.class {
        encoder.type_token(class)?.value()
    } else {
        0
    };

    Ok(RawClause {
        flags: handler.flags.bits(),
        try_offset,
        try_length,
        handler_offset,
        handler_length,
        class_or_filter,
    })
}
