//! Decoding of a managed PE image into a [`CilAssembly`].

use std::{collections::HashMap, ops::Range, sync::Arc};

use log::debug;

use crate::{
    assembly::decode_stream,
    metadata::{
        pe::{
            body::{self, RawClause},
            headers::Headers,
            index::OperandIndex,
            signature,
            tables::{id, TableStream},
            BodySpan, PeImage,
        },
        AssemblyRef, AssemblyVersion, CilAssembly, ExceptionHandler, ExceptionHandlerFlags,
        FieldAttributes, FieldDef, MethodAttributes, MethodBody, MethodDef, TableId, Token,
        TypeAttributes, TypeDef,
    },
    Error, Parser, Result,
};

/// `BSJB`
const METADATA_SIGNATURE: u32 = 0x424A_5342;
/// `CorILMethod` implementation code type mask; `0` is IL.
const CODE_TYPE_MASK: u32 = 0x3;
const MAX_STREAM_NAME: usize = 32;

/// Stream ranges of a metadata root, as file offsets.
#[derive(Default)]
struct Streams {
    tables: Option<Range<usize>>,
    strings: Range<usize>,
    user_strings: Range<usize>,
    blob: Range<usize>,
}

/// Decode the image in `data`.
pub(crate) fn read_image(data: Vec<u8>) -> Result<CilAssembly> {
    let headers = Headers::parse(&data)?;

    let mut offset = headers.rva_to_offset(headers.clr_rva)?;
    let cor20 = data.get(offset..).ok_or(Error::OutOfBounds)?;
    let mut parser = Parser::new(cor20);
    let _cb = parser.read_le::<u32>()?;
    let _runtime_major = parser.read_le::<u16>()?;
    let _runtime_minor = parser.read_le::<u16>()?;
    let metadata_rva = parser.read_le::<u32>()?;
    let metadata_size = parser.read_le::<u32>()? as usize;

    offset = headers.rva_to_offset(metadata_rva)?;
    let streams = read_streams(&data, offset, metadata_size)?;
    let Some(table_stream) = streams.tables.clone() else {
        return Err(malformed_error!("Metadata has no #~ stream"));
    };

    let tables = TableStream::parse(&data[table_stream.clone()])?;
    for table in [
        id::FIELD_PTR,
        id::METHOD_PTR,
        id::PARAM_PTR,
        id::EVENT_PTR,
        id::PROPERTY_PTR,
    ] {
        if tables.row_count(table) > 0 {
            return Err(malformed_error!("Indirection table 0x{:02x} is not supported", table));
        }
    }

    let mut image = PeImage {
        data,
        headers,
        table_stream,
        strings: streams.strings,
        user_strings: streams.user_strings,
        blob: streams.blob,
        tables,
        bodies: HashMap::new(),
        index: OperandIndex::default(),
    };
    image.index = OperandIndex::build(&image.tables, image.heaps())?;

    let mut assembly = read_identity(&image)?;
    for rid in 1..=image.tables.row_count(id::TYPE_DEF) {
        let ty = read_type(&mut image, rid)?;
        assembly.types.push(ty);
    }

    let mut uses = HashMap::new();
    for span in image.bodies.values() {
        *uses.entry(span.offset).or_insert(0usize) += 1;
    }
    for span in image.bodies.values_mut() {
        span.shared = uses.get(&span.offset).is_some_and(|&count| count > 1);
    }

    debug!(
        "Loaded {} with {} types and {} method bodies",
        assembly.name,
        assembly.types.len(),
        image.bodies.len()
    );
    assembly.origin = Some(Arc::new(image));
    Ok(assembly)
}

fn read_streams(data: &[u8], root: usize, size: usize) -> Result<Streams> {
    let metadata = root
        .checked_add(size)
        .and_then(|end| data.get(root..end))
        .ok_or(Error::OutOfBounds)?;
    let mut parser = Parser::new(metadata);

    if parser.read_le::<u32>()? != METADATA_SIGNATURE {
        return Err(malformed_error!("Invalid metadata root signature"));
    }
    let _major = parser.read_le::<u16>()?;
    let _minor = parser.read_le::<u16>()?;
    let _reserved = parser.read_le::<u32>()?;
    let version_length = parser.read_le::<u32>()? as usize;
    parser.read_bytes(version_length)?;
    let _flags = parser.read_le::<u16>()?;
    let count = parser.read_le::<u16>()?;

    let mut streams = Streams::default();
    for _ in 0..count {
        let offset = parser.read_le::<u32>()? as usize;
        let stream_size = parser.read_le::<u32>()? as usize;
        let mut name = Vec::new();
        loop {
            match parser.read_le::<u8>()? {
                0 => break,
                _ if name.len() == MAX_STREAM_NAME => {
                    return Err(malformed_error!("Unterminated stream name"));
                }
                byte => name.push(byte),
            }
        }
        parser.align(4)?;

        let range = offset
            .checked_add(stream_size)
            .filter(|&end| end <= size)
            .map(|end| root + offset..root + end)
            .ok_or_else(|| malformed_error!("Stream {} exceeds the metadata", String::from_utf8_lossy(&name)))?;

        match name.as_slice() {
            b"#~" => streams.tables = Some(range),
            b"#-" => return Err(malformed_error!("Uncompressed metadata tables are not supported")),
            b"#Strings" => streams.strings = range,
            b"#US" => streams.user_strings = range,
            b"#Blob" => streams.blob = range,
            _ => {}
        }
    }
    Ok(streams)
}

fn read_identity(image: &PeImage) -> Result<CilAssembly> {
    let heaps = image.heaps();
    let tables = &image.tables;

    let mut assembly = match tables.row(id::ASSEMBLY, 1) {
        Some(row) => CilAssembly::new(heaps.string(row[7])?, version(&row[1..5])),
        None => {
            let module = tables.get(id::MODULE, 1)?;
            CilAssembly::new(heaps.string(module[1])?, AssemblyVersion::new(0, 0, 0, 0))
        }
    };

    for rid in 1..=tables.row_count(id::ASSEMBLY_REF) {
        let row = tables.get(id::ASSEMBLY_REF, rid)?;
        assembly.refs.push(AssemblyRef {
            name: heaps.string(row[6])?.to_string(),
            version: version(&row[0..4]),
            public_key_token: heaps.blob(row[5])?.to_vec(),
        });
    }
    Ok(assembly)
}

fn version(cells: &[u32]) -> AssemblyVersion {
    AssemblyVersion::new(cells[0] as u16, cells[1] as u16, cells[2] as u16, cells[3] as u16)
}

fn read_type(image: &mut PeImage, rid: u32) -> Result<TypeDef> {
    let flags = TypeAttributes::from_bits_retain(image.tables.get(id::TYPE_DEF, rid)?[0]);
    let mut ty = TypeDef::new(image.index.type_def(rid)?.full_name.clone(), flags);
    ty.token = Some(Token::from_parts(TableId::TypeDef, rid));

    let (start, end) = image.tables.run(id::TYPE_DEF, rid, 4, id::FIELD)?;
    for field in start..end {
        let row = image.tables.get(id::FIELD, field)?;
        let member = image.index.field(field)?;
        let mut def = FieldDef::new(
            member.name.clone(),
            FieldAttributes::from_bits_retain(row[0] as u16),
            member.signature.clone(),
        );
        def.token = Some(Token::from_parts(TableId::Field, field));
        ty.fields.push(def);
    }

    let (start, end) = image.tables.run(id::TYPE_DEF, rid, 5, id::METHOD_DEF)?;
    for method in start..end {
        let row = image.tables.get(id::METHOD_DEF, method)?.to_vec();
        let member = image.index.method(method)?;
        let name = member.name.clone();
        let signature = member.signature.clone();

        let body = if row[0] != 0 && row[1] & CODE_TYPE_MASK == 0 {
            let (body, span) = read_body(image, row[0]).map_err(|error| match error {
                Error::Malformed { message, file, line } => Error::Malformed {
                    message: format!("{}::{name}: {message}", ty.full_name),
                    file,
                    line,
                },
                other => other,
            })?;
            image.bodies.insert(method, span);
            Some(body)
        } else {
            None
        };

        ty.methods.push(MethodDef {
            name,
            flags: MethodAttributes::from_bits_retain(row[2] as u16),
            impl_flags: row[1] as u16,
            signature,
            body,
            token: Some(Token::from_parts(TableId::MethodDef, method)),
        });
    }

    Ok(ty)
}

fn read_body(image: &PeImage, rva: u32) -> Result<(MethodBody, BodySpan)> {
    let offset = image.headers.rva_to_offset(rva)?;
    let raw = body::parse(image.data.get(offset..).ok_or(Error::OutOfBounds)?)?;
    let instructions = decode_stream(&mut Parser::new(raw.code), &image.index)?;

    let locals = if raw.local_sig == 0 {
        None
    } else {
        let token = Token::new(raw.local_sig);
        if token.table_id() != Some(TableId::StandAloneSig) {
            return Err(malformed_error!("Locals token {} is not a signature", token));
        }
        let blob = image.heaps().blob(image.tables.get(id::STAND_ALONE_SIG, token.row())?[0])?;
        Some(signature::locals(blob, &image.index)?)
    };

    let handlers = raw
        .clauses
        .iter()
        .map(|clause| read_handler(image, clause))
        .collect::<Result<Vec<_>>>()?;

    let code_size =
        u32::try_from(raw.code.len()).map_err(|_| malformed_error!("Method body too large"))?;
    let span = BodySpan {
        offset,
        size: raw.size,
        fat: raw.fat,
        local_sig: raw.local_sig,
        shared: false,
    };
    Ok((
        MethodBody::decoded(
            raw.max_stack,
            raw.init_locals,
            locals,
            instructions,
            handlers,
            code_size,
        ),
        span,
    ))
}

fn read_handler(image: &PeImage, clause: &RawClause) -> Result<ExceptionHandler> {
    let flags = ExceptionHandlerFlags::from_bits(clause.flags)
        .filter(|flags| flags.bits().count_ones() <= 1)
        .ok_or_else(|| malformed_error!("Invalid exception handler kind {}", clause.flags))?;

    let (class, filter_offset) = if flags.contains(ExceptionHandlerFlags::FILTER) {
        (None, clause.class_or_filter)
    } else if flags.is_empty() && clause.class_or_filter != 0 {
        let token = Token::new(clause.class_or_filter);
        (Some(image.index.type_of(token)?.clone()), 0)
    } else {
        (None, 0)
    };

    Ok(ExceptionHandler {
        flags,
        try_offset: clause.try_offset,
        try_length: clause.try_length,
        handler_offset: clause.handler_offset,
        handler_length: clause.handler_length,
        class,
        filter_offset,
    })
}
