//! Method body headers and exception handling sections (ECMA-335 II.25.4).
//!
//! A body starts with a tiny (1 byte) or fat (12 bytes, 4-byte aligned) header, followed
//! by the IL. Fat bodies may be followed by 4-byte aligned data sections; the only kind in
//! use holds the exception handling clauses, in a small or a fat layout.

use crate::{file::io::write_le, Parser, Result};

const TINY_FORMAT: u8 = 0x2;
const FAT_FORMAT: u8 = 0x3;
const FLAG_MORE_SECTS: u16 = 0x8;
const FLAG_INIT_LOCALS: u16 = 0x10;
const FAT_HEADER_DWORDS: u16 = 3;

const SECTION_EH_TABLE: u8 = 0x1;
const SECTION_FAT_FORMAT: u8 = 0x40;
const SECTION_MORE_SECTS: u8 = 0x80;

const SMALL_CLAUSE_SIZE: usize = 12;
const FAT_CLAUSE_SIZE: usize = 24;

/// Largest code size a tiny header can describe.
const TINY_MAX_CODE: usize = 63;
/// Evaluation stack depth implied by a tiny header.
const TINY_MAX_STACK: u16 = 8;

/// One exception handling clause with raw offsets and class token or filter offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawClause {
    pub flags: u16,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
    pub class_or_filter: u32,
}

impl RawClause {
    fn is_small(&self) -> bool {
        self.try_offset <= 0xFFFF
            && self.try_length <= 0xFF
            && self.handler_offset <= 0xFFFF
            && self.handler_length <= 0xFF
    }
}

/// A method body as stored in the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawBody<'a> {
    pub max_stack: u16,
    pub init_locals: bool,
    /// `StandAloneSig` token of the locals, `0` for none
    pub local_sig: u32,
    pub code: &'a [u8],
    pub clauses: Vec<RawClause>,
    /// Whether the header was fat
    pub fat: bool,
    /// Bytes from the header to the end of the last data section
    pub size: usize,
}

/// Parse the body at the start of `data`.
pub(crate) fn parse(data: &[u8]) -> Result<RawBody<'_>> {
    let mut parser = Parser::new(data);
    let first = parser.peek_byte()?;

    match first & 0x3 {
        TINY_FORMAT => {
            parser.read_le::<u8>()?;
            let code = parser.read_bytes(usize::from(first >> 2))?;
            Ok(RawBody {
                max_stack: TINY_MAX_STACK,
                init_locals: false,
                local_sig: 0,
                code,
                clauses: Vec::new(),
                fat: false,
                size: parser.pos(),
            })
        }
        FAT_FORMAT => {
            let flags_and_size = parser.read_le::<u16>()?;
            let header_size = usize::from(flags_and_size >> 12) * 4;
            let flags = flags_and_size & 0x0FFF;
            let max_stack = parser.read_le::<u16>()?;
            let code_size = parser.read_le::<u32>()? as usize;
            let local_sig = parser.read_le::<u32>()?;

            if header_size < 12 {
                return Err(malformed_error!("Fat method header of {} bytes", header_size));
            }
            parser.seek(header_size)?;
            let code = parser.read_bytes(code_size)?;

            let mut clauses = Vec::new();
            if flags & FLAG_MORE_SECTS != 0 {
                read_sections(&mut parser, &mut clauses)?;
            }

            Ok(RawBody {
                max_stack,
                init_locals: flags & FLAG_INIT_LOCALS != 0,
                local_sig,
                code,
                clauses,
                fat: true,
                size: parser.pos(),
            })
        }
        _ => Err(malformed_error!("Invalid method header byte 0x{:02x}", first)),
    }
}

fn read_sections(parser: &mut Parser, clauses: &mut Vec<RawClause>) -> Result<()> {
    loop {
        parser.align(4)?;
        let start = parser.pos();
        let kind = parser.read_le::<u8>()?;

        let data_size = if kind & SECTION_FAT_FORMAT != 0 {
            let low = u32::from(parser.read_le::<u16>()?);
            let high = u32::from(parser.read_le::<u8>()?);
            (high << 16 | low) as usize
        } else {
            let size = usize::from(parser.read_le::<u8>()?);
            parser.read_le::<u16>()?;
            size
        };
        if data_size < 4 {
            return Err(malformed_error!("Method data section of {} bytes", data_size));
        }

        if kind & SECTION_EH_TABLE != 0 {
            if kind & SECTION_FAT_FORMAT != 0 {
                for _ in 0..(data_size - 4) / FAT_CLAUSE_SIZE {
                    clauses.push(RawClause {
                        flags: parser.read_le::<u32>()? as u16,
                        try_offset: parser.read_le::<u32>()?,
                        try_length: parser.read_le::<u32>()?,
                        handler_offset: parser.read_le::<u32>()?,
                        handler_length: parser.read_le::<u32>()?,
                        class_or_filter: parser.read_le::<u32>()?,
                    });
                }
            } else {
                for _ in 0..(data_size - 4) / SMALL_CLAUSE_SIZE {
                    clauses.push(RawClause {
                        flags: parser.read_le::<u16>()?,
                        try_offset: u32::from(parser.read_le::<u16>()?),
                        try_length: u32::from(parser.read_le::<u8>()?),
                        handler_offset: u32::from(parser.read_le::<u16>()?),
                        handler_length: u32::from(parser.read_le::<u8>()?),
                        class_or_filter: parser.read_le::<u32>()?,
                    });
                }
            }
        }

        parser.seek(start + data_size)?;
        if kind & SECTION_MORE_SECTS == 0 {
            return Ok(());
        }
    }
}

/// Returns `true` if the encoded body starts with a tiny header.
pub(crate) fn is_tiny(encoded: &[u8]) -> bool {
    encoded.first().is_some_and(|&first| first & 0x3 == TINY_FORMAT)
}

/// Encode a body. A tiny header is used when `allow_tiny` is set and nothing requires a
/// fat one.
pub(crate) fn encode(body: &RawBody, allow_tiny: bool) -> Result<Vec<u8>> {
    let tiny = allow_tiny
        && body.code.len() <= TINY_MAX_CODE
        && body.max_stack <= TINY_MAX_STACK
        && body.local_sig == 0
        && !body.init_locals
        && body.clauses.is_empty();

    let mut out = Vec::with_capacity(body.code.len() + 12);
    if tiny {
        out.push(((body.code.len() as u8) << 2) | TINY_FORMAT);
        out.extend_from_slice(body.code);
        return Ok(out);
    }

    let code_size = u32::try_from(body.code.len())
        .map_err(|_| malformed_error!("Method body of {} bytes", body.code.len()))?;
    let mut flags = u16::from(FAT_FORMAT) | (FAT_HEADER_DWORDS << 12);
    if body.init_locals {
        flags |= FLAG_INIT_LOCALS;
    }
    if !body.clauses.is_empty() {
        flags |= FLAG_MORE_SECTS;
    }

    write_le(&mut out, flags);
    write_le(&mut out, body.max_stack);
    write_le(&mut out, code_size);
    write_le(&mut out, body.local_sig);
    out.extend_from_slice(body.code);

    if !body.clauses.is_empty() {
        while out.len() % 4 != 0 {
            out.push(0);
        }
        write_clauses(&mut out, &body.clauses)?;
    }
    Ok(out)
}

fn write_clauses(out: &mut Vec<u8>, clauses: &[RawClause]) -> Result<()> {
    let small_size = 4 + clauses.len() * SMALL_CLAUSE_SIZE;
    if small_size <= 0xFF && clauses.iter().all(RawClause::is_small) {
        out.push(SECTION_EH_TABLE);
        out.push(small_size as u8);
        write_le(out, 0u16);
        for clause in clauses {
            write_le(out, clause.flags);
            write_le(out, clause.try_offset as u16);
            write_le(out, clause.try_length as u8);
            write_le(out, clause.handler_offset as u16);
            write_le(out, clause.handler_length as u8);
            write_le(out, clause.class_or_filter);
        }
        return Ok(());
    }

    let fat_size = 4 + clauses.len() * FAT_CLAUSE_SIZE;
    if fat_size > 0x00FF_FFFF {
        return Err(malformed_error!("{} exception clauses do not fit a section", clauses.len()));
    }
    out.push(SECTION_EH_TABLE | SECTION_FAT_FORMAT);
    out.extend_from_slice(&(fat_size as u32).to_le_bytes()[..3]);
    for clause in clauses {
        write_le(out, u32::from(clause.flags));
        write_le(out, clause.try_offset);
        write_le(out, clause.try_length);
        write_le(out, clause.handler_offset);
        write_le(out, clause.handler_length);
        write_le(out, clause.class_or_filter);
    }
    Ok(())
}
