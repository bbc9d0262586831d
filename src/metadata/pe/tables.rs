//! The `#~` table stream.
//!
//! Rows are kept as plain column values so that every table, including the ones the model
//! never looks at, survives a load/save cycle unchanged. The schema below covers the
//! ECMA-335 II.22 tables `0x00..=0x2C`; index widths follow II.24.2.6.
//!
//! Removing rows is generic: [`TableStream::remove_rows`] drops the requested rows, drops
//! every row that still points at one of them and renumbers all references. List columns
//! (`TypeDef.FieldList` and friends) move on to the next surviving row instead.

use crate::{file::io::write_le, Parser, Result};

/// Table identifiers of the physical schema.
pub(crate) mod id {
    pub const MODULE: u8 = 0x00;
    pub const TYPE_REF: u8 = 0x01;
    pub const TYPE_DEF: u8 = 0x02;
    pub const FIELD_PTR: u8 = 0x03;
    pub const FIELD: u8 = 0x04;
    pub const METHOD_PTR: u8 = 0x05;
    pub const METHOD_DEF: u8 = 0x06;
    pub const PARAM_PTR: u8 = 0x07;
    pub const PARAM: u8 = 0x08;
    pub const INTERFACE_IMPL: u8 = 0x09;
    pub const MEMBER_REF: u8 = 0x0A;
    pub const CONSTANT: u8 = 0x0B;
    pub const CUSTOM_ATTRIBUTE: u8 = 0x0C;
    pub const FIELD_MARSHAL: u8 = 0x0D;
    pub const DECL_SECURITY: u8 = 0x0E;
    pub const CLASS_LAYOUT: u8 = 0x0F;
    pub const FIELD_LAYOUT: u8 = 0x10;
    pub const STAND_ALONE_SIG: u8 = 0x11;
    pub const EVENT_MAP: u8 = 0x12;
    pub const EVENT_PTR: u8 = 0x13;
    pub const EVENT: u8 = 0x14;
    pub const PROPERTY_MAP: u8 = 0x15;
    pub const PROPERTY_PTR: u8 = 0x16;
    pub const PROPERTY: u8 = 0x17;
    pub const METHOD_SEMANTICS: u8 = 0x18;
    pub const METHOD_IMPL: u8 = 0x19;
    pub const MODULE_REF: u8 = 0x1A;
    pub const TYPE_SPEC: u8 = 0x1B;
    pub const IMPL_MAP: u8 = 0x1C;
    pub const FIELD_RVA: u8 = 0x1D;
    pub const ENC_LOG: u8 = 0x1E;
    pub const ENC_MAP: u8 = 0x1F;
    pub const ASSEMBLY: u8 = 0x20;
    pub const ASSEMBLY_PROCESSOR: u8 = 0x21;
    pub const ASSEMBLY_OS: u8 = 0x22;
    pub const ASSEMBLY_REF: u8 = 0x23;
    pub const ASSEMBLY_REF_PROCESSOR: u8 = 0x24;
    pub const ASSEMBLY_REF_OS: u8 = 0x25;
    pub const FILE: u8 = 0x26;
    pub const EXPORTED_TYPE: u8 = 0x27;
    pub const MANIFEST_RESOURCE: u8 = 0x28;
    pub const NESTED_CLASS: u8 = 0x29;
    pub const GENERIC_PARAM: u8 = 0x2A;
    pub const METHOD_SPEC: u8 = 0x2B;
    pub const GENERIC_PARAM_CONSTRAINT: u8 = 0x2C;
}

/// Number of tables in the schema.
pub(crate) const TABLE_COUNT: usize = 0x2D;

/// Slot of a coded index that no table occupies.
const UNUSED: u8 = 0xFF;

/// Heap size flag: the table stream carries one extra `u32` after the row counts.
const EXTRA_DATA: u8 = 0x40;

/// Coded index kinds (ECMA-335 II.24.2.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CodedIndex {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl CodedIndex {
    /// Tables in tag order.
    pub(crate) fn tables(self) -> &'static [u8] {
        use id::*;
        match self {
            CodedIndex::TypeDefOrRef => &[TYPE_DEF, TYPE_REF, TYPE_SPEC],
            CodedIndex::HasConstant => &[FIELD, PARAM, PROPERTY],
            CodedIndex::HasCustomAttribute => &[
                METHOD_DEF,
                FIELD,
                TYPE_REF,
                TYPE_DEF,
                PARAM,
                INTERFACE_IMPL,
                MEMBER_REF,
                MODULE,
                DECL_SECURITY,
                PROPERTY,
                EVENT,
                STAND_ALONE_SIG,
                MODULE_REF,
                TYPE_SPEC,
                ASSEMBLY,
                ASSEMBLY_REF,
                FILE,
                EXPORTED_TYPE,
                MANIFEST_RESOURCE,
                GENERIC_PARAM,
                GENERIC_PARAM_CONSTRAINT,
                METHOD_SPEC,
            ],
            CodedIndex::HasFieldMarshal => &[FIELD, PARAM],
            CodedIndex::HasDeclSecurity => &[TYPE_DEF, METHOD_DEF, ASSEMBLY],
            CodedIndex::MemberRefParent => &[TYPE_DEF, TYPE_REF, MODULE_REF, METHOD_DEF, TYPE_SPEC],
            CodedIndex::HasSemantics => &[EVENT, PROPERTY],
            CodedIndex::MethodDefOrRef => &[METHOD_DEF, MEMBER_REF],
            CodedIndex::MemberForwarded => &[FIELD, METHOD_DEF],
            CodedIndex::Implementation => &[FILE, ASSEMBLY_REF, EXPORTED_TYPE],
            CodedIndex::CustomAttributeType => &[UNUSED, UNUSED, METHOD_DEF, MEMBER_REF, UNUSED],
            CodedIndex::ResolutionScope => &[MODULE, MODULE_REF, ASSEMBLY_REF, TYPE_REF],
            CodedIndex::TypeOrMethodDef => &[TYPE_DEF, METHOD_DEF],
        }
    }

    /// Number of low bits holding the tag.
    pub(crate) fn tag_bits(self) -> u32 {
        let slots = self.tables().len();
        usize::BITS - (slots - 1).leading_zeros()
    }

    /// Split a coded value into `(table, row)`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the tag selects no table.
    pub(crate) fn decode(self, value: u32) -> Result<(u8, u32)> {
        let bits = self.tag_bits();
        let tag = (value & ((1 << bits) - 1)) as usize;
        match self.tables().get(tag) {
            Some(&table) if table != UNUSED => Ok((table, value >> bits)),
            _ => Err(malformed_error!("Invalid {:?} tag {}", self, tag)),
        }
    }

    /// Combine `table` and `row` into a coded value.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `table` cannot be expressed by this kind.
    pub(crate) fn encode(self, table: u8, row: u32) -> Result<u32> {
        let tag = self
            .tables()
            .iter()
            .position(|&candidate| candidate == table)
            .ok_or_else(|| malformed_error!("Table 0x{:02x} is not a {:?}", table, self))?;
        Ok((row << self.tag_bits()) | tag as u32)
    }
}

/// The kind of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Column {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    /// Simple index into a table
    Index(u8),
    /// First row of a run owned by this row
    List(u8),
    Coded(CodedIndex),
}

/// The columns of `table`.
pub(crate) fn columns(table: u8) -> &'static [Column] {
    use id::*;
    use CodedIndex as C;
    use Column::*;
    match table {
        MODULE => &[U16, Str, Guid, Guid, Guid],
        TYPE_REF => &[Coded(C::ResolutionScope), Str, Str],
        TYPE_DEF => &[U32, Str, Str, Coded(C::TypeDefOrRef), List(FIELD), List(METHOD_DEF)],
        FIELD_PTR => &[Index(FIELD)],
        FIELD => &[U16, Str, Blob],
        METHOD_PTR => &[Index(METHOD_DEF)],
        METHOD_DEF => &[U32, U16, U16, Str, Blob, List(PARAM)],
        PARAM_PTR => &[Index(PARAM)],
        PARAM => &[U16, U16, Str],
        INTERFACE_IMPL => &[Index(TYPE_DEF), Coded(C::TypeDefOrRef)],
        MEMBER_REF => &[Coded(C::MemberRefParent), Str, Blob],
        CONSTANT => &[U16, Coded(C::HasConstant), Blob],
        CUSTOM_ATTRIBUTE => &[
            Coded(C::HasCustomAttribute),
            Coded(C::CustomAttributeType),
            Blob,
        ],
        FIELD_MARSHAL => &[Coded(C::HasFieldMarshal), Blob],
        DECL_SECURITY => &[U16, Coded(C::HasDeclSecurity), Blob],
        CLASS_LAYOUT => &[U16, U32, Index(TYPE_DEF)],
        FIELD_LAYOUT => &[U32, Index(FIELD)],
        STAND_ALONE_SIG => &[Blob],
        EVENT_MAP => &[Index(TYPE_DEF), List(EVENT)],
        EVENT_PTR => &[Index(EVENT)],
        EVENT => &[U16, Str, Coded(C::TypeDefOrRef)],
        PROPERTY_MAP => &[Index(TYPE_DEF), List(PROPERTY)],
        PROPERTY_PTR => &[Index(PROPERTY)],
        PROPERTY => &[U16, Str, Blob],
        METHOD_SEMANTICS => &[U16, Index(METHOD_DEF), Coded(C::HasSemantics)],
        METHOD_IMPL => &[
            Index(TYPE_DEF),
            Coded(C::MethodDefOrRef),
            Coded(C::MethodDefOrRef),
        ],
        MODULE_REF => &[Str],
        TYPE_SPEC => &[Blob],
        IMPL_MAP => &[U16, Coded(C::MemberForwarded), Str, Index(MODULE_REF)],
        FIELD_RVA => &[U32, Index(FIELD)],
        ENC_LOG => &[U32, U32],
        ENC_MAP => &[U32],
        ASSEMBLY => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        ASSEMBLY_PROCESSOR => &[U32],
        ASSEMBLY_OS => &[U32, U32, U32],
        ASSEMBLY_REF => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        ASSEMBLY_REF_PROCESSOR => &[U32, Index(ASSEMBLY_REF)],
        ASSEMBLY_REF_OS => &[U32, U32, U32, Index(ASSEMBLY_REF)],
        FILE => &[U32, Str, Blob],
        EXPORTED_TYPE => &[U32, U32, Str, Str, Coded(C::Implementation)],
        MANIFEST_RESOURCE => &[U32, U32, Str, Coded(C::Implementation)],
        NESTED_CLASS => &[Index(TYPE_DEF), Index(TYPE_DEF)],
        GENERIC_PARAM => &[U16, U16, Coded(C::TypeOrMethodDef), Str],
        METHOD_SPEC => &[Coded(C::MethodDefOrRef), Blob],
        GENERIC_PARAM_CONSTRAINT => &[Index(GENERIC_PARAM), Coded(C::TypeDefOrRef)],
        _ => &[],
    }
}

/// Sort key column of the tables that must stay sorted (ECMA-335 II.22).
fn sort_key(table: u8) -> Option<usize> {
    use id::*;
    match table {
        INTERFACE_IMPL | CUSTOM_ATTRIBUTE | FIELD_MARSHAL | METHOD_IMPL | NESTED_CLASS
        | GENERIC_PARAM_CONSTRAINT => Some(0),
        CONSTANT | DECL_SECURITY | FIELD_LAYOUT | IMPL_MAP | FIELD_RVA => Some(1),
        CLASS_LAYOUT | METHOD_SEMANTICS | GENERIC_PARAM => Some(2),
        _ => None,
    }
}

/// Column that is cleared instead of dropping its row when the referenced row goes away.
fn nullable(table: u8, column: usize) -> bool {
    table == id::TYPE_REF && column == 0
}

/// Byte widths of the index columns for a given set of row counts.
struct Widths {
    heap_sizes: u8,
    rows: [u32; TABLE_COUNT],
}

impl Widths {
    fn of(&self, column: Column) -> usize {
        let large = |flag: u8| if self.heap_sizes & flag != 0 { 4 } else { 2 };
        match column {
            Column::U16 => 2,
            Column::U32 => 4,
            Column::Str => large(0x01),
            Column::Guid => large(0x02),
            Column::Blob => large(0x04),
            Column::Index(table) | Column::List(table) => {
                if self.rows[table as usize] > u32::from(u16::MAX) {
                    4
                } else {
                    2
                }
            }
            Column::Coded(kind) => {
                let max_rows = kind
                    .tables()
                    .iter()
                    .filter(|&&table| table != UNUSED)
                    .map(|&table| self.rows[table as usize])
                    .max()
                    .unwrap_or(0);
                if max_rows >= 1 << (16 - kind.tag_bits()) {
                    4
                } else {
                    2
                }
            }
        }
    }

    fn row_size(&self, table: u8) -> usize {
        columns(table).iter().map(|&column| self.of(column)).sum()
    }
}

/// All metadata tables of an image.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TableStream {
    major: u8,
    minor: u8,
    heap_sizes: u8,
    reserved: u8,
    sorted: u64,
    extra: Option<u32>,
    rows: Vec<Vec<Vec<u32>>>,
}

impl TableStream {
    /// Parse the content of a `#~` stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unknown tables and
    /// [`crate::Error::OutOfBounds`] for truncated data.
    pub(crate) fn parse(data: &[u8]) -> Result<TableStream> {
        let mut parser = Parser::new(data);
        let _reserved = parser.read_le::<u32>()?;
        let major = parser.read_le::<u8>()?;
        let minor = parser.read_le::<u8>()?;
        let heap_sizes = parser.read_le::<u8>()?;
        let reserved = parser.read_le::<u8>()?;
        let valid = parser.read_le::<u64>()?;
        let sorted = parser.read_le::<u64>()?;

        let mut counts = [0u32; TABLE_COUNT];
        for table in 0..64 {
            if valid & (1 << table) == 0 {
                continue;
            }
            let count = parser.read_le::<u32>()?;
            match counts.get_mut(table) {
                Some(slot) => *slot = count,
                None => return Err(malformed_error!("Unknown metadata table 0x{:02x}", table)),
            }
        }

        let extra = if heap_sizes & EXTRA_DATA != 0 {
            Some(parser.read_le::<u32>()?)
        } else {
            None
        };

        let widths = Widths {
            heap_sizes,
            rows: counts,
        };

        let mut rows = Vec::with_capacity(TABLE_COUNT);
        for (table, &count) in counts.iter().enumerate() {
            let table = table as u8;
            let schema = columns(table);
            let needed = (count as usize)
                .checked_mul(widths.row_size(table))
                .ok_or_else(|| malformed_error!("Table 0x{:02x} is too large", table))?;
            if needed > parser.remaining() {
                return Err(crate::Error::OutOfBounds);
            }

            let mut table_rows = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let mut row = Vec::with_capacity(schema.len());
                for &column in schema {
                    row.push(if widths.of(column) == 4 {
                        parser.read_le::<u32>()?
                    } else {
                        u32::from(parser.read_le::<u16>()?)
                    });
                }
                table_rows.push(row);
            }
            rows.push(table_rows);
        }

        Ok(TableStream {
            major,
            minor,
            heap_sizes,
            reserved,
            sorted,
            extra,
            rows,
        })
    }

    /// Encode the tables, padded to a multiple of four bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a value does not fit its column.
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut counts = [0u32; TABLE_COUNT];
        let mut valid = 0u64;
        for (table, rows) in self.rows.iter().enumerate() {
            counts[table] = u32::try_from(rows.len())
                .map_err(|_| malformed_error!("Table 0x{:02x} is too large", table))?;
            if !rows.is_empty() {
                valid |= 1 << table;
            }
        }

        let widths = Widths {
            heap_sizes: self.heap_sizes,
            rows: counts,
        };

        let mut out = Vec::new();
        write_le(&mut out, 0u32);
        write_le(&mut out, self.major);
        write_le(&mut out, self.minor);
        write_le(&mut out, self.heap_sizes);
        write_le(&mut out, self.reserved);
        write_le(&mut out, valid);
        write_le(&mut out, self.sorted);
        for &count in counts.iter().filter(|&&count| count > 0) {
            write_le(&mut out, count);
        }
        if let Some(extra) = self.extra {
            write_le(&mut out, extra);
        }

        for (table, rows) in self.rows.iter().enumerate() {
            let schema = columns(table as u8);
            for row in rows {
                for (&column, &value) in schema.iter().zip(row) {
                    if widths.of(column) == 4 {
                        write_le(&mut out, value);
                    } else {
                        let value = u16::try_from(value).map_err(|_| {
                            malformed_error!(
                                "Value 0x{:x} does not fit a column of table 0x{:02x}",
                                value,
                                table
                            )
                        })?;
                        write_le(&mut out, value);
                    }
                }
            }
        }

        while out.len() % 4 != 0 {
            out.push(0);
        }
        Ok(out)
    }

    /// Number of rows in `table`.
    pub(crate) fn row_count(&self, table: u8) -> u32 {
        self.rows
            .get(table as usize)
            .map_or(0, |rows| rows.len() as u32)
    }

    /// The 1-based row `rid` of `table`.
    pub(crate) fn row(&self, table: u8, rid: u32) -> Option<&[u32]> {
        let index = (rid as usize).checked_sub(1)?;
        self.rows.get(table as usize)?.get(index).map(Vec::as_slice)
    }

    /// Like [`TableStream::row`], but a missing row is an error.
    pub(crate) fn get(&self, table: u8, rid: u32) -> Result<&[u32]> {
        self.row(table, rid)
            .ok_or_else(|| malformed_error!("Row {} of table 0x{:02x} does not exist", rid, table))
    }

    /// Overwrite one cell.
    pub(crate) fn set(&mut self, table: u8, rid: u32, column: usize, value: u32) -> Result<()> {
        let cell = (rid as usize)
            .checked_sub(1)
            .and_then(|index| self.rows.get_mut(table as usize)?.get_mut(index))
            .and_then(|row| row.get_mut(column))
            .ok_or_else(|| malformed_error!("Row {} of table 0x{:02x} does not exist", rid, table))?;
        *cell = value;
        Ok(())
    }

    /// The half-open run `[start, end)` of `list_table` rows owned by `rid`.
    ///
    /// `column` is the list column of `owner_table`; the run ends where the next owner's
    /// run starts, or at the end of `list_table`.
    pub(crate) fn run(&self, owner_table: u8, rid: u32, column: usize, list_table: u8) -> Result<(u32, u32)> {
        let limit = self.row_count(list_table) + 1;
        let start = self.get(owner_table, rid)?[column];
        let end = match self.row(owner_table, rid + 1) {
            Some(next) => next[column],
            None => limit,
        };

        if start == 0 || start > end || end > limit {
            return Err(malformed_error!(
                "Row {} of table 0x{:02x} owns an invalid run {}..{}",
                rid,
                owner_table,
                start,
                end
            ));
        }
        Ok((start, end))
    }

    /// Remove `requested` rows and every row that depends on them.
    ///
    /// `requested` holds `(table, rid)` pairs. Returns the sorted, removed rids of every
    /// table. References to surviving rows are renumbered; sorted tables are re-sorted.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid coded indexes.
    pub(crate) fn remove_rows(&mut self, requested: &[(u8, u32)]) -> Result<Vec<Vec<u32>>> {
        let mut dropped: Vec<Vec<bool>> = self.rows.iter().map(|rows| vec![false; rows.len()]).collect();
        for &(table, rid) in requested {
            if let Some(flag) = (rid as usize)
                .checked_sub(1)
                .and_then(|index| dropped.get_mut(table as usize)?.get_mut(index))
            {
                *flag = true;
            }
        }

        self.cascade(&mut dropped)?;

        let removed: Vec<Vec<u32>> = dropped
            .iter()
            .map(|flags| {
                flags
                    .iter()
                    .enumerate()
                    .filter(|(_, &gone)| gone)
                    .map(|(index, _)| index as u32 + 1)
                    .collect()
            })
            .collect();

        for (target, gone) in removed.iter().enumerate() {
            if gone.is_empty() {
                continue;
            }
            let shift = |rid: u32| rid - gone.partition_point(|&removed| removed < rid) as u32;
            self.rewrite_references(target as u8, &shift)?;
        }

        for (rows, flags) in self.rows.iter_mut().zip(&dropped) {
            let mut flags = flags.iter();
            rows.retain(|_| !flags.next().copied().unwrap_or(false));
        }

        self.sort()?;
        Ok(removed)
    }

    /// Mark every row that refers to a dropped row, until nothing changes.
    fn cascade(&mut self, dropped: &mut [Vec<bool>]) -> Result<()> {
        let is_dropped = |dropped: &[Vec<bool>], table: u8, rid: u32| {
            (rid as usize)
                .checked_sub(1)
                .and_then(|index| dropped.get(table as usize)?.get(index).copied())
                .unwrap_or(false)
        };

        loop {
            let mut changed = false;
            for table in 0..TABLE_COUNT {
                let schema = columns(table as u8);
                for index in 0..self.rows[table].len() {
                    if dropped[table][index] {
                        continue;
                    }
                    for (column, &kind) in schema.iter().enumerate() {
                        let value = self.rows[table][index][column];
                        let (target, rid) = match kind {
                            Column::Index(target) => (target, value),
                            Column::Coded(coded) if value != 0 => match coded.decode(value) {
                                Ok(reference) => reference,
                                Err(_) => continue,
                            },
                            _ => continue,
                        };
                        if !is_dropped(&*dropped, target, rid) {
                            continue;
                        }

                        if nullable(table as u8, column) {
                            self.rows[table][index][column] = 0;
                        } else {
                            dropped[table][index] = true;
                            changed = true;
                            break;
                        }
                    }
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    /// Apply `map` to every reference to `target` rows.
    fn rewrite_references(&mut self, target: u8, map: &dyn Fn(u32) -> u32) -> Result<()> {
        for (table, rows) in self.rows.iter_mut().enumerate() {
            let schema = columns(table as u8);
            for row in rows.iter_mut() {
                for (&kind, value) in schema.iter().zip(row.iter_mut()) {
                    match kind {
                        Column::Index(referenced) | Column::List(referenced)
                            if referenced == target && *value != 0 =>
                        {
                            *value = map(*value);
                        }
                        Column::Coded(coded) if *value != 0 => {
                            let Ok((referenced, rid)) = coded.decode(*value) else {
                                continue;
                            };
                            if referenced == target && rid != 0 {
                                *value = coded.encode(referenced, map(rid))?;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Restore the order of the sorted tables, renumbering references to moved rows.
    fn sort(&mut self) -> Result<()> {
        for table in 0..TABLE_COUNT as u8 {
            let Some(key) = sort_key(table) else {
                continue;
            };
            let rows = &self.rows[table as usize];
            let mut order: Vec<usize> = (0..rows.len()).collect();
            order.sort_by_key(|&index| rows[index][key]);
            if order.iter().enumerate().all(|(position, &index)| position == index) {
                continue;
            }

            let mut new_rid = vec![0u32; order.len() + 2];
            for (position, &index) in order.iter().enumerate() {
                new_rid[index + 1] = position as u32 + 1;
            }
            new_rid[order.len() + 1] = order.len() as u32 + 1;

            let mut sorted: Vec<Vec<u32>> = order
                .iter()
                .map(|&index| std::mem::take(&mut self.rows[table as usize][index]))
                .collect();
            std::mem::swap(&mut self.rows[table as usize], &mut sorted);

            self.rewrite_references(table, &|rid| {
                new_rid.get(rid as usize).copied().unwrap_or(rid)
            })?;
        }
        Ok(())
    }

    /// Create an empty stream; rows are added with [`TableStream::push`].
    #[cfg(test)]
    pub(crate) fn empty(heap_sizes: u8) -> TableStream {
        TableStream {
            major: 2,
            minor: 0,
            heap_sizes,
            reserved: 1,
            sorted: 0x0000_1600_3301_FA00,
            extra: None,
            rows: vec![Vec::new(); TABLE_COUNT],
        }
    }

    /// Append a row and return its rid.
    #[cfg(test)]
    pub(crate) fn push(&mut self, table: u8, row: &[u32]) -> u32 {
        self.rows[table as usize].push(row.to_vec());
        self.row_count(table)
    }
}

#[cfg(test)]
mod tests {
    use super::{id::*, *};

    fn stream() -> TableStream {
        let mut tables = TableStream::empty(0);
        tables.push(MODULE, &[0, 1, 1, 0, 0]);
        tables.push(ASSEMBLY_REF, &[4, 0, 0, 0, 0, 0, 10, 0, 0]);
        tables.push(ASSEMBLY_REF, &[9, 0, 0, 0, 0, 0, 20, 0, 0]);
        let scope = |rid| CodedIndex::ResolutionScope.encode(ASSEMBLY_REF, rid).unwrap();
        tables.push(TYPE_REF, &[scope(1), 30, 31]);
        tables.push(TYPE_REF, &[scope(2), 32, 33]);
        tables.push(TYPE_DEF, &[0, 40, 0, 0, 1, 1]);
        tables.push(TYPE_DEF, &[0, 41, 0, 0, 1, 1]);
        tables.push(TYPE_DEF, &[0, 42, 0, 0, 4, 1]);
        for name in [50, 51, 52, 53] {
            tables.push(FIELD, &[0x16, name, 1]);
        }
        let field = |rid| CodedIndex::HasConstant.encode(FIELD, rid).unwrap();
        tables.push(CONSTANT, &[8, field(2), 5]);
        tables.push(CONSTANT, &[8, field(3), 6]);
        tables.push(CUSTOM_ATTRIBUTE, &[
            CodedIndex::HasCustomAttribute.encode(TYPE_DEF, 2).unwrap(),
            CodedIndex::CustomAttributeType.encode(MEMBER_REF, 1).unwrap(),
            7,
        ]);
        tables.push(CUSTOM_ATTRIBUTE, &[
            CodedIndex::HasCustomAttribute.encode(FIELD, 3).unwrap(),
            CodedIndex::CustomAttributeType.encode(MEMBER_REF, 1).unwrap(),
            8,
        ]);
        tables.push(FIELD_RVA, &[0x2000, 3]);
        tables.push(ASSEMBLY_REF_OS, &[0, 0, 0, 2]);
        tables
    }

    #[test]
    fn coded_index_tags() {
        assert_eq!(CodedIndex::TypeDefOrRef.tag_bits(), 2);
        assert_eq!(CodedIndex::HasCustomAttribute.tag_bits(), 5);
        assert_eq!(CodedIndex::CustomAttributeType.tag_bits(), 3);
        assert_eq!(CodedIndex::MethodDefOrRef.tag_bits(), 1);

        let value = CodedIndex::ResolutionScope.encode(ASSEMBLY_REF, 3).unwrap();
        assert_eq!(value, (3 << 2) | 2);
        assert_eq!(CodedIndex::ResolutionScope.decode(value).unwrap(), (ASSEMBLY_REF, 3));

        assert!(CodedIndex::CustomAttributeType.decode(1 << 3).is_err());
        assert!(CodedIndex::TypeDefOrRef.encode(FIELD, 1).is_err());
    }

    #[test]
    fn bytes_round_trip() {
        let tables = stream();
        let bytes = tables.to_bytes().unwrap();

        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(TableStream::parse(&bytes).unwrap(), tables);
    }

    #[test]
    fn wide_columns() {
        let mut tables = TableStream::empty(0x01);
        for _ in 0..0x4000 {
            tables.push(TYPE_REF, &[0, 0x1_0000, 0]);
        }
        tables.push(TYPE_DEF, &[0, 0x1_0001, 0, CodedIndex::TypeDefOrRef.encode(TYPE_REF, 0x4000).unwrap(), 1, 1]);

        let bytes = tables.to_bytes().unwrap();
        let parsed = TableStream::parse(&bytes).unwrap();

        assert_eq!(parsed.get(TYPE_DEF, 1).unwrap()[3], (0x4000 << 2) | 1);
        assert_eq!(parsed.get(TYPE_REF, 0x4000).unwrap()[1], 0x1_0000);
    }

    #[test]
    fn truncated_table_fails() {
        let bytes = stream().to_bytes().unwrap();
        assert!(TableStream::parse(&bytes[..40]).is_err());
    }

    #[test]
    fn removing_a_field_renumbers_and_cascades() {
        let mut tables = stream();
        let removed = tables.remove_rows(&[(FIELD, 3)]).unwrap();

        assert_eq!(removed[FIELD as usize], [3]);
        assert_eq!(removed[CONSTANT as usize], [2]);
        assert_eq!(removed[CUSTOM_ATTRIBUTE as usize], [2]);
        assert_eq!(removed[FIELD_RVA as usize], [1]);

        assert_eq!(tables.row_count(FIELD), 3);
        assert_eq!(tables.get(FIELD, 3).unwrap()[1], 53);
        assert_eq!(tables.row_count(FIELD_RVA), 0);

        // The third type owned fields 4.. and now starts at the renumbered row 3.
        assert_eq!(tables.get(TYPE_DEF, 3).unwrap()[4], 3);
        assert_eq!(tables.run(TYPE_DEF, 3, 4, FIELD).unwrap(), (3, 4));
        assert_eq!(tables.run(TYPE_DEF, 2, 4, FIELD).unwrap(), (1, 3));

        assert_eq!(tables.row_count(CONSTANT), 1);
        let constant = tables.get(CONSTANT, 1).unwrap();
        assert_eq!(CodedIndex::HasConstant.decode(constant[1]).unwrap(), (FIELD, 2));
    }

    #[test]
    fn removing_a_reference_clears_type_ref_scope() {
        let mut tables = stream();
        tables.remove_rows(&[(ASSEMBLY_REF, 2)]).unwrap();

        assert_eq!(tables.row_count(ASSEMBLY_REF), 1);
        assert_eq!(tables.row_count(TYPE_REF), 2);
        assert_eq!(tables.get(TYPE_REF, 2).unwrap()[0], 0);
        assert_eq!(
            CodedIndex::ResolutionScope.decode(tables.get(TYPE_REF, 1).unwrap()[0]).unwrap(),
            (ASSEMBLY_REF, 1)
        );
        assert_eq!(tables.row_count(ASSEMBLY_REF_OS), 0);
    }

    #[test]
    fn renumbering_restores_sort_order() {
        let mut tables = stream();
        // A type attribute sorts after the attribute on field 3 once fields are renumbered.
        tables.rows[CUSTOM_ATTRIBUTE as usize][0][0] =
            CodedIndex::HasCustomAttribute.encode(TYPE_DEF, 3).unwrap();
        tables.rows[CUSTOM_ATTRIBUTE as usize][1][0] =
            CodedIndex::HasCustomAttribute.encode(FIELD, 4).unwrap();
        tables.remove_rows(&[(FIELD, 1)]).unwrap();

        let parents: Vec<_> = (1..=2)
            .map(|rid| {
                CodedIndex::HasCustomAttribute
                    .decode(tables.get(CUSTOM_ATTRIBUTE, rid).unwrap()[0])
                    .unwrap()
            })
            .collect();
        assert_eq!(parents, [(FIELD, 3), (TYPE_DEF, 3)]);
    }
}
