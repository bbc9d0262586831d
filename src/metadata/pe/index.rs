//! Operands of the rows instructions refer to, and the way back from an operand to a token.
//!
//! Every `TypeDef`, `TypeRef`, `TypeSpec`, `Field`, `MethodDef` and `MemberRef` row and every
//! user string is rendered once when the image is loaded. Decoding an instruction is then a
//! lookup, and so is encoding it again: an operand maps back to the first row that renders
//! the same way.

use std::collections::HashMap;

use crate::{
    assembly::{OpCode, Operand, TokenResolver},
    metadata::{
        pe::{
            heaps::Heaps,
            signature::{self, TypeNames},
            tables::{id, CodedIndex, TableStream},
        },
        MemberRef, TableId, Token, TypeRef,
    },
    Result,
};

/// Enclosing types and resolution scopes form chains; longer ones are treated as cycles.
const MAX_NESTING: usize = 64;

/// Rendered operands of an image, by row and by value.
#[derive(Debug, Default)]
pub(crate) struct OperandIndex {
    assembly_refs: Vec<String>,
    type_defs: Vec<TypeRef>,
    type_refs: Vec<TypeRef>,
    type_specs: Vec<TypeRef>,
    fields: Vec<MemberRef>,
    methods: Vec<MemberRef>,
    member_refs: Vec<(bool, MemberRef)>,
    strings: HashMap<u32, String>,

    type_tokens: HashMap<TypeRef, Token>,
    field_tokens: HashMap<MemberRef, Token>,
    method_tokens: HashMap<MemberRef, Token>,
    string_tokens: HashMap<String, Token>,
}

/// Names already known while the index is being built.
struct Names<'a> {
    tables: &'a TableStream,
    heaps: Heaps<'a>,
    type_defs: &'a [TypeRef],
    type_refs: &'a [TypeRef],
}

impl TypeNames for Names<'_> {
    fn type_name(&self, table: u8, rid: u32, depth: usize) -> Result<String> {
        let known = match table {
            id::TYPE_DEF => self.type_defs,
            id::TYPE_REF => self.type_refs,
            id::TYPE_SPEC => {
                let blob = self.heaps.blob(self.tables.get(id::TYPE_SPEC, rid)?[0])?;
                return signature::type_spec(blob, self, depth);
            }
            _ => return Err(malformed_error!("Table 0x{:02x} does not name a type", table)),
        };
        row(known, rid, table).map(ToString::to_string)
    }
}

fn row<T>(rows: &[T], rid: u32, table: u8) -> Result<&T> {
    (rid as usize)
        .checked_sub(1)
        .and_then(|index| rows.get(index))
        .ok_or_else(|| malformed_error!("Row {} of table 0x{:02x} does not exist", rid, table))
}

fn token(table: u8, rid: usize) -> Token {
    Token::new((u32::from(table) << 24) | (rid as u32 + 1))
}

impl OperandIndex {
    /// Render every row of `tables`.
    pub(crate) fn build(tables: &TableStream, heaps: Heaps) -> Result<OperandIndex> {
        let mut index = OperandIndex::default();

        for rid in 1..=tables.row_count(id::ASSEMBLY_REF) {
            let row = tables.get(id::ASSEMBLY_REF, rid)?;
            index.assembly_refs.push(heaps.string(row[6])?.to_string());
        }

        index.type_defs = type_def_names(tables, heaps)?;
        index.type_refs = type_ref_names(tables, heaps, &index.assembly_refs)?;

        let names = Names {
            tables,
            heaps,
            type_defs: &index.type_defs,
            type_refs: &index.type_refs,
        };

        let mut type_specs = Vec::new();
        for rid in 1..=tables.row_count(id::TYPE_SPEC) {
            let blob = heaps.blob(tables.get(id::TYPE_SPEC, rid)?[0])?;
            type_specs.push(TypeRef {
                scope: None,
                full_name: signature::type_spec(blob, &names, 0)?,
            });
        }

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        for owner in 1..=tables.row_count(id::TYPE_DEF) {
            let parent = row(&index.type_defs, owner, id::TYPE_DEF)?;

            let (start, end) = tables.run(id::TYPE_DEF, owner, 4, id::FIELD)?;
            for rid in start..end {
                let field = tables.get(id::FIELD, rid)?;
                fields.push(MemberRef::new(
                    parent.clone(),
                    heaps.string(field[1])?,
                    signature::field(heaps.blob(field[2])?, &names)?,
                ));
            }

            let (start, end) = tables.run(id::TYPE_DEF, owner, 5, id::METHOD_DEF)?;
            for rid in start..end {
                let method = tables.get(id::METHOD_DEF, rid)?;
                methods.push(MemberRef::new(
                    parent.clone(),
                    heaps.string(method[3])?,
                    signature::method(heaps.blob(method[4])?, &names)?,
                ));
            }
        }
        if fields.len() != tables.row_count(id::FIELD) as usize
            || methods.len() != tables.row_count(id::METHOD_DEF) as usize
        {
            return Err(malformed_error!("Fields or methods without a declaring type"));
        }

        let mut member_refs = Vec::new();
        for rid in 1..=tables.row_count(id::MEMBER_REF) {
            let member = tables.get(id::MEMBER_REF, rid)?;
            let parent = match CodedIndex::MemberRefParent.decode(member[0])? {
                (id::TYPE_SPEC, parent) => row(&type_specs, parent, id::TYPE_SPEC)?.clone(),
                (id::METHOD_DEF, parent) => row(&methods, parent, id::METHOD_DEF)?.parent.clone(),
                (id::MODULE_REF, parent) => TypeRef::local(
                    heaps.string(tables.get(id::MODULE_REF, parent)?[0])?,
                ),
                (table, parent) => {
                    let known = if table == id::TYPE_DEF {
                        &index.type_defs
                    } else {
                        &index.type_refs
                    };
                    row(known, parent, table)?.clone()
                }
            };
            let (is_field, signature) = signature::member(heaps.blob(member[2])?, &names)?;
            member_refs.push((
                is_field,
                MemberRef::new(parent, heaps.string(member[1])?, signature),
            ));
        }

        for (offset, value) in heaps.all_user_strings()? {
            let user_string = Token::new((u32::from(TableId::UserString as u8) << 24) | offset);
            index.string_tokens.entry(value.clone()).or_insert(user_string);
            index.strings.insert(offset, value);
        }

        index.type_specs = type_specs;
        index.fields = fields;
        index.methods = methods;
        index.member_refs = member_refs;
        index.map_tokens();
        Ok(index)
    }

    fn map_tokens(&mut self) {
        for (table, types) in [
            (id::TYPE_DEF, &self.type_defs),
            (id::TYPE_REF, &self.type_refs),
            (id::TYPE_SPEC, &self.type_specs),
        ] {
            for (index, ty) in types.iter().enumerate() {
                self.type_tokens.entry(ty.clone()).or_insert(token(table, index));
            }
        }
        for (index, field) in self.fields.iter().enumerate() {
            self.field_tokens.entry(field.clone()).or_insert(token(id::FIELD, index));
        }
        for (index, method) in self.methods.iter().enumerate() {
            self.method_tokens.entry(method.clone()).or_insert(token(id::METHOD_DEF, index));
        }
        for (index, (is_field, member)) in self.member_refs.iter().enumerate() {
            let tokens = if *is_field {
                &mut self.field_tokens
            } else {
                &mut self.method_tokens
            };
            tokens.entry(member.clone()).or_insert(token(id::MEMBER_REF, index));
        }
    }

    /// Names of the `AssemblyRef` rows.
    pub(crate) fn assembly_refs(&self) -> &[String] {
        &self.assembly_refs
    }

    /// The type defined by `TypeDef` row `rid`.
    pub(crate) fn type_def(&self, rid: u32) -> Result<&TypeRef> {
        row(&self.type_defs, rid, id::TYPE_DEF)
    }

    /// The field defined by `Field` row `rid`.
    pub(crate) fn field(&self, rid: u32) -> Result<&MemberRef> {
        row(&self.fields, rid, id::FIELD)
    }

    /// The method defined by `MethodDef` row `rid`.
    pub(crate) fn method(&self, rid: u32) -> Result<&MemberRef> {
        row(&self.methods, rid, id::METHOD_DEF)
    }

    /// The type a `TypeDef`, `TypeRef` or `TypeSpec` token refers to.
    pub(crate) fn type_of(&self, token: Token) -> Result<&TypeRef> {
        let rows = match token.table() {
            id::TYPE_DEF => &self.type_defs,
            id::TYPE_REF => &self.type_refs,
            id::TYPE_SPEC => &self.type_specs,
            _ => return Err(malformed_error!("Token {} does not refer to a type", token)),
        };
        row(rows, token.row(), token.table())
    }

    /// The first token of a type that renders as `ty`.
    pub(crate) fn type_token(&self, ty: &TypeRef) -> Option<Token> {
        self.type_tokens.get(ty).copied()
    }

    /// The first `Field` or `MemberRef` token of a field that renders as `field`.
    pub(crate) fn field_token(&self, field: &MemberRef) -> Option<Token> {
        self.field_tokens.get(field).copied()
    }

    /// The first `MethodDef` or `MemberRef` token of a method that renders as `method`.
    pub(crate) fn method_token(&self, method: &MemberRef) -> Option<Token> {
        self.method_tokens.get(method).copied()
    }

    /// The first `#US` token of `value`.
    pub(crate) fn string_token(&self, value: &str) -> Option<Token> {
        self.string_tokens.get(value).copied()
    }
}

impl TypeNames for OperandIndex {
    fn type_name(&self, table: u8, rid: u32, _depth: usize) -> Result<String> {
        self.type_of(Token::new((u32::from(table) << 24) | rid))
            .map(ToString::to_string)
    }
}

impl TokenResolver for OperandIndex {
    fn resolve(&self, opcode: OpCode, token: Token) -> Result<Operand> {
        let missing = || malformed_error!("{} uses missing token {}", opcode, token);
        match token.table_id() {
            Some(TableId::UserString) => self
                .strings
                .get(&token.row())
                .map(|value| Operand::String(value.clone()))
                .ok_or_else(missing),
            Some(TableId::TypeDef | TableId::TypeRef | TableId::TypeSpec) => {
                Ok(Operand::Type(self.type_of(token)?.clone()))
            }
            Some(TableId::Field) => Ok(Operand::Field(self.field(token.row())?.clone())),
            Some(TableId::MethodDef) => Ok(Operand::Method(self.method(token.row())?.clone())),
            Some(TableId::MemberRef) => {
                let (is_field, member) = row(&self.member_refs, token.row(), id::MEMBER_REF)
                    .map_err(|_| missing())?;
                if *is_field {
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

/// Full names of all `TypeDef` rows; nested types are `Outer/Inner`.
fn type_def_names(tables: &TableStream, heaps: Heaps) -> Result<Vec<TypeRef>> {
    let mut enclosing = HashMap::new();
    for rid in 1..=tables.row_count(id::NESTED_CLASS) {
        let nested = tables.get(id::NESTED_CLASS, rid)?;
        enclosing.insert(nested[0], nested[1]);
    }

    let mut simple = Vec::new();
    for rid in 1..=tables.row_count(id::TYPE_DEF) {
        let ty = tables.get(id::TYPE_DEF, rid)?;
        simple.push(qualified(heaps.string(ty[2])?, heaps.string(ty[1])?));
    }

    let mut names = Vec::with_capacity(simple.len());
    for (index, name) in simple.iter().enumerate() {
        let mut full_name = name.clone();
        let mut current = index as u32 + 1;
        for depth in 0.. {
            let Some(&outer) = enclosing.get(&current) else {
                break;
            };
            if depth == MAX_NESTING {
                return Err(malformed_error!("Type {} is nested in a cycle", name));
            }
            let outer_name = row(&simple, outer, id::TYPE_DEF)?;
            full_name = format!("{outer_name}/{full_name}");
            current = outer;
        }
        names.push(TypeRef::local(full_name));
    }
    Ok(names)
}

/// Scoped names of all `TypeRef` rows.
fn type_ref_names(tables: &TableStream, heaps: Heaps, assembly_refs: &[String]) -> Result<Vec<TypeRef>> {
    let count = tables.row_count(id::TYPE_REF);
    let mut names = Vec::with_capacity(count as usize);
    for rid in 1..=count {
        names.push(type_ref_name(tables, heaps, assembly_refs, rid, 0)?);
    }
    Ok(names)
}

fn type_ref_name(
    tables: &TableStream,
    heaps: Heaps,
    assembly_refs: &[String],
    rid: u32,
    depth: usize,
) -> Result<TypeRef> {
    if depth > MAX_NESTING {
        return Err(malformed_error!("Type reference {} is nested in a cycle", rid));
    }
    let ty = tables.get(id::TYPE_REF, rid)?;
    let name = qualified(heaps.string(ty[2])?, heaps.string(ty[1])?);

    if ty[0] == 0 {
        return Ok(TypeRef::local(name));
    }
    match CodedIndex::ResolutionScope.decode(ty[0])? {
        (id::ASSEMBLY_REF, scope) => Ok(TypeRef::external(
            row(assembly_refs, scope, id::ASSEMBLY_REF)?.as_str(),
            name,
        )),
        (id::TYPE_REF, outer) => {
            let outer = type_ref_name(tables, heaps, assembly_refs, outer, depth + 1)?;
            Ok(TypeRef {
                scope: outer.scope,
                full_name: format!("{}/{}", outer.full_name, name),
            })
        }
        _ => Ok(TypeRef::local(name)),
    }
}

fn qualified(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}
