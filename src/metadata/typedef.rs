//! Types and fields defined by an assembly.

use bitflags::bitflags;

use crate::metadata::{MethodDef, Token};

bitflags! {
    /// Type attributes (ECMA-335 II.23.1.15).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeAttributes: u32 {
        /// Class is public scope
        const PUBLIC = 0x0000_0001;
        /// Class is nested with public visibility
        const NESTED_PUBLIC = 0x0000_0002;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Class is abstract
        const ABSTRACT = 0x0000_0080;
        /// Class cannot be extended
        const SEALED = 0x0000_0100;
        /// Class name is special
        const SPECIAL_NAME = 0x0000_0400;
        /// Initialize the class before first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

bitflags! {
    /// Field attributes (ECMA-335 II.23.1.5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldAttributes: u16 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by anyone in the assembly
        const ASSEMBLY = 0x0003;
        /// Accessible by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Field can only be initialized, not written to after init
        const INIT_ONLY = 0x0020;
        /// Value is a compile time constant
        const LITERAL = 0x0040;
    }
}

/// A field defined by a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field attributes
    pub flags: FieldAttributes,
    /// Field type text, e.g. `Steamworks.CSteamID`
    pub field_type: String,
    /// Row the field was loaded from; `None` for fields built in memory
    pub token: Option<Token>,
}

impl FieldDef {
    /// Create a field.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        flags: FieldAttributes,
        field_type: impl Into<String>,
    ) -> Self {
        FieldDef {
            name: name.into(),
            flags,
            field_type: field_type.into(),
            token: None,
        }
    }
}

/// A type defined by an assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// `Namespace.Name`
    pub full_name: String,
    /// Type attributes
    pub flags: TypeAttributes,
    /// Fields in declaration order
    pub fields: Vec<FieldDef>,
    /// Methods in declaration order
    pub methods: Vec<MethodDef>,
    /// Row the type was loaded from; `None` for types built in memory
    pub token: Option<Token>,
}

impl TypeDef {
    /// Create an empty type.
    #[must_use]
    pub fn new(full_name: impl Into<String>, flags: TypeAttributes) -> Self {
        TypeDef {
            full_name: full_name.into(),
            flags,
            fields: Vec::new(),
            methods: Vec::new(),
            token: None,
        }
    }

    /// Add a field, builder style.
    #[must_use]
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a method, builder style.
    #[must_use]
    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    /// The namespace part of the full name.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.full_name
            .rsplit_once('.')
            .map_or("", |(namespace, _)| namespace)
    }

    /// The simple name part of the full name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.full_name
            .rsplit_once('.')
            .map_or(self.full_name.as_str(), |(_, name)| name)
    }

    /// First method called `name`. Overloads are not distinguished.
    #[must_use]
    pub fn find_method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|method| method.name == name)
    }

    /// Mutable variant of [`TypeDef::find_method`].
    pub fn find_method_mut(&mut self, name: &str) -> Option<&mut MethodDef> {
        self.methods.iter_mut().find(|method| method.name == name)
    }

    /// The field called `name`.
    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Remove the field called `name`, keeping the order of the others.
    pub fn remove_field(&mut self, name: &str) -> Option<FieldDef> {
        let index = self.fields.iter().position(|field| field.name == name)?;
        Some(self.fields.remove(index))
    }
}
