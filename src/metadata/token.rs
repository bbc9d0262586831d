//! Metadata tokens.
//!
//! A token is the 32-bit handle CIL instructions use to refer to metadata: the high byte
//! selects a table (or the user string heap), the low 24 bits are a 1-based row index.
//!
//! ```rust
//! use dotpatch::metadata::{TableId, Token};
//!
//! let token = Token::from_parts(TableId::MemberRef, 3);
//! assert_eq!(token.value(), 0x0A00_0003);
//! assert_eq!(token.table_id(), Some(TableId::MemberRef));
//! assert_eq!(token.row(), 3);
//! ```

use std::fmt;

use strum::{EnumIter, FromRepr, IntoStaticStr};

/// Token table identifiers used by instruction operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, FromRepr, IntoStaticStr)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TableId {
    TypeRef = 0x01,
    TypeDef = 0x02,
    Field = 0x04,
    MethodDef = 0x06,
    MemberRef = 0x0A,
    StandAloneSig = 0x11,
    TypeSpec = 0x1B,
    AssemblyRef = 0x23,
    MethodSpec = 0x2B,
    UserString = 0x70,
}

/// A metadata token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Create a token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Create a token for `row` of `table`.
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token((u32::from(table as u8) << 24) | (row & 0x00FF_FFFF))
    }

    /// The raw token value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The table byte.
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The table, if it is one operands may refer to.
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_repr(self.table())
    }

    /// The 1-based row index.
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns `true` for the null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
