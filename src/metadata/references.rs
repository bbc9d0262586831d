//! References from an assembly to other metadata.
//!
//! [`AssemblyRef`] rows name the external assemblies a binary depends on. [`TypeRef`] and
//! [`MemberRef`] are what instruction operands point at: plain lookup keys made of names,
//! never ownership edges into another assembly's model.

use std::fmt;

/// Four-part assembly version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssemblyVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Build number
    pub build: u16,
    /// Revision number
    pub revision: u16,
}

impl AssemblyVersion {
    /// Create a version from its four parts.
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        AssemblyVersion {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// A reference to an external assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyRef {
    /// Simple name, e.g. `Steamworks.NET`
    pub name: String,
    /// Referenced version
    pub version: AssemblyVersion,
    /// Public key token, empty for unsigned assemblies
    pub public_key_token: Vec<u8>,
}

impl AssemblyRef {
    /// Create a reference without a public key token.
    #[must_use]
    pub fn new(name: impl Into<String>, version: AssemblyVersion) -> Self {
        AssemblyRef {
            name: name.into(),
            version,
            public_key_token: Vec::new(),
        }
    }
}

/// A reference to a type, by full name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    /// Name of the assembly reference that defines the type, `None` for the loaded
    /// assembly itself
    pub scope: Option<String>,
    /// `Namespace.Name`, nested types as `Outer/Inner`
    pub full_name: String,
}

impl TypeRef {
    /// Reference to a type defined in the assembly itself.
    #[must_use]
    pub fn local(full_name: impl Into<String>) -> Self {
        TypeRef {
            scope: None,
            full_name: full_name.into(),
        }
    }

    /// Reference to a type defined in the external assembly `scope`.
    #[must_use]
    pub fn external(scope: impl Into<String>, full_name: impl Into<String>) -> Self {
        TypeRef {
            scope: Some(scope.into()),
            full_name: full_name.into(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "[{scope}]{}", self.full_name),
            None => f.write_str(&self.full_name),
        }
    }
}

/// A reference to a field or method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// The declaring type
    pub parent: TypeRef,
    /// Member name
    pub name: String,
    /// Signature text, e.g. `void()` or `Steamworks.CSteamID`
    pub signature: String,
}

impl MemberRef {
    /// Create a member reference.
    #[must_use]
    pub fn new(parent: TypeRef, name: impl Into<String>, signature: impl Into<String>) -> Self {
        MemberRef {
            parent,
            name: name.into(),
            signature: signature.into(),
        }
    }

    /// Returns `true` if this refers to `name` on the type `declaring_type`, whatever the
    /// signature or defining assembly.
    #[must_use]
    pub fn is(&self, declaring_type: &str, name: &str) -> bool {
        self.parent.full_name == declaring_type && self.name == name
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.parent, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_identity_ignores_signature_and_scope() {
        let run = MemberRef::new(
            TypeRef::external("Steamworks.NET", "Steamworks.SteamAPI"),
            "RunCallbacks",
            "void()",
        );

        assert!(run.is("Steamworks.SteamAPI", "RunCallbacks"));
        assert!(!run.is("Steamworks.SteamAPI", "Init"));
        assert!(!run.is("Steamworks.SteamUser", "RunCallbacks"));
    }

    #[test]
    fn display() {
        assert_eq!(AssemblyVersion::new(1, 3, 0, 0).to_string(), "1.3.0.0");
        assert_eq!(TypeRef::local("Celeste.Celeste").to_string(), "Celeste.Celeste");
        assert_eq!(
            MemberRef::new(TypeRef::local("Celeste.Celeste"), "SteamID", "Steamworks.CSteamID")
                .to_string(),
            "Celeste.Celeste::SteamID"
        );
    }
}
