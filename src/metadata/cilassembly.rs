//! The in-memory model of a loaded assembly.

use std::sync::Arc;

use crate::metadata::{pe::PeImage, AssemblyRef, AssemblyVersion, TypeDef};

/// A loaded managed assembly.
///
/// Owns every type, method body and external reference. A `CilAssembly` is edited in place
/// by the patch engine and written back with [`crate::save_assembly`].
///
/// # Examples
///
/// ```rust
/// use dotpatch::metadata::{AssemblyRef, AssemblyVersion, CilAssembly};
///
/// let mut assembly = CilAssembly::new("Celeste", AssemblyVersion::new(1, 4, 0, 0));
/// assembly
///     .refs
///     .push(AssemblyRef::new("Steamworks.NET", AssemblyVersion::new(9, 0, 0, 0)));
///
/// assert!(assembly.has_external_reference("Steamworks.NET"));
/// assert!(assembly.remove_external_reference("Steamworks.NET"));
/// assert!(!assembly.remove_external_reference("Steamworks.NET"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CilAssembly {
    /// Simple assembly name
    pub name: String,
    /// Assembly version
    pub version: AssemblyVersion,
    /// Defined types in declaration order
    pub types: Vec<TypeDef>,
    /// External assembly references in declaration order
    pub refs: Vec<AssemblyRef>,
    /// The PE image the assembly was loaded from
    pub(crate) origin: Option<Arc<PeImage>>,
}

impl CilAssembly {
    /// Create an empty assembly.
    #[must_use]
    pub fn new(name: impl Into<String>, version: AssemblyVersion) -> Self {
        CilAssembly {
            name: name.into(),
            version,
            types: Vec::new(),
            refs: Vec::new(),
            origin: None,
        }
    }

    /// The assembly name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Find a type by its full name, e.g. `Celeste.Celeste`.
    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|ty| ty.full_name == full_name)
    }

    /// Mutable variant of [`CilAssembly::find_type`].
    pub fn find_type_mut(&mut self, full_name: &str) -> Option<&mut TypeDef> {
        self.types.iter_mut().find(|ty| ty.full_name == full_name)
    }

    /// External assembly references.
    #[must_use]
    pub fn external_references(&self) -> &[AssemblyRef] {
        &self.refs
    }

    /// Returns `true` if an external reference called `name` exists.
    #[must_use]
    pub fn has_external_reference(&self, name: &str) -> bool {
        self.refs.iter().any(|r| r.name == name)
    }

    /// Remove every external reference called `name`.
    ///
    /// Returns `false` if there was none, so repeated calls are harmless.
    pub fn remove_external_reference(&mut self, name: &str) -> bool {
        let before = self.refs.len();
        self.refs.retain(|r| r.name != name);
        self.refs.len() != before
    }

    /// Total number of methods across all types.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.types.iter().map(|ty| ty.methods.len()).sum()
    }
}
