//! The metadata model of a managed assembly and its on-disk image format.
//!
//! # Key Components
//!
//! - [`CilAssembly`] - the loaded assembly: types, external references, name and version
//! - [`TypeDef`], [`FieldDef`], [`MethodDef`], [`MethodBody`] - what the assembly defines
//! - [`AssemblyRef`], [`TypeRef`], [`MemberRef`] - what it refers to
//! - [`Token`] - raw metadata handles as they appear in CIL
//! - [`MetadataStore`] - the boundary to binary formats; [`AutoStore`] picks one from the data
//! - [`PeStore`] - managed PE images such as `Celeste.exe`, patched in place on save
//! - [`image`] - the `DPCI` image format of [`ImageStore`], for fixtures and built assemblies
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotpatch::metadata::load_assembly;
//! use std::path::Path;
//!
//! let assembly = load_assembly(Path::new("Celeste.exe"))?;
//! if let Some(ty) = assembly.find_type("Celeste.Celeste") {
//!     for method in &ty.methods {
//!         let count = method.body.as_ref().map_or(0, |b| b.instructions().len());
//!         println!("{}::{} ({count} instructions)", ty.full_name, method.name);
//!     }
//! }
//! # Ok::<(), dotpatch::Error>(())
//! ```

mod cilassembly;
pub mod image;
mod method;
pub(crate) mod pe;
mod references;
mod store;
mod token;
mod typedef;

pub use cilassembly::CilAssembly;
pub use image::ImageStore;
pub use method::{
    ExceptionHandler, ExceptionHandlerFlags, MethodAttributes, MethodBody, MethodDef,
};
pub use pe::PeStore;
pub use references::{AssemblyRef, AssemblyVersion, MemberRef, TypeRef};
pub use store::{load_assembly, save_assembly, AutoStore, MetadataStore};
pub use token::{TableId, Token};
pub use typedef::{FieldAttributes, FieldDef, TypeAttributes, TypeDef};
