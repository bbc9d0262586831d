//! Managed PE images: `Celeste.exe` as the C# compiler wrote it.
//!
//! [`PeStore`] reads the CLI header, the metadata root and its streams (ECMA-335 II.24) and
//! builds a [`CilAssembly`] from the `#~` tables, the heaps and the method bodies. The
//! loaded assembly keeps the image it came from, and saving patches that image rather than
//! writing a new one:
//!
//! - method bodies are re-encoded in place when they fit, and otherwise moved to a new
//!   `.dpatch` section with the `MethodDef` RVA updated
//! - removed fields and assembly references are deleted from the tables together with
//!   every row that depends on them, and all references to later rows are renumbered
//! - the `#~` stream is rewritten in place; it can only shrink
//! - the PE checksum is recomputed if the image carried one
//!
//! The heaps are never touched, so an edit that would need a new string, blob or row is
//! refused: adding or renaming types, methods and fields, adding references, and IL that
//! uses an operand the image has no token for.

pub(crate) mod body;
mod headers;
mod heaps;
mod index;
mod reader;
mod signature;
pub(crate) mod tables;
mod writer;

use std::{collections::HashMap, fmt, ops::Range, path::Path};

use crate::{
    file::{File, Output},
    metadata::{CilAssembly, MetadataStore},
    Error, Result,
};

use headers::Headers;
use heaps::Heaps;
use index::OperandIndex;
use tables::TableStream;

/// Where a method body lives in the original image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BodySpan {
    /// File offset of the header
    pub offset: usize,
    /// Bytes from the header to the end of the last data section
    pub size: usize,
    pub fat: bool,
    /// `StandAloneSig` token of the locals, `0` for none
    pub local_sig: u32,
    /// Whether another method uses the same body
    pub shared: bool,
}

/// A parsed managed image, kept by the assemblies loaded from it.
pub(crate) struct PeImage {
    data: Vec<u8>,
    headers: Headers,
    /// File range of the `#~` stream
    table_stream: Range<usize>,
    strings: Range<usize>,
    user_strings: Range<usize>,
    blob: Range<usize>,
    tables: TableStream,
    bodies: HashMap<u32, BodySpan>,
    index: OperandIndex,
}

impl PeImage {
    fn heaps(&self) -> Heaps<'_> {
        Heaps {
            strings: &self.data[self.strings.clone()],
            user_strings: &self.data[self.user_strings.clone()],
            blob: &self.data[self.blob.clone()],
        }
    }
}

impl PartialEq for PeImage {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl fmt::Debug for PeImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeImage")
            .field("len", &self.data.len())
            .field("sections", &self.headers.sections.len())
            .field("bodies", &self.bodies.len())
            .finish_non_exhaustive()
    }
}

/// Managed PE/COFF images.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeStore;

impl PeStore {
    /// Returns `true` if `data` starts with the `MZ` signature.
    ///
    /// Only the signature is checked; [`PeStore::from_bytes`] can still reject the data.
    #[must_use]
    pub fn is_pe(data: &[u8]) -> bool {
        data.starts_with(b"MZ")
    }

    /// Decode a managed image held in memory.
    ///
    /// # Errors
    /// Returns [`Error::GoblinErr`] if `data` is not a PE file, [`Error::NotSupported`] for
    /// native images and [`Error::Malformed`] or [`Error::OutOfBounds`] for corrupt
    /// metadata.
    pub fn from_bytes(data: &[u8]) -> Result<CilAssembly> {
        reader::read_image(data.to_vec())
    }

    /// Patch the image `assembly` was loaded from with its current state.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] if `assembly` was not loaded from a PE image and
    /// [`Error::Malformed`] for edits the image cannot express.
    pub fn to_bytes(assembly: &CilAssembly) -> Result<Vec<u8>> {
        let image = assembly.origin.as_deref().ok_or(Error::NotSupported)?;
        writer::write_image(assembly, image)
    }
}

impl MetadataStore for PeStore {
    fn load(&self, path: &Path) -> Result<CilAssembly> {
        let file = File::from_path(path)?;
        Self::from_bytes(file.data())
    }

    fn save(&self, assembly: &CilAssembly, path: &Path) -> Result<()> {
        let image = Self::to_bytes(assembly)?;

        let mut output = Output::create(path, image.len() as u64)?;
        output.write_at(0, &image)?;
        output.finalize()
    }
}
