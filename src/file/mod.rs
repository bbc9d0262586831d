//! Input and output plumbing for metadata images.
//!
//! - [`File`] gives read access to an input image, either memory-mapped from disk or held
//!   in an owned buffer.
//! - [`Output`] writes a finished image to a temporary sibling of the destination and moves
//!   it into place only once everything has been written and flushed.
//! - [`Parser`] and the [`io`] helpers do the actual byte-level work.

pub mod io;
mod output;
mod parser;

pub use output::Output;
pub use parser::Parser;

use std::{fs, io::ErrorKind, path::Path};

use memmap2::Mmap;

use crate::{Error, Result};

enum Backend {
    Mapped(Mmap),
    Memory(Vec<u8>),
}

/// Read-only access to the bytes of an input image.
///
/// Files on disk are memory-mapped; the mapping lives only as long as the [`File`], which
/// the loader drops as soon as the image has been decoded into owned data.
pub struct File {
    backend: Backend,
}

impl File {
    /// Memory-map the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotFound`] if the file does not exist,
    /// [`crate::Error::FileError`] for other I/O failures and [`crate::Error::Error`] if
    /// the mapping cannot be created.
    pub fn from_path(path: &Path) -> Result<File> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(path.to_path_buf()))
            }
            Err(error) => return Err(Error::FileError(error)),
        };

        // Zero-length mappings are rejected on some platforms.
        if file.metadata()?.len() == 0 {
            return Ok(File {
                backend: Backend::Memory(Vec::new()),
            });
        }

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(Error::Error(error.to_string())),
        };

        Ok(File {
            backend: Backend::Mapped(mmap),
        })
    }

    /// Wrap an in-memory buffer.
    #[must_use]
    pub fn from_mem(data: Vec<u8>) -> File {
        File {
            backend: Backend::Memory(data),
        }
    }

    /// The complete file contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        match &self.backend {
            Backend::Mapped(mmap) => &mmap[..],
            Backend::Memory(data) => data,
        }
    }

    /// Length of the file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` for an empty file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }
}
