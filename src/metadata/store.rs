//! The boundary between the patch engine and binary formats.

use std::path::Path;

use crate::{
    file::{File, Output},
    metadata::{CilAssembly, ImageStore, PeStore},
    Error, Result,
};

/// A binary format the patch engine can load assemblies from and save them to.
pub trait MetadataStore {
    /// Load the assembly stored at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotFound`] if `path` does not exist,
    /// [`crate::Error::NotSupported`] if the file is not in this store's format and
    /// [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for corrupt content.
    fn load(&self, path: &Path) -> Result<CilAssembly>;

    /// Persist `assembly` to `path`, replacing any existing file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the assembly cannot be encoded, and
    /// [`crate::Error::WriteFailed`] or [`crate::Error::FileError`] on I/O failures. The
    /// destination is left untouched on error.
    fn save(&self, assembly: &CilAssembly, path: &Path) -> Result<()>;
}

/// Picks the format from the data: managed PE images go to [`PeStore`], `DPCI` images to
/// [`ImageStore`].
///
/// Assemblies are saved in the format they were loaded from; assemblies built in memory
/// are saved as `DPCI` images.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoStore;

impl AutoStore {
    /// Decode an assembly held in memory.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] for data in neither format, otherwise see
    /// [`PeStore::from_bytes`] and [`ImageStore::from_bytes`].
    pub fn from_bytes(data: &[u8]) -> Result<CilAssembly> {
        if PeStore::is_pe(data) {
            PeStore::from_bytes(data)
        } else if ImageStore::is_image(data) {
            ImageStore::from_bytes(data)
        } else {
            Err(Error::NotSupported)
        }
    }

    /// Encode `assembly` in the format it was loaded from.
    ///
    /// # Errors
    /// See [`PeStore::to_bytes`] and [`ImageStore::to_bytes`].
    pub fn to_bytes(assembly: &CilAssembly) -> Result<Vec<u8>> {
        if assembly.origin.is_some() {
            PeStore::to_bytes(assembly)
        } else {
            ImageStore::to_bytes(assembly)
        }
    }
}

impl MetadataStore for AutoStore {
    fn load(&self, path: &Path) -> Result<CilAssembly> {
        let file = File::from_path(path)?;
        Self::from_bytes(file.data())
    }

    fn save(&self, assembly: &CilAssembly, path: &Path) -> Result<()> {
        let data = Self::to_bytes(assembly)?;

        let mut output = Output::create(path, data.len() as u64)?;
        output.write_at(0, &data)?;
        output.finalize()
    }
}

/// Load an assembly with [`AutoStore`].
///
/// # Errors
/// See [`MetadataStore::load`].
pub fn load_assembly(path: &Path) -> Result<CilAssembly> {
    AutoStore.load(path)
}

/// Save an assembly with [`AutoStore`].
///
/// # Errors
/// See [`MetadataStore::save`].
pub fn save_assembly(assembly: &CilAssembly, path: &Path) -> Result<()> {
    AutoStore.save(assembly, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{celeste_assembly, pe::PeBuilder};
    use tempfile::tempdir;

    #[test]
    fn format_follows_the_data() {
        let image = ImageStore::to_bytes(&celeste_assembly()).unwrap();
        let from_image = AutoStore::from_bytes(&image).unwrap();
        assert!(from_image.origin.is_none());
        assert_eq!(AutoStore::to_bytes(&from_image).unwrap(), image);

        let pe = PeBuilder::celeste().build();
        let from_pe = AutoStore::from_bytes(&pe).unwrap();
        assert!(from_pe.origin.is_some());
        assert_eq!(AutoStore::to_bytes(&from_pe).unwrap(), pe);
    }

    #[test]
    fn unknown_data_is_not_supported() {
        assert!(matches!(AutoStore::from_bytes(b"\x7fELF"), Err(Error::NotSupported)));
        assert!(matches!(AutoStore::from_bytes(b""), Err(Error::NotSupported)));
    }

    #[test]
    fn truncated_pe_is_an_error_of_its_own() {
        let err = AutoStore::from_bytes(b"MZ\x90\x00\x03\x00\x00\x00").unwrap_err();
        assert!(matches!(err, Error::GoblinErr(_)), "{err}");
    }

    #[test]
    fn save_and_load_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Celeste.exe");
        let assembly = celeste_assembly();

        save_assembly(&assembly, &path).unwrap();
        let loaded = load_assembly(&path).unwrap();

        assert_eq!(loaded.types.len(), assembly.types.len());
        assert!(loaded.has_external_reference("Steamworks.NET"));
    }

    #[test]
    fn failed_save_keeps_destination() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Celeste.exe.patched");
        std::fs::write(&path, b"previous").unwrap();

        let mut assembly = celeste_assembly();
        assembly.remove_external_reference("Steamworks.NET");

        assert!(save_assembly(&assembly, &path).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"previous");
    }

    #[test]
    fn missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_assembly(&dir.path().join("Celeste.exe")),
            Err(Error::NotFound(_))
        ));
    }
}
