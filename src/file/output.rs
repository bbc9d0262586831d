//! Atomic, memory-mapped output files.
//!
//! An [`Output`] is created in the destination directory under a temporary name, filled
//! through a writable memory mapping and then renamed over the destination by
//! [`Output::finalize`]. Dropping an unfinalized output deletes the temporary file, so the
//! destination only ever holds either its previous content or a complete image.

use std::{
    fs,
    path::{Path, PathBuf},
};

use memmap2::{MmapMut, MmapOptions};

use crate::{Error, Result};

/// A memory-mapped output file that is committed with an atomic rename.
pub struct Output {
    /// Mapping of the temporary file; `None` for zero-sized outputs
    mmap: Option<MmapMut>,

    /// The temporary file next to the destination
    temp_path: PathBuf,

    /// The final destination
    target_path: PathBuf,

    /// Whether the file has been moved to its destination
    finalized: bool,
}

impl Output {
    /// Create a temporary file of `size` bytes next to `target_path` and map it.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteFailed`] if the file cannot be created, sized or mapped.
    pub fn create<P: AsRef<Path>>(target_path: P, size: u64) -> Result<Self> {
        let target_path = target_path.as_ref().to_path_buf();
        let temp_path = temp_path_for(&target_path)?;

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::WriteFailed {
                message: format!("Failed to create {}: {e}", temp_path.display()),
            })?;

        let mut output = Self {
            mmap: None,
            temp_path,
            target_path,
            finalized: false,
        };

        file.set_len(size).map_err(|e| Error::WriteFailed {
            message: format!("Failed to set file size: {e}"),
        })?;

        if size > 0 {
            let mmap = unsafe {
                MmapOptions::new()
                    .map_mut(&file)
                    .map_err(|e| Error::WriteFailed {
                        message: format!("Failed to create memory mapping: {e}"),
                    })?
            };
            output.mmap = Some(mmap);
        }

        Ok(output)
    }

    /// Write `data` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteFailed`] if the write would exceed the file size.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let size = self.size();
        let Some(mmap) = self.mmap.as_mut() else {
            return Err(Error::WriteFailed {
                message: format!("Write of {} bytes into an empty file", data.len()),
            });
        };

        let start = usize::try_from(offset).map_err(|_| Error::WriteFailed {
            message: format!("Offset {offset} is not addressable"),
        })?;
        let end = start
            .checked_add(data.len())
            .filter(|end| *end <= mmap.len())
            .ok_or_else(|| Error::WriteFailed {
                message: format!(
                    "Write would exceed file size: offset={offset}, len={}, file_size={size}",
                    data.len()
                ),
            })?;

        mmap[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Size of the output file in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.mmap.as_ref().map_or(0, |mmap| mmap.len() as u64)
    }

    /// Flush the mapping and move the temporary file over the destination.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteFailed`] if flushing or renaming fails; the temporary
    /// file is removed in that case.
    pub fn finalize(mut self) -> Result<()> {
        if let Some(mmap) = self.mmap.take() {
            mmap.flush().map_err(|e| Error::WriteFailed {
                message: format!("Failed to flush memory mapping: {e}"),
            })?;
        }

        fs::rename(&self.temp_path, &self.target_path).map_err(|e| Error::WriteFailed {
            message: format!(
                "Failed to move {} to {}: {e}",
                self.temp_path.display(),
                self.target_path.display()
            ),
        })?;

        self.finalized = true;
        Ok(())
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if !self.finalized {
            // Release the mapping before deleting the file it belongs to
            self.mmap = None;
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

fn temp_path_for(target: &Path) -> Result<PathBuf> {
    let Some(file_name) = target.file_name() else {
        return Err(Error::WriteFailed {
            message: format!("{} is not a file path", target.display()),
        });
    };

    let mut temp_name = file_name.to_os_string();
    temp_name.push(format!(".{}.tmp", std::process::id()));
    Ok(target.with_file_name(temp_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn finalize_moves_into_place() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.bin");

        let mut output = Output::create(&target, 8).unwrap();
        output.write_at(0, b"DPCI").unwrap();
        output.write_at(4, &[1, 0, 0, 0]).unwrap();
        assert!(!target.exists());

        output.finalize().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"DPCI\x01\x00\x00\x00");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn drop_without_finalize_keeps_destination() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.bin");
        fs::write(&target, b"original").unwrap();

        {
            let mut output = Output::create(&target, 4).unwrap();
            output.write_at(0, b"half").unwrap();
        }

        assert_eq!(fs::read(&target).unwrap(), b"original");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn write_past_end() {
        let dir = tempdir().unwrap();
        let mut output = Output::create(dir.path().join("out.bin"), 4).unwrap();

        assert!(matches!(
            output.write_at(2, &[0, 0, 0]),
            Err(Error::WriteFailed { .. })
        ));
    }
}
