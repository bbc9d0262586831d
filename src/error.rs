use std::path::PathBuf;

use thiserror::Error;

use crate::patch::FailureReason;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Loading
/// - [`Error::NotFound`] - The input file does not exist
/// - [`Error::NotSupported`] - The input is not a managed metadata image
/// - [`Error::GoblinErr`] - The input looks like a PE file but its headers are corrupt
/// - [`Error::Malformed`] - The image is recognised but its content is corrupt
/// - [`Error::OutOfBounds`] - A read ran past the end of the input
///
/// ## Saving
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::WriteFailed`] - The output file could not be created, mapped or committed
///
/// ## Patching
/// - [`Error::PatchFailed`] - A patch step failed; carries the step name and the reason
/// - [`Error::Session`] - A session operation was requested in the wrong state
///
/// # Examples
///
/// ```rust,no_run
/// use dotpatch::{load_assembly, Error};
/// use std::path::Path;
///
/// match load_assembly(Path::new("Celeste.exe")) {
///     Ok(assembly) => println!("Loaded {}", assembly.name()),
///     Err(Error::NotFound(path)) => eprintln!("{} does not exist", path.display()),
///     Err(Error::NotSupported) => eprintln!("Not a managed image"),
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The requested input file does not exist.
    #[error("File not found - {}", .0.display())]
    NotFound(PathBuf),

    /// This file type is not supported.
    ///
    /// The input is neither a managed PE file nor a `DPCI` image, or uses a format
    /// version this library cannot read.
    #[error("This file type is not supported")]
    NotSupported,

    /// The file is damaged and could not be parsed or written.
    ///
    /// The error includes the source location where the malformation was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// PE parsing error from goblin.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// An out of bound access was attempted while parsing the file.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Writing the output file failed.
    ///
    /// Covers creating the temporary file, memory-mapping it, flushing it and moving it
    /// over the destination path.
    #[error("Failed to write output - {message}")]
    WriteFailed {
        /// Description of the failed write operation
        message: String,
    },

    /// A patch step could not be applied.
    ///
    /// Steps before the failing one have already modified the in-memory assembly; the
    /// assembly must not be saved.
    #[error("Patch step '{step}' failed - {reason}")]
    PatchFailed {
        /// Name of the step that failed
        step: String,
        /// Why the step failed
        reason: FailureReason,
    },

    /// A patch session was used out of order (e.g. saving before a plan completed).
    #[error("Invalid session state - {0}")]
    Session(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
