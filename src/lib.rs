// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'file/mod.rs' and 'file/output.rs' use mmap to map files into memory

//! # dotpatch
//!
//! Pattern-based patching of CIL method bodies.
//!
//! `dotpatch` loads a managed assembly into an owned, mutable model, applies a declarative
//! [`patch::PatchPlan`] to it and writes the result back out. A plan is a list of steps that
//! each locate an anchor instruction in one method and remove a window of instructions
//! around it, replace a method body with a stub, prune fields that are no longer used or
//! drop an external assembly reference.
//!
//! The built-in `celeste` plan removes every dependency of Celeste.exe on Steamworks.NET.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotpatch::prelude::*;
//! use std::path::Path;
//!
//! let plan = catalog::celeste_plan();
//! let mut session = PatchSession::open(Path::new("Celeste.exe"))?;
//!
//! if !session.is_target(&plan) {
//!     println!("Assembly is not Celeste.");
//! }
//!
//! let report = session.apply(&plan)?;
//! println!("Removed {} instructions", report.instructions_removed());
//! session.save(Path::new("Celeste.exe.patched"))?;
//! # Ok::<(), dotpatch::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`assembly`] - CIL opcodes, instructions, and the byte stream decoder and encoder
//! - [`metadata`] - the assembly model, managed PE images and the `DPCI` image format
//! - [`patch`] - anchor matching, body editing, pruning, plans and their execution
//! - [`prelude`] - re-exports of the commonly used types
//! - [`Error`] and [`Result`] - error handling
//!
//! Everything is single threaded and synchronous. The input file is memory-mapped for the
//! duration of the load only; the model owns all its data afterwards. An assembly loaded
//! from a PE image keeps a copy of that image, which saving patches in place.
//!
//! ## Error Handling
//!
//! ```rust,no_run
//! use dotpatch::{load_assembly, Error};
//! use std::path::Path;
//!
//! match load_assembly(Path::new("Celeste.exe")) {
//!     Ok(assembly) => println!("Loaded {}", assembly.name()),
//!     Err(Error::NotFound(path)) => println!("{} does not exist", path.display()),
//!     Err(Error::NotSupported) => println!("Not a managed assembly"),
//!     Err(Error::GoblinErr(e)) => println!("Broken PE file: {e}"),
//!     Err(Error::Malformed { message, .. }) => println!("Malformed image: {message}"),
//!     Err(e) => println!("Error: {e}"),
//! }
//! ```
//!
//! ## Fuzzing
//!
//! ```bash
//! cargo +nightly fuzz run image --release
//! cargo +nightly fuzz run pe --release
//! ```

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// CIL instructions based on ECMA-335 Partition III
///
/// Opcode tables, the owned [`assembly::Instruction`] representation, and the two
/// directions between instructions and bytes:
///
/// - [`assembly::decode_stream`] - bytes to instructions, tokens resolved by a
///   [`assembly::TokenResolver`]
/// - [`assembly::encode_stream`] - instructions to bytes after a [`assembly::Layout`] pass
///   that remaps branch targets
///
/// # Examples
///
/// ```rust
/// use dotpatch::{assembly::{decode_stream, OpCode, RawTokens}, Parser};
///
/// let code = [0x16, 0x2A]; // ldc.i4.0, ret
/// let instructions = decode_stream(&mut Parser::new(&code), &RawTokens)?;
///
/// assert_eq!(instructions[0].opcode, OpCode::LDC_I4_0);
/// assert_eq!(instructions[1].to_string(), "ret");
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub mod assembly;

/// The mutable assembly model and its on-disk formats
///
/// A [`CilAssembly`] owns its types, their fields and methods, and the external assembly
/// references. Method bodies hold decoded [`assembly::Instruction`]s whose metadata
/// operands are resolved to names. Assemblies are read from managed PE images or `DPCI`
/// images; [`metadata::AutoStore`] tells them apart.
pub mod metadata;

/// The instruction patch engine
pub mod patch;

/// Convenient re-exports of the most commonly used types.
///
/// ```rust,no_run
/// use dotpatch::prelude::*;
///
/// let assembly = load_assembly(std::path::Path::new("Celeste.exe"))?;
/// println!("{} methods", assembly.method_count());
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub mod prelude;

/// `dotpatch` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotpatch` Error type
///
/// The main error type for all operations in this crate, from loading an image through
/// applying a plan to saving the result.
pub use error::Error;

/// Low-level file access and binary parsing.
pub use file::{File, Parser};

/// Load and save assemblies in the format of the file.
pub use metadata::{load_assembly, save_assembly, CilAssembly};
