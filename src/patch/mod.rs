//! The instruction patch engine.
//!
//! A patch is described as a [`PatchPlan`]: an ordered list of [`PatchStep`]s, each of which
//! either edits one method or removes an external assembly reference. Method edits find an
//! anchor instruction with a [`Pattern`] and then remove a window of instructions relative to
//! it, or replace the whole body with a stub. Fields that become unused can be pruned from
//! the method's declaring type once the instructions using them are gone.
//!
//! # Architecture
//!
//! - [`matcher`] - [`Pattern`] and [`OperandPredicate`], anchor search
//! - [`editor`] - atomic window removal and body replacement
//! - [`pruner`] - field and assembly reference removal
//! - [`plan`] - the declarative plan/step/edit description
//! - [`engine`] - [`apply_patch_plan`] and the stateful [`PatchSession`]
//! - [`catalog`] - built-in plans
//!
//! Steps run strictly in order and the first failure stops the plan. There is no rollback:
//! steps before the failing one stay applied to the in-memory assembly, which is why
//! [`PatchSession`] refuses to save anything once a plan has failed.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotpatch::patch::{catalog, PatchSession};
//! use std::path::Path;
//!
//! let plan = catalog::celeste_plan();
//! let mut session = PatchSession::open(Path::new("Celeste.exe"))?;
//!
//! if session.needs_patching(&plan) {
//!     let report = session.apply(&plan)?;
//!     println!("{} instructions removed", report.instructions_removed());
//!     session.save(Path::new("Celeste.exe.patched"))?;
//! }
//! # Ok::<(), dotpatch::Error>(())
//! ```

pub mod catalog;
pub mod editor;
pub mod engine;
pub mod matcher;
pub mod plan;
pub mod pruner;

pub use engine::{apply_patch_plan, PatchOutcome, PatchReport, PatchSession, SessionState, StepReport};
pub use matcher::{find_anchor, OperandPredicate, Pattern};
pub use plan::{BodyEdit, PatchPlan, PatchStep, StepAction};

use strum::IntoStaticStr;
use thiserror::Error;

/// Why a patch step failed.
///
/// Every variant identifies exactly which lookup or edit did not work out; almost always
/// the binary is a different build than the plan was written for.
#[derive(Error, Debug, Clone, PartialEq, Eq, IntoStaticStr)]
pub enum FailureReason {
    /// The step's type does not exist
    #[error("type {0} not found")]
    TypeNotFound(String),

    /// The step's method does not exist on its type
    #[error("method {type_name}::{method} not found")]
    MethodNotFound {
        /// Declaring type
        type_name: String,
        /// Method name
        method: String,
    },

    /// The step's method is abstract, extern or runtime-provided
    #[error("method {type_name}::{method} has no body")]
    MissingBody {
        /// Declaring type
        type_name: String,
        /// Method name
        method: String,
    },

    /// No instruction matches the anchor pattern
    #[error("no instruction matches {0}")]
    AnchorNotFound(String),

    /// The removal window does not fit the instruction sequence
    #[error("cannot remove {count} instructions at index {start} from a body of {len}")]
    OutOfRange {
        /// First index of the window
        start: isize,
        /// Number of instructions to remove
        count: usize,
        /// Length of the instruction sequence
        len: usize,
    },

    /// The field to prune does not exist on the type
    #[error("field {type_name}::{field} not found")]
    FieldNotFound {
        /// Declaring type
        type_name: String,
        /// Field name
        field: String,
    },
}

impl FailureReason {
    /// Stable name of the failure kind, e.g. `AnchorNotFound`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_messages() {
        let reason = FailureReason::AnchorNotFound("ldc.i4 504230".to_string());
        assert_eq!(reason.kind(), "AnchorNotFound");
        assert_eq!(reason.to_string(), "no instruction matches ldc.i4 504230");

        let reason = FailureReason::OutOfRange {
            start: 18,
            count: 3,
            len: 20,
        };
        assert_eq!(reason.kind(), "OutOfRange");
        assert_eq!(
            reason.to_string(),
            "cannot remove 3 instructions at index 18 from a body of 20"
        );
    }
}
