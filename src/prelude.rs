//! # dotpatch Prelude
//!
//! The types needed to load an assembly, run a plan against it and save the result.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotpatch operations
pub use crate::Error;

/// The result type used throughout dotpatch
pub use crate::Result;

// ================================================================================================
// Loading and Saving
// ================================================================================================

pub use crate::metadata::{
    load_assembly, save_assembly, AutoStore, CilAssembly, ImageStore, MetadataStore, PeStore,
};

// ================================================================================================
// Model
// ================================================================================================

pub use crate::metadata::{
    AssemblyRef, AssemblyVersion, FieldDef, MemberRef, MethodBody, MethodDef, TypeDef, TypeRef,
};

pub use crate::assembly::{Immediate, Instruction, OpCode, Operand};

// ================================================================================================
// Patching
// ================================================================================================

pub use crate::patch::{
    apply_patch_plan, catalog, find_anchor, BodyEdit, FailureReason, OperandPredicate,
    PatchOutcome, PatchPlan, PatchReport, PatchSession, PatchStep, Pattern, SessionState,
};
