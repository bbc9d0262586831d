//! Declarative patch plans.
//!
//! ```rust
//! use dotpatch::{
//!     assembly::{Instruction, OpCode},
//!     patch::{PatchPlan, PatchStep, Pattern},
//! };
//!
//! let plan = PatchPlan::new("demo", "Demo.Game", "Vendor.Sdk")
//!     .describe("Strip the vendor SDK")
//!     .step(PatchStep::remove_reference("Vendor.Sdk"))
//!     .step(
//!         PatchStep::method("Demo.Game", "Update")
//!             .remove_window(Pattern::call("Vendor.Api", "Poll"), 0, 1),
//!     )
//!     .step(
//!         PatchStep::method("Demo.Stats", "Enabled")
//!             .replace_body(vec![Instruction::new(OpCode::LDC_I4_0), Instruction::ret()]),
//!     );
//!
//! assert_eq!(plan.steps.len(), 3);
//! assert_eq!(plan.steps[1].name, "Demo.Game::Update");
//! ```

use std::fmt;

use crate::{
    assembly::Instruction,
    metadata::CilAssembly,
    patch::Pattern,
};

/// A single edit of a method body.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyEdit {
    /// Remove `count` instructions starting `offset` instructions after the anchor
    RemoveWindow {
        /// The anchor pattern
        anchor: Pattern,
        /// Signed distance from the anchor to the first removed instruction
        offset: isize,
        /// Number of instructions to remove
        count: usize,
    },
    /// Replace the entire body
    ReplaceBody(Vec<Instruction>),
}

impl fmt::Display for BodyEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyEdit::RemoveWindow {
                anchor,
                offset: 0,
                count,
            } => write!(f, "remove {count} at `{anchor}`"),
            BodyEdit::RemoveWindow {
                anchor,
                offset,
                count,
            } => write!(f, "remove {count} at `{anchor}` {offset:+}"),
            BodyEdit::ReplaceBody(instructions) => {
                f.write_str("replace body with [")?;
                for (i, instruction) in instructions.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{instruction}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// What a step does.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Edit one method, then prune fields from its declaring type
    Method {
        /// Full name of the declaring type
        type_name: String,
        /// Method name; the first method with this name is used
        method: String,
        /// Edits, applied in order
        edits: Vec<BodyEdit>,
        /// Fields of `type_name` to remove after the edits
        remove_fields: Vec<String>,
    },
    /// Remove an external assembly reference; an absent reference is not a failure
    Reference {
        /// Assembly reference name
        name: String,
    },
}

/// A named step of a [`PatchPlan`].
#[derive(Debug, Clone, PartialEq)]
pub struct PatchStep {
    /// Name reported in logs and failures
    pub name: String,
    /// The work to do
    pub action: StepAction,
}

impl PatchStep {
    /// A step editing `type_name::method`, named after its target.
    #[must_use]
    pub fn method(type_name: &str, method: &str) -> Self {
        PatchStep {
            name: format!("{type_name}::{method}"),
            action: StepAction::Method {
                type_name: type_name.to_string(),
                method: method.to_string(),
                edits: Vec::new(),
                remove_fields: Vec::new(),
            },
        }
    }

    /// A step removing the external assembly reference `name`.
    #[must_use]
    pub fn remove_reference(name: &str) -> Self {
        PatchStep {
            name: format!("AssemblyRef {name}"),
            action: StepAction::Reference {
                name: name.to_string(),
            },
        }
    }

    /// Rename the step.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a window removal relative to the first instruction matching `anchor`.
    #[must_use]
    pub fn remove_window(self, anchor: Pattern, offset: isize, count: usize) -> Self {
        self.edit(BodyEdit::RemoveWindow {
            anchor,
            offset,
            count,
        })
    }

    /// Append a full body replacement.
    #[must_use]
    pub fn replace_body(self, instructions: Vec<Instruction>) -> Self {
        self.edit(BodyEdit::ReplaceBody(instructions))
    }

    /// Remove field `name` from the target type after all edits of this step.
    #[must_use]
    pub fn remove_field(mut self, name: &str) -> Self {
        if let StepAction::Method { remove_fields, .. } = &mut self.action {
            remove_fields.push(name.to_string());
        }
        self
    }

    fn edit(mut self, edit: BodyEdit) -> Self {
        if let StepAction::Method { edits, .. } = &mut self.action {
            edits.push(edit);
        }
        self
    }
}

/// An ordered list of steps plus the checks deciding whether it applies to a binary.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchPlan {
    /// Short identifier, e.g. `celeste`
    pub name: String,
    /// Human readable summary
    pub description: String,
    /// Type whose presence identifies the binary the plan was written for
    pub target_type: String,
    /// External reference the plan removes
    pub dependency: String,
    /// Steps in execution order
    pub steps: Vec<PatchStep>,
}

impl PatchPlan {
    /// Create an empty plan.
    #[must_use]
    pub fn new(name: &str, target_type: &str, dependency: &str) -> Self {
        PatchPlan {
            name: name.to_string(),
            description: String::new(),
            target_type: target_type.to_string(),
            dependency: dependency.to_string(),
            steps: Vec::new(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Append a step.
    #[must_use]
    pub fn step(mut self, step: PatchStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Whether `assembly` is the kind of binary this plan was written for.
    #[must_use]
    pub fn is_target(&self, assembly: &CilAssembly) -> bool {
        assembly.find_type(&self.target_type).is_some()
    }

    /// Whether `assembly` is a target that still references the dependency.
    #[must_use]
    pub fn needs_patching(&self, assembly: &CilAssembly) -> bool {
        self.is_target(assembly) && assembly.has_external_reference(&self.dependency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::OpCode,
        metadata::{AssemblyRef, AssemblyVersion, TypeAttributes, TypeDef},
    };

    fn plan() -> PatchPlan {
        PatchPlan::new("demo", "Demo.Game", "Vendor.Sdk")
    }

    #[test]
    fn checks() {
        let mut assembly = CilAssembly::new("Demo", AssemblyVersion::default());
        assert!(!plan().is_target(&assembly));

        assembly
            .refs
            .push(AssemblyRef::new("Vendor.Sdk", AssemblyVersion::default()));
        assert!(!plan().needs_patching(&assembly));

        assembly
            .types
            .push(TypeDef::new("Demo.Game", TypeAttributes::PUBLIC));
        assert!(plan().is_target(&assembly));
        assert!(plan().needs_patching(&assembly));

        assembly.remove_external_reference("Vendor.Sdk");
        assert!(plan().is_target(&assembly));
        assert!(!plan().needs_patching(&assembly));
    }

    #[test]
    fn step_builder() {
        let step = PatchStep::method("Demo.Game", "Main")
            .remove_window(Pattern::ldsfld("Demo.Game", "Id"), -1, 4)
            .remove_field("Id")
            .named("main");

        assert_eq!(step.name, "main");
        let StepAction::Method {
            edits,
            remove_fields,
            ..
        } = &step.action
        else {
            panic!("expected a method step");
        };
        assert_eq!(edits.len(), 1);
        assert_eq!(remove_fields, &["Id".to_string()]);
        assert_eq!(edits[0].to_string(), "remove 4 at `ldsfld Demo.Game::Id` -1");
    }

    #[test]
    fn reference_steps_ignore_body_edits() {
        let step = PatchStep::remove_reference("Vendor.Sdk")
            .replace_body(vec![Instruction::ret()])
            .remove_field("Id");

        assert_eq!(
            step.action,
            StepAction::Reference {
                name: "Vendor.Sdk".to_string()
            }
        );
    }

    #[test]
    fn edit_display() {
        let edit = BodyEdit::ReplaceBody(vec![Instruction::new(OpCode::LDC_I4_0), Instruction::ret()]);
        assert_eq!(edit.to_string(), "replace body with [ldc.i4.0, ret]");

        let edit = BodyEdit::RemoveWindow {
            anchor: Pattern::ldc_i4(504_230),
            offset: 0,
            count: 3,
        };
        assert_eq!(edit.to_string(), "remove 3 at `ldc.i4 504230`");
    }
}
