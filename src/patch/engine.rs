//! Plan execution.
//!
//! [`apply_patch_plan`] runs the steps of a [`PatchPlan`] against an in-memory assembly and
//! reports what it did. [`PatchSession`] wraps it with the load and save around it and
//! enforces the order load → apply → save.

use std::path::Path;

use log::{debug, info};
use strum::Display;

use crate::{
    assembly::Instruction,
    metadata::{AutoStore, CilAssembly, MetadataStore, MethodBody, MethodDef},
    patch::{editor, pruner, BodyEdit, FailureReason, PatchPlan, PatchStep, StepAction},
    Error, Result,
};

/// What a single step changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Step name
    pub name: String,
    /// Instructions removed, by window removals and by replaced bodies
    pub instructions_removed: usize,
    /// Instructions installed by body replacements
    pub instructions_inserted: usize,
    /// Fields pruned after the edits
    pub fields_removed: Vec<String>,
    /// For reference steps, whether the reference was present
    pub reference_found: Option<bool>,
}

/// Summary of the steps that were applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// One entry per applied step, in execution order
    pub steps: Vec<StepReport>,
}

impl PatchReport {
    /// Total number of instructions removed.
    #[must_use]
    pub fn instructions_removed(&self) -> usize {
        self.steps.iter().map(|step| step.instructions_removed).sum()
    }

    /// Total number of instructions inserted.
    #[must_use]
    pub fn instructions_inserted(&self) -> usize {
        self.steps.iter().map(|step| step.instructions_inserted).sum()
    }
}

/// Result of running a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
    /// Every step was applied
    Applied(PatchReport),
    /// A step failed; the steps in `applied` remain applied and later steps did not run
    Failed {
        /// Name of the failing step
        step: String,
        /// Why it failed
        reason: FailureReason,
        /// Steps applied before the failure
        applied: PatchReport,
    },
}

impl PatchOutcome {
    /// Returns `true` if every step was applied.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, PatchOutcome::Applied(_))
    }

    /// Steps that were applied, whatever the outcome.
    #[must_use]
    pub fn report(&self) -> &PatchReport {
        match self {
            PatchOutcome::Applied(report) | PatchOutcome::Failed { applied: report, .. } => report,
        }
    }

    /// Convert into a [`Result`], turning a failed step into [`Error::PatchFailed`].
    ///
    /// # Errors
    /// Returns [`Error::PatchFailed`] if a step failed.
    pub fn into_result(self) -> Result<PatchReport> {
        match self {
            PatchOutcome::Applied(report) => Ok(report),
            PatchOutcome::Failed { step, reason, .. } => Err(Error::PatchFailed { step, reason }),
        }
    }
}

/// Apply the steps of `plan` to `assembly` in order.
///
/// The first failing step stops the run. Steps before it stay applied; no rollback is
/// attempted.
///
/// # Examples
///
/// ```rust
/// use dotpatch::{
///     assembly::Instruction,
///     metadata::{AssemblyVersion, CilAssembly, MethodAttributes, MethodBody, MethodDef, TypeAttributes, TypeDef},
///     patch::{apply_patch_plan, PatchPlan, PatchStep},
/// };
///
/// let mut assembly = CilAssembly::new("Demo", AssemblyVersion::default());
/// assembly.types.push(TypeDef::new("Demo.Game", TypeAttributes::PUBLIC).with_method(
///     MethodDef::new(
///         "Tick",
///         MethodAttributes::PUBLIC,
///         "void()",
///         Some(MethodBody::new(8, vec![Instruction::ldc_i4(1), Instruction::ret()])),
///     ),
/// ));
///
/// let plan = PatchPlan::new("demo", "Demo.Game", "Vendor.Sdk")
///     .step(PatchStep::method("Demo.Game", "Tick").replace_body(vec![Instruction::ret()]));
///
/// let outcome = apply_patch_plan(&mut assembly, &plan);
/// assert!(outcome.is_applied());
/// assert_eq!(outcome.report().instructions_removed(), 2);
/// ```
pub fn apply_patch_plan(assembly: &mut CilAssembly, plan: &PatchPlan) -> PatchOutcome {
    info!("Applying patch plan {}", plan.name);

    let mut applied = PatchReport::default();
    for step in &plan.steps {
        match apply_step(assembly, step) {
            Ok(report) => applied.steps.push(report),
            Err(reason) => {
                return PatchOutcome::Failed {
                    step: step.name.clone(),
                    reason,
                    applied,
                }
            }
        }
    }

    info!("Done");
    PatchOutcome::Applied(applied)
}

fn apply_step(assembly: &mut CilAssembly, step: &PatchStep) -> std::result::Result<StepReport, FailureReason> {
    let mut report = StepReport {
        name: step.name.clone(),
        ..StepReport::default()
    };

    match &step.action {
        StepAction::Reference { name } => {
            report.reference_found = Some(pruner::remove_external_reference(assembly, name));
        }
        StepAction::Method {
            type_name,
            method,
            edits,
            remove_fields,
        } => {
            debug!("Patching method {type_name}::{method}");

            let ty = assembly
                .find_type_mut(type_name)
                .ok_or_else(|| FailureReason::TypeNotFound(type_name.clone()))?;

            {
                let body = method_body(ty.find_method_mut(method), type_name, method)?;
                for edit in edits {
                    apply_edit(body, edit, &mut report)?;
                }
            }

            for field in remove_fields {
                pruner::remove_field(ty, field)?;
                report.fields_removed.push(field.clone());
            }
        }
    }

    Ok(report)
}

fn method_body<'a>(
    method: Option<&'a mut MethodDef>,
    type_name: &str,
    name: &str,
) -> std::result::Result<&'a mut MethodBody, FailureReason> {
    let method = method.ok_or_else(|| FailureReason::MethodNotFound {
        type_name: type_name.to_string(),
        method: name.to_string(),
    })?;

    method.body.as_mut().ok_or_else(|| FailureReason::MissingBody {
        type_name: type_name.to_string(),
        method: name.to_string(),
    })
}

fn apply_edit(
    body: &mut MethodBody,
    edit: &BodyEdit,
    report: &mut StepReport,
) -> std::result::Result<(), FailureReason> {
    match edit {
        BodyEdit::RemoveWindow {
            anchor,
            offset,
            count,
        } => {
            let index = anchor.locate(body.instructions())?;
            let len = body.instructions().len();
            let start = window_start(index, *offset).ok_or_else(|| FailureReason::OutOfRange {
                start: isize::try_from(index)
                    .unwrap_or(isize::MAX)
                    .saturating_add(*offset),
                count: *count,
                len,
            })?;

            let removed = editor::remove_window(body, start, *count)?;
            debug!(
                "Removed {} instructions at index {start}: {}",
                removed.len(),
                join(&removed)
            );
            report.instructions_removed += removed.len();
        }
        BodyEdit::ReplaceBody(instructions) => {
            report.instructions_removed += editor::replace_body(body, instructions.clone());
            report.instructions_inserted += instructions.len();
        }
    }
    Ok(())
}

fn window_start(anchor: usize, offset: isize) -> Option<usize> {
    if offset >= 0 {
        anchor.checked_add(offset.unsigned_abs())
    } else {
        anchor.checked_sub(offset.unsigned_abs())
    }
}

fn join(instructions: &[Instruction]) -> String {
    instructions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Lifecycle of a [`PatchSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    /// Loaded, no plan applied yet
    Ready,
    /// A plan is being applied
    Running,
    /// A plan was applied completely; the assembly may be saved
    Completed,
    /// A plan failed part way; the assembly must not be saved
    Aborted,
}

/// Owns one assembly from load to save.
///
/// A session accepts exactly one plan. Saving is only possible after that plan was applied
/// in full, so a partially patched assembly never reaches disk.
///
/// # Examples
///
/// ```rust,no_run
/// use dotpatch::patch::{catalog, PatchSession};
/// use std::path::Path;
///
/// let mut session = PatchSession::open(Path::new("Celeste.exe"))?;
/// session.apply(&catalog::celeste_plan())?;
/// session.save(Path::new("Celeste.exe.patched"))?;
/// # Ok::<(), dotpatch::Error>(())
/// ```
#[derive(Debug)]
pub struct PatchSession<S: MetadataStore = AutoStore> {
    store: S,
    assembly: CilAssembly,
    state: SessionState,
}

impl PatchSession<AutoStore> {
    /// Load an image from `path`.
    ///
    /// # Errors
    /// Returns the errors of [`MetadataStore::load`].
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(AutoStore, path)
    }

    /// Start a session over an assembly that is already in memory.
    #[must_use]
    pub fn new(assembly: CilAssembly) -> Self {
        Self::with_store(AutoStore, assembly)
    }
}

impl<S: MetadataStore> PatchSession<S> {
    /// Load `path` through `store`.
    ///
    /// # Errors
    /// Returns the errors of [`MetadataStore::load`].
    pub fn open_with(store: S, path: &Path) -> Result<Self> {
        let assembly = store.load(path)?;
        Ok(Self::with_store(store, assembly))
    }

    /// Start a session over `assembly` that saves through `store`.
    #[must_use]
    pub fn with_store(store: S, assembly: CilAssembly) -> Self {
        PatchSession {
            store,
            assembly,
            state: SessionState::Ready,
        }
    }

    /// The assembly, in whatever state the session left it.
    #[must_use]
    pub fn assembly(&self) -> &CilAssembly {
        &self.assembly
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// See [`PatchPlan::is_target`].
    #[must_use]
    pub fn is_target(&self, plan: &PatchPlan) -> bool {
        plan.is_target(&self.assembly)
    }

    /// See [`PatchPlan::needs_patching`].
    #[must_use]
    pub fn needs_patching(&self, plan: &PatchPlan) -> bool {
        plan.needs_patching(&self.assembly)
    }

    /// Apply `plan`.
    ///
    /// # Errors
    /// Returns [`Error::Session`] unless the session is [`SessionState::Ready`], and
    /// [`Error::PatchFailed`] if a step fails, which leaves the session
    /// [`SessionState::Aborted`].
    pub fn apply(&mut self, plan: &PatchPlan) -> Result<PatchReport> {
        if self.state != SessionState::Ready {
            return Err(Error::Session(format!(
                "cannot apply plan {} to a session that is {}",
                plan.name, self.state
            )));
        }

        self.state = SessionState::Running;
        let result = apply_patch_plan(&mut self.assembly, plan).into_result();
        self.state = if result.is_ok() {
            SessionState::Completed
        } else {
            SessionState::Aborted
        };
        result
    }

    /// Save the patched assembly to `path`.
    ///
    /// # Errors
    /// Returns [`Error::Session`] unless a plan completed, otherwise the errors of
    /// [`MetadataStore::save`].
    pub fn save(&self, path: &Path) -> Result<()> {
        if self.state != SessionState::Completed {
            return Err(Error::Session(format!(
                "cannot save a session that is {}",
                self.state
            )));
        }

        info!("Saving to {}", path.display());
        self.store.save(&self.assembly, path)
    }

    /// Take the assembly out of the session.
    #[must_use]
    pub fn into_assembly(self) -> CilAssembly {
        self.assembly
    }
}
