use std::path::Path;

use anyhow::Context;
use dotpatch::{
    metadata::CilAssembly,
    patch::{PatchPlan, PatchReport, PatchSession},
};
use log::{info, warn};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{default_output_path, file_display_name, resolve_plan, target_name},
    output::{print_output, Align, TabWriter},
    prompt::confirm,
};

#[derive(Debug, Serialize)]
struct StepEntry {
    name: String,
    removed: usize,
    inserted: usize,
    fields_removed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_found: Option<bool>,
}

#[derive(Debug, Serialize)]
struct PatchOutput {
    file: String,
    output: String,
    plan: String,
    steps: Vec<StepEntry>,
    instructions_removed: usize,
    instructions_inserted: usize,
}

pub struct PatchOptions<'a> {
    pub output: Option<&'a Path>,
    pub yes: bool,
    pub plan: &'a str,
    pub global: &'a GlobalOptions,
}

pub fn run(path: &Path, opts: &PatchOptions) -> anyhow::Result<()> {
    let plan = resolve_plan(opts.plan)?;
    let mut session = PatchSession::open(path)
        .with_context(|| format!("failed to load assembly: {}", path.display()))?;

    for (warning, default) in preflight(session.assembly(), &plan) {
        warn!("{warning}");
        if !opts.yes && !confirm("Patch anyway?", default)? {
            info!("Cancelling");
            return Ok(());
        }
    }

    let report = session
        .apply(&plan)
        .with_context(|| format!("failed to patch {}", path.display()))?;
    info!("Patched successfully");

    let output_path = opts
        .output
        .map_or_else(|| default_output_path(path), Path::to_path_buf);
    session
        .save(&output_path)
        .with_context(|| format!("failed to write output: {}", output_path.display()))?;

    let output = build_output(path, &output_path, &plan.name, &report);
    print_output(&output, opts.global, |out| {
        let mut tw = TabWriter::new(&[
            ("Step", Align::Left),
            ("Removed", Align::Right),
            ("Inserted", Align::Right),
            ("Notes", Align::Left),
        ]);
        for step in &out.steps {
            tw.row([
                step.name.clone(),
                step.removed.to_string(),
                step.inserted.to_string(),
                notes(step),
            ]);
        }
        tw.print();
        println!();
        println!(
            "{} -> {}: {} instructions removed, {} inserted",
            out.file, out.output, out.instructions_removed, out.instructions_inserted
        );
    })
}

/// Warnings to confirm before patching, each with the default answer of its prompt.
fn preflight(assembly: &CilAssembly, plan: &PatchPlan) -> Vec<(String, bool)> {
    let mut warnings = Vec::new();
    if !plan.is_target(assembly) {
        warnings.push((format!("Assembly is not {}.", target_name(plan)), false));
    }
    if !assembly.has_external_reference(&plan.dependency) {
        warnings.push((
            format!("Assembly does not have {} AssemblyRef.", plan.dependency),
            true,
        ));
    }
    warnings
}

fn notes(step: &StepEntry) -> String {
    match step.reference_found {
        Some(true) => "reference removed".to_string(),
        Some(false) => "reference already absent".to_string(),
        None if step.fields_removed.is_empty() => String::new(),
        None => format!("removed field {}", step.fields_removed.join(", ")),
    }
}

fn build_output(input: &Path, output: &Path, plan: &str, report: &PatchReport) -> PatchOutput {
    PatchOutput {
        file: file_display_name(input),
        output: file_display_name(output),
        plan: plan.to_string(),
        steps: report
            .steps
            .iter()
            .map(|step| StepEntry {
                name: step.name.clone(),
                removed: step.instructions_removed,
                inserted: step.instructions_inserted,
                fields_removed: step.fields_removed.clone(),
                reference_found: step.reference_found,
            })
            .collect(),
        instructions_removed: report.instructions_removed(),
        instructions_inserted: report.instructions_inserted(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotpatch::{
        metadata::{AssemblyRef, AssemblyVersion, TypeAttributes, TypeDef},
        patch::catalog,
    };

    fn assembly(target: bool, steamworks: bool) -> CilAssembly {
        let mut assembly = CilAssembly::new("Game", AssemblyVersion::new(1, 0, 0, 0));
        if target {
            assembly
                .types
                .push(TypeDef::new("Celeste.Celeste", TypeAttributes::PUBLIC));
        }
        if steamworks {
            assembly
                .refs
                .push(AssemblyRef::new("Steamworks.NET", AssemblyVersion::new(9, 1, 0, 0)));
        }
        assembly
    }

    #[test]
    fn target_with_dependency_patches_without_asking() {
        assert!(preflight(&assembly(true, true), &catalog::celeste_plan()).is_empty());
    }

    #[test]
    fn accepted_non_target_is_still_checked_for_the_reference() {
        let warnings = preflight(&assembly(false, false), &catalog::celeste_plan());
        assert_eq!(warnings.len(), 2);
        assert!(!warnings[0].1);
        assert_eq!(
            warnings[1],
            ("Assembly does not have Steamworks.NET AssemblyRef.".to_string(), true)
        );

        let warnings = preflight(&assembly(false, true), &catalog::celeste_plan());
        assert_eq!(warnings.len(), 1);
        assert!(!warnings[0].1);
    }

    #[test]
    fn patched_target_asks_with_yes_as_default() {
        let warnings = preflight(&assembly(true, false), &catalog::celeste_plan());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].1);
    }
}
