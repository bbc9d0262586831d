use std::path::Path;

use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{file_display_name, load_assembly, resolve_plan, target_name},
    output::print_output,
};

#[derive(Debug, Serialize)]
struct CheckOutput {
    file: String,
    plan: String,
    is_target: bool,
    needs_patching: bool,
    references: Vec<String>,
}

pub fn run(path: &Path, plan: &str, opts: &GlobalOptions) -> anyhow::Result<()> {
    let plan = resolve_plan(plan)?;
    let assembly = load_assembly(path)?;

    let output = CheckOutput {
        file: file_display_name(path),
        plan: plan.name.clone(),
        is_target: plan.is_target(&assembly),
        needs_patching: plan.needs_patching(&assembly),
        references: assembly
            .external_references()
            .iter()
            .map(|r| format!("{} {}", r.name, r.version))
            .collect(),
    };

    print_output(&output, opts, |out| {
        let target = target_name(&plan);
        println!("{}:", out.file);
        if out.is_target {
            println!("  Target:      {target}");
        } else {
            println!("  Target:      not {target}");
        }
        if out.needs_patching {
            println!("  Status:      references {}, needs patching", plan.dependency);
        } else if out.is_target {
            println!("  Status:      no {} reference, already patched", plan.dependency);
        } else {
            println!("  Status:      nothing to do");
        }
        println!("  References:");
        for reference in &out.references {
            println!("    {reference}");
        }
    })
}
