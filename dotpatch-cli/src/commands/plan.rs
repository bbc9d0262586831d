use dotpatch::patch::{PatchPlan, StepAction};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::resolve_plan,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct StepEntry {
    index: usize,
    name: String,
    actions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PlanOutput {
    name: String,
    description: String,
    target_type: String,
    dependency: String,
    steps: Vec<StepEntry>,
}

pub fn run(name: &str, opts: &GlobalOptions) -> anyhow::Result<()> {
    let plan = resolve_plan(name)?;
    let output = build_output(&plan);

    print_output(&output, opts, |out| {
        println!("{}: {}", out.name, out.description);
        println!("  Target:      {}", out.target_type);
        println!("  Dependency:  {}", out.dependency);
        println!();

        let mut tw = TabWriter::new(&[
            ("#", Align::Right),
            ("Step", Align::Left),
            ("Action", Align::Left),
        ]);
        for step in &out.steps {
            for (i, action) in step.actions.iter().enumerate() {
                if i == 0 {
                    tw.row([step.index.to_string(), step.name.clone(), action.clone()]);
                } else {
                    tw.row([String::new(), String::new(), action.clone()]);
                }
            }
        }
        tw.print();
    })
}

fn build_output(plan: &PatchPlan) -> PlanOutput {
    let steps = plan
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let actions = match &step.action {
                StepAction::Reference { name } => vec![format!("remove AssemblyRef {name}")],
                StepAction::Method {
                    edits,
                    remove_fields,
                    ..
                } => edits
                    .iter()
                    .map(ToString::to_string)
                    .chain(remove_fields.iter().map(|field| format!("remove field {field}")))
                    .collect(),
            };
            StepEntry {
                index: index + 1,
                name: step.name.clone(),
                actions,
            }
        })
        .collect();

    PlanOutput {
        name: plan.name.clone(),
        description: plan.description.clone(),
        target_type: plan.target_type.clone(),
        dependency: plan.dependency.clone(),
        steps,
    }
}
