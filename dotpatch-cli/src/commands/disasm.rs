use std::path::Path;

use anyhow::anyhow;
use dotpatch::metadata::MethodDef;
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_assembly,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct InstructionEntry {
    index: usize,
    offset: Option<String>,
    text: String,
}

#[derive(Debug, Serialize)]
struct MethodEntry {
    name: String,
    signature: String,
    max_stack: Option<u16>,
    handlers: usize,
    instructions: Vec<InstructionEntry>,
}

#[derive(Debug, Serialize)]
struct DisasmOutput {
    r#type: String,
    methods: Vec<MethodEntry>,
}

pub fn run(
    path: &Path,
    type_name: &str,
    method: Option<&str>,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let assembly = load_assembly(path)?;
    let ty = assembly
        .find_type(type_name)
        .ok_or_else(|| anyhow!("type {type_name} not found"))?;

    let methods: Vec<MethodEntry> = ty
        .methods
        .iter()
        .filter(|m| method.map_or(true, |name| m.name == name))
        .map(method_entry)
        .collect();

    if let Some(name) = method {
        if methods.is_empty() {
            return Err(anyhow!("method {type_name}::{name} not found"));
        }
    }

    let output = DisasmOutput {
        r#type: ty.full_name.clone(),
        methods,
    };

    print_output(&output, opts, |out| {
        for (i, method) in out.methods.iter().enumerate() {
            if i > 0 {
                println!();
            }
            println!("{} {}::{}", method.signature, out.r#type, method.name);
            match method.max_stack {
                None => {
                    println!("  (no body)");
                    continue;
                }
                Some(max_stack) => {
                    println!("  .maxstack {max_stack}, {} exception handlers", method.handlers);
                }
            }

            let mut tw = TabWriter::new(&[
                ("#", Align::Right),
                ("Offset", Align::Left),
                ("Instruction", Align::Left),
            ])
            .indent("  ");
            for instruction in &method.instructions {
                tw.row([
                    instruction.index.to_string(),
                    instruction.offset.clone().unwrap_or_default(),
                    instruction.text.clone(),
                ]);
            }
            tw.print();
        }
    })
}

fn method_entry(method: &MethodDef) -> MethodEntry {
    let instructions = method
        .body
        .iter()
        .flat_map(|body| body.instructions().iter().enumerate())
        .map(|(index, instruction)| InstructionEntry {
            index,
            offset: instruction.offset.map(|offset| format!("IL_{offset:04x}")),
            text: instruction.to_string(),
        })
        .collect();

    MethodEntry {
        name: method.name.clone(),
        signature: method.signature.clone(),
        max_stack: method.body.as_ref().map(|body| body.max_stack),
        handlers: method.body.as_ref().map_or(0, |body| body.handlers.len()),
        instructions,
    }
}
