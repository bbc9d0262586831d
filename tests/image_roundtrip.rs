//! Saving and loading assemblies in the image format, with and without edits in between.

mod common;

use common::{call, with_offsets};
use dotpatch::{
    assembly::{Instruction, OpCode, Operand},
    metadata::{ImageStore, MetadataStore, MethodAttributes, MethodBody, MethodDef},
    patch::editor,
    prelude::*,
};
use tempfile::tempdir;

#[test]
fn unmodified_round_trip() -> Result<()> {
    let assembly = common::celeste();
    let dir = tempdir()?;
    let path = dir.path().join("Celeste.exe");

    ImageStore.save(&assembly, &path)?;
    let loaded = ImageStore.load(&path)?;

    assert_eq!(loaded.name(), "Celeste");
    assert_eq!(loaded.version, assembly.version);
    assert_eq!(loaded.external_references(), assembly.external_references());
    assert_eq!(loaded.method_count(), assembly.method_count());

    // saving what was loaded reproduces the file
    let path2 = dir.path().join("Celeste2.exe");
    save_assembly(&loaded, &path2)?;
    assert_eq!(std::fs::read(&path)?, std::fs::read(&path2)?);
    Ok(())
}

#[test]
fn branches_follow_removed_instructions() -> Result<()> {
    // 0: ldarg.0  1: brfalse 7  6: nop  7: ldc.i4.1  8: ret
    let mut body = MethodBody::new(
        8,
        with_offsets(vec![
            Instruction::new(OpCode::LDARG_0),
            Instruction::with_operand(OpCode::BRFALSE, Operand::Target(7)),
            Instruction::new(OpCode::NOP),
            Instruction::new(OpCode::LDC_I4_1),
            Instruction::ret(),
        ]),
    );
    editor::remove_window(&mut body, 2, 1).map_err(|reason| Error::Error(reason.to_string()))?;

    let mut assembly = common::unrelated();
    assembly.types[0].methods.push(MethodDef::new(
        "Check",
        MethodAttributes::STATIC,
        "int32(bool)",
        Some(body),
    ));

    let loaded = ImageStore::from_bytes(&ImageStore::to_bytes(&assembly)?)?;
    let check = loaded.types[0].find_method("Check").unwrap();
    let instructions = check.body.as_ref().unwrap().instructions();

    assert_eq!(instructions.len(), 4);
    assert_eq!(instructions[1].operand, Operand::Target(6));
    assert_eq!(instructions[2].offset, Some(6));
    Ok(())
}

#[test]
fn dangling_branch_is_refused() {
    let mut body = MethodBody::new(
        8,
        with_offsets(vec![
            // br.s to the nop that is about to go away
            Instruction::with_operand(OpCode::BR_S, Operand::Target(2)),
            Instruction::new(OpCode::NOP),
            Instruction::ret(),
        ]),
    );
    editor::remove_window(&mut body, 1, 1).unwrap();

    let mut assembly = common::unrelated();
    assembly.types[0].methods[0].body = Some(body);

    assert!(matches!(
        ImageStore::to_bytes(&assembly),
        Err(Error::Malformed { .. })
    ));
}

#[test]
fn references_to_removed_assembly_fail_the_save() -> Result<()> {
    let mut assembly = common::celeste();
    assert!(assembly.remove_external_reference("Steamworks.NET"));

    let dir = tempdir()?;
    let path = dir.path().join("Celeste.exe.patched");
    assert!(save_assembly(&assembly, &path).is_err());
    assert!(!path.exists());

    // once no instruction uses it any more, the save goes through
    for ty in &mut assembly.types {
        for method in &mut ty.methods {
            if let Some(body) = &mut method.body {
                editor::replace_body(body, vec![Instruction::ret()]);
            }
        }
    }
    save_assembly(&assembly, &path)?;
    assert!(!load_assembly(&path)?.has_external_reference("Steamworks.NET"));
    Ok(())
}

#[test]
fn local_method_references_survive() -> Result<()> {
    let mut assembly = common::unrelated();
    assembly.types[0].methods[0].body = Some(MethodBody::new(
        8,
        vec![
            call(OpCode::CALL, None, "Other.Program", "Helper", "void()"),
            Instruction::ret(),
        ],
    ));

    let loaded = ImageStore::from_bytes(&ImageStore::to_bytes(&assembly)?)?;
    let first = &loaded.types[0].methods[0].body.as_ref().unwrap().instructions()[0];
    assert_eq!(first.to_string(), "call Other.Program::Helper");
    Ok(())
}
