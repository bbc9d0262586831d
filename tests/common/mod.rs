//! Assemblies built through the public API for the integration tests.

#![allow(dead_code)]

use dotpatch::{
    assembly::{Immediate, Instruction, OpCode, Operand},
    metadata::{
        AssemblyRef, AssemblyVersion, CilAssembly, FieldAttributes, FieldDef, MemberRef,
        MethodAttributes, MethodBody, MethodDef, TypeAttributes, TypeDef, TypeRef,
    },
};

/// Give every instruction the offset it would have been decoded from, so branch targets
/// can be written as offsets.
pub fn with_offsets(mut instructions: Vec<Instruction>) -> Vec<Instruction> {
    let mut offset = 0u32;
    for instruction in &mut instructions {
        instruction.offset = Some(offset);
        offset += u32::try_from(instruction.size()).unwrap();
    }
    instructions
}

pub fn call(opcode: OpCode, scope: Option<&str>, ty: &str, name: &str, sig: &str) -> Instruction {
    let parent = match scope {
        Some(scope) => TypeRef::external(scope, ty),
        None => TypeRef::local(ty),
    };
    Instruction::with_operand(opcode, Operand::Method(MemberRef::new(parent, name, sig)))
}

pub fn steam(name: &str) -> Instruction {
    call(
        OpCode::CALL,
        Some("Steamworks.NET"),
        "Steamworks.SteamUserStats",
        name,
        "bool()",
    )
}

pub fn steam_id(opcode: OpCode) -> Instruction {
    Instruction::with_operand(
        opcode,
        Operand::Field(MemberRef::new(
            TypeRef::local("Celeste.Celeste"),
            "SteamID",
            "valuetype [Steamworks.NET]Steamworks.AppId_t",
        )),
    )
}

fn static_method(name: &str, signature: &str, instructions: Vec<Instruction>) -> MethodDef {
    MethodDef::new(
        name,
        MethodAttributes::PUBLIC | MethodAttributes::STATIC,
        signature,
        Some(MethodBody::new(8, with_offsets(instructions))),
    )
}

fn steam_stub(names: &[&str]) -> Vec<Instruction> {
    let mut body = Vec::new();
    for name in names {
        body.push(steam(name));
        body.push(Instruction::new(OpCode::POP));
    }
    body.push(Instruction::ret());
    body
}

/// The Steam-related surface of Celeste.exe.
pub fn celeste() -> CilAssembly {
    let mut assembly = CilAssembly::new("Celeste", AssemblyVersion::new(1, 4, 0, 0));
    assembly.refs.push(AssemblyRef::new(
        "mscorlib",
        AssemblyVersion::new(4, 0, 0, 0),
    ));
    assembly.refs.push(AssemblyRef::new(
        "Steamworks.NET",
        AssemblyVersion::new(9, 1, 0, 0),
    ));

    let cctor = vec![
        Instruction::ldc_i4(60),
        Instruction::new(OpCode::POP),
        Instruction::ldc_i4(504_230),
        call(
            OpCode::NEWOBJ,
            Some("Steamworks.NET"),
            "Steamworks.AppId_t",
            ".ctor",
            "void(uint32)",
        ),
        steam_id(OpCode::STSFLD),
        Instruction::ret(),
    ];

    // brtrue.s at offset 6 skips to the ret at offset 10
    let update = vec![
        call(
            OpCode::CALL,
            Some("Steamworks.NET"),
            "Steamworks.SteamAPI",
            "RunCallbacks",
            "void()",
        ),
        Instruction::new(OpCode::LDARG_0),
        Instruction::with_operand(OpCode::BRTRUE_S, Operand::Target(10)),
        Instruction::new(OpCode::LDARG_0),
        Instruction::new(OpCode::POP),
        Instruction::ret(),
    ];

    let mut main = vec![steam_id(OpCode::LDSFLD), Instruction::new(OpCode::POP)];
    for _ in 0..6 {
        main.push(steam("RequestCurrentStats"));
        main.push(Instruction::new(OpCode::POP));
    }
    main.push(Instruction::new(OpCode::NOP));
    main.push(Instruction::with_operand(
        OpCode::LDSTR,
        Operand::String("Celeste".to_string()),
    ));
    main.push(Instruction::new(OpCode::POP));
    main.push(Instruction::ret());

    let game = TypeDef::new("Celeste.Celeste", TypeAttributes::PUBLIC)
        .with_field(FieldDef::new(
            "SteamID",
            FieldAttributes::PUBLIC | FieldAttributes::STATIC,
            "valuetype [Steamworks.NET]Steamworks.AppId_t",
        ))
        .with_method(static_method(".cctor", "void()", cctor))
        .with_method(static_method("Update", "void(object)", update))
        .with_method(static_method("Main", "void(string[])", main));

    let stats = TypeDef::new("Celeste.Stats", TypeAttributes::PUBLIC)
        .with_method(static_method("MakeRequest", "void()", steam_stub(&["RequestCurrentStats"])))
        .with_method(static_method("Increment", "void(int32)", steam_stub(&["SetStat", "StoreStats"])))
        .with_method(static_method("Local", "int32(int32)", steam_stub(&["GetStat"])))
        .with_method(static_method("Global", "int32(int32)", steam_stub(&["GetGlobalStat"])))
        .with_method(static_method("Store", "void()", steam_stub(&["StoreStats"])));

    let achievements = TypeDef::new("Celeste.Achievements", TypeAttributes::PUBLIC)
        .with_method(static_method("Has", "bool(int32)", steam_stub(&["GetAchievement"])))
        .with_method(static_method("Register", "void(int32)", steam_stub(&["SetAchievement"])));

    assembly.types = vec![game, stats, achievements];
    assembly
}

/// An assembly that has nothing to do with Celeste.
pub fn unrelated() -> CilAssembly {
    let mut assembly = CilAssembly::new("Other", AssemblyVersion::new(1, 0, 0, 0));
    assembly.types.push(
        TypeDef::new("Other.Program", TypeAttributes::PUBLIC).with_method(static_method(
            "Main",
            "void()",
            vec![
                Instruction::with_operand(OpCode::LDC_I4_S, Operand::Immediate(Immediate::Int8(3))),
                Instruction::new(OpCode::POP),
                Instruction::ret(),
            ],
        )),
    );
    assembly
}
