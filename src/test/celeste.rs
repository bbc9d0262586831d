//! A small assembly shaped like the parts of Celeste.exe that reference Steamworks.NET.

use crate::{
    assembly::{Immediate, OpCode},
    metadata::{
        AssemblyRef, AssemblyVersion, CilAssembly, FieldAttributes, FieldDef, MethodAttributes,
        MethodBody, MethodDef, TypeAttributes, TypeDef, TypeRef,
    },
    test::BodyBuilder,
};

fn celeste() -> TypeRef {
    TypeRef::local("Celeste.Celeste")
}

fn steam_api() -> TypeRef {
    TypeRef::external("Steamworks.NET", "Steamworks.SteamAPI")
}

fn user_stats() -> TypeRef {
    TypeRef::external("Steamworks.NET", "Steamworks.SteamUserStats")
}

fn mscorlib(name: &str) -> TypeRef {
    TypeRef::external("mscorlib", name)
}

fn fna(name: &str) -> TypeRef {
    TypeRef::external("FNA", name)
}

fn method(name: &str, flags: MethodAttributes, signature: &str, body: MethodBody) -> MethodDef {
    MethodDef::new(name, flags, signature, Some(body))
}

fn static_method(name: &str, signature: &str, body: MethodBody) -> MethodDef {
    method(
        name,
        MethodAttributes::PUBLIC | MethodAttributes::STATIC | MethodAttributes::HIDE_BY_SIG,
        signature,
        body,
    )
}

fn static_field(name: &str, field_type: &str) -> FieldDef {
    FieldDef::new(
        name,
        FieldAttributes::PUBLIC | FieldAttributes::STATIC,
        field_type,
    )
}

/// Loads the Steam name of a stat or achievement enum value at argument 0.
fn enum_name(builder: BodyBuilder, enum_type: &str) -> BodyBuilder {
    builder
        .op(OpCode::LDARG_0)
        .ty(OpCode::BOX, TypeRef::local(enum_type))
        .method(
            OpCode::CALLVIRT,
            mscorlib("System.Object"),
            "ToString",
            "string()",
        )
}

fn cctor() -> MethodBody {
    BodyBuilder::new(2)
        .ldc(320)
        .field(OpCode::STSFLD, celeste(), "GameWidth", "int32")
        .ldc(180)
        .field(OpCode::STSFLD, celeste(), "GameHeight", "int32")
        .ldstr("1.4.0.0")
        .method(OpCode::NEWOBJ, mscorlib("System.Version"), ".ctor", "void(string)")
        .field(
            OpCode::STSFLD,
            celeste(),
            "Version",
            "class [mscorlib]System.Version",
        )
        .ldc(504_230)
        .method(
            OpCode::NEWOBJ,
            TypeRef::external("Steamworks.NET", "Steamworks.AppId_t"),
            ".ctor",
            "void(uint32)",
        )
        .field(
            OpCode::STSFLD,
            celeste(),
            "SteamID",
            "valuetype [Steamworks.NET]Steamworks.AppId_t",
        )
        .op(OpCode::LDC_I4_0)
        .field(OpCode::STSFLD, celeste(), "PlayMode", "int32")
        .imm(OpCode::LDC_I4_S, Immediate::Int8(60))
        .field(OpCode::STSFLD, celeste(), "TargetFrameRate", "int32")
        .ldstr("Celeste")
        .field(OpCode::STSFLD, celeste(), "Title", "string")
        .imm(OpCode::LDC_R4, Immediate::Float32(1.0))
        .field(OpCode::STSFLD, celeste(), "TimeRate", "float32")
        .op(OpCode::NOP)
        .op(OpCode::RET)
        .build()
}

fn update() -> MethodBody {
    BodyBuilder::new(8)
        .method(OpCode::CALL, steam_api(), "RunCallbacks", "void()")
        .field(OpCode::LDSFLD, celeste(), "PlayMode", "int32")
        .branch(OpCode::BRTRUE_S, "base")
        .op(OpCode::LDC_I4_1)
        .field(OpCode::STSFLD, celeste(), "PlayMode", "int32")
        .label("base")
        .op(OpCode::LDARG_0)
        .op(OpCode::LDARG_1)
        .method(
            OpCode::CALL,
            fna("Microsoft.Xna.Framework.Game"),
            "Update",
            "void(class [FNA]Microsoft.Xna.Framework.GameTime)",
        )
        .op(OpCode::RET)
        .build()
}

fn main() -> MethodBody {
    BodyBuilder::new(2)
        .locals("class Celeste.Celeste")
        // Steam start-up, 15 instructions
        .field(
            OpCode::LDSFLD,
            celeste(),
            "SteamID",
            "valuetype [Steamworks.NET]Steamworks.AppId_t",
        )
        .method(
            OpCode::CALL,
            steam_api(),
            "RestartAppIfNecessary",
            "bool(valuetype [Steamworks.NET]Steamworks.AppId_t)",
        )
        .branch(OpCode::BRFALSE_S, "init")
        .op(OpCode::LDC_I4_0)
        .method(OpCode::CALL, mscorlib("System.Environment"), "Exit", "void(int32)")
        .label("init")
        .method(OpCode::CALL, steam_api(), "Init", "bool()")
        .branch(OpCode::BRTRUE_S, "stats")
        .ldstr("Steam not initialized")
        .method(OpCode::CALL, mscorlib("System.Console"), "WriteLine", "void(string)")
        .op(OpCode::LDC_I4_0)
        .method(OpCode::CALL, mscorlib("System.Environment"), "Exit", "void(int32)")
        .op(OpCode::NOP)
        .label("stats")
        .method(OpCode::CALL, user_stats(), "RequestCurrentStats", "bool()")
        .op(OpCode::POP)
        .op(OpCode::NOP)
        // the game itself
        .method(OpCode::NEWOBJ, celeste(), ".ctor", "void()")
        .op(OpCode::STLOC_0)
        .label("try")
        .op(OpCode::LDLOC_0)
        .method(
            OpCode::CALLVIRT,
            fna("Microsoft.Xna.Framework.Game"),
            "Run",
            "void()",
        )
        .branch(OpCode::LEAVE_S, "end")
        .label("finally")
        .op(OpCode::LDLOC_0)
        .method(
            OpCode::CALLVIRT,
            mscorlib("System.IDisposable"),
            "Dispose",
            "void()",
        )
        .op(OpCode::ENDFINALLY)
        .label("end")
        .op(OpCode::RET)
        .try_finally("try", "finally", "end")
        .build()
}

fn constructor() -> MethodBody {
    BodyBuilder::new(8)
        .op(OpCode::LDARG_0)
        .method(
            OpCode::CALL,
            fna("Microsoft.Xna.Framework.Game"),
            ".ctor",
            "void()",
        )
        .op(OpCode::RET)
        .build()
}

fn stats() -> TypeDef {
    let make_request = BodyBuilder::new(8)
        .method(OpCode::CALL, user_stats(), "RequestCurrentStats", "bool()")
        .op(OpCode::POP)
        .op(OpCode::RET)
        .build();

    let increment = enum_name(BodyBuilder::new(8), "Celeste.Stat")
        .op(OpCode::LDARG_1)
        .method(OpCode::CALL, user_stats(), "SetStat", "bool(string, int32)")
        .op(OpCode::POP)
        .op(OpCode::RET)
        .build();

    let local = enum_name(BodyBuilder::new(8).locals("int32"), "Celeste.Stat")
        .imm(OpCode::LDLOCA_S, Immediate::UInt8(0))
        .method(OpCode::CALL, user_stats(), "GetStat", "bool(string, int32&)")
        .op(OpCode::POP)
        .op(OpCode::LDLOC_0)
        .op(OpCode::RET)
        .build();

    let global = enum_name(BodyBuilder::new(8).locals("int64"), "Celeste.Stat")
        .imm(OpCode::LDLOCA_S, Immediate::UInt8(0))
        .method(
            OpCode::CALL,
            user_stats(),
            "GetGlobalStat",
            "bool(string, int64&)",
        )
        .op(OpCode::POP)
        .op(OpCode::LDLOC_0)
        .op(OpCode::CONV_I4)
        .op(OpCode::RET)
        .build();

    let store = BodyBuilder::new(8)
        .method(OpCode::CALL, user_stats(), "StoreStats", "bool()")
        .op(OpCode::POP)
        .op(OpCode::RET)
        .build();

    TypeDef::new(
        "Celeste.Stats",
        TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT | TypeAttributes::SEALED,
    )
    .with_method(static_method("MakeRequest", "void()", make_request))
    .with_method(static_method(
        "Increment",
        "void(valuetype Celeste.Stat, int32)",
        increment,
    ))
    .with_method(static_method(
        "Local",
        "int32(valuetype Celeste.Stat)",
        local,
    ))
    .with_method(static_method(
        "Global",
        "int32(valuetype Celeste.Stat)",
        global,
    ))
    .with_method(static_method("Store", "void()", store))
}

fn achievements() -> TypeDef {
    let has = enum_name(BodyBuilder::new(8).locals("bool"), "Celeste.Achievement")
        .imm(OpCode::LDLOCA_S, Immediate::UInt8(0))
        .method(
            OpCode::CALL,
            user_stats(),
            "GetAchievement",
            "bool(string, bool&)",
        )
        .op(OpCode::POP)
        .op(OpCode::LDLOC_0)
        .op(OpCode::RET)
        .build();

    let register = enum_name(BodyBuilder::new(8), "Celeste.Achievement")
        .method(OpCode::CALL, user_stats(), "SetAchievement", "bool(string)")
        .op(OpCode::POP)
        .op(OpCode::RET)
        .build();

    TypeDef::new(
        "Celeste.Achievements",
        TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT | TypeAttributes::SEALED,
    )
    .with_method(static_method(
        "Has",
        "bool(valuetype Celeste.Achievement)",
        has,
    ))
    .with_method(static_method(
        "Register",
        "void(valuetype Celeste.Achievement)",
        register,
    ))
}

fn calc() -> TypeDef {
    let approach = BodyBuilder::new(8)
        .op(OpCode::LDARG_0)
        .op(OpCode::LDARG_1)
        .branch(OpCode::BGE_UN_S, "down")
        .op(OpCode::LDARG_0)
        .op(OpCode::LDARG_2)
        .op(OpCode::ADD)
        .op(OpCode::LDARG_1)
        .method(
            OpCode::CALL,
            mscorlib("System.Math"),
            "Min",
            "float32(float32, float32)",
        )
        .op(OpCode::RET)
        .label("down")
        .op(OpCode::LDARG_0)
        .op(OpCode::LDARG_2)
        .op(OpCode::SUB)
        .op(OpCode::LDARG_1)
        .method(
            OpCode::CALL,
            mscorlib("System.Math"),
            "Max",
            "float32(float32, float32)",
        )
        .op(OpCode::RET)
        .build();

    TypeDef::new(
        "Monocle.Calc",
        TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT | TypeAttributes::SEALED,
    )
    .with_method(static_method(
        "Approach",
        "float32(float32, float32, float32)",
        approach,
    ))
    .with_method(MethodDef::new(
        "Random",
        MethodAttributes::PUBLIC | MethodAttributes::STATIC | MethodAttributes::PINVOKE_IMPL,
        "int32()",
        None,
    ))
}

/// `Celeste.exe` as far as the Steamworks.NET removal is concerned.
///
/// Every body looks freshly decoded, so an image written from this assembly reads back
/// equal to it.
pub fn celeste_assembly() -> CilAssembly {
    let mut assembly = CilAssembly::new("Celeste", AssemblyVersion::new(1, 4, 0, 0));
    assembly.refs = vec![
        AssemblyRef::new("mscorlib", AssemblyVersion::new(4, 0, 0, 0)),
        AssemblyRef::new("FNA", AssemblyVersion::new(21, 3, 0, 0)),
        AssemblyRef::new("Steamworks.NET", AssemblyVersion::new(9, 1, 0, 0)),
    ];

    let game = TypeDef::new("Celeste.Celeste", TypeAttributes::PUBLIC)
        .with_field(static_field("GameWidth", "int32"))
        .with_field(static_field("GameHeight", "int32"))
        .with_field(static_field("Version", "class [mscorlib]System.Version"))
        .with_field(static_field(
            "SteamID",
            "valuetype [Steamworks.NET]Steamworks.AppId_t",
        ))
        .with_field(static_field("PlayMode", "int32"))
        .with_field(static_field("TargetFrameRate", "int32"))
        .with_field(static_field("Title", "string"))
        .with_field(static_field("TimeRate", "float32"))
        .with_method(method(
            ".cctor",
            MethodAttributes::PRIVATE
                | MethodAttributes::STATIC
                | MethodAttributes::SPECIAL_NAME
                | MethodAttributes::RT_SPECIAL_NAME,
            "void()",
            cctor(),
        ))
        .with_method(method(
            ".ctor",
            MethodAttributes::PUBLIC
                | MethodAttributes::SPECIAL_NAME
                | MethodAttributes::RT_SPECIAL_NAME,
            "void()",
            constructor(),
        ))
        .with_method(method(
            "Update",
            MethodAttributes::FAMILY | MethodAttributes::VIRTUAL | MethodAttributes::HIDE_BY_SIG,
            "void(class [FNA]Microsoft.Xna.Framework.GameTime)",
            update(),
        ))
        .with_method(method(
            "Main",
            MethodAttributes::PRIVATE | MethodAttributes::STATIC,
            "void(string[])",
            main(),
        ));

    assembly.types = vec![game, stats(), achievements(), calc()];
    assembly
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_shape() {
        let assembly = celeste_assembly();
        let game = assembly.find_type("Celeste.Celeste").unwrap();

        let cctor = game.find_method(".cctor").unwrap().body.as_ref().unwrap();
        assert_eq!(cctor.instructions().len(), 20);
        assert_eq!(cctor.instructions()[7].int_value(), Some(504_230));

        let main = game.find_method("Main").unwrap().body.as_ref().unwrap();
        assert_eq!(main.instructions()[0].opcode, OpCode::LDSFLD);
        assert_eq!(main.handlers.len(), 1);
        let handler = &main.handlers[0];
        assert_eq!(
            main.instructions().last().unwrap().offset,
            Some(handler.handler_offset + handler.handler_length)
        );
    }
}
