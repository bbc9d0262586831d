use crate::{
    assembly::{Instruction, OpCode},
    patch::{PatchPlan, PatchStep, Pattern},
};

const GAME: &str = "Celeste.Celeste";
const STATS: &str = "Celeste.Stats";
const ACHIEVEMENTS: &str = "Celeste.Achievements";
const STEAMWORKS: &str = "Steamworks.NET";

/// `new AppId_t(504230)` in the static constructor: `ldc.i4`, `newobj`, `stsfld`.
const APP_ID: i32 = 504_230;
/// `SteamAPI.Init` and the `SteamID` bookkeeping around it at the top of `Main`.
const MAIN_STEAM_BLOCK: usize = 15;

fn ret() -> Vec<Instruction> {
    vec![Instruction::ret()]
}

fn ret_false() -> Vec<Instruction> {
    vec![Instruction::new(OpCode::LDC_I4_0), Instruction::ret()]
}

/// Strip Steamworks.NET from Celeste.
///
/// Removes the assembly reference, the Steam initialisation in `Celeste.Celeste`, the
/// `SteamID` field and turns the Steam backed statistics and achievements into no-ops
/// that report nothing unlocked.
#[must_use]
pub fn celeste_plan() -> PatchPlan {
    PatchPlan::new("celeste", GAME, STEAMWORKS)
        .describe("Remove Steamworks.NET from Celeste")
        .step(PatchStep::remove_reference(STEAMWORKS))
        .step(PatchStep::method(GAME, ".cctor").remove_window(Pattern::ldc_i4(APP_ID), 0, 3))
        .step(PatchStep::method(GAME, "Update").remove_window(
            Pattern::call("Steamworks.SteamAPI", "RunCallbacks"),
            0,
            1,
        ))
        .step(
            PatchStep::method(GAME, "Main")
                .remove_window(Pattern::ldsfld(GAME, "SteamID"), 0, MAIN_STEAM_BLOCK)
                .remove_field("SteamID"),
        )
        .step(PatchStep::method(STATS, "MakeRequest").replace_body(ret()))
        .step(PatchStep::method(STATS, "Increment").replace_body(ret()))
        .step(PatchStep::method(STATS, "Local").replace_body(ret_false()))
        .step(PatchStep::method(STATS, "Global").replace_body(ret_false()))
        .step(PatchStep::method(STATS, "Store").replace_body(ret()))
        .step(PatchStep::method(ACHIEVEMENTS, "Has").replace_body(ret_false()))
        .step(PatchStep::method(ACHIEVEMENTS, "Register").replace_body(ret()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{BodyEdit, StepAction};

    #[test]
    fn step_order() {
        let names: Vec<_> = celeste_plan()
            .steps
            .into_iter()
            .map(|step| step.name)
            .collect();

        assert_eq!(
            names,
            [
                "AssemblyRef Steamworks.NET",
                "Celeste.Celeste::.cctor",
                "Celeste.Celeste::Update",
                "Celeste.Celeste::Main",
                "Celeste.Stats::MakeRequest",
                "Celeste.Stats::Increment",
                "Celeste.Stats::Local",
                "Celeste.Stats::Global",
                "Celeste.Stats::Store",
                "Celeste.Achievements::Has",
                "Celeste.Achievements::Register",
            ]
        );
    }

    #[test]
    fn main_prunes_steam_id() {
        let plan = celeste_plan();
        let StepAction::Method {
            edits,
            remove_fields,
            ..
        } = &plan.steps[3].action
        else {
            panic!("Main must be a method step");
        };

        assert_eq!(remove_fields, &["SteamID".to_string()]);
        assert!(matches!(
            &edits[..],
            [BodyEdit::RemoveWindow { offset: 0, count: 15, .. }]
        ));
    }
}
