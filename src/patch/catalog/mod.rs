//! Built-in patch plans.
//!
//! Plans are looked up by their short name; the command line tool offers [`names`] as the
//! choices for `--plan`.

mod celeste;

pub use celeste::celeste_plan;

use crate::patch::PatchPlan;

const PLANS: &[(&str, fn() -> PatchPlan)] = &[("celeste", celeste_plan)];

/// Names of the built-in plans.
#[must_use]
pub fn names() -> Vec<&'static str> {
    PLANS.iter().map(|(name, _)| *name).collect()
}

/// The built-in plan called `name`, if there is one.
#[must_use]
pub fn lookup(name: &str) -> Option<PatchPlan> {
    PLANS
        .iter()
        .find(|(plan, _)| plan.eq_ignore_ascii_case(name))
        .map(|(_, build)| build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        assert_eq!(names(), vec!["celeste"]);
        assert_eq!(lookup("Celeste").map(|plan| plan.name), Some("celeste".to_string()));
        assert!(lookup("terraria").is_none());
    }
}
