use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use dotpatch::{
    patch::{catalog, PatchPlan},
    CilAssembly,
};

/// Load an assembly, naming the file in the error.
pub fn load_assembly(path: &Path) -> anyhow::Result<CilAssembly> {
    dotpatch::load_assembly(path)
        .with_context(|| format!("failed to load assembly: {}", path.display()))
}

/// Look up a built-in plan by name.
pub fn resolve_plan(name: &str) -> anyhow::Result<PatchPlan> {
    catalog::lookup(name).ok_or_else(|| {
        anyhow!(
            "unknown plan '{name}' (available: {})",
            catalog::names().join(", ")
        )
    })
}

/// Short name of the binary a plan targets, e.g. `Celeste` for `Celeste.Celeste`.
pub fn target_name(plan: &PatchPlan) -> &str {
    plan.target_type
        .rsplit('.')
        .next()
        .unwrap_or(&plan.target_type)
}

/// `FILE.patched` next to the input.
pub fn default_output_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(".patched");
    PathBuf::from(name)
}

/// Extract a display-friendly filename from a path.
pub fn file_display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_appends_suffix() {
        assert_eq!(
            default_output_path(Path::new("game/Celeste.exe")),
            PathBuf::from("game/Celeste.exe.patched")
        );
    }

    #[test]
    fn plan_names() {
        let plan = resolve_plan("celeste").unwrap();
        assert_eq!(target_name(&plan), "Celeste");

        let err = resolve_plan("nope").unwrap_err().to_string();
        assert!(err.contains("available: celeste"));
    }
}
