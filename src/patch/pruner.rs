//! Removal of fields and external assembly references.
//!
//! Neither operation looks for remaining uses of what it removes. Instructions that still
//! refer to a removed field keep their (now dangling) reference; an operand scoped to a
//! removed assembly reference makes the image writer fail.

use log::{info, warn};

use crate::{
    metadata::{CilAssembly, FieldDef, TypeDef},
    patch::FailureReason,
};

/// Remove the field `name` from `ty`.
///
/// # Errors
/// Returns [`FailureReason::FieldNotFound`] if the type has no such field.
pub fn remove_field(ty: &mut TypeDef, name: &str) -> Result<FieldDef, FailureReason> {
    ty.remove_field(name)
        .ok_or_else(|| FailureReason::FieldNotFound {
            type_name: ty.full_name.clone(),
            field: name.to_string(),
        })
}

/// Remove the external assembly reference `name`.
///
/// Returns `false` if the reference was already absent; an already patched binary is not
/// an error.
pub fn remove_external_reference(assembly: &mut CilAssembly, name: &str) -> bool {
    info!("Removing {name} AssemblyRef");
    let found = assembly.remove_external_reference(name);
    if !found {
        warn!("{name} AssemblyRef not found, may not need patching");
    }
    found
}
