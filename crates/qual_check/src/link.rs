//! Cross-translation-unit linking.
//!
//! Runs once after every unit has been ingested. Declarations of the same
//! symbol were already funneled onto shared atoms during intake (the function
//! maps and brain transplants); what remains is equating globals seen in
//! several units and wilding everything the program never defines.

use la_arena::Arena;

use crate::cvar::{self, CVarId, ConsAction, ConstraintVar};
use crate::store::ConstraintStore;
use crate::{EngineError, ProgramInfo};

impl ProgramInfo {
    /// The second engine phase. Idempotent: re-running without new units
    /// re-derives only constraints the store already holds.
    pub fn link(&mut self) -> Result<(), EngineError> {
        log::info!("linking symbols across {} declarations", self.variables.len());

        // Equate every sighting of each global variable name. Needed for
        // variables declared extern in one unit and defined in another.
        for (name, sightings) in &self.global_variable_symbols {
            if sightings.len() > 1 {
                log::debug!("linking global variable {name}");
                for pair in sightings.windows(2) {
                    cvar::constrain_cons_var_geq(
                        &self.cvars,
                        &mut self.cs,
                        pair[0],
                        pair[1],
                        ConsAction::SameToSame,
                        "Global variable symbol",
                        None,
                    );
                }
            }
        }

        // A global with no definition anywhere lives in code we cannot see;
        // nothing about its shape can be trusted.
        for (name, has_definition) in &self.extern_g_vars {
            if !*has_definition {
                let reason = format!("External global variable {name} has no definition");
                if let Some(sightings) = self.global_variable_symbols.get(name) {
                    for &var in sightings {
                        cvar::constrain_to_wild(&self.cvars, &mut self.cs, var, &reason, None);
                    }
                }
            }
        }

        // Unresolved external functions: the body is outside the program, so
        // the internal views and any non-generic external view go wild. A
        // generic (`_Itype_for_any`) signature keeps its external view — the
        // per-call-site instantiation still carries checked types.
        for (name, &fv_id) in &self.external_function_fv_cons {
            let reason =
                format!("Unchecked pointer in parameter or return of external function {name}");
            wild_if_unresolved(&self.cvars, &mut self.cs, fv_id, &reason);
        }

        // A bodyless static function cannot even link into the final
        // program, but code under development has them; treat them like
        // unresolved externals, scoped to their file.
        for (file, funcs) in &self.static_function_fv_cons {
            for (name, &fv_id) in funcs {
                let reason = format!(
                    "Unchecked pointer in parameter or return of static function {name} in {file}"
                );
                wild_if_unresolved(&self.cvars, &mut self.cs, fv_id, &reason);
            }
        }

        Ok(())
    }
}

/// Wild the internal views of a bodyless function, and the external views of
/// everything not bound to a generic type variable.
fn wild_if_unresolved(
    cvars: &Arena<ConstraintVar>,
    cs: &mut ConstraintStore,
    fv_id: CVarId,
    reason: &str,
) {
    let fv = cvars[fv_id]
        .as_function()
        .expect("function maps hold function variables");
    if fv.has_body() {
        return;
    }

    let spare = |id: CVarId| cvars[id].as_pointer().is_some_and(|p| p.is_generic());

    cvar::constrain_to_wild(cvars, cs, fv.internal_return(), reason, None);
    if !spare(fv.external_return()) {
        cvar::constrain_to_wild(cvars, cs, fv.external_return(), reason, None);
    }
    for pair in fv.params() {
        cvar::constrain_to_wild(cvars, cs, pair.internal, reason, None);
        if !spare(pair.external) {
            cvar::constrain_to_wild(cvars, cs, pair.external, reason, None);
        }
    }
}
