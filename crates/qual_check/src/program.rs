//! Program-wide inference state: constraint storage plus every symbol table
//! keyed by persistent source location or symbol name.
//!
//! One `ProgramInfo` lives for the whole conversion. Translation units are
//! ingested one at a time between `enter_compilation_unit` /
//! `exit_compilation_unit` brackets; the constraint state persists across
//! units while everything AST-shaped is dropped with the unit.

use std::collections::BTreeMap;
use std::path::Path;

use la_arena::Arena;
use qual_ast::{Decl, FnSig, FunctionDecl, Linkage, Psl, PtrType, TranslationUnit};
use qual_ty::Atom;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use crate::cvar::{self, CVarId, ConsAction, ConstraintVar};
use crate::root_cause::ConstraintState;
use crate::store::ConstraintStore;
use crate::EngineError;

/// Knobs the driver hands the engine. No global mutable state: everything
/// phase code consults lives here.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Ancestor directory of the files the tool may rewrite. Empty means the
    /// working directory, i.e. everything passed in is writable.
    pub base_dir: SmolStr,
    pub allow_sources_outside_base_dir: bool,
    /// Consider array kinds for conversion; otherwise the reported solution
    /// falls back to single-object pointers.
    pub all_types: bool,
    /// Sound handling of variadic functions instead of wilding them.
    pub handle_varargs: bool,
    /// Propagate constraints through interop-typed parameters and returns.
    pub enable_itype_prop: bool,
    pub verbose: bool,
    pub warn_root_cause: bool,
    pub warn_all_root_cause: bool,
    /// User-specified allocator functions in addition to the standard ones.
    /// Consulted by the front end when it classifies allocation calls.
    pub allocator_functions: Vec<SmolStr>,
}

#[derive(Debug, Default)]
pub(crate) struct TypedefEntry {
    pub(crate) vars: Vec<CVarId>,
    pub(crate) should_check: bool,
}

#[derive(Debug)]
pub struct ProgramInfo {
    pub(crate) opts: ConvertOptions,
    pub(crate) cs: ConstraintStore,
    pub(crate) cvars: Arena<ConstraintVar>,

    /// One constraint variable per PSL-unique declaration.
    pub(crate) variables: BTreeMap<Psl, CVarId>,
    /// Function symbols with external linkage, keyed by name.
    pub(crate) external_function_fv_cons: BTreeMap<SmolStr, CVarId>,
    /// Function symbols with internal linkage, keyed by file then name.
    pub(crate) static_function_fv_cons: BTreeMap<SmolStr, BTreeMap<SmolStr, CVarId>>,
    /// Every pointer variable seen for a global name, across units.
    pub(crate) global_variable_symbols: BTreeMap<SmolStr, Vec<CVarId>>,
    /// Whether a definition has been seen for each global name.
    pub(crate) extern_g_vars: BTreeMap<SmolStr, bool>,
    pub(crate) typedef_vars: FxHashMap<Psl, TypedefEntry>,

    /// Expression-level caches the rewriter reads back.
    pub(crate) expr_constraint_vars: BTreeMap<Psl, FxHashSet<CVarId>>,
    pub(crate) implicit_cast_constraint_vars: BTreeMap<Psl, FxHashSet<CVarId>>,

    /// Per-call-site `_Itype_for_any` instantiations, one per type variable
    /// index. Written at most once per (call, index).
    pub(crate) type_param_bindings: BTreeMap<Psl, BTreeMap<u32, CVarId>>,

    pub(crate) cstate: ConstraintState,

    /// True between units: AST-derived descriptors must not be fed in.
    pub(crate) persisted: bool,
}

impl ProgramInfo {
    pub fn new(opts: ConvertOptions) -> Self {
        ProgramInfo {
            opts,
            cs: ConstraintStore::new(),
            cvars: Arena::new(),
            variables: BTreeMap::new(),
            external_function_fv_cons: BTreeMap::new(),
            static_function_fv_cons: BTreeMap::new(),
            global_variable_symbols: BTreeMap::new(),
            extern_g_vars: BTreeMap::new(),
            typedef_vars: FxHashMap::default(),
            expr_constraint_vars: BTreeMap::new(),
            implicit_cast_constraint_vars: BTreeMap::new(),
            type_param_bindings: BTreeMap::new(),
            cstate: ConstraintState::default(),
            persisted: true,
        }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.opts
    }

    pub fn constraints(&self) -> &ConstraintStore {
        &self.cs
    }

    pub fn constraints_mut(&mut self) -> &mut ConstraintStore {
        &mut self.cs
    }

    pub fn cvar(&self, id: CVarId) -> &ConstraintVar {
        &self.cvars[id]
    }

    pub fn cvars(&self) -> &Arena<ConstraintVar> {
        &self.cvars
    }

    pub fn variables(&self) -> impl Iterator<Item = (&Psl, CVarId)> {
        self.variables.iter().map(|(p, &id)| (p, id))
    }

    pub fn constraint_state(&self) -> &ConstraintState {
        &self.cstate
    }

    /// Whether the tool is allowed to rewrite `file`.
    pub fn can_write(&self, file: &str) -> bool {
        self.opts.base_dir.is_empty() || Path::new(file).starts_with(self.opts.base_dir.as_str())
    }

    // ==========================================================================
    // Translation-unit lifecycle
    // ==========================================================================

    pub fn enter_compilation_unit(&mut self, path: &str) {
        assert!(self.persisted, "translation units cannot nest");
        log::debug!("entering translation unit {path}");
        self.persisted = false;
    }

    pub fn exit_compilation_unit(&mut self) {
        assert!(!self.persisted, "no translation unit is open");
        self.persisted = true;
    }

    /// Ingest every translation unit: register typedefs, then visit each
    /// declarator exactly once. The first engine phase.
    pub fn build_initial_constraints(
        &mut self,
        units: &[TranslationUnit],
    ) -> Result<(), EngineError> {
        for tu in units {
            self.enter_compilation_unit(&tu.path);
            for td in &tu.typedefs {
                self.add_typedef(td.psl.clone(), td.should_check);
            }
            let result = tu.decls.iter().try_for_each(|d| self.add_variable(d));
            self.exit_compilation_unit();
            result?;
        }
        log::info!(
            "built initial constraints: {} variables, {} constraints",
            self.cs.var_count(),
            self.cs.len()
        );
        Ok(())
    }

    // ==========================================================================
    // Declaration intake
    // ==========================================================================

    /// Add constraint variables for one declarator sighting.
    pub fn add_variable(&mut self, decl: &Decl) -> Result<(), EngineError> {
        assert!(!self.persisted, "declarations require a live translation unit");
        let ploc = decl.psl().clone();
        assert!(ploc.is_valid(), "declaration without a source location");

        // Two variables share a PSL only when declared inside one macro
        // expansion, or when a macro name is defined differently in
        // different parts of the program. Either way the existing entry
        // cannot be rewritten faithfully, so it goes wild and the new
        // sighting is dropped. Functions are exempt: their identity is the
        // symbol name, not the PSL.
        if self.variables.contains_key(&ploc) && !matches!(decl, Decl::Function(_)) {
            if !decl.in_macro() {
                let existing = self.variables[&ploc];
                cvar::constrain_to_wild(
                    &self.cvars,
                    &mut self.cs,
                    existing,
                    "Duplicate source location. Possibly part of a macro.",
                    Some(&ploc),
                );
            }
            return Ok(());
        }

        let new_cv = match decl {
            Decl::Function(fd) => {
                let Some(f) = self.add_function_variable(fd, &ploc)? else {
                    return Ok(());
                };
                f
            }

            Decl::Var(vd) => {
                if !vd.ty.is_pointer() {
                    return Ok(());
                }
                let p = cvar::pvc_from_type(
                    &mut self.cvars,
                    &mut self.cs,
                    &vd.name,
                    &ploc,
                    &vd.ty,
                    false,
                    false,
                );
                self.cvars[p].set_valid_decl();
                self.unify_if_typedef(p, &vd.ty);
                if vd.has_global_storage {
                    if vd.has_definition {
                        self.extern_g_vars.insert(vd.name.clone(), true);
                    } else {
                        // Never downgrade: a definition seen in an earlier
                        // unit stays seen.
                        self.extern_g_vars.entry(vd.name.clone()).or_insert(false);
                    }
                    self.global_variable_symbols
                        .entry(vd.name.clone())
                        .or_default()
                        .push(p);
                }
                self.special_case_var_intros(p, &vd.ty, false, &ploc);
                p
            }

            Decl::Field(fld) => {
                if !fld.ty.is_pointer() {
                    return Ok(());
                }
                let p = cvar::pvc_from_type(
                    &mut self.cvars,
                    &mut self.cs,
                    &fld.name,
                    &ploc,
                    &fld.ty,
                    false,
                    false,
                );
                self.cvars[p].set_valid_decl();
                self.unify_if_typedef(p, &fld.ty);
                self.special_case_var_intros(p, &fld.ty, false, &ploc);
                p
            }
        };

        if !self.can_write(ploc.file_name()) {
            cvar::constrain_to_wild(
                &self.cvars,
                &mut self.cs,
                new_cv,
                "Declaration in non-writable file",
                Some(&ploc),
            );
        }
        self.constrain_wild_if_macro(new_cv, decl.in_macro(), &ploc);
        self.variables.insert(ploc, new_cv);
        Ok(())
    }

    /// Returns `None` when the sighting needs no further registration (PSL
    /// collision with an already-processed definition).
    fn add_function_variable(
        &mut self,
        fd: &FunctionDecl,
        ploc: &Psl,
    ) -> Result<Option<CVarId>, EngineError> {
        let f = cvar::fvc_from_sig(
            &mut self.cvars,
            &mut self.cs,
            &fd.name,
            &fd.psl.file,
            &fd.psl,
            &fd.sig,
            fd.linkage == Linkage::Internal,
            fd.has_body,
        );
        self.cvars[f].set_valid_decl();

        if self.variables.contains_key(ploc) {
            // A header defining a function and included from several units
            // re-sights the same PSL. If the symbol is already known, it was
            // fully processed the first time.
            if self.get_func_constraint(&fd.name, &fd.psl.file, fd.linkage).is_none() {
                self.insert_new_fv_constraint(fd, f)?;
                self.constrain_wild_if_macro(f, fd.in_macro, ploc);
            }
            return Ok(None);
        }

        // Inserting may transplant `f` onto atoms that already exist for the
        // symbol, so no constraint may be placed on `f` before this point.
        self.insert_new_fv_constraint(fd, f)?;

        if fd.sig.is_variadic && !self.opts.handle_varargs {
            cvar::constrain_to_wild(
                &self.cvars,
                &mut self.cs,
                f,
                "Variadic function.",
                Some(ploc),
            );
        }

        let (ext_ret, int_ret, param_pairs) = {
            let fv = self.cvars[f].as_function().expect("just built a function var");
            (fv.external_return(), fv.internal_return(), fv.params().to_vec())
        };
        self.unify_if_typedef(ext_ret, &fd.sig.ret);
        self.unify_if_typedef(int_ret, &fd.sig.ret);

        for (param, pair) in fd.sig.params.iter().zip(param_pairs) {
            self.unify_if_typedef(pair.internal, &param.ty);
            self.unify_if_typedef(pair.external, &param.ty);
            self.cvars[pair.internal].set_valid_decl();
            // The pair lives on the function either way; it must be wilded
            // even when the PSL slot below is already taken.
            self.constrain_wild_if_macro(pair.external, param.in_macro, &param.psl);
            self.special_case_var_intros(
                pair.internal,
                &param.ty,
                param.generic_idx.is_some(),
                &param.psl,
            );
            // A parameter can sit in a macro even when its function does not.
            if param.psl.is_valid() && !self.variables.contains_key(&param.psl) {
                self.variables.insert(param.psl.clone(), pair.internal);
            }
        }

        Ok(Some(f))
    }

    /// A va_list-typed declaration, or a void-pointer one outside a generic
    /// binding, can never carry a checked kind.
    fn special_case_var_intros(
        &mut self,
        pvc: CVarId,
        ty: &PtrType,
        is_generic_param: bool,
        psl: &Psl,
    ) {
        if ty.is_va_list() || (ty.is_void() && !is_generic_param) {
            let reason = if ty.is_va_list() {
                "Variable type is va_list."
            } else {
                "Variable type void."
            };
            cvar::constrain_to_wild(&self.cvars, &mut self.cs, pvc, reason, Some(psl));
        }
    }

    /// The rewriter cannot edit text inside macro expansions, so anything
    /// declared there stays as written.
    fn constrain_wild_if_macro(&mut self, cv: CVarId, in_macro: bool, psl: &Psl) {
        if in_macro {
            cvar::constrain_to_wild(
                &self.cvars,
                &mut self.cs,
                cv,
                "Pointer in Macro declaration.",
                Some(psl),
            );
        }
    }

    // ==========================================================================
    // Function symbol maps
    // ==========================================================================

    fn insert_new_fv_constraint(
        &mut self,
        fd: &FunctionDecl,
        new_c: CVarId,
    ) -> Result<(), EngineError> {
        match fd.linkage {
            Linkage::External => Self::insert_into_function_map(
                &mut self.external_function_fv_cons,
                &mut self.cvars,
                &mut self.cs,
                fd,
                new_c,
            ),
            Linkage::Internal => Self::insert_into_function_map(
                self.static_function_fv_cons
                    .entry(fd.psl.file.clone())
                    .or_default(),
                &mut self.cvars,
                &mut self.cs,
                fd,
                new_c,
            ),
        }
    }

    /// Reconcile a new sighting of a function symbol with what the map
    /// already holds. Exactly one atom identity survives per symbol so that
    /// constraints accumulate in one place.
    fn insert_into_function_map(
        map: &mut BTreeMap<SmolStr, CVarId>,
        cvars: &mut Arena<ConstraintVar>,
        cs: &mut ConstraintStore,
        fd: &FunctionDecl,
        new_c: CVarId,
    ) -> Result<(), EngineError> {
        let name = fd.name.clone();
        let Some(&old_c) = map.get(&name) else {
            map.insert(name, new_c);
            return Ok(());
        };

        let (old_has_body, old_params) = {
            let old = cvars[old_c].as_function().expect("function map holds functions");
            (old.has_body(), old.num_params())
        };
        let (new_has_body, new_params) = {
            let new = cvars[new_c].as_function().expect("function map holds functions");
            (new.has_body(), new.num_params())
        };

        if !old_has_body {
            if new_has_body || (old_params == 0 && new_params != 0) {
                // The new sighting is the definition (or the more specific
                // prototype): it adopts the old atoms and takes over the
                // map slot.
                cvar::brain_transplant(cvars, new_c, old_c);
                map.insert(name, new_c);
            } else {
                cvar::merge_declaration(cvars, cs, old_c, new_c).map_err(|reason| {
                    EngineError::MergeConflict {
                        name: name.clone(),
                        psl: fd.psl.clone(),
                        reason,
                    }
                })?;
            }
        } else if new_has_body {
            return Err(EngineError::DuplicateDefinition {
                name,
                psl: fd.psl.clone(),
            });
        } else {
            // Another prototype after the definition: it adopts the
            // definition's atoms so later constraints land there.
            cvar::brain_transplant(cvars, new_c, old_c);
        }
        Ok(())
    }

    pub fn get_func_constraint(
        &self,
        name: &str,
        file: &str,
        linkage: Linkage,
    ) -> Option<CVarId> {
        match linkage {
            Linkage::External => self.external_function_fv_cons.get(name).copied(),
            Linkage::Internal => self
                .static_function_fv_cons
                .get(file)
                .and_then(|m| m.get(name))
                .copied(),
        }
    }

    /// The constraint variable for a call target, creating a bodyless
    /// external entry when the program calls a function it never declared.
    pub fn get_or_create_extern_function(
        &mut self,
        name: &SmolStr,
        sig: &FnSig,
        psl: &Psl,
    ) -> CVarId {
        if let Some(&id) = self.external_function_fv_cons.get(name) {
            return id;
        }
        let f = cvar::fvc_from_sig(
            &mut self.cvars,
            &mut self.cs,
            name,
            &psl.file,
            psl,
            sig,
            false,
            false,
        );
        self.external_function_fv_cons.insert(name.clone(), f);
        f
    }

    /// The constraint variable a declarator resolves to, if one was added.
    pub fn get_variable(&self, decl: &Decl) -> Option<CVarId> {
        match decl {
            Decl::Function(fd) => self.get_func_constraint(&fd.name, &fd.psl.file, fd.linkage),
            _ => self.variables.get(decl.psl()).copied(),
        }
    }

    /// The internal view of a function parameter.
    pub fn get_param_variable(&self, fd: &FunctionDecl, index: usize) -> Option<CVarId> {
        let f = self.get_func_constraint(&fd.name, &fd.psl.file, fd.linkage)?;
        self.cvars[f].as_function()?.internal_param(index)
    }

    // ==========================================================================
    // Typedefs
    // ==========================================================================

    pub fn add_typedef(&mut self, psl: Psl, should_check: bool) {
        self.typedef_vars.entry(psl).or_insert(TypedefEntry {
            vars: Vec::new(),
            should_check,
        });
    }

    pub fn seen_typedef(&self, psl: &Psl) -> bool {
        self.typedef_vars.contains_key(psl)
    }

    pub fn lookup_typedef(&self, psl: &Psl) -> Option<(&[CVarId], bool)> {
        self.typedef_vars
            .get(psl)
            .map(|e| (e.vars.as_slice(), e.should_check))
    }

    /// Pointers spelled through one named typedef rewrite together, so their
    /// constraint variables are equated as they appear.
    fn unify_if_typedef(&mut self, pvc: CVarId, ty: &PtrType) {
        let Some(td) = &ty.typedef else { return };
        let Some(entry) = self.typedef_vars.get(&td.psl) else {
            return;
        };
        if !entry.should_check {
            return;
        }
        let bounds = entry.vars.clone();
        cvar::set_typedef(&mut self.cvars, pvc, td.psl.clone(), td.name.clone());
        for bound in bounds {
            cvar::constrain_cons_var_geq(
                &self.cvars,
                &mut self.cs,
                pvc,
                bound,
                ConsAction::SameToSame,
                "Unified typedef",
                Some(&td.psl),
            );
        }
        self.typedef_vars
            .get_mut(&td.psl)
            .expect("typedef entry just read")
            .vars
            .push(pvc);
    }

    // ==========================================================================
    // Expression caches
    // ==========================================================================

    /// Cache the qualifier view of an expression for the rewriting pass.
    /// Expressions inside macros are skipped: several expansions can share
    /// one PSL, and a cache hit would masquerade as a visited expression.
    pub fn store_persistent_constraints(
        &mut self,
        psl: &Psl,
        implicit_cast: bool,
        rewritable: bool,
        vars: impl IntoIterator<Item = CVarId>,
    ) {
        if !psl.is_valid() || !rewritable {
            return;
        }
        let map = if implicit_cast {
            &mut self.implicit_cast_constraint_vars
        } else {
            &mut self.expr_constraint_vars
        };
        map.entry(psl.clone()).or_default().extend(vars);
    }

    pub fn has_persistent_constraints(&self, psl: &Psl, implicit_cast: bool) -> bool {
        let map = if implicit_cast {
            &self.implicit_cast_constraint_vars
        } else {
            &self.expr_constraint_vars
        };
        psl.is_valid() && map.get(psl).is_some_and(|s| !s.is_empty())
    }

    pub fn get_persistent_constraints(
        &self,
        psl: &Psl,
        implicit_cast: bool,
    ) -> Option<&FxHashSet<CVarId>> {
        let map = if implicit_cast {
            &self.implicit_cast_constraint_vars
        } else {
            &self.expr_constraint_vars
        };
        map.get(psl)
    }

    // ==========================================================================
    // Generic type-parameter bindings
    // ==========================================================================

    /// Record the type instantiated for one `_Itype_for_any` variable at one
    /// call site. A binding is written at most once per (call, index).
    pub fn set_type_param_binding(&mut self, call: &Psl, index: u32, cvar: CVarId) {
        let map = self.type_param_bindings.entry(call.clone()).or_default();
        assert!(
            !map.contains_key(&index),
            "type parameter binding rewritten at {call} index {index}"
        );
        map.insert(index, cvar);
    }

    pub fn has_type_param_bindings(&self, call: &Psl) -> bool {
        self.type_param_bindings.contains_key(call)
    }

    pub fn get_type_param_bindings(&self, call: &Psl) -> Option<&BTreeMap<u32, CVarId>> {
        self.type_param_bindings.get(call)
    }

    // ==========================================================================
    // Visitor-facing constraint helpers
    // ==========================================================================

    /// Allocate a standalone pointer variable, e.g. for a cast expression
    /// the front end needs a qualifier view of.
    pub fn make_pointer_var(&mut self, name: &SmolStr, psl: &Psl, ty: &PtrType) -> CVarId {
        cvar::pvc_from_type(&mut self.cvars, &mut self.cs, name, psl, ty, false, false)
    }

    pub fn constrain_to_wild(&mut self, id: CVarId, reason: &str, loc: Option<&Psl>) {
        cvar::constrain_to_wild(&self.cvars, &mut self.cs, id, reason, loc);
    }

    pub fn constrain_cons_var_geq(
        &mut self,
        lhs: CVarId,
        rhs: CVarId,
        action: ConsAction,
        reason: &str,
        loc: Option<&Psl>,
    ) {
        cvar::constrain_cons_var_geq(&self.cvars, &mut self.cs, lhs, rhs, action, reason, loc);
    }

    /// All atoms a constraint variable owns, transitively.
    pub fn atoms_of(&self, id: CVarId) -> Vec<Atom> {
        let mut out = Vec::new();
        cvar::collect_atoms(&self.cvars, id, &mut out);
        out
    }
}
