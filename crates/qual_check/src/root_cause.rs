//! Root-cause attribution for wild pointers.
//!
//! After solving, wild atoms split into the *direct* ones — forced wild by an
//! explicit constraint against the `WILD` constant — and the *transitive*
//! ones that wildness reached through the checked graph. Each direct atom is
//! walked breadth-first along the direction wildness flows, blaming every
//! variable atom it reaches on it. Implications need one extra step: firing
//! adds the physical edge from `WILD` to the conclusion, but the logical flow
//! runs from the premise's left side to the conclusion's, so an auxiliary map
//! seeds additional walks.

use std::collections::{BTreeMap, BTreeSet};

use qual_ast::Psl;
use qual_ty::{Atom, VarKey};
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use crate::cvar::{CVarId, ConstraintVar};
use crate::store::Constraint;
use crate::ProgramInfo;

/// Why a direct wild atom went wild, for user reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildReason {
    pub reason: SmolStr,
    pub loc: Option<Psl>,
}

/// The interim state the rewriter and the reports consume.
#[derive(Debug, Default)]
pub struct ConstraintState {
    /// Every directly-wild variable atom.
    pub all_wild_atoms: BTreeSet<VarKey>,
    /// Directly-wild atoms belonging to declarations in writable files.
    pub in_src_wild_atoms: BTreeSet<VarKey>,
    /// Atoms reached from some direct wild atom through the checked graph.
    pub total_non_direct_wild_atoms: BTreeSet<VarKey>,
    pub in_src_non_direct_wild_atoms: BTreeSet<VarKey>,
    /// Affected atom → the direct causes it is blamed on.
    pub rc_map: BTreeMap<VarKey, BTreeSet<VarKey>>,
    /// Direct cause → every atom it takes down.
    pub src_w_map: BTreeMap<VarKey, BTreeSet<VarKey>>,
    /// Direct cause → the first reason and location recorded for it.
    pub root_wild_atoms_with_reason: BTreeMap<VarKey, WildReason>,
    /// Atom → the source location of the declaration that owns it
    /// (writable files only).
    pub atom_source_map: BTreeMap<VarKey, Psl>,
    pub valid_source_files: BTreeSet<SmolStr>,
    /// Pointer-level projections of the two maps above, for user reports
    /// that talk about declarations rather than atoms.
    pub ptr_rc_map: FxHashMap<CVarId, BTreeSet<VarKey>>,
    pub ptr_src_w_map: BTreeMap<VarKey, FxHashSet<CVarId>>,
}

impl ProgramInfo {
    /// The fourth engine phase: partition wild atoms and attribute blame.
    pub fn compute_interim_constraint_state(&mut self) -> &ConstraintState {
        let mut state = ConstraintState::default();

        // Atoms of interest: everything owned by a valid declaration, and
        // the subset owned by declarations the tool may rewrite.
        let mut all_valid: BTreeSet<VarKey> = BTreeSet::new();
        let mut writable_valid: BTreeSet<VarKey> = BTreeSet::new();
        for (psl, &id) in &self.variables {
            if !self.cvars[id].is_valid_decl() {
                continue;
            }
            let keys: Vec<VarKey> = self.atoms_of(id).iter().filter_map(|a| a.as_var()).collect();
            all_valid.extend(keys.iter().copied());
            if self.can_write(psl.file_name()) {
                writable_valid.extend(keys);
            }
        }

        // Premise-LHS → conclusion-LHS, so blame crosses fired implications.
        let mut imp_map: FxHashMap<Atom, Vec<Atom>> = FxHashMap::default();
        for c in self.cs.constraints() {
            if let Constraint::Implies {
                premise,
                conclusion,
            } = c
            {
                imp_map.entry(premise.lhs).or_default().push(conclusion.lhs);
            }
        }

        let chk = self.cs.checked_graph();
        let direct: Vec<VarKey> = chk
            .successors(Atom::WILD)
            .into_iter()
            .filter_map(|a| a.as_var())
            .collect();

        for cause in direct {
            let mut group: BTreeSet<VarKey> = BTreeSet::new();
            {
                let mut visitor = |atom: Atom| {
                    if let Some(key) = atom.as_var() {
                        if all_valid.contains(&key) {
                            state.rc_map.entry(key).or_default().insert(cause);
                            group.insert(key);
                        }
                    }
                };
                chk.visit_breadth_first(Atom::Var(cause), &mut visitor);
                if let Some(conclusions) = imp_map.get(&Atom::Var(cause)) {
                    for &conclusion in conclusions {
                        if conclusion.is_var() {
                            chk.visit_breadth_first(conclusion, &mut visitor);
                        }
                    }
                }
            }
            state
                .total_non_direct_wild_atoms
                .extend(group.iter().copied());
            state.all_wild_atoms.insert(cause);
            state.src_w_map.entry(cause).or_default().extend(group);
        }

        state.in_src_wild_atoms = state
            .all_wild_atoms
            .intersection(&writable_valid)
            .copied()
            .collect();
        state.in_src_non_direct_wild_atoms = state
            .total_non_direct_wild_atoms
            .intersection(&writable_valid)
            .copied()
            .collect();

        // Where each atom lives in source, for reports and reason fallback.
        let entries: Vec<(Psl, CVarId)> = self
            .variables
            .iter()
            .map(|(p, &id)| (p.clone(), id))
            .chain(
                self.expr_constraint_vars
                    .iter()
                    .flat_map(|(p, set)| set.iter().map(move |&id| (p.clone(), id))),
            )
            .collect();
        for (psl, id) in entries {
            self.insert_into_ptr_source_map(&mut state, &psl, id);
        }

        // The reason table: one entry per direct wild atom, first recorded
        // reason wins. Falls back to the atom's declaration site when the
        // constraint itself carries no location.
        for c in self.cs.constraints() {
            let Constraint::Geq(body) = c else { continue };
            if !body.checked || body.rhs != Atom::WILD {
                continue;
            }
            let Some(key) = body.lhs.as_var() else {
                continue;
            };
            let recorded = self.cs.reason_for(body);
            let loc = recorded
                .and_then(|r| r.loc.clone())
                .or_else(|| state.atom_source_map.get(&key).cloned());
            state
                .root_wild_atoms_with_reason
                .entry(key)
                .or_insert_with(|| WildReason {
                    reason: recorded.map(|r| r.text.clone()).unwrap_or_default(),
                    loc,
                });
        }

        self.compute_ptr_level_stats(&mut state);

        self.cstate = state;
        &self.cstate
    }

    fn insert_into_ptr_source_map(&self, state: &mut ConstraintState, psl: &Psl, cv: CVarId) {
        let file = psl.file_name();
        if !self.can_write(file) {
            return;
        }
        state.valid_source_files.insert(SmolStr::new(file));

        match &self.cvars[cv] {
            ConstraintVar::Pointer(p) => {
                for key in p.atoms().iter().filter_map(|a| a.as_var()) {
                    state.atom_source_map.insert(key, psl.clone());
                }
                if let Some(fv_id) = p.fv() {
                    if let Some(fv) = self.cvars[fv_id].as_function() {
                        self.insert_into_ptr_source_map(state, psl, fv.external_return());
                        for i in 0..fv.num_params() {
                            let param = fv.external_param(i).expect("index in range");
                            self.insert_into_ptr_source_map(state, psl, param);
                        }
                    }
                }
            }
            ConstraintVar::Function(f) => {
                self.insert_into_ptr_source_map(state, psl, f.external_return());
            }
        }
    }

    /// Project the atom-level blame maps up to the constraint variables that
    /// own the atoms.
    fn compute_ptr_level_stats(&self, state: &mut ConstraintState) {
        let mut atom_ptr_map: FxHashMap<VarKey, CVarId> = FxHashMap::default();
        for &id in self.variables.values() {
            self.insert_cv_atoms(id, &mut atom_ptr_map);
        }

        for (&atom, causes) in &state.rc_map {
            if let Some(&cv) = atom_ptr_map.get(&atom) {
                state
                    .ptr_rc_map
                    .entry(cv)
                    .or_default()
                    .extend(causes.iter().copied());
            }
        }
        for (&cause, affected) in &state.src_w_map {
            for key in affected {
                if let Some(&cv) = atom_ptr_map.get(key) {
                    state.ptr_src_w_map.entry(cause).or_default().insert(cv);
                }
            }
        }
    }

    fn insert_cv_atoms(&self, cv: CVarId, map: &mut FxHashMap<VarKey, CVarId>) {
        match &self.cvars[cv] {
            ConstraintVar::Pointer(p) => {
                for key in p.atoms().iter().filter_map(|a| a.as_var()) {
                    // A prototype declared before its definition legitimately
                    // shares atoms with it; last sighting wins.
                    map.insert(key, cv);
                }
                if let Some(fv) = p.fv() {
                    self.insert_cv_atoms(fv, map);
                }
            }
            ConstraintVar::Function(f) => {
                self.insert_cv_atoms(f.external_return(), map);
                for i in 0..f.num_params() {
                    self.insert_cv_atoms(f.external_param(i).expect("index in range"), map);
                }
            }
        }
    }
}
