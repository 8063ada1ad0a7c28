//! The constraint store: owns every atom and every constraint.
//!
//! Constraints are deduplicated structurally. The same fact discovered twice
//! (say, a header included from two translation units) inserts once; the
//! reasons of the duplicates are retained, with the first kept for display.
//! The store also owns the two constraint graphs, keeping them consistent
//! with the constraint set by construction, and the solver's assignment map.

use qual_ast::Psl;
use qual_ty::{Atom, PtrKind, VarKey};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::graph::ConstraintGraph;

/// Why a constraint exists. Shown in wild-pointer reports, so the text reads
/// as a sentence fragment ("External global variable g has no definition").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reason {
    pub text: SmolStr,
    pub loc: Option<Psl>,
}

impl Reason {
    pub fn new(text: impl Into<SmolStr>, loc: Option<&Psl>) -> Self {
        Reason {
            text: text.into(),
            loc: loc.cloned(),
        }
    }
}

/// Body of an `lhs ⊒ rhs` assertion. `checked` selects the coloring: checked
/// constraints drive qualifier propagation and root-cause analysis, unchecked
/// ("pointer-type") constraints carry the interop-type side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeqBody {
    pub lhs: Atom,
    pub rhs: Atom,
    pub checked: bool,
}

impl GeqBody {
    pub fn new(lhs: Atom, rhs: Atom, checked: bool) -> Self {
        GeqBody { lhs, rhs, checked }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Geq(GeqBody),
    /// Fires `conclusion` once `premise` is entailed by the current
    /// assignment. The only form the engine emits has a `WILD` conclusion
    /// right-hand side.
    Implies {
        premise: GeqBody,
        conclusion: GeqBody,
    },
}

#[derive(Debug, Default)]
pub struct ConstraintStore {
    next_key: u32,
    constraints: Vec<Constraint>,
    geq_seen: FxHashMap<GeqBody, usize>,
    implies_seen: FxHashMap<(GeqBody, GeqBody), usize>,
    /// All reasons ever attached to a body; index 0 is the display reason.
    reasons: FxHashMap<GeqBody, Vec<Reason>>,
    /// Current solution, monotone during solving. Absent key = lattice
    /// bottom.
    assignments: FxHashMap<VarKey, PtrKind>,
    checked_graph: ConstraintGraph,
    ptr_type_graph: ConstraintGraph,
}

impl ConstraintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh variable atom.
    pub fn mk_var(&mut self) -> Atom {
        let key = VarKey(self.next_key);
        self.next_key += 1;
        Atom::Var(key)
    }

    pub fn var_count(&self) -> u32 {
        self.next_key
    }

    /// The four interned lattice constants.
    pub fn constants(&self) -> [Atom; 4] {
        [Atom::PTR, Atom::NTARR, Atom::ARR, Atom::WILD]
    }

    /// Number of stored constraints. Linker idempotence is observable here:
    /// re-running a phase that only re-derives known facts leaves it fixed.
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Insert `lhs ⊒ rhs`. Returns true when the constraint is new. The
    /// matching graph edge (rhs → lhs, lower element toward higher) is added
    /// to the coloring the constraint belongs to.
    pub fn add_geq(&mut self, lhs: Atom, rhs: Atom, checked: bool, reason: Reason) -> bool {
        let body = GeqBody::new(lhs, rhs, checked);
        self.reasons.entry(body).or_default().push(reason);
        if self.geq_seen.contains_key(&body) {
            return false;
        }
        self.geq_seen.insert(body, self.constraints.len());
        self.constraints.push(Constraint::Geq(body));
        self.graph_for_mut(checked).add_edge(rhs, lhs);
        true
    }

    /// Bidirectional `⊒`: equality of kinds.
    pub fn add_eq(&mut self, a: Atom, b: Atom, checked: bool, reason: Reason) {
        self.add_geq(a, b, checked, reason.clone());
        self.add_geq(b, a, checked, reason);
    }

    /// Insert an implication. The reason is recorded against the conclusion
    /// body so it survives to the root-cause report if the implication fires.
    /// No graph edge is added until the premise is entailed and the
    /// conclusion materializes as a real constraint.
    pub fn add_implies(&mut self, premise: GeqBody, conclusion: GeqBody, reason: Reason) -> bool {
        let key = (premise, conclusion);
        self.reasons.entry(conclusion).or_default().push(reason);
        if self.implies_seen.contains_key(&key) {
            return false;
        }
        self.implies_seen.insert(key, self.constraints.len());
        self.constraints
            .push(Constraint::Implies {
                premise,
                conclusion,
            });
        true
    }

    /// The display reason for a constraint body (first one recorded).
    pub fn reason_for(&self, body: &GeqBody) -> Option<&Reason> {
        self.reasons.get(body).and_then(|rs| rs.first())
    }

    /// The solved kind for an atom. Constants resolve to themselves; a
    /// variable still at the virtual bottom reads out as `Ptr`, the most
    /// precise safe qualifier.
    pub fn assignment(&self, atom: Atom) -> PtrKind {
        match atom {
            Atom::Const(k) => k,
            Atom::Var(key) => self.assignments.get(&key).copied().unwrap_or(PtrKind::Ptr),
        }
    }

    /// Like [`assignment`](Self::assignment) but exposing the bottom:
    /// `None` means no constraint has touched the variable yet.
    pub fn assignment_opt(&self, atom: Atom) -> Option<PtrKind> {
        match atom {
            Atom::Const(k) => Some(k),
            Atom::Var(key) => self.assignments.get(&key).copied(),
        }
    }

    /// Raise a variable's assignment by joining `kind` in. Returns true if
    /// the assignment changed. Never lowers: the solution is monotone.
    pub fn raise(&mut self, key: VarKey, kind: PtrKind) -> bool {
        match self.assignments.get(&key) {
            None => {
                self.assignments.insert(key, kind);
                true
            }
            Some(&cur) => {
                let joined = cur.join(kind);
                if joined == cur {
                    false
                } else {
                    self.assignments.insert(key, joined);
                    true
                }
            }
        }
    }

    pub fn checked_graph(&self) -> &ConstraintGraph {
        &self.checked_graph
    }

    pub fn ptr_type_graph(&self) -> &ConstraintGraph {
        &self.ptr_type_graph
    }

    fn graph_for_mut(&mut self, checked: bool) -> &mut ConstraintGraph {
        if checked {
            &mut self.checked_graph
        } else {
            &mut self.ptr_type_graph
        }
    }
}
