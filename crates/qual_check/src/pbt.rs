//! Property tests over randomly generated constraint systems.

use proptest::prelude::*;
use qual_ty::{Atom, PtrKind};

use crate::store::{Constraint, Reason};
use crate::{ConvertOptions, ProgramInfo};

const NUM_VARS: usize = 8;

/// Decode a generated operand: low codes pick a variable, the rest a
/// lattice constant.
fn decode(vars: &[Atom], code: u8) -> Atom {
    if (code as usize) < vars.len() {
        vars[code as usize]
    } else {
        match code % 4 {
            0 => Atom::PTR,
            1 => Atom::ARR,
            2 => Atom::NTARR,
            _ => Atom::WILD,
        }
    }
}

fn engine_with_constraints(batch: &[(u8, u8)]) -> (ProgramInfo, Vec<Atom>) {
    let mut pi = ProgramInfo::new(ConvertOptions::default());
    let vars: Vec<Atom> = (0..NUM_VARS)
        .map(|_| pi.constraints_mut().mk_var())
        .collect();
    for &(l, r) in batch {
        let lhs = vars[l as usize];
        let rhs = decode(&vars, r);
        pi.constraints_mut()
            .add_geq(lhs, rhs, true, Reason::new("generated", None));
    }
    (pi, vars)
}

proptest! {
    /// Feeding more constraints never lowers any assignment.
    #[test]
    fn solving_is_monotone_under_new_constraints(
        first in prop::collection::vec((0u8..NUM_VARS as u8, 0u8..16), 0..24),
        second in prop::collection::vec((0u8..NUM_VARS as u8, 0u8..16), 0..12),
    ) {
        let (mut pi, vars) = engine_with_constraints(&first);
        pi.solve_constraints().unwrap();
        let before: Vec<Option<PtrKind>> = vars
            .iter()
            .map(|&v| pi.constraints().assignment_opt(v))
            .collect();

        for (l, r) in second {
            let lhs = vars[l as usize];
            let rhs = decode(&vars, r);
            pi.constraints_mut()
                .add_geq(lhs, rhs, true, Reason::new("generated", None));
        }
        pi.solve_constraints().unwrap();

        for (&v, old) in vars.iter().zip(before) {
            if let Some(old) = old {
                let new = pi.constraints().assignment(v);
                prop_assert!(old.leq(new), "{v} dropped from {old} to {new}");
            }
        }
    }

    /// At a fixed point, every `lhs ⊒ rhs` with a wild right side has a wild
    /// left side: wildness has closed over the graph.
    #[test]
    fn wildness_closes_at_fixed_point(
        batch in prop::collection::vec((0u8..NUM_VARS as u8, 0u8..16), 0..32),
    ) {
        let (mut pi, _) = engine_with_constraints(&batch);
        pi.solve_constraints().unwrap();

        let cs = pi.constraints();
        for c in cs.constraints() {
            let Constraint::Geq(body) = c else { continue };
            if body.lhs.is_var() && cs.assignment_opt(body.rhs) == Some(PtrKind::Wild) {
                prop_assert_eq!(cs.assignment(body.lhs), PtrKind::Wild);
            }
        }
    }

    /// Solving is idempotent: a second run moves nothing.
    #[test]
    fn solving_twice_changes_nothing(
        batch in prop::collection::vec((0u8..NUM_VARS as u8, 0u8..16), 0..32),
    ) {
        let (mut pi, vars) = engine_with_constraints(&batch);
        pi.solve_constraints().unwrap();
        let len = pi.constraints().len();
        let snapshot: Vec<PtrKind> = vars
            .iter()
            .map(|&v| pi.constraints().assignment(v))
            .collect();

        pi.solve_constraints().unwrap();
        prop_assert_eq!(pi.constraints().len(), len);
        for (&v, old) in vars.iter().zip(snapshot) {
            prop_assert_eq!(pi.constraints().assignment(v), old);
        }
    }
}
