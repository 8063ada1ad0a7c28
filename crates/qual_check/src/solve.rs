//! The fixed-point solver.
//!
//! Each `lhs ⊒ rhs` constraint raises the left side's assignment by joining
//! in the right side's; implications whose premise has become entailed
//! materialize their conclusion as a real constraint. Passes repeat until
//! nothing moves. The lattice has height two and joining two distinct
//! checked kinds already tops out at wild, so each atom settles within two
//! effective rounds; the loop bound is the constraint count either way.

use qual_ty::Atom;

use crate::store::{Constraint, GeqBody, Reason};
use crate::{EngineError, ProgramInfo};

impl ProgramInfo {
    /// The third engine phase. Assignments only ever go up.
    pub fn solve_constraints(&mut self) -> Result<(), EngineError> {
        let mut rounds = 0usize;
        let mut changed = true;
        while changed {
            changed = false;
            rounds += 1;

            // The list grows while implications fire; the index loop picks
            // appended conclusions up within the same pass.
            let mut i = 0;
            while i < self.cs.constraints().len() {
                match self.cs.constraints()[i].clone() {
                    Constraint::Geq(body) => {
                        if self.propagate(body) {
                            changed = true;
                        }
                    }
                    Constraint::Implies {
                        premise,
                        conclusion,
                    } => {
                        if self.entailed(premise)
                            && self.cs.add_geq(
                                conclusion.lhs,
                                conclusion.rhs,
                                conclusion.checked,
                                Reason::new("Fired implication", None),
                            )
                        {
                            changed = true;
                        }
                    }
                }
                i += 1;
            }
        }
        log::info!("constraints solved in {rounds} rounds");
        Ok(())
    }

    fn propagate(&mut self, body: GeqBody) -> bool {
        let Atom::Var(key) = body.lhs else {
            // An upper bound on a variable (`CONST ⊒ v`) carries no join
            // obligation; constants never move.
            return false;
        };
        match self.cs.assignment_opt(body.rhs) {
            // The right side is still at bottom: nothing to propagate yet.
            None => false,
            Some(kind) => self.cs.raise(key, kind),
        }
    }

    /// A premise `lhs ⊒ rhs` is entailed once the current assignment of
    /// `lhs` sits at or above `rhs`'s.
    fn entailed(&self, premise: GeqBody) -> bool {
        match (
            self.cs.assignment_opt(premise.lhs),
            self.cs.assignment_opt(premise.rhs),
        ) {
            (Some(have), Some(need)) => need.leq(have),
            _ => false,
        }
    }
}
