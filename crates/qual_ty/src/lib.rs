//! The qualifier lattice and the atoms that inference ranges over.
//!
//! Everything in this crate is plain data: the solver, the constraint store,
//! and the symbol tables all live in `qual_check`. Keeping the lattice here
//! lets the front-end descriptor types in `qual_ast` talk about pointer kinds
//! without pulling in any engine state.

mod atom;
mod kind;

pub use atom::{Atom, VarKey};
pub use kind::PtrKind;
