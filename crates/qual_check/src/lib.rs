//! Whole-program inference of checked-pointer qualifiers.
//!
//! The engine runs in strictly ordered phases over pre-lowered declarator
//! descriptors (`qual_ast`):
//!
//! 1. [`ProgramInfo::build_initial_constraints`] ingests every translation
//!    unit, allocating constraint variables and seeding constraints.
//! 2. [`ProgramInfo::link`] unifies declarations across translation units and
//!    wilds unresolved externals.
//! 3. [`ProgramInfo::solve_constraints`] computes the least fixed point of
//!    the constraint system.
//! 4. [`ProgramInfo::compute_interim_constraint_state`] attributes every wild
//!    pointer to the direct causes that forced it.
//!
//! The rewriter that edits source text back to disk is a separate tool; it
//! consumes the solved assignment and the per-expression caches kept here.

pub mod cvar;
pub mod graph;
pub mod link;
pub mod program;
pub mod root_cause;
pub mod solve;
pub mod stats;
pub mod store;

#[cfg(test)]
mod pbt;
#[cfg(test)]
mod tests;

use qual_ast::Psl;
use smol_str::SmolStr;
use thiserror::Error;

pub use cvar::{CVarId, ConsAction, ConstraintVar, FunctionVar, PointerVar};
pub use program::{ConvertOptions, ProgramInfo};
pub use root_cause::{ConstraintState, WildReason};
pub use store::{Constraint, ConstraintStore, GeqBody, Reason};

/// Failures that abort conversion. Anything that would otherwise produce an
/// incorrect rewrite is an error here; everything recoverable is instead
/// constrained to wild with a recorded reason so the root-cause report can
/// surface it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("merging failed for `{name}` at {psl}: {reason}")]
    MergeConflict {
        name: SmolStr,
        psl: Psl,
        reason: String,
    },

    #[error("duplicate definition for function `{name}` at {psl}")]
    DuplicateDefinition { name: SmolStr, psl: Psl },

    #[error("source file {file} is outside the base directory {base_dir}")]
    SourceOutsideBaseDir { file: SmolStr, base_dir: SmolStr },

    #[error("configuration error: {0}")]
    Config(String),
}
