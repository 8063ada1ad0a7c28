use std::fmt;

use derive_more::Debug;
use serde::{Deserialize, Serialize};

use crate::PtrKind;

/// Key of a variable atom. Minted with an incrementing counter by the
/// constraint store; identity is the key alone, so atoms survive being
/// copied between constraint-variable vectors (brain transplants).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
#[debug("q_{_0}")]
pub struct VarKey(pub u32);

/// The unit of inference: one of the interned lattice constants, or a
/// variable minted for one pointer indirection of one declaration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
pub enum Atom {
    #[debug("{_0:?}")]
    Const(PtrKind),
    #[debug("{_0:?}")]
    Var(VarKey),
}

impl Atom {
    pub const WILD: Atom = Atom::Const(PtrKind::Wild);
    pub const PTR: Atom = Atom::Const(PtrKind::Ptr);
    pub const ARR: Atom = Atom::Const(PtrKind::Arr);
    pub const NTARR: Atom = Atom::Const(PtrKind::NtArr);

    pub fn as_var(self) -> Option<VarKey> {
        match self {
            Atom::Var(k) => Some(k),
            Atom::Const(_) => None,
        }
    }

    pub fn as_const(self) -> Option<PtrKind> {
        match self {
            Atom::Const(k) => Some(k),
            Atom::Var(_) => None,
        }
    }

    pub fn is_var(self) -> bool {
        matches!(self, Atom::Var(_))
    }
}

impl From<PtrKind> for Atom {
    fn from(value: PtrKind) -> Self {
        Atom::Const(value)
    }
}

impl From<VarKey> for Atom {
    fn from(value: VarKey) -> Self {
        Atom::Var(value)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Const(k) => write!(f, "{k}"),
            Atom::Var(v) => write!(f, "q_{}", v.0),
        }
    }
}
