use std::fmt;

use serde::{Deserialize, Serialize};

/// The four-valued qualifier lattice for checked pointers.
///
/// `Wild` is the top element. The three checked kinds sit below it and are
/// mutually incomparable: joining two distinct checked kinds gives `Wild`.
/// The lattice bottom is virtual — an atom that has not been constrained yet
/// simply has no assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PtrKind {
    /// A pointer to a single object (`_Ptr<T>`).
    #[serde(rename = "PTR")]
    Ptr,
    /// A pointer into a null-terminated array (`_Nt_array_ptr<T>`).
    #[serde(rename = "NTARR")]
    NtArr,
    /// A pointer into an array of known extent (`_Array_ptr<T>`).
    #[serde(rename = "ARR")]
    Arr,
    /// No checked kind could be proven; the declaration is left as written.
    #[serde(rename = "WILD")]
    Wild,
}

impl PtrKind {
    pub fn is_checked(self) -> bool {
        self != PtrKind::Wild
    }

    /// Least upper bound.
    pub fn join(self, other: PtrKind) -> PtrKind {
        if self == other {
            self
        } else {
            PtrKind::Wild
        }
    }

    /// The partial order: `self ⊑ other`.
    pub fn leq(self, other: PtrKind) -> bool {
        self == other || other == PtrKind::Wild
    }
}

impl fmt::Display for PtrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PtrKind::Ptr => "PTR",
            PtrKind::NtArr => "NTARR",
            PtrKind::Arr => "ARR",
            PtrKind::Wild => "WILD",
        };
        write!(f, "{s}")
    }
}
