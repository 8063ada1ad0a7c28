use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Persistent source location: a `(file, line, column)` triple.
///
/// The front end rebuilds its AST per translation unit, so AST node
/// identities cannot be used as keys across units. A `Psl` is the stable key
/// the engine's symbol tables are indexed by instead. Ordering is by file,
/// then line, then column, which also gives deterministic dump order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Psl {
    pub file: SmolStr,
    pub line: u32,
    pub col: u32,
}

impl Psl {
    pub fn new(file: impl Into<SmolStr>, line: u32, col: u32) -> Self {
        Psl {
            file: file.into(),
            line,
            col,
        }
    }

    /// The invalid location. Declarations synthesized by the front end (e.g.
    /// implicit prototypes) carry this and are excluded from source-keyed
    /// tables.
    pub fn invalid() -> Self {
        Psl {
            file: SmolStr::default(),
            line: 0,
            col: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.file.is_empty()
    }

    pub fn file_name(&self) -> &str {
        &self.file
    }
}

impl fmt::Display for Psl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

impl fmt::Debug for Psl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Psl({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_file_line_col() {
        assert_eq!(Psl::new("a.c", 12, 3).to_string(), "a.c:12:3");
    }

    #[test]
    fn invalid_has_empty_file() {
        assert!(!Psl::invalid().is_valid());
        assert!(Psl::new("a.c", 1, 1).is_valid());
    }

    #[test]
    fn ordering_groups_by_file_first() {
        let a = Psl::new("a.c", 90, 1);
        let b = Psl::new("b.c", 2, 1);
        assert!(a < b);
        assert!(Psl::new("a.c", 2, 1) < a);
    }
}
