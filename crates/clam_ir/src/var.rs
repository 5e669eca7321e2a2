use std::fmt;

use serde::{Deserialize, Serialize};

use crate::low_type::LowType;

/// A bound Clam identifier. `Lvar`/`Lassign`/switch scrutinees reference
/// only these — never raw top-level names (§3.3).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Var {
    pub name: String,
    pub stamp: u32,
    pub ty: LowType,
}

impl Var {
    pub fn new(name: impl Into<String>, stamp: u32, ty: LowType) -> Self {
        Var {
            name: name.into(),
            stamp,
            ty,
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.stamp)
    }
}

/// A debug source location. `Levent` wrappers carry one; the S-expression
/// printer elides them unless `show_loc` is set (§6.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loc {
    pub line: u32,
    pub col: u32,
}
