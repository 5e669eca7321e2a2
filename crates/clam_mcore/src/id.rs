use std::fmt;

use serde::{Deserialize, Serialize};

/// How an identifier was introduced. Drives free-variable and escape
/// analysis: package-qualified and local-method identifiers are globals
/// and never contribute to a closure's capture set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    /// An ordinary immutable local binding.
    Local,
    /// A local binding introduced by `var`/assignment — still a local for
    /// capture purposes, but `Lassign` may target it.
    MutableLocal,
    /// A package-qualified reference (`pkg.name`). Always a global; never
    /// free, never captured.
    Package { path: String },
    /// A method resolved on a local value's type. Always a global.
    LocalMethod { owner_type: String },
}

/// A source identifier, fresh-minted per binding site per §3.4.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id {
    pub name: String,
    /// Disambiguates shadowed bindings of the same source name; stable
    /// from the point the identifier is minted.
    pub stamp: u32,
    pub provenance: Provenance,
}

impl Id {
    pub fn local(name: impl Into<String>, stamp: u32) -> Self {
        Id {
            name: name.into(),
            stamp,
            provenance: Provenance::Local,
        }
    }

    pub fn mutable_local(name: impl Into<String>, stamp: u32) -> Self {
        Id {
            name: name.into(),
            stamp,
            provenance: Provenance::MutableLocal,
        }
    }

    /// Globals (package-qualified and local-method identifiers) are never
    /// free variables: they don't need a capture slot, they are reachable
    /// from anywhere.
    pub fn is_global(&self) -> bool {
        matches!(
            self.provenance,
            Provenance::Package { .. } | Provenance::LocalMethod { .. }
        )
    }

    pub fn is_mutable(&self) -> bool {
        matches!(self.provenance, Provenance::MutableLocal)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.stamp)
    }
}
