use serde::{Deserialize, Serialize};

use crate::addr::Tid;
use crate::low_type::TypeDef;

/// The accumulated table of type definitions a program carries (§3.4:
/// "`type_defs` accumulates monotonically"). Insertion order is preserved
/// so that two runs over equal input produce a bit-equal table
/// (round-trip determinism, §8.1).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDefs {
    entries: Vec<(Tid, TypeDef)>,
}

impl TypeDefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly-interned type def under `tid`. Callers (in
    /// `clam_lower`) are responsible for not inserting the same `tid`
    /// twice; this module only stores, it does not intern.
    pub fn insert(&mut self, tid: Tid, def: TypeDef) {
        debug_assert!(
            self.get(tid).is_none(),
            "tid {tid} inserted into type_defs twice"
        );
        self.entries.push((tid, def));
    }

    pub fn get(&self, tid: Tid) -> Option<&TypeDef> {
        self.entries.iter().find(|(t, _)| *t == tid).map(|(_, d)| d)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Tid, TypeDef)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
