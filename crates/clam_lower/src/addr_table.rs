//! Maps each function identifier to its lowered calling convention (§4.5).
//! Populated in two phases: `register_toplevel` pre-registers every
//! top-level function before any body is walked; `ClosureLowering` installs
//! `Local` entries as it rewrites each local definition.

use std::collections::HashMap;

use clam_ir::{Addr, LowType};
use clam_mcore::Id;

#[derive(Clone, Debug, PartialEq)]
pub enum AddrEntry {
    /// A top-level function. `name_as_closure` is filled in lazily the
    /// first time the function is used as a value, naming the synthesized
    /// closure-wrapper top-level item.
    Toplevel {
        addr: Addr,
        params: Vec<LowType>,
        return_ty: LowType,
        name_as_closure: Option<Addr>,
    },
    /// A well-known local function: `env_ty` is the lowered type of its
    /// captured environment (unit, a single value, or a struct reference).
    Local { addr: Addr, env_ty: LowType },
}

impl AddrEntry {
    pub fn addr(&self) -> Addr {
        match self {
            AddrEntry::Toplevel { addr, .. } => *addr,
            AddrEntry::Local { addr, .. } => *addr,
        }
    }
}

#[derive(Debug, Default)]
pub struct AddrTable {
    entries: HashMap<Id, AddrEntry>,
    next_addr: u32,
}

impl AddrTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_addr(&mut self) -> Addr {
        let addr = Addr(self.next_addr);
        self.next_addr += 1;
        addr
    }

    pub fn register_toplevel(
        &mut self,
        id: Id,
        params: Vec<LowType>,
        return_ty: LowType,
    ) -> Addr {
        let addr = self.fresh_addr();
        self.entries.insert(
            id,
            AddrEntry::Toplevel {
                addr,
                params,
                return_ty,
                name_as_closure: None,
            },
        );
        addr
    }

    pub fn install_local(&mut self, id: Id, env_ty: LowType) -> Addr {
        let addr = self.fresh_addr();
        self.entries.insert(id, AddrEntry::Local { addr, env_ty });
        addr
    }

    pub fn get(&self, id: &Id) -> Option<&AddrEntry> {
        self.entries.get(id)
    }

    /// Lazily mints (or returns the already-minted) closure-wrapper address
    /// for a top-level function, per the "used as a value" rule (§4.5,
    /// §4.9). Panics if `id` is not a registered top-level — installing a
    /// wrapper for a well-known local is a contradiction in terms.
    pub fn closure_wrapper_addr(&mut self, id: &Id) -> Addr {
        match self.entries.get(id) {
            Some(AddrEntry::Toplevel {
                name_as_closure: Some(addr),
                ..
            }) => return *addr,
            Some(AddrEntry::Toplevel { .. }) => {}
            _ => panic!("closure_wrapper_addr called on a non-toplevel identifier {id}"),
        }
        let wrapper_addr = self.fresh_addr();
        if let Some(AddrEntry::Toplevel {
            name_as_closure, ..
        }) = self.entries.get_mut(id)
        {
            *name_as_closure = Some(wrapper_addr);
        }
        wrapper_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clam_mcore::Provenance;

    fn id(name: &str) -> Id {
        Id {
            name: name.to_string(),
            stamp: 0,
            provenance: Provenance::Local,
        }
    }

    #[test]
    fn closure_wrapper_addr_is_idempotent() {
        let mut table = AddrTable::new();
        let f = id("f");
        table.register_toplevel(f.clone(), vec![], LowType::I32);
        let a = table.closure_wrapper_addr(&f);
        let b = table.closure_wrapper_addr(&f);
        assert_eq!(a, b);
    }

    #[test]
    fn addresses_are_unique_per_registration() {
        let mut table = AddrTable::new();
        let a = table.register_toplevel(id("f"), vec![], LowType::I32);
        let b = table.register_toplevel(id("g"), vec![], LowType::I32);
        assert_ne!(a, b);
    }
}
