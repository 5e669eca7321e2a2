//! Strongly-connected-component grouping of simultaneously-scoped local
//! function bindings (§4.2). Classic Tarjan over the "uses sibling" graph;
//! emitting completed components in discovery-completion order already
//! gives the reverse-topological order the spec asks for: a component is
//! only completed once everything it calls has already been completed.

use std::collections::HashMap;

use clam_mcore::{Function, Id};

use crate::free_vars::free_vars_of_expr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SccKind {
    NonRec,
    Rec,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SccGroup {
    pub kind: SccKind,
    /// Indices into the original bindings slice, in binding order.
    pub members: Vec<usize>,
}

pub fn group(bindings: &[(Id, Function)]) -> Vec<SccGroup> {
    let index_of: HashMap<&Id, usize> = bindings
        .iter()
        .enumerate()
        .map(|(i, (id, _))| (id, i))
        .collect();

    let adjacency: Vec<Vec<usize>> = bindings
        .iter()
        .map(|(_, func)| {
            let fv = free_vars_of_expr(&func.body, &Default::default());
            fv.ids()
                .iter()
                .filter_map(|id| index_of.get(id).copied())
                .collect()
        })
        .collect();

    Tarjan::new(&adjacency).run()
}

struct Tarjan<'a> {
    adjacency: &'a [Vec<usize>],
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next_index: usize,
    components: Vec<Vec<usize>>,
}

impl<'a> Tarjan<'a> {
    fn new(adjacency: &'a [Vec<usize>]) -> Self {
        let n = adjacency.len();
        Tarjan {
            adjacency,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next_index: 0,
            components: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<SccGroup> {
        for v in 0..self.adjacency.len() {
            if self.index[v].is_none() {
                self.strong_connect(v);
            }
        }

        self.components
            .into_iter()
            .map(|members| {
                let kind = if members.len() == 1 && !self.adjacency[members[0]].contains(&members[0])
                {
                    SccKind::NonRec
                } else {
                    SccKind::Rec
                };
                SccGroup { kind, members }
            })
            .collect()
    }

    fn strong_connect(&mut self, v: usize) {
        self.index[v] = Some(self.next_index);
        self.lowlink[v] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        for &w in &self.adjacency[v].clone() {
            match self.index[w] {
                None => {
                    self.strong_connect(w);
                    self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                }
                Some(w_index) if self.on_stack[w] => {
                    self.lowlink[v] = self.lowlink[v].min(w_index);
                }
                _ => {}
            }
        }

        if self.lowlink[v] == self.index[v].unwrap() {
            let mut component = Vec::new();
            loop {
                let w = self.stack.pop().expect("scc stack underflow");
                self.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clam_mcore::{Provenance, Type};

    fn id(name: &str) -> Id {
        Id {
            name: name.to_string(),
            stamp: 0,
            provenance: Provenance::Local,
        }
    }

    fn func_referencing(names: &[&str]) -> Function {
        let mut body = clam_mcore::Expr::Const(clam_mcore::Constant::Unit);
        for name in names {
            body = clam_mcore::Expr::Sequence(vec![
                clam_mcore::Expr::Var {
                    id: id(name),
                    ty: Type::Unit,
                },
                body,
            ]);
        }
        Function {
            params: vec![],
            return_ty: Type::Unit,
            is_async: false,
            is_raw: false,
            body: Box::new(body),
        }
    }

    #[test]
    fn independent_functions_are_each_non_rec() {
        let bindings = vec![
            (id("f"), func_referencing(&[])),
            (id("g"), func_referencing(&[])),
        ];
        let groups = group(&bindings);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.kind == SccKind::NonRec));
    }

    #[test]
    fn self_recursive_singleton_is_rec() {
        let bindings = vec![(id("f"), func_referencing(&["f"]))];
        let groups = group(&bindings);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].kind, SccKind::Rec);
    }

    #[test]
    fn mutually_recursive_pair_is_one_rec_group() {
        let bindings = vec![(id("f"), func_referencing(&["g"])), (id("g"), func_referencing(&["f"]))];
        let groups = group(&bindings);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].kind, SccKind::Rec);
        assert_eq!(groups[0].members, vec![0, 1]);
    }

    #[test]
    fn dependency_group_precedes_dependent_group() {
        // f calls g but not vice versa: g must appear before f.
        let bindings = vec![(id("f"), func_referencing(&["g"])), (id("g"), func_referencing(&[]))];
        let groups = group(&bindings);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members, vec![1]);
        assert_eq!(groups[1].members, vec![0]);
    }
}
