//! Free-variable analysis (§4.1). Recursive walk mirroring the teacher's
//! `collect_free_variables` shape: one match arm per node, an exclusion
//! set threaded down, nested binders extending it locally.

use std::collections::HashSet;

use clam_mcore::{ApplyKind, Expr, Function, Id, ReturnValue, Type};

/// An order-preserving free-variable set: insertion order is first-occurrence
/// order in a fixed left-to-right traversal, so two runs over equal input
/// produce the same capture order (§5 determinism).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FreeVars {
    order: Vec<Id>,
    types: Vec<Type>,
}

impl FreeVars {
    fn insert(&mut self, id: Id, ty: Type) {
        if !self.order.contains(&id) {
            self.order.push(id);
            self.types.push(ty);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.order.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Id, &Type)> {
        self.order.iter().zip(self.types.iter())
    }

    pub fn ids(&self) -> &[Id] {
        &self.order
    }

    fn merge(&mut self, other: FreeVars) {
        for (id, ty) in other.order.into_iter().zip(other.types.into_iter()) {
            self.insert(id, ty);
        }
    }
}

/// Free variables of `func`'s body, with `func`'s own parameters (and
/// `exclude`) excluded from the result.
pub fn free_vars_of_function(func: &Function, exclude: &HashSet<Id>) -> FreeVars {
    let mut scoped = exclude.clone();
    for param in &func.params {
        scoped.insert(param.id.clone());
    }
    free_vars_of_expr(&func.body, &scoped)
}

/// Free variables of a bare expression under `exclude` (§4.1).
pub fn free_vars_of_expr(expr: &Expr, exclude: &HashSet<Id>) -> FreeVars {
    let mut acc = FreeVars::default();
    collect(expr, exclude, &mut acc);
    acc
}

fn collect(expr: &Expr, exclude: &HashSet<Id>, acc: &mut FreeVars) {
    match expr {
        Expr::Const(_) => {}
        Expr::Var { id, ty } => add_ref(id, ty, exclude, acc),
        Expr::Prim { args, .. } => {
            for a in args {
                collect(a, exclude, acc);
            }
        }
        Expr::And(a, b) | Expr::Or(a, b) => {
            collect(a, exclude, acc);
            collect(b, exclude, acc);
        }
        Expr::Let { id, value, body } => {
            collect(value, exclude, acc);
            let mut scoped = exclude.clone();
            scoped.insert(id.clone());
            collect(body, &scoped, acc);
        }
        Expr::LetFn { id, func, body } => {
            let mut fn_scope = exclude.clone();
            fn_scope.insert(id.clone());
            acc.merge(free_vars_of_function(func, &fn_scope));

            let mut scoped = exclude.clone();
            scoped.insert(id.clone());
            collect(body, &scoped, acc);
        }
        Expr::LetRec { bindings, body } => {
            let mut scoped = exclude.clone();
            for (id, _) in bindings {
                scoped.insert(id.clone());
            }
            for (_, func) in bindings {
                acc.merge(free_vars_of_function(func, &scoped));
            }
            collect(body, &scoped, acc);
        }
        Expr::Lambda(func) => {
            acc.merge(free_vars_of_function(func, exclude));
        }
        Expr::Apply { kind, func, args } => {
            collect_apply_target(kind, func, exclude, acc);
            for a in args {
                collect(a, exclude, acc);
            }
        }
        Expr::Tuple(items) | Expr::Array(items) => {
            for e in items {
                collect(e, exclude, acc);
            }
        }
        Expr::Record { fields, .. } => {
            for (_, value) in fields {
                collect(value, exclude, acc);
            }
        }
        Expr::RecordUpdate { base, updates, .. } => {
            collect(base, exclude, acc);
            for (_, value) in updates {
                collect(value, exclude, acc);
            }
        }
        Expr::Field { base, .. } => collect(base, exclude, acc),
        Expr::FieldMutate { base, value, .. } => {
            collect(base, exclude, acc);
            collect(value, exclude, acc);
        }
        Expr::Constructor { args, .. } => {
            for a in args {
                collect(a, exclude, acc);
            }
        }
        Expr::Assign { id, value, ty } => {
            add_ref(id, ty, exclude, acc);
            collect(value, exclude, acc);
        }
        Expr::Sequence(exprs) => {
            for e in exprs {
                collect(e, exclude, acc);
            }
        }
        Expr::If {
            cond, ifso, ifnot, ..
        } => {
            collect(cond, exclude, acc);
            collect(ifso, exclude, acc);
            collect(ifnot, exclude, acc);
        }
        Expr::SwitchConstr {
            scrutinee,
            cases,
            default,
            ..
        } => {
            collect(scrutinee, exclude, acc);
            for case in cases {
                let mut scoped = exclude.clone();
                if let Some(binder) = &case.binder {
                    scoped.insert(binder.clone());
                }
                collect(&case.body, &scoped, acc);
            }
            if let Some(default) = default {
                collect(default, exclude, acc);
            }
        }
        Expr::SwitchConstant {
            scrutinee,
            cases,
            default,
            ..
        } => {
            collect(scrutinee, exclude, acc);
            for (_, body) in cases {
                collect(body, exclude, acc);
            }
            collect(default, exclude, acc);
        }
        Expr::Loop {
            params, body, args, ..
        } => {
            for a in args {
                collect(a, exclude, acc);
            }
            let mut scoped = exclude.clone();
            for p in params {
                scoped.insert(p.id.clone());
            }
            collect(body, &scoped, acc);
        }
        Expr::Break { arg, .. } => {
            if let Some(arg) = arg {
                collect(arg, exclude, acc);
            }
        }
        Expr::Continue { args, .. } => {
            for a in args {
                collect(a, exclude, acc);
            }
        }
        Expr::Return(rv) => match rv {
            ReturnValue::Plain(e) => collect(e, exclude, acc),
            ReturnValue::Error { value, .. } => collect(value, exclude, acc),
        },
        Expr::HandleError { expr, .. } => collect(expr, exclude, acc),
    }
}

/// On `Join` applies the callee name is never added (joins are
/// second-class, §4.1). On other kinds the callee's identifier is added
/// with the function type captured at the call site when available.
fn collect_apply_target(
    kind: &ApplyKind,
    func: &Expr,
    exclude: &HashSet<Id>,
    acc: &mut FreeVars,
) {
    match (kind, func) {
        (ApplyKind::Join, Expr::Var { .. }) => {}
        (ApplyKind::Join, other) => collect(other, exclude, acc),
        (ApplyKind::Normal { func_ty }, Expr::Var { id, .. }) => {
            add_ref(id, func_ty, exclude, acc)
        }
        (_, other) => collect(other, exclude, acc),
    }
}

fn add_ref(id: &Id, ty: &Type, exclude: &HashSet<Id>, acc: &mut FreeVars) {
    if !id.is_global() && !exclude.contains(id) {
        acc.insert(id.clone(), ty.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clam_mcore::{Param, Provenance};

    fn local(name: &str, stamp: u32) -> Id {
        Id {
            name: name.to_string(),
            stamp,
            provenance: Provenance::Local,
        }
    }

    #[test]
    fn plain_var_reference_is_free() {
        let x = local("x", 0);
        let expr = Expr::Var {
            id: x.clone(),
            ty: Type::Int,
        };
        let fv = free_vars_of_expr(&expr, &HashSet::new());
        assert_eq!(fv.ids(), &[x]);
    }

    #[test]
    fn lambda_params_are_excluded() {
        let x = local("x", 0);
        let y = local("y", 1);
        let func = Function {
            params: vec![Param {
                id: y.clone(),
                ty: Type::Int,
            }],
            return_ty: Type::Int,
            is_async: false,
            is_raw: false,
            body: Box::new(Expr::Prim {
                op: "add_int".to_string(),
                args: vec![
                    Expr::Var {
                        id: x.clone(),
                        ty: Type::Int,
                    },
                    Expr::Var {
                        id: y.clone(),
                        ty: Type::Int,
                    },
                ],
                ty: Type::Int,
            }),
        };
        let fv = free_vars_of_function(&func, &HashSet::new());
        assert_eq!(fv.ids(), &[x]);
    }

    #[test]
    fn join_apply_target_is_not_free() {
        let raise = local("raise", 0);
        let expr = Expr::Apply {
            kind: ApplyKind::Join,
            func: Box::new(Expr::Var {
                id: raise.clone(),
                ty: Type::func(vec![Type::Int], Type::Unit),
            }),
            args: vec![Expr::Const(clam_mcore::Constant::Int(1))],
        };
        let fv = free_vars_of_expr(&expr, &HashSet::new());
        assert!(fv.is_empty());
    }

    #[test]
    fn package_qualified_identifiers_are_never_free() {
        let pkg = Id {
            name: "println".to_string(),
            stamp: 0,
            provenance: Provenance::Package {
                path: "moonbitlang/core".to_string(),
            },
        };
        let expr = Expr::Var {
            id: pkg,
            ty: Type::func(vec![Type::String], Type::Unit),
        };
        let fv = free_vars_of_expr(&expr, &HashSet::new());
        assert!(fv.is_empty());
    }

    #[test]
    fn switch_constr_binder_is_scoped_to_its_case_only() {
        let scrutinee = local("s", 0);
        let binder = local("payload", 1);
        let case = clam_mcore::ConstrCase {
            tag: 0,
            ctor_name: "Some".to_string(),
            binder: Some(binder.clone()),
            body: Expr::Var {
                id: binder.clone(),
                ty: Type::Int,
            },
        };
        let expr = Expr::SwitchConstr {
            scrutinee: Box::new(Expr::Var {
                id: scrutinee.clone(),
                ty: Type::Enum {
                    name: "Option".to_string(),
                },
            }),
            cases: vec![case],
            default: None,
            ty: Type::Int,
        };
        let fv = free_vars_of_expr(&expr, &HashSet::new());
        assert_eq!(fv.ids(), &[scrutinee]);
    }
}
