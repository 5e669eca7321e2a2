//! Whole-program escape pre-pass (§4.3). A function's binder identifier
//! lands in the escape set the moment it is referenced anywhere other than
//! as the direct target of a call; everything else is well-known.

use std::collections::HashSet;

use clam_mcore::{ApplyKind, Expr, Id, Program, ReturnValue, TopItem};

#[derive(Clone, Debug, Default)]
pub struct EscapeSet(HashSet<Id>);

impl EscapeSet {
    pub fn contains(&self, id: &Id) -> bool {
        self.0.contains(id)
    }
}

pub fn compute(program: &Program) -> EscapeSet {
    let mut set = HashSet::new();
    for item in &program.items {
        match item {
            TopItem::CtopLet { value, .. } => walk(value, &mut set),
            TopItem::CtopFn { func, .. } => walk(&func.body, &mut set),
            TopItem::CtopExpr(expr) => walk(expr, &mut set),
            TopItem::CtopStub { .. } => {}
        }
    }
    EscapeSet(set)
}

fn note(id: &Id, set: &mut HashSet<Id>) {
    if !id.is_global() {
        set.insert(id.clone());
    }
}

fn walk(expr: &Expr, set: &mut HashSet<Id>) {
    match expr {
        Expr::Const(_) => {}
        Expr::Var { id, .. } => note(id, set),
        Expr::Prim { args, .. } => args.iter().for_each(|a| walk(a, set)),
        Expr::And(a, b) | Expr::Or(a, b) => {
            walk(a, set);
            walk(b, set);
        }
        Expr::Let { value, body, .. } => {
            walk(value, set);
            walk(body, set);
        }
        Expr::LetFn { func, body, .. } => {
            walk(&func.body, set);
            walk(body, set);
        }
        Expr::LetRec { bindings, body } => {
            for (_, func) in bindings {
                walk(&func.body, set);
            }
            walk(body, set);
        }
        Expr::Lambda(func) => walk(&func.body, set),
        Expr::Apply { kind, func, args } => {
            walk_apply_target(kind, func, set);
            args.iter().for_each(|a| walk(a, set));
        }
        Expr::Tuple(items) | Expr::Array(items) => items.iter().for_each(|e| walk(e, set)),
        Expr::Record { fields, .. } => fields.iter().for_each(|(_, v)| walk(v, set)),
        Expr::RecordUpdate { base, updates, .. } => {
            walk(base, set);
            updates.iter().for_each(|(_, v)| walk(v, set));
        }
        Expr::Field { base, .. } => walk(base, set),
        Expr::FieldMutate { base, value, .. } => {
            walk(base, set);
            walk(value, set);
        }
        Expr::Constructor { args, .. } => args.iter().for_each(|a| walk(a, set)),
        Expr::Assign { id, value, .. } => {
            note(id, set);
            walk(value, set);
        }
        Expr::Sequence(exprs) => exprs.iter().for_each(|e| walk(e, set)),
        Expr::If {
            cond, ifso, ifnot, ..
        } => {
            walk(cond, set);
            walk(ifso, set);
            walk(ifnot, set);
        }
        Expr::SwitchConstr {
            scrutinee,
            cases,
            default,
            ..
        } => {
            walk(scrutinee, set);
            for case in cases {
                walk(&case.body, set);
            }
            if let Some(default) = default {
                walk(default, set);
            }
        }
        Expr::SwitchConstant {
            scrutinee,
            cases,
            default,
            ..
        } => {
            walk(scrutinee, set);
            for (_, body) in cases {
                walk(body, set);
            }
            walk(default, set);
        }
        Expr::Loop { body, args, .. } => {
            args.iter().for_each(|a| walk(a, set));
            walk(body, set);
        }
        Expr::Break { arg, .. } => {
            if let Some(arg) = arg {
                walk(arg, set);
            }
        }
        Expr::Continue { args, .. } => args.iter().for_each(|a| walk(a, set)),
        Expr::Return(rv) => match rv {
            ReturnValue::Plain(e) => walk(e, set),
            ReturnValue::Error { value, .. } => walk(value, set),
        },
        Expr::HandleError { expr, .. } => walk(expr, set),
    }
}

fn walk_apply_target(kind: &ApplyKind, func: &Expr, set: &mut HashSet<Id>) {
    match (kind, func) {
        (ApplyKind::Join, Expr::Var { .. }) => {}
        (_, Expr::Var { .. }) => {
            // a direct call target of a Normal/Async apply is not an escape
        }
        (_, other) => walk(other, set),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clam_mcore::{Function, Provenance, Type};

    fn id(name: &str) -> Id {
        Id {
            name: name.to_string(),
            stamp: 0,
            provenance: Provenance::Local,
        }
    }

    #[test]
    fn call_target_alone_does_not_escape() {
        let program = Program {
            items: vec![
                TopItem::CtopFn {
                    id: id("f"),
                    func: Function {
                        params: vec![],
                        return_ty: Type::Int,
                        is_async: false,
                        is_raw: false,
                        body: Box::new(Expr::Const(clam_mcore::Constant::Int(1))),
                    },
                    intrinsic: None,
                },
                TopItem::CtopExpr(Expr::Apply {
                    kind: ApplyKind::Normal {
                        func_ty: Type::func(vec![], Type::Int),
                    },
                    func: Box::new(Expr::Var {
                        id: id("f"),
                        ty: Type::func(vec![], Type::Int),
                    }),
                    args: vec![],
                }),
            ],
        };
        let escapes = compute(&program);
        assert!(!escapes.contains(&id("f")));
    }

    #[test]
    fn value_use_escapes() {
        let program = Program {
            items: vec![TopItem::CtopLet {
                id: id("g"),
                ty: Type::func(vec![], Type::Int),
                value: Expr::Var {
                    id: id("f"),
                    ty: Type::func(vec![], Type::Int),
                },
            }],
        };
        let escapes = compute(&program);
        assert!(escapes.contains(&id("f")));
    }
}
