//! Rewrites `return`/error-`return` into join-point continuations (§4.6).
//! Split in two: `scan_body` walks the *source* MCore body (stopping at
//! nested function boundaries) to decide which joins a function needs;
//! `wrap_with_joins` wraps the already-translated Clam body with those
//! joins. The translation of individual `Return`/`HandleError` nodes into
//! `Ljoinapply` happens in the main walker (`Lowerer`), which is the only
//! place that already has the rewritten Clam sub-expressions in hand.

use clam_ir::{AllocKind, JoinKind, Lambda, LowType, Tid, Var};
use clam_mcore::{Expr, HandleErrorVariant, ReturnValue};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReturnNeeds {
    pub need_return: bool,
    pub need_raise: bool,
}

/// What the `return`/`raise` joins wrap their argument into, for a given
/// function's declared return type.
#[derive(Clone, Debug, PartialEq)]
pub enum ReturnKind {
    Plain,
    Result {
        ok_ty: LowType,
        err_ty: LowType,
        result_tid: Tid,
    },
}

pub fn scan_body(expr: &Expr) -> ReturnNeeds {
    let mut needs = ReturnNeeds::default();
    walk(expr, &mut needs);
    needs
}

fn walk(expr: &Expr, needs: &mut ReturnNeeds) {
    match expr {
        Expr::Const(_) => {}
        Expr::Var { .. } => {}
        Expr::Prim { args, .. } => args.iter().for_each(|a| walk(a, needs)),
        Expr::And(a, b) | Expr::Or(a, b) => {
            walk(a, needs);
            walk(b, needs);
        }
        Expr::Let { value, body, .. } => {
            walk(value, needs);
            walk(body, needs);
        }
        // A nested function introduces its own return/raise scope; only
        // the continuation after the binding stays in this function.
        Expr::LetFn { body, .. } => walk(body, needs),
        Expr::LetRec { body, .. } => walk(body, needs),
        Expr::Lambda(_) => {}
        Expr::Apply { func, args, .. } => {
            walk(func, needs);
            args.iter().for_each(|a| walk(a, needs));
        }
        Expr::Tuple(items) | Expr::Array(items) => items.iter().for_each(|e| walk(e, needs)),
        Expr::Record { fields, .. } => fields.iter().for_each(|(_, v)| walk(v, needs)),
        Expr::RecordUpdate { base, updates, .. } => {
            walk(base, needs);
            updates.iter().for_each(|(_, v)| walk(v, needs));
        }
        Expr::Field { base, .. } => walk(base, needs),
        Expr::FieldMutate { base, value, .. } => {
            walk(base, needs);
            walk(value, needs);
        }
        Expr::Constructor { args, .. } => args.iter().for_each(|a| walk(a, needs)),
        Expr::Assign { value, .. } => walk(value, needs),
        Expr::Sequence(exprs) => exprs.iter().for_each(|e| walk(e, needs)),
        Expr::If {
            cond, ifso, ifnot, ..
        } => {
            walk(cond, needs);
            walk(ifso, needs);
            walk(ifnot, needs);
        }
        Expr::SwitchConstr {
            scrutinee,
            cases,
            default,
            ..
        } => {
            walk(scrutinee, needs);
            for case in cases {
                walk(&case.body, needs);
            }
            if let Some(default) = default {
                walk(default, needs);
            }
        }
        Expr::SwitchConstant {
            scrutinee,
            cases,
            default,
            ..
        } => {
            walk(scrutinee, needs);
            for (_, body) in cases {
                walk(body, needs);
            }
            walk(default, needs);
        }
        Expr::Loop { body, args, .. } => {
            args.iter().for_each(|a| walk(a, needs));
            walk(body, needs);
        }
        Expr::Break { arg, .. } => {
            if let Some(arg) = arg {
                walk(arg, needs);
            }
        }
        Expr::Continue { args, .. } => args.iter().for_each(|a| walk(a, needs)),
        Expr::Return(ReturnValue::Plain(e)) => {
            needs.need_return = true;
            walk(e, needs);
        }
        Expr::Return(ReturnValue::Error { value, .. }) => {
            needs.need_raise = true;
            walk(value, needs);
        }
        Expr::HandleError { variant, expr } => {
            if *variant == HandleErrorVariant::ReturnErr {
                needs.need_raise = true;
            }
            walk(expr, needs);
        }
    }
}

/// Wraps an already-translated Clam body with the `return`/`raise` joins
/// it needs (§4.6). `return` encloses `raise` encloses `body`; the two
/// never call each other so the nesting order between them is arbitrary.
pub fn wrap_with_joins(
    body: Lambda,
    return_ty: LowType,
    kind: &ReturnKind,
    needs: ReturnNeeds,
) -> Lambda {
    let mut wrapped = body;

    if needs.need_raise {
        let (param, wrap_body) = match kind {
            ReturnKind::Result {
                err_ty, result_tid, ..
            } => {
                let param = Var::new("e", 0, err_ty.clone());
                let wrap = Lambda::Lallocate {
                    kind: AllocKind::Enum { tag: 1 },
                    tid: *result_tid,
                    fields: vec![Lambda::Lvar { var: param.clone() }],
                };
                (param, wrap)
            }
            ReturnKind::Plain => {
                panic!("a raise join was requested for a non-Result-returning function")
            }
        };
        wrapped = Lambda::Ljoinlet {
            name: "raise".to_string(),
            params: vec![param],
            e: Box::new(wrap_body),
            body: Box::new(wrapped),
            kind: JoinKind::NontailJoin,
            type_: return_ty.clone(),
        };
    }

    if needs.need_return {
        let (param, wrap_body) = match kind {
            ReturnKind::Plain => {
                let param = Var::new("v", 0, return_ty.clone());
                let value = Lambda::Lvar { var: param.clone() };
                (param, value)
            }
            ReturnKind::Result { ok_ty, result_tid, .. } => {
                let param = Var::new("v", 0, ok_ty.clone());
                let wrap = Lambda::Lallocate {
                    kind: AllocKind::Enum { tag: 0 },
                    tid: *result_tid,
                    fields: vec![Lambda::Lvar { var: param.clone() }],
                };
                (param, wrap)
            }
        };
        wrapped = Lambda::Ljoinlet {
            name: "return".to_string(),
            params: vec![param],
            e: Box::new(wrap_body),
            body: Box::new(wrapped),
            kind: JoinKind::NontailJoin,
            type_: return_ty,
        };
    }

    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use clam_mcore::Type;

    #[test]
    fn plain_return_only_needs_the_return_join() {
        let body = Expr::Return(ReturnValue::Plain(Box::new(Expr::Const(
            clam_mcore::Constant::Int(1),
        ))));
        let needs = scan_body(&body);
        assert!(needs.need_return);
        assert!(!needs.need_raise);
    }

    #[test]
    fn error_return_needs_the_raise_join() {
        let body = Expr::Return(ReturnValue::Error {
            value: Box::new(Expr::Const(clam_mcore::Constant::Int(1))),
            return_ty: Type::Int,
        });
        let needs = scan_body(&body);
        assert!(needs.need_raise);
        assert!(!needs.need_return);
    }

    #[test]
    fn nested_function_body_does_not_contribute_returns() {
        let inner = clam_mcore::Function {
            params: vec![],
            return_ty: Type::Int,
            is_async: false,
            is_raw: false,
            body: Box::new(Expr::Return(ReturnValue::Plain(Box::new(Expr::unit())))),
        };
        let body = Expr::Lambda(inner);
        let needs = scan_body(&body);
        assert!(!needs.need_return);
    }

    #[test]
    fn wrap_with_joins_nests_raise_inside_return() {
        let wrapped = wrap_with_joins(
            Lambda::unit(),
            LowType::I32,
            &ReturnKind::Plain,
            ReturnNeeds {
                need_return: true,
                need_raise: false,
            },
        );
        match wrapped {
            Lambda::Ljoinlet { name, .. } => assert_eq!(name, "return"),
            other => panic!("expected Ljoinlet, got {other:?}"),
        }
    }
}
