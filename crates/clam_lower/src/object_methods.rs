//! Object method wrapper pre-scan (§4.9): walks the whole program once,
//! before any translation, to discover every `(owner_type, method_index)`
//! pair a `LocalMethod`-provenanced identifier ever names. Mirrors
//! `free_vars.rs`'s one-match-arm-per-node shape, but with no exclusion set
//! to thread — a method reference is global (`Id::is_global`), so scoping
//! never hides one.

use clam_mcore::{ApplyKind, Expr, Function, Id, Program, Provenance, ReturnValue, TopItem, Type};

/// One method slot on `owner_type`, in first-occurrence order — that order
/// *is* the slot's `method_index`.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodInfo {
    pub name: String,
    pub self_ty: Type,
    pub params: Vec<Type>,
    pub ret: Type,
}

/// Every distinct owner type seen, each with its methods in the order they
/// were first referenced. Order is preserved (not a `HashMap` of `Vec`s
/// alone) so two scans of equal input mint the same slot numbering.
#[derive(Debug, Default)]
pub struct ObjectMethods {
    owners: Vec<String>,
    methods: Vec<Vec<MethodInfo>>,
}

impl ObjectMethods {
    pub fn scan(program: &Program) -> Self {
        let mut table = ObjectMethods::default();
        for item in &program.items {
            match item {
                TopItem::CtopFn { func, .. } => table.scan_expr(&func.body),
                TopItem::CtopLet { value, .. } => table.scan_expr(value),
                TopItem::CtopExpr(expr) => table.scan_expr(expr),
                TopItem::CtopStub { .. } => {}
            }
        }
        table
    }

    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.owners.iter().map(String::as_str)
    }

    pub fn methods_of(&self, owner_type: &str) -> &[MethodInfo] {
        match self.owners.iter().position(|o| o == owner_type) {
            Some(idx) => &self.methods[idx],
            None => &[],
        }
    }

    pub fn method_index(&self, owner_type: &str, name: &str) -> Option<u32> {
        self.methods_of(owner_type)
            .iter()
            .position(|m| m.name == name)
            .map(|i| i as u32)
    }

    fn record(&mut self, owner_type: &str, name: &str, ty: &Type) {
        let (self_ty, params, ret) = match ty {
            Type::Func { params, ret, .. } => {
                let mut params = params.clone();
                if params.is_empty() {
                    panic!("local method `{owner_type}.{name}` has no receiver parameter");
                }
                let self_ty = params.remove(0);
                (self_ty, params, (**ret).clone())
            }
            other => panic!(
                "local method `{owner_type}.{name}` referenced without a function type: {other:?}"
            ),
        };
        let idx = match self.owners.iter().position(|o| o == owner_type) {
            Some(idx) => idx,
            None => {
                self.owners.push(owner_type.to_string());
                self.methods.push(Vec::new());
                self.owners.len() - 1
            }
        };
        if self.methods[idx].iter().any(|m| m.name == name) {
            return;
        }
        self.methods[idx].push(MethodInfo {
            name: name.to_string(),
            self_ty,
            params,
            ret,
        });
    }

    fn scan_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Const(_) => {}
            Expr::Var { id, ty } => self.maybe_record(id, ty),
            Expr::Prim { args, .. } => {
                for a in args {
                    self.scan_expr(a);
                }
            }
            Expr::And(a, b) | Expr::Or(a, b) => {
                self.scan_expr(a);
                self.scan_expr(b);
            }
            Expr::Let { value, body, .. } => {
                self.scan_expr(value);
                self.scan_expr(body);
            }
            Expr::LetFn { func, body, .. } => {
                self.scan_function(func);
                self.scan_expr(body);
            }
            Expr::LetRec { bindings, body } => {
                for (_, func) in bindings {
                    self.scan_function(func);
                }
                self.scan_expr(body);
            }
            Expr::Lambda(func) => self.scan_function(func),
            Expr::Apply { kind, func, args } => {
                self.scan_apply_target(kind, func);
                for a in args {
                    self.scan_expr(a);
                }
            }
            Expr::Tuple(items) | Expr::Array(items) => {
                for e in items {
                    self.scan_expr(e);
                }
            }
            Expr::Record { fields, .. } => {
                for (_, value) in fields {
                    self.scan_expr(value);
                }
            }
            Expr::RecordUpdate { base, updates, .. } => {
                self.scan_expr(base);
                for (_, value) in updates {
                    self.scan_expr(value);
                }
            }
            Expr::Field { base, .. } => self.scan_expr(base),
            Expr::FieldMutate { base, value, .. } => {
                self.scan_expr(base);
                self.scan_expr(value);
            }
            Expr::Constructor { args, .. } => {
                for a in args {
                    self.scan_expr(a);
                }
            }
            Expr::Assign { value, .. } => self.scan_expr(value),
            Expr::Sequence(exprs) => {
                for e in exprs {
                    self.scan_expr(e);
                }
            }
            Expr::If { cond, ifso, ifnot, .. } => {
                self.scan_expr(cond);
                self.scan_expr(ifso);
                self.scan_expr(ifnot);
            }
            Expr::SwitchConstr { scrutinee, cases, default, .. } => {
                self.scan_expr(scrutinee);
                for case in cases {
                    self.scan_expr(&case.body);
                }
                if let Some(default) = default {
                    self.scan_expr(default);
                }
            }
            Expr::SwitchConstant { scrutinee, cases, default, .. } => {
                self.scan_expr(scrutinee);
                for (_, body) in cases {
                    self.scan_expr(body);
                }
                self.scan_expr(default);
            }
            Expr::Loop { args, body, .. } => {
                for a in args {
                    self.scan_expr(a);
                }
                self.scan_expr(body);
            }
            Expr::Break { arg, .. } => {
                if let Some(arg) = arg {
                    self.scan_expr(arg);
                }
            }
            Expr::Continue { args, .. } => {
                for a in args {
                    self.scan_expr(a);
                }
            }
            Expr::Return(rv) => match rv {
                ReturnValue::Plain(e) => self.scan_expr(e),
                ReturnValue::Error { value, .. } => self.scan_expr(value),
            },
            Expr::HandleError { expr, .. } => self.scan_expr(expr),
        }
    }

    fn scan_function(&mut self, func: &Function) {
        self.scan_expr(&func.body);
    }

    fn scan_apply_target(&mut self, kind: &ApplyKind, func: &Expr) {
        match (kind, func) {
            (ApplyKind::Join, Expr::Var { .. }) => {}
            (ApplyKind::Normal { func_ty }, Expr::Var { id, .. }) => {
                self.maybe_record(id, func_ty)
            }
            _ => self.scan_expr(func),
        }
    }

    fn maybe_record(&mut self, id: &Id, ty: &Type) {
        if let Provenance::LocalMethod { owner_type } = &id.provenance {
            self.record(owner_type, &id.name, ty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clam_mcore::{Constant, Param};

    fn method_id(owner: &str, name: &str) -> Id {
        Id {
            name: name.to_string(),
            stamp: 0,
            provenance: Provenance::LocalMethod {
                owner_type: owner.to_string(),
            },
        }
    }

    #[test]
    fn a_call_through_a_local_method_is_recorded_with_slot_zero() {
        let program = Program {
            items: vec![TopItem::CtopExpr(Expr::Apply {
                kind: ApplyKind::Normal {
                    func_ty: Type::func(vec![Type::Record { name: "Point".into() }, Type::Int], Type::Int),
                },
                func: Box::new(Expr::Var {
                    id: method_id("Point", "dist"),
                    ty: Type::func(vec![Type::Record { name: "Point".into() }, Type::Int], Type::Int),
                }),
                args: vec![
                    Expr::Var {
                        id: Id { name: "p".into(), stamp: 0, provenance: Provenance::Local },
                        ty: Type::Record { name: "Point".into() },
                    },
                    Expr::Const(Constant::Int(1)),
                ],
            })],
        };
        let methods = ObjectMethods::scan(&program);
        assert_eq!(methods.method_index("Point", "dist"), Some(0));
        assert_eq!(methods.methods_of("Point").len(), 1);
        assert_eq!(methods.methods_of("Point")[0].params, vec![Type::Int]);
    }

    #[test]
    fn distinct_methods_on_the_same_owner_get_increasing_slots() {
        let program = Program {
            items: vec![
                TopItem::CtopFn {
                    id: Id { name: "run".into(), stamp: 0, provenance: Provenance::Local },
                    func: Function {
                        params: vec![Param {
                            id: Id { name: "p".into(), stamp: 0, provenance: Provenance::Local },
                            ty: Type::Record { name: "Shape".into() },
                        }],
                        return_ty: Type::Int,
                        is_async: false,
                        is_raw: false,
                        body: Box::new(Expr::Sequence(vec![
                            Expr::Apply {
                                kind: ApplyKind::Normal {
                                    func_ty: Type::func(vec![Type::Record { name: "Shape".into() }], Type::Int),
                                },
                                func: Box::new(Expr::Var {
                                    id: method_id("Shape", "area"),
                                    ty: Type::func(vec![Type::Record { name: "Shape".into() }], Type::Int),
                                }),
                                args: vec![Expr::Var {
                                    id: Id { name: "p".into(), stamp: 0, provenance: Provenance::Local },
                                    ty: Type::Record { name: "Shape".into() },
                                }],
                            },
                            Expr::Apply {
                                kind: ApplyKind::Normal {
                                    func_ty: Type::func(vec![Type::Record { name: "Shape".into() }], Type::Int),
                                },
                                func: Box::new(Expr::Var {
                                    id: method_id("Shape", "perimeter"),
                                    ty: Type::func(vec![Type::Record { name: "Shape".into() }], Type::Int),
                                }),
                                args: vec![Expr::Var {
                                    id: Id { name: "p".into(), stamp: 0, provenance: Provenance::Local },
                                    ty: Type::Record { name: "Shape".into() },
                                }],
                            },
                        ])),
                    },
                    intrinsic: None,
                },
            ],
        };
        let methods = ObjectMethods::scan(&program);
        assert_eq!(methods.method_index("Shape", "area"), Some(0));
        assert_eq!(methods.method_index("Shape", "perimeter"), Some(1));
    }

    #[test]
    fn repeated_references_to_the_same_method_share_one_slot() {
        let program = Program {
            items: vec![
                TopItem::CtopExpr(Expr::Sequence(vec![
                    Expr::Apply {
                        kind: ApplyKind::Normal {
                            func_ty: Type::func(vec![Type::Record { name: "Point".into() }], Type::Int),
                        },
                        func: Box::new(Expr::Var {
                            id: method_id("Point", "hash"),
                            ty: Type::func(vec![Type::Record { name: "Point".into() }], Type::Int),
                        }),
                        args: vec![Expr::Var {
                            id: Id { name: "p".into(), stamp: 0, provenance: Provenance::Local },
                            ty: Type::Record { name: "Point".into() },
                        }],
                    },
                    Expr::Apply {
                        kind: ApplyKind::Normal {
                            func_ty: Type::func(vec![Type::Record { name: "Point".into() }], Type::Int),
                        },
                        func: Box::new(Expr::Var {
                            id: method_id("Point", "hash"),
                            ty: Type::func(vec![Type::Record { name: "Point".into() }], Type::Int),
                        }),
                        args: vec![Expr::Var {
                            id: Id { name: "q".into(), stamp: 0, provenance: Provenance::Local },
                            ty: Type::Record { name: "Point".into() },
                        }],
                    },
                ])),
            ],
        };
        let methods = ObjectMethods::scan(&program);
        assert_eq!(methods.methods_of("Point").len(), 1);
    }
}
