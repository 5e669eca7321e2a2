//! S-expression printer for Clam (§6.2). This is the stable observable
//! form between components in tests: variables render as opaque atoms,
//! location sub-trees are omitted unless `show_loc` is set, and
//! consecutive `Llet`/`Lsequence`/`Levent` nodes collapse for readability.

use std::fmt::Write as _;

use crate::lambda::{Const, JoinKind, Lambda};
use crate::var::Var;

#[derive(Clone, Copy, Debug, Default)]
pub struct PrintConfig {
    pub show_loc: bool,
}

pub fn print_lambda(e: &Lambda, cfg: PrintConfig) -> String {
    let mut out = String::new();
    write_lambda(&mut out, e, cfg);
    out
}

fn atom(out: &mut String, var: &Var) {
    let _ = write!(out, "{}", var.name);
}

fn paren(out: &mut String, head: &str, body: impl FnOnce(&mut String)) {
    let _ = write!(out, "({head} ");
    body(out);
    out.push(')');
}

fn write_const(out: &mut String, c: &Const) {
    match c {
        Const::Int(v) => {
            let _ = write!(out, "{v}");
        }
        Const::Int64(v) => {
            let _ = write!(out, "{v}L");
        }
        Const::Float(v) => {
            let _ = write!(out, "{v}f");
        }
        Const::Double(v) => {
            let _ = write!(out, "{v}");
        }
        Const::Bool(v) => {
            let _ = write!(out, "{v}");
        }
        Const::Char(v) => {
            let _ = write!(out, "'{v}'");
        }
        Const::Str(v) => {
            let _ = write!(out, "{v:?}");
        }
        Const::Bytes(v) => {
            let _ = write!(out, "#bytes[{}]", v.len());
        }
    }
}

/// Collapse runs of `Llet`/`Lsequence`/`Levent` into one flat printed form,
/// matching §6.2's "consecutive ... nodes are collapsed for readability".
fn write_lambda(out: &mut String, e: &Lambda, cfg: PrintConfig) {
    match e {
        Lambda::Levent { expr, .. } if !cfg.show_loc => write_lambda(out, expr, cfg),
        Lambda::Levent { expr, loc } => paren(out, "event", |out| {
            let _ = write!(out, "{}:{} ", loc.line, loc.col);
            write_lambda(out, expr, cfg);
        }),
        Lambda::Lconst(c) => write_const(out, c),
        Lambda::Lvar { var } => atom(out, var),
        Lambda::Lassign { var, e } => paren(out, "assign", |out| {
            atom(out, var);
            out.push(' ');
            write_lambda(out, e, cfg);
        }),
        Lambda::Llet { .. } => write_let_chain(out, e, cfg),
        Lambda::Lletrec { names, fns, body } => paren(out, "letrec", |out| {
            out.push('(');
            for (i, (n, f)) in names.iter().zip(fns.iter()).enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push('(');
                atom(out, n);
                out.push(' ');
                write_lambda(out, f, cfg);
                out.push(')');
            }
            out.push_str(") ");
            write_lambda(out, body, cfg);
        }),
        Lambda::Lsequence { .. } => write_sequence_chain(out, e, cfg),
        Lambda::Lif { pred, ifso, ifnot, .. } => paren(out, "if", |out| {
            write_lambda(out, pred, cfg);
            out.push(' ');
            write_lambda(out, ifso, cfg);
            out.push(' ');
            write_lambda(out, ifnot, cfg);
        }),
        Lambda::Lloop { params, body, args, label, .. } => paren(out, "loop", |out| {
            let _ = write!(out, "{label} (");
            for (i, p) in params.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                atom(out, p);
            }
            out.push_str(") (");
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_lambda(out, a, cfg);
            }
            out.push_str(") ");
            write_lambda(out, body, cfg);
        }),
        Lambda::Lbreak { arg, label } => paren(out, "break", |out| {
            let _ = write!(out, "{label}");
            if let Some(arg) = arg {
                out.push(' ');
                write_lambda(out, arg, cfg);
            }
        }),
        Lambda::Lcontinue { args, label } => paren(out, "continue", |out| {
            let _ = write!(out, "{label}");
            for a in args {
                out.push(' ');
                write_lambda(out, a, cfg);
            }
        }),
        Lambda::Ljoinlet { name, params, e, body, kind, .. } => {
            let head = match kind {
                JoinKind::TailJoin => "Ljoinlet",
                JoinKind::NontailJoin => "Ljoinlet_nontail",
            };
            paren(out, head, |out| {
                let _ = write!(out, "{name} (");
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    atom(out, p);
                }
                out.push_str(") ");
                write_lambda(out, e, cfg);
                out.push(' ');
                write_lambda(out, body, cfg);
            })
        }
        Lambda::Ljoinapply { name, args } => paren(out, "joinapply", |out| {
            let _ = write!(out, "{name}");
            for a in args {
                out.push(' ');
                write_lambda(out, a, cfg);
            }
        }),
        Lambda::Lswitch { obj, cases, default, .. } => paren(out, "switch", |out| {
            atom(out, obj);
            for (tag, body) in cases {
                let _ = write!(out, " ({tag} ");
                write_lambda(out, body, cfg);
                out.push(')');
            }
            if let Some(d) = default {
                out.push_str(" (_ ");
                write_lambda(out, d, cfg);
                out.push(')');
            }
        }),
        Lambda::Lswitchint { obj, cases, default, .. } => paren(out, "switchint", |out| {
            atom(out, obj);
            for (tag, body) in cases {
                let _ = write!(out, " ({tag} ");
                write_lambda(out, body, cfg);
                out.push(')');
            }
            if let Some(d) = default {
                out.push_str(" (_ ");
                write_lambda(out, d, cfg);
                out.push(')');
            }
        }),
        Lambda::Lswitchstring { obj, cases, default, .. } => paren(out, "switchstring", |out| {
            atom(out, obj);
            for (tag, body) in cases {
                let _ = write!(out, " ({tag:?} ");
                write_lambda(out, body, cfg);
                out.push(')');
            }
            if let Some(d) = default {
                out.push_str(" (_ ");
                write_lambda(out, d, cfg);
                out.push(')');
            }
        }),
        Lambda::Lapply { target, prim, args } => {
            let head = match prim {
                Some(p) => format!("apply[{p}]"),
                None => "apply".to_string(),
            };
            paren(out, &head, |out| {
                match target {
                    crate::lambda::ApplyTarget::Dynamic(v) => atom(out, v),
                    crate::lambda::ApplyTarget::StaticFn(a) => {
                        let _ = write!(out, "{a}");
                    }
                    crate::lambda::ApplyTarget::Object { obj, method_index, .. } => {
                        atom(out, obj);
                        let _ = write!(out, "#{method_index}");
                    }
                }
                for a in args {
                    out.push(' ');
                    write_lambda(out, a, cfg);
                }
            })
        }
        Lambda::LstubCall { fn_name, args, .. } => paren(out, "stub_call", |out| {
            let _ = write!(out, "{fn_name:?}");
            for a in args {
                out.push(' ');
                write_lambda(out, a, cfg);
            }
        }),
        Lambda::Lallocate { kind, tid, fields } => paren(out, "allocate", |out| {
            let _ = write!(out, "{kind:?} {tid}");
            for f in fields {
                out.push(' ');
                write_lambda(out, f, cfg);
            }
        }),
        Lambda::Lclosure { captures, address, tid } => paren(out, "closure", |out| {
            let _ = write!(out, "{address:?} {tid} (");
            for (i, c) in captures.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                atom(out, c);
            }
            out.push(')');
        }),
        Lambda::LgetRawFunc(a) => paren(out, "get_raw_func", |out| {
            let _ = write!(out, "{a}");
        }),
        Lambda::Lgetfield { obj, tid, index, kind } => paren(out, "get_field", |out| {
            write_lambda(out, obj, cfg);
            let _ = write!(out, " {tid} {index} {kind:?}");
        }),
        Lambda::Lsetfield { obj, tid, index, value, kind } => paren(out, "set_field", |out| {
            write_lambda(out, obj, cfg);
            let _ = write!(out, " {tid} {index} {kind:?} ");
            write_lambda(out, value, cfg);
        }),
        Lambda::LclosureField { env, index } => paren(out, "closure_field", |out| {
            write_lambda(out, env, cfg);
            let _ = write!(out, " {index}");
        }),
        Lambda::Lmakearray { tid, items } => paren(out, "make_array", |out| {
            let _ = write!(out, "{tid}");
            for i in items {
                out.push(' ');
                write_lambda(out, i, cfg);
            }
        }),
        Lambda::Larraygetitem { arr, index, tid, access, extra } => {
            paren(out, "array_get_item", |out| {
                write_lambda(out, arr, cfg);
                out.push(' ');
                write_lambda(out, index, cfg);
                let _ = write!(out, " {tid} {access:?} {extra:?}");
            })
        }
        Lambda::Larraysetitem { arr, index, value, tid, access } => {
            paren(out, "array_set_item", |out| {
                write_lambda(out, arr, cfg);
                out.push(' ');
                write_lambda(out, index, cfg);
                out.push(' ');
                write_lambda(out, value, cfg);
                let _ = write!(out, " {tid} {access:?}");
            })
        }
        Lambda::Lcast { expr, target_type } => paren(out, "cast", |out| {
            write_lambda(out, expr, cfg);
            let _ = write!(out, " {target_type:?}");
        }),
        Lambda::Lcatch { body, on_exception, .. } => paren(out, "catch", |out| {
            write_lambda(out, body, cfg);
            out.push(' ');
            write_lambda(out, on_exception, cfg);
        }),
        Lambda::Lreturn(e) => paren(out, "return", |out| write_lambda(out, e, cfg)),
    }
}

/// Walk a chain of nested `Llet`s and print them flattened as
/// `(let (a e1) (b e2) ... body)` instead of deeply nested parens.
fn write_let_chain(out: &mut String, e: &Lambda, cfg: PrintConfig) {
    let mut bindings = Vec::new();
    let mut cur = e;
    while let Lambda::Llet { name, e, body } = cur {
        bindings.push((name, e.as_ref()));
        cur = body.as_ref();
    }
    paren(out, "let", |out| {
        for (name, value) in &bindings {
            out.push('(');
            atom(out, name);
            out.push(' ');
            write_lambda(out, value, cfg);
            out.push_str(") ");
        }
        write_lambda(out, cur, cfg);
    });
}

/// Walk a chain of nested `Lsequence`s and print their effects flattened.
fn write_sequence_chain(out: &mut String, e: &Lambda, cfg: PrintConfig) {
    let mut exprs = Vec::new();
    let mut cur = e;
    loop {
        match cur {
            Lambda::Lsequence { exprs: es, last_expr } => {
                exprs.extend(es.iter());
                cur = last_expr.as_ref();
            }
            other => {
                exprs.push(other);
                break;
            }
        }
    }
    paren(out, "seq", |out| {
        for (i, ex) in exprs.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            write_lambda(out, ex, cfg);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::var::Loc;

    fn v(name: &str) -> Var {
        Var::new(name, 0, LowType::I32)
    }

    #[test]
    fn collapses_nested_let_chain() {
        let e = Lambda::Llet {
            name: v("a"),
            e: Box::new(Lambda::Lconst(Const::Int(1))),
            body: Box::new(Lambda::Llet {
                name: v("b"),
                e: Box::new(Lambda::Lconst(Const::Int(2))),
                body: Box::new(Lambda::Lvar { var: v("b") }),
            }),
        };
        let out = print_lambda(&e, PrintConfig::default());
        assert_eq!(out, "(let (a 1) (b 2) b)");
    }

    #[test]
    fn collapses_nested_sequence_chain() {
        let e = Lambda::Lsequence {
            exprs: vec![Lambda::Lconst(Const::Int(1))],
            last_expr: Box::new(Lambda::Lsequence {
                exprs: vec![Lambda::Lconst(Const::Int(2))],
                last_expr: Box::new(Lambda::Lconst(Const::Int(3))),
            }),
        };
        let out = print_lambda(&e, PrintConfig::default());
        assert_eq!(out, "(seq 1 2 3)");
    }

    #[test]
    fn elides_event_location_unless_show_loc() {
        let e = Lambda::Levent {
            expr: Box::new(Lambda::Lconst(Const::Int(42))),
            loc: Loc { line: 3, col: 7 },
        };
        assert_eq!(print_lambda(&e, PrintConfig { show_loc: false }), "42");
        assert_eq!(
            print_lambda(&e, PrintConfig { show_loc: true }),
            "(event 3:7 42)"
        );
    }

    #[test]
    fn joinlet_kind_selects_head_symbol() {
        let tail = Lambda::Ljoinlet {
            name: "j".to_string(),
            params: vec![],
            e: Box::new(Lambda::unit()),
            body: Box::new(Lambda::unit()),
            kind: JoinKind::TailJoin,
            type_: LowType::I32Unit,
        };
        let nontail = Lambda::Ljoinlet {
            name: "j".to_string(),
            params: vec![],
            e: Box::new(Lambda::unit()),
            body: Box::new(Lambda::unit()),
            kind: JoinKind::NontailJoin,
            type_: LowType::I32Unit,
        };
        assert!(print_lambda(&tail, PrintConfig::default()).starts_with("(Ljoinlet "));
        assert!(print_lambda(&nontail, PrintConfig::default()).starts_with("(Ljoinlet_nontail "));
    }

    #[test]
    fn apply_renders_intrinsic_tag_when_present() {
        let plain = Lambda::Lapply {
            target: ApplyTarget::Dynamic(v("f")),
            prim: None,
            args: vec![],
        };
        let tagged = Lambda::Lapply {
            target: ApplyTarget::Dynamic(v("f")),
            prim: Some("add_int".to_string()),
            args: vec![],
        };
        assert!(print_lambda(&plain, PrintConfig::default()).starts_with("(apply "));
        assert!(print_lambda(&tagged, PrintConfig::default()).starts_with("(apply[add_int] "));
    }
}
