//! Inlines intrinsic-tagged top-level calls into specialized Clam bodies
//! (§4.7), instead of compiling them as ordinary calls through `AddrTable`.
//!
//! Every case receives the call's already-lowered argument expressions plus
//! their MCore source types (needed to recover element/capture shapes that
//! the erased `LowType` no longer carries) and the call's source return
//! type. Iterator combinators that themselves produce an iterator value
//! (`Iter_map`, `Iter_filter`, …) are synthesized as fresh top-level
//! closures via `LowerCtx::emit_closure`, reusing the same capture-record
//! machinery `ClosureLowering` uses for ordinary escaping functions.

use clam_ir::{
    AccessKind, AllocKind, ApplyTarget, FieldKind, FnSig, GetItemExtra, Lambda, LowType,
    SetFieldKind, Tid, Var,
};
use clam_mcore::{CompareOp, Intrinsic, Type as SrcType};

use crate::ctx::LowerCtx;

const GO: i32 = 1;
const END: i32 = 0;

fn go_const() -> Lambda {
    Lambda::Lconst(clam_ir::Const::Int(GO))
}

fn end_const() -> Lambda {
    Lambda::Lconst(clam_ir::Const::Int(END))
}

fn int_const(n: i32) -> Lambda {
    Lambda::Lconst(clam_ir::Const::Int(n))
}

fn lvar(v: &Var) -> Lambda {
    Lambda::Lvar { var: v.clone() }
}

fn is_atom(e: &Lambda) -> bool {
    matches!(e, Lambda::Lvar { .. } | Lambda::Lconst(_))
}

/// Hoists a non-pure argument into an `Llet` unless it is already a
/// variable or a constant (§4.7: "already a variable, function literal, or
/// constant"). Function literals reach us pre-lowered as `Lclosure`
/// allocations, which are not reused across multiple positions in the
/// rewritten body here, so they are hoisted too — `k` only ever sees an
/// atom it can freely duplicate.
fn bind_impure(
    ctx: &mut LowerCtx,
    name: &str,
    e: Lambda,
    ty: LowType,
    k: impl FnOnce(&mut LowerCtx, Lambda) -> Lambda,
) -> Lambda {
    if is_atom(&e) {
        return k(ctx, e);
    }
    let v = ctx.fresh_var(name, ty);
    let bound = k(ctx, lvar(&v));
    Lambda::Llet {
        name: v,
        e: Box::new(e),
        body: Box::new(bound),
    }
}

fn expect_var(e: &Lambda) -> Var {
    match e {
        Lambda::Lvar { var } => var.clone(),
        other => panic!("intrinsic rewriting expected a bound variable, found {other:?}"),
    }
}

fn prim_call(ctx: &mut LowerCtx, name: &str, args: Vec<Lambda>) -> Lambda {
    let addr = ctx.primitive_addr(name);
    Lambda::Lapply {
        target: ApplyTarget::StaticFn(addr),
        prim: Some(name.to_string()),
        args,
    }
}

fn apply_dynamic(callee: &Lambda, args: Vec<Lambda>) -> Lambda {
    match callee {
        Lambda::Lvar { var } => Lambda::Lapply {
            target: ApplyTarget::Dynamic(var.clone()),
            prim: None,
            args,
        },
        other => panic!("intrinsic callback target was not a bound variable: {other:?}"),
    }
}

fn array_tid_of(ctx: &mut LowerCtx, ty: &SrcType) -> (Tid, SrcType) {
    match ty {
        SrcType::Array(elem) => {
            let elem_src = (**elem).clone();
            let low = ctx.types.lower_type(ty);
            let tid = match low {
                LowType::Ref(t) => t,
                other => panic!("array lowering produced a non-ref type {other:?}"),
            };
            (tid, elem_src)
        }
        other => panic!("expected an array-shaped type, found {other:?}"),
    }
}

fn view_tid_of(ctx: &mut LowerCtx, ty: &SrcType) -> (Tid, SrcType) {
    match ty {
        SrcType::Builtin { name, args } if name == "ArrayView" || name == "BytesView" => {
            let elem_src = args[0].clone();
            let elem_low = ctx.types.lower_type(&elem_src);
            (ctx.types.intern_view(elem_low), elem_src)
        }
        other => panic!("expected a view-shaped type, found {other:?}"),
    }
}

fn iter_elem_of(ctx: &mut LowerCtx, ty: &SrcType) -> LowType {
    match ty {
        SrcType::Builtin { name, args } if name == "Iter" => ctx.types.lower_type(&args[0]),
        other => panic!("expected an Iter-shaped type, found {other:?}"),
    }
}

/// Normalizes an `Array`/`ArrayView`/`BytesView` value to `(buf, start,
/// len, elem_src)` so `unsafe_as_view` can re-base a view over either kind
/// of parent without duplicating the traversal.
fn normalize_base(
    ctx: &mut LowerCtx,
    base_v: Lambda,
    base_src_ty: &SrcType,
) -> (Lambda, Lambda, Lambda, SrcType) {
    match base_src_ty {
        SrcType::Builtin { name, .. } if name == "ArrayView" || name == "BytesView" => {
            let (view_tid, elem) = view_tid_of(ctx, base_src_ty);
            let buf = Lambda::Lgetfield {
                obj: Box::new(base_v.clone()),
                tid: view_tid,
                index: 0,
                kind: FieldKind::Struct,
            };
            let start = Lambda::Lgetfield {
                obj: Box::new(base_v.clone()),
                tid: view_tid,
                index: 1,
                kind: FieldKind::Struct,
            };
            let len = Lambda::Lgetfield {
                obj: Box::new(base_v),
                tid: view_tid,
                index: 2,
                kind: FieldKind::Struct,
            };
            (buf, start, len, elem)
        }
        SrcType::Array(_) => {
            let (arr_tid, elem) = array_tid_of(ctx, base_src_ty);
            let len = Lambda::Lgetfield {
                obj: Box::new(base_v.clone()),
                tid: arr_tid,
                index: 1,
                kind: FieldKind::Struct,
            };
            (base_v, int_const(0), len, elem)
        }
        other => panic!("unsafe_as_view called on a non-array/view type: {other:?}"),
    }
}

/// `loop i=0 { if i<len { let p=arr[i]; <sink>(p); (stop early on END) else continue i+1 } else GO }`
/// shared by `FixedArray_iter`'s eager walk and `Iter_from_array`'s lazy one.
fn build_array_scan(ctx: &mut LowerCtx, arr_v: Lambda, arr_tid: Tid, elem_ty: LowType, sink: &Var) -> Lambda {
    let len_v = ctx.fresh_var("len", LowType::I32);
    let i_v = ctx.fresh_var("i", LowType::I32);
    let r_v = ctx.fresh_var("r", LowType::I32);
    let p_v = ctx.fresh_var("p", elem_ty);
    let label = ctx.fresh_label("array_scan");

    let len_expr = Lambda::Lgetfield {
        obj: Box::new(arr_v.clone()),
        tid: arr_tid,
        index: 1,
        kind: FieldKind::Struct,
    };
    let cond = prim_call(ctx, "lt_int", vec![lvar(&i_v), lvar(&len_v)]);
    let item = Lambda::Larraygetitem {
        arr: Box::new(arr_v),
        index: Box::new(lvar(&i_v)),
        tid: arr_tid,
        access: AccessKind::Safe,
        extra: GetItemExtra::NoExtra,
    };
    let call_sink = apply_dynamic(&lvar(sink), vec![lvar(&p_v)]);
    let r_is_go = prim_call(ctx, "eq_int", vec![lvar(&r_v), go_const()]);
    let next_i = prim_call(ctx, "add_int", vec![lvar(&i_v), int_const(1)]);
    let continue_or_stop = Lambda::Lif {
        pred: Box::new(r_is_go),
        ifso: Box::new(Lambda::Lcontinue {
            args: vec![next_i],
            label: label.clone(),
        }),
        ifnot: Box::new(lvar(&r_v)),
        type_: LowType::I32,
    };
    let inner = Lambda::Llet {
        name: p_v,
        e: Box::new(item),
        body: Box::new(Lambda::Llet {
            name: r_v,
            e: Box::new(call_sink),
            body: Box::new(continue_or_stop),
        }),
    };
    let if_expr = Lambda::Lif {
        pred: Box::new(cond),
        ifso: Box::new(inner),
        ifnot: Box::new(go_const()),
        type_: LowType::I32,
    };
    let loop_expr = Lambda::Lloop {
        params: vec![i_v],
        body: Box::new(if_expr),
        args: vec![int_const(0)],
        label,
        type_: LowType::I32,
    };
    Lambda::Llet {
        name: len_v,
        e: Box::new(len_expr),
        body: Box::new(loop_expr),
    }
}

/// Rewrites one intrinsic-tagged call into its specialized Clam expression
/// (§4.7). `args`/`arg_tys` are the already-lowered call arguments and
/// their MCore source types, in declared order; `return_ty` is the call's
/// source result type.
pub fn rewrite(
    ctx: &mut LowerCtx,
    intrinsic: Intrinsic,
    args: Vec<Lambda>,
    arg_tys: &[SrcType],
    return_ty: &SrcType,
) -> Lambda {
    match intrinsic {
        Intrinsic::FixedArrayIter => {
            let mut it = args.into_iter();
            let arr_e = it.next().expect("fixedarray_iter: missing arr");
            let f_e = it.next().expect("fixedarray_iter: missing f");
            let (arr_tid, elem_src) = array_tid_of(ctx, &arg_tys[0]);
            let elem_ty = ctx.types.lower_type(&elem_src);
            bind_impure(ctx, "arr", arr_e, LowType::Ref(arr_tid), |ctx, arr_v| {
                bind_impure(ctx, "f", f_e, LowType::RefAny, |ctx, f_v| {
                    let len_v = ctx.fresh_var("len", LowType::I32);
                    let i_v = ctx.fresh_var("i", LowType::I32);
                    let p_v = ctx.fresh_var("p", elem_ty.clone());
                    let label = ctx.fresh_label("fixedarray_iter");

                    let len_expr = Lambda::Lgetfield {
                        obj: Box::new(arr_v.clone()),
                        tid: arr_tid,
                        index: 1,
                        kind: FieldKind::Struct,
                    };
                    let cond = prim_call(ctx, "lt_int", vec![lvar(&i_v), lvar(&len_v)]);
                    let item = Lambda::Larraygetitem {
                        arr: Box::new(arr_v),
                        index: Box::new(lvar(&i_v)),
                        tid: arr_tid,
                        access: AccessKind::Safe,
                        extra: GetItemExtra::NoExtra,
                    };
                    let call_f = apply_dynamic(&f_v, vec![lvar(&p_v)]);
                    let next_i = prim_call(ctx, "add_int", vec![lvar(&i_v), int_const(1)]);
                    let body_seq = Lambda::Llet {
                        name: p_v,
                        e: Box::new(item),
                        body: Box::new(Lambda::Lsequence {
                            exprs: vec![call_f],
                            last_expr: Box::new(Lambda::Lcontinue {
                                args: vec![next_i],
                                label: label.clone(),
                            }),
                        }),
                    };
                    let if_expr = Lambda::Lif {
                        pred: Box::new(cond),
                        ifso: Box::new(body_seq),
                        ifnot: Box::new(Lambda::unit()),
                        type_: LowType::I32Unit,
                    };
                    let loop_expr = Lambda::Lloop {
                        params: vec![i_v],
                        body: Box::new(if_expr),
                        args: vec![int_const(0)],
                        label,
                        type_: LowType::I32Unit,
                    };
                    Lambda::Llet {
                        name: len_v,
                        e: Box::new(len_expr),
                        body: Box::new(loop_expr),
                    }
                })
            })
        }

        Intrinsic::IterFromArray => {
            let arr_e = args.into_iter().next().expect("iter_from_array: missing arr");
            let (arr_tid, elem_src) = array_tid_of(ctx, &arg_tys[0]);
            let elem_ty = ctx.types.lower_type(&elem_src);
            bind_impure(ctx, "arr", arr_e, LowType::Ref(arr_tid), |ctx, arr_v| {
                let arr_var = expect_var(&arr_v);
                let sink_tid = ctx.types.intern_sink_sig(elem_ty.clone());
                let k_ty = LowType::Ref(sink_tid);
                let k_v = ctx.fresh_var("k", k_ty.clone());
                let body = build_array_scan(ctx, lvar(&arr_var), arr_tid, elem_ty, &k_v);
                ctx.emit_closure(
                    FnSig::new(vec![k_ty], LowType::I32),
                    vec![k_v],
                    vec![arr_var],
                    body,
                    LowType::I32,
                )
            })
        }

        Intrinsic::IterIter => {
            let mut it = args.into_iter();
            let it_e = it.next().expect("iter_iter: missing it");
            let f_e = it.next().expect("iter_iter: missing f");
            let elem_ty = iter_elem_of(ctx, &arg_tys[0]);
            bind_impure(ctx, "it", it_e, LowType::RefAny, |ctx, it_v| {
                bind_impure(ctx, "f", f_e, LowType::RefAny, |ctx, f_v| {
                    let f_var = expect_var(&f_v);
                    let a_v = ctx.fresh_var("a", elem_ty.clone());
                    let call_f = apply_dynamic(&lvar(&f_var), vec![lvar(&a_v)]);
                    let sink_body = Lambda::Lsequence {
                        exprs: vec![call_f],
                        last_expr: Box::new(go_const()),
                    };
                    let sink = ctx.emit_closure(
                        FnSig::new(vec![elem_ty], LowType::I32),
                        vec![a_v],
                        vec![f_var],
                        sink_body,
                        LowType::I32,
                    );
                    apply_dynamic(&it_v, vec![sink])
                })
            })
        }

        Intrinsic::IterMap => {
            let mut it = args.into_iter();
            let it_e = it.next().expect("iter_map: missing it");
            let f_e = it.next().expect("iter_map: missing f");
            let in_elem_ty = iter_elem_of(ctx, &arg_tys[0]);
            let out_elem_ty = iter_elem_of(ctx, return_ty);
            bind_impure(ctx, "it", it_e, LowType::RefAny, |ctx, it_v| {
                bind_impure(ctx, "f", f_e, LowType::RefAny, |ctx, f_v| {
                    let it_var = expect_var(&it_v);
                    let f_var = expect_var(&f_v);
                    let k_tid = ctx.types.intern_sink_sig(out_elem_ty);
                    let k_ty = LowType::Ref(k_tid);
                    let k_v = ctx.fresh_var("k", k_ty.clone());
                    let a_v = ctx.fresh_var("a", in_elem_ty.clone());

                    let fa = apply_dynamic(&lvar(&f_var), vec![lvar(&a_v)]);
                    let inner_body = apply_dynamic(&lvar(&k_v), vec![fa]);
                    let inner_sink = ctx.emit_closure(
                        FnSig::new(vec![in_elem_ty], LowType::I32),
                        vec![a_v],
                        vec![f_var.clone(), k_v.clone()],
                        inner_body,
                        LowType::I32,
                    );
                    let outer_body = apply_dynamic(&lvar(&it_var), vec![inner_sink]);
                    ctx.emit_closure(
                        FnSig::new(vec![k_ty], LowType::I32),
                        vec![k_v],
                        vec![it_var, f_var],
                        outer_body,
                        LowType::I32,
                    )
                })
            })
        }

        Intrinsic::IterFilter => {
            let mut it = args.into_iter();
            let it_e = it.next().expect("iter_filter: missing it");
            let f_e = it.next().expect("iter_filter: missing f");
            let elem_ty = iter_elem_of(ctx, &arg_tys[0]);
            bind_impure(ctx, "it", it_e, LowType::RefAny, |ctx, it_v| {
                bind_impure(ctx, "f", f_e, LowType::RefAny, |ctx, f_v| {
                    let it_var = expect_var(&it_v);
                    let f_var = expect_var(&f_v);
                    let k_tid = ctx.types.intern_sink_sig(elem_ty.clone());
                    let k_ty = LowType::Ref(k_tid);
                    let k_v = ctx.fresh_var("k", k_ty.clone());
                    let a_v = ctx.fresh_var("a", elem_ty.clone());

                    let fa = apply_dynamic(&lvar(&f_var), vec![lvar(&a_v)]);
                    let ka = apply_dynamic(&lvar(&k_v), vec![lvar(&a_v)]);
                    let if_expr = Lambda::Lif {
                        pred: Box::new(fa),
                        ifso: Box::new(ka),
                        ifnot: Box::new(go_const()),
                        type_: LowType::I32,
                    };
                    let inner_sink = ctx.emit_closure(
                        FnSig::new(vec![elem_ty.clone()], LowType::I32),
                        vec![a_v],
                        vec![f_var.clone(), k_v.clone()],
                        if_expr,
                        LowType::I32,
                    );
                    let outer_body = apply_dynamic(&lvar(&it_var), vec![inner_sink]);
                    ctx.emit_closure(
                        FnSig::new(vec![k_ty], LowType::I32),
                        vec![k_v],
                        vec![it_var, f_var],
                        outer_body,
                        LowType::I32,
                    )
                })
            })
        }

        Intrinsic::IterTake => {
            let mut it = args.into_iter();
            let it_e = it.next().expect("iter_take: missing it");
            let n_e = it.next().expect("iter_take: missing n");
            let elem_ty = iter_elem_of(ctx, &arg_tys[0]);
            bind_impure(ctx, "it", it_e, LowType::RefAny, |ctx, it_v| {
                bind_impure(ctx, "n", n_e, LowType::I32, |ctx, n_v| {
                    let it_var = expect_var(&it_v);
                    let n_as_var = if let Lambda::Lvar { var } = &n_v {
                        Some(var.clone())
                    } else {
                        None
                    };

                    let cell_tid = ctx.types.intern_ref_cell(LowType::I32);
                    let cell_ty = LowType::Ref(cell_tid);
                    let cell_v = ctx.fresh_var("cnt_cell", cell_ty.clone());
                    let k_tid = ctx.types.intern_sink_sig(elem_ty.clone());
                    let k_ty = LowType::Ref(k_tid);
                    let k_v = ctx.fresh_var("k", k_ty.clone());
                    let a_v = ctx.fresh_var("a", elem_ty.clone());

                    let cnt_field = Lambda::Lgetfield {
                        obj: Box::new(lvar(&cell_v)),
                        tid: cell_tid,
                        index: 0,
                        kind: FieldKind::Struct,
                    };
                    let cond = prim_call(ctx, "lt_int", vec![cnt_field.clone(), n_v.clone()]);
                    let incr = prim_call(ctx, "add_int", vec![cnt_field, int_const(1)]);
                    let set_cnt = Lambda::Lsetfield {
                        obj: Box::new(lvar(&cell_v)),
                        tid: cell_tid,
                        index: 0,
                        value: Box::new(incr),
                        kind: SetFieldKind::Struct,
                    };
                    let ka = apply_dynamic(&lvar(&k_v), vec![lvar(&a_v)]);
                    let take_branch = Lambda::Lsequence {
                        exprs: vec![set_cnt],
                        last_expr: Box::new(ka),
                    };
                    let if_expr = Lambda::Lif {
                        pred: Box::new(cond),
                        ifso: Box::new(take_branch),
                        ifnot: Box::new(end_const()),
                        type_: LowType::I32,
                    };

                    let mut inner_captures = vec![cell_v.clone(), k_v.clone()];
                    if let Some(v) = &n_as_var {
                        inner_captures.push(v.clone());
                    }
                    let inner_sink = ctx.emit_closure(
                        FnSig::new(vec![elem_ty], LowType::I32),
                        vec![a_v],
                        inner_captures,
                        if_expr,
                        LowType::I32,
                    );
                    let scan_call = apply_dynamic(&lvar(&it_var), vec![inner_sink]);
                    let init_cell = Lambda::Lallocate {
                        kind: AllocKind::Struct,
                        tid: cell_tid,
                        fields: vec![int_const(0)],
                    };
                    let with_cell = Lambda::Llet {
                        name: cell_v,
                        e: Box::new(init_cell),
                        body: Box::new(scan_call),
                    };

                    let mut outer_captures = vec![it_var];
                    if let Some(v) = n_as_var {
                        outer_captures.push(v);
                    }
                    ctx.emit_closure(
                        FnSig::new(vec![k_ty], LowType::I32),
                        vec![k_v],
                        outer_captures,
                        with_cell,
                        LowType::I32,
                    )
                })
            })
        }

        Intrinsic::IterReduce => {
            let mut it = args.into_iter();
            let it_e = it.next().expect("iter_reduce: missing it");
            let init_e = it.next().expect("iter_reduce: missing init");
            let f_e = it.next().expect("iter_reduce: missing f");
            let elem_ty = iter_elem_of(ctx, &arg_tys[0]);
            let acc_ty = ctx.types.lower_type(return_ty);
            bind_impure(ctx, "it", it_e, LowType::RefAny, |ctx, it_v| {
                bind_impure(ctx, "init", init_e, acc_ty.clone(), |ctx, init_v| {
                    bind_impure(ctx, "f", f_e, LowType::RefAny, |ctx, f_v| {
                        let it_var = expect_var(&it_v);
                        let f_var = expect_var(&f_v);
                        let cell_tid = ctx.types.intern_ref_cell(acc_ty.clone());
                        let cell_ty = LowType::Ref(cell_tid);
                        let cell_v = ctx.fresh_var("acc_cell", cell_ty);
                        let a_v = ctx.fresh_var("a", elem_ty.clone());

                        let cur = Lambda::Lgetfield {
                            obj: Box::new(lvar(&cell_v)),
                            tid: cell_tid,
                            index: 0,
                            kind: FieldKind::Struct,
                        };
                        let next = apply_dynamic(&lvar(&f_var), vec![cur, lvar(&a_v)]);
                        let set = Lambda::Lsetfield {
                            obj: Box::new(lvar(&cell_v)),
                            tid: cell_tid,
                            index: 0,
                            value: Box::new(next),
                            kind: SetFieldKind::Struct,
                        };
                        let sink_body = Lambda::Lsequence {
                            exprs: vec![set],
                            last_expr: Box::new(go_const()),
                        };
                        let sink = ctx.emit_closure(
                            FnSig::new(vec![elem_ty], LowType::I32),
                            vec![a_v],
                            vec![cell_v.clone(), f_var],
                            sink_body,
                            LowType::I32,
                        );
                        let scan_call = apply_dynamic(&lvar(&it_var), vec![sink]);
                        let final_field = Lambda::Lgetfield {
                            obj: Box::new(lvar(&cell_v)),
                            tid: cell_tid,
                            index: 0,
                            kind: FieldKind::Struct,
                        };
                        let body = Lambda::Lsequence {
                            exprs: vec![scan_call],
                            last_expr: Box::new(final_field),
                        };
                        let init_cell = Lambda::Lallocate {
                            kind: AllocKind::Struct,
                            tid: cell_tid,
                            fields: vec![init_v],
                        };
                        Lambda::Llet {
                            name: cell_v,
                            e: Box::new(init_cell),
                            body: Box::new(body),
                        }
                    })
                })
            })
        }

        Intrinsic::IterFlatMap => {
            let mut it = args.into_iter();
            let it_e = it.next().expect("iter_flat_map: missing it");
            let f_e = it.next().expect("iter_flat_map: missing f");
            let elem_ty = iter_elem_of(ctx, &arg_tys[0]);
            let out_elem_ty = iter_elem_of(ctx, return_ty);
            bind_impure(ctx, "it", it_e, LowType::RefAny, |ctx, it_v| {
                bind_impure(ctx, "f", f_e, LowType::RefAny, |ctx, f_v| {
                    let it_var = expect_var(&it_v);
                    let f_var = expect_var(&f_v);
                    let k_tid = ctx.types.intern_sink_sig(out_elem_ty);
                    let k_ty = LowType::Ref(k_tid);
                    let k_v = ctx.fresh_var("k", k_ty.clone());
                    let a_v = ctx.fresh_var("a", elem_ty.clone());
                    let sub_it_v = ctx.fresh_var("sub_it", LowType::RefAny);

                    let fa = apply_dynamic(&lvar(&f_var), vec![lvar(&a_v)]);
                    let inner_body = Lambda::Llet {
                        name: sub_it_v.clone(),
                        e: Box::new(fa),
                        body: Box::new(apply_dynamic(&lvar(&sub_it_v), vec![lvar(&k_v)])),
                    };
                    let inner_sink = ctx.emit_closure(
                        FnSig::new(vec![elem_ty], LowType::I32),
                        vec![a_v],
                        vec![f_var.clone(), k_v.clone()],
                        inner_body,
                        LowType::I32,
                    );
                    let outer_body = apply_dynamic(&lvar(&it_var), vec![inner_sink]);
                    ctx.emit_closure(
                        FnSig::new(vec![k_ty], LowType::I32),
                        vec![k_v],
                        vec![it_var, f_var],
                        outer_body,
                        LowType::I32,
                    )
                })
            })
        }

        Intrinsic::IterRepeat => {
            let a_e = args.into_iter().next().expect("iter_repeat: missing a");
            let elem_ty = ctx.types.lower_type(&arg_tys[0]);
            bind_impure(ctx, "a", a_e, elem_ty.clone(), |ctx, a_v| {
                let a_as_var = if let Lambda::Lvar { var } = &a_v {
                    Some(var.clone())
                } else {
                    None
                };
                let k_tid = ctx.types.intern_sink_sig(elem_ty);
                let k_ty = LowType::Ref(k_tid);
                let k_v = ctx.fresh_var("k", k_ty.clone());
                let r_v = ctx.fresh_var("r", LowType::I32);
                let label = ctx.fresh_label("iter_repeat");

                let call_k = apply_dynamic(&lvar(&k_v), vec![a_v]);
                let is_go = prim_call(ctx, "eq_int", vec![lvar(&r_v), go_const()]);
                let if_expr = Lambda::Lif {
                    pred: Box::new(is_go),
                    ifso: Box::new(Lambda::Lcontinue {
                        args: vec![],
                        label: label.clone(),
                    }),
                    ifnot: Box::new(lvar(&r_v)),
                    type_: LowType::I32,
                };
                let body = Lambda::Llet {
                    name: r_v,
                    e: Box::new(call_k),
                    body: Box::new(if_expr),
                };
                let loop_expr = Lambda::Lloop {
                    params: vec![],
                    body: Box::new(body),
                    args: vec![],
                    label,
                    type_: LowType::I32,
                };

                let mut captures = vec![k_v.clone()];
                if let Some(v) = a_as_var {
                    captures.push(v);
                }
                ctx.emit_closure(
                    FnSig::new(vec![k_ty], LowType::I32),
                    vec![k_v],
                    captures,
                    loop_expr,
                    LowType::I32,
                )
            })
        }

        Intrinsic::IterConcat => {
            let mut it = args.into_iter();
            let it1_e = it.next().expect("iter_concat: missing it1");
            let it2_e = it.next().expect("iter_concat: missing it2");
            let elem_ty = iter_elem_of(ctx, &arg_tys[0]);
            bind_impure(ctx, "it1", it1_e, LowType::RefAny, |ctx, it1_v| {
                bind_impure(ctx, "it2", it2_e, LowType::RefAny, |ctx, it2_v| {
                    let it1_var = expect_var(&it1_v);
                    let it2_var = expect_var(&it2_v);
                    let k_tid = ctx.types.intern_sink_sig(elem_ty);
                    let k_ty = LowType::Ref(k_tid);
                    let k_v = ctx.fresh_var("k", k_ty.clone());
                    let r_v = ctx.fresh_var("r", LowType::I32);

                    let call1 = apply_dynamic(&lvar(&it1_var), vec![lvar(&k_v)]);
                    let call2 = apply_dynamic(&lvar(&it2_var), vec![lvar(&k_v)]);
                    let is_go = prim_call(ctx, "eq_int", vec![lvar(&r_v), go_const()]);
                    let if_expr = Lambda::Lif {
                        pred: Box::new(is_go),
                        ifso: Box::new(call2),
                        ifnot: Box::new(lvar(&r_v)),
                        type_: LowType::I32,
                    };
                    let body = Lambda::Llet {
                        name: r_v,
                        e: Box::new(call1),
                        body: Box::new(if_expr),
                    };
                    ctx.emit_closure(
                        FnSig::new(vec![k_ty], LowType::I32),
                        vec![k_v],
                        vec![it1_var, it2_var],
                        body,
                        LowType::I32,
                    )
                })
            })
        }

        Intrinsic::ArrayLength => {
            let arr_e = args.into_iter().next().expect("array_length: missing arr");
            let (arr_tid, _) = array_tid_of(ctx, &arg_tys[0]);
            bind_impure(ctx, "arr", arr_e, LowType::Ref(arr_tid), |_ctx, arr_v| {
                Lambda::Lgetfield {
                    obj: Box::new(arr_v),
                    tid: arr_tid,
                    index: 1,
                    kind: FieldKind::Struct,
                }
            })
        }

        Intrinsic::ArrayViewLength | Intrinsic::BytesViewLength => {
            let view_e = args.into_iter().next().expect("view_length: missing view");
            let (view_tid, _) = view_tid_of(ctx, &arg_tys[0]);
            bind_impure(ctx, "view", view_e, LowType::Ref(view_tid), |_ctx, view_v| {
                Lambda::Lgetfield {
                    obj: Box::new(view_v),
                    tid: view_tid,
                    index: 2,
                    kind: FieldKind::Struct,
                }
            })
        }

        Intrinsic::ArrayUnsafeGet => {
            let mut it = args.into_iter();
            let arr_e = it.next().expect("array_unsafe_get: missing arr");
            let i_e = it.next().expect("array_unsafe_get: missing i");
            let (arr_tid, _) = array_tid_of(ctx, &arg_tys[0]);
            bind_impure(ctx, "arr", arr_e, LowType::Ref(arr_tid), |ctx, arr_v| {
                bind_impure(ctx, "i", i_e, LowType::I32, |_ctx, i_v| Lambda::Larraygetitem {
                    arr: Box::new(arr_v),
                    index: Box::new(i_v),
                    tid: arr_tid,
                    access: AccessKind::Unsafe,
                    extra: GetItemExtra::NoExtra,
                })
            })
        }

        Intrinsic::ArrayUnsafeSet => {
            let mut it = args.into_iter();
            let arr_e = it.next().expect("array_unsafe_set: missing arr");
            let i_e = it.next().expect("array_unsafe_set: missing i");
            let v_e = it.next().expect("array_unsafe_set: missing v");
            let (arr_tid, elem_src) = array_tid_of(ctx, &arg_tys[0]);
            let elem_ty = ctx.types.lower_type(&elem_src);
            bind_impure(ctx, "arr", arr_e, LowType::Ref(arr_tid), |ctx, arr_v| {
                bind_impure(ctx, "i", i_e, LowType::I32, |ctx, i_v| {
                    bind_impure(ctx, "v", v_e, elem_ty, |_ctx, v_v| Lambda::Larraysetitem {
                        arr: Box::new(arr_v),
                        index: Box::new(i_v),
                        value: Box::new(v_v),
                        tid: arr_tid,
                        access: AccessKind::Unsafe,
                    })
                })
            })
        }

        Intrinsic::ArrayViewUnsafeGet | Intrinsic::BytesViewUnsafeGet => {
            let mut it = args.into_iter();
            let view_e = it.next().expect("view_unsafe_get: missing view");
            let i_e = it.next().expect("view_unsafe_get: missing i");
            let (view_tid, elem_src) = view_tid_of(ctx, &arg_tys[0]);
            let (buf_tid, _) = array_tid_of(ctx, &SrcType::Array(Box::new(elem_src)));
            bind_impure(ctx, "view", view_e, LowType::Ref(view_tid), |ctx, view_v| {
                bind_impure(ctx, "i", i_e, LowType::I32, |ctx, i_v| {
                    let start = Lambda::Lgetfield {
                        obj: Box::new(view_v.clone()),
                        tid: view_tid,
                        index: 1,
                        kind: FieldKind::Struct,
                    };
                    let buf = Lambda::Lgetfield {
                        obj: Box::new(view_v),
                        tid: view_tid,
                        index: 0,
                        kind: FieldKind::Struct,
                    };
                    let real_index = prim_call(ctx, "add_int", vec![i_v, start]);
                    Lambda::Larraygetitem {
                        arr: Box::new(Lambda::Lcast {
                            expr: Box::new(buf),
                            target_type: LowType::Ref(buf_tid),
                        }),
                        index: Box::new(real_index),
                        tid: buf_tid,
                        access: AccessKind::Unsafe,
                        extra: GetItemExtra::NoExtra,
                    }
                })
            })
        }

        Intrinsic::ArrayViewUnsafeSet | Intrinsic::BytesViewUnsafeSet => {
            let mut it = args.into_iter();
            let view_e = it.next().expect("view_unsafe_set: missing view");
            let i_e = it.next().expect("view_unsafe_set: missing i");
            let v_e = it.next().expect("view_unsafe_set: missing v");
            let (view_tid, elem_src) = view_tid_of(ctx, &arg_tys[0]);
            let elem_ty = ctx.types.lower_type(&elem_src);
            let (buf_tid, _) = array_tid_of(ctx, &SrcType::Array(Box::new(elem_src)));
            bind_impure(ctx, "view", view_e, LowType::Ref(view_tid), |ctx, view_v| {
                bind_impure(ctx, "i", i_e, LowType::I32, |ctx, i_v| {
                    bind_impure(ctx, "v", v_e, elem_ty, |ctx, v_v| {
                        let start = Lambda::Lgetfield {
                            obj: Box::new(view_v.clone()),
                            tid: view_tid,
                            index: 1,
                            kind: FieldKind::Struct,
                        };
                        let buf = Lambda::Lgetfield {
                            obj: Box::new(view_v),
                            tid: view_tid,
                            index: 0,
                            kind: FieldKind::Struct,
                        };
                        let real_index = prim_call(ctx, "add_int", vec![i_v, start]);
                        Lambda::Larraysetitem {
                            arr: Box::new(Lambda::Lcast {
                                expr: Box::new(buf),
                                target_type: LowType::Ref(buf_tid),
                            }),
                            index: Box::new(real_index),
                            value: Box::new(v_v),
                            tid: buf_tid,
                            access: AccessKind::Unsafe,
                        }
                    })
                })
            })
        }

        Intrinsic::ArrayGet => {
            let mut it = args.into_iter();
            let arr_e = it.next().expect("array_get: missing arr");
            let i_e = it.next().expect("array_get: missing i");
            let (arr_tid, _) = array_tid_of(ctx, &arg_tys[0]);
            bind_impure(ctx, "arr", arr_e, LowType::Ref(arr_tid), |ctx, arr_v| {
                bind_impure(ctx, "i", i_e, LowType::I32, |ctx, i_v| {
                    bounds_checked_get(ctx, arr_v, arr_tid, i_v)
                })
            })
        }

        Intrinsic::ArraySet => {
            let mut it = args.into_iter();
            let arr_e = it.next().expect("array_set: missing arr");
            let i_e = it.next().expect("array_set: missing i");
            let v_e = it.next().expect("array_set: missing v");
            let (arr_tid, elem_src) = array_tid_of(ctx, &arg_tys[0]);
            let elem_ty = ctx.types.lower_type(&elem_src);
            bind_impure(ctx, "arr", arr_e, LowType::Ref(arr_tid), |ctx, arr_v| {
                bind_impure(ctx, "i", i_e, LowType::I32, |ctx, i_v| {
                    bind_impure(ctx, "v", v_e, elem_ty, |ctx, v_v| {
                        bounds_checked_set(ctx, arr_v, arr_tid, i_v, v_v)
                    })
                })
            })
        }

        Intrinsic::ArrayViewUnsafeAsView | Intrinsic::BytesViewUnsafeAsView => {
            let mut it = args.into_iter();
            let base_e = it.next().expect("unsafe_as_view: missing base");
            let start_e = it.next().expect("unsafe_as_view: missing start");
            let end_e = it.next();
            let base_src_ty = arg_tys[0].clone();

            bind_impure(ctx, "base", base_e, LowType::RefAny, move |ctx, base_v| {
                bind_impure(ctx, "start", start_e, LowType::I32, move |ctx, start_v| {
                    let (buf, base_start, base_len, elem_src) =
                        normalize_base(ctx, base_v.clone(), &base_src_ty);
                    let elem_low = ctx.types.lower_type(&elem_src);
                    let new_view_tid = ctx.types.intern_view(elem_low);
                    let new_start = prim_call(ctx, "add_int", vec![start_v.clone(), base_start]);

                    match end_e {
                        Some(end_raw) => bind_impure(ctx, "end", end_raw, LowType::I32, move |ctx, end_v| {
                            let new_len = prim_call(ctx, "sub_int", vec![end_v, start_v]);
                            Lambda::Lallocate {
                                kind: AllocKind::Struct,
                                tid: new_view_tid,
                                fields: vec![buf, new_start, new_len],
                            }
                        }),
                        None => {
                            let new_len = prim_call(ctx, "sub_int", vec![base_len, start_v]);
                            Lambda::Lallocate {
                                kind: AllocKind::Struct,
                                tid: new_view_tid,
                                fields: vec![buf, new_start, new_len],
                            }
                        }
                    }
                })
            })
        }

        Intrinsic::CharToString => {
            let c_e = args.into_iter().next().expect("char_to_string: missing c");
            bind_impure(ctx, "c", c_e, LowType::I32, |ctx, c_v| {
                let name = if ctx.config.use_js_builtin_string {
                    "char_to_string_extern"
                } else {
                    "char_to_string"
                };
                prim_call(ctx, name, vec![c_v])
            })
        }

        Intrinsic::OpCompare(op) => {
            let mut it = args.into_iter();
            let lhs_e = it.next().expect("op_compare: missing lhs");
            let rhs_e = it.next().expect("op_compare: missing rhs");
            let ty = ctx.types.lower_type(&arg_tys[0]);
            let base = match ty {
                LowType::I32 | LowType::I32Bool | LowType::I32Unit => "int",
                LowType::I64 => "int64",
                LowType::F64 => "float",
                LowType::F32 => "float32",
                _ => "ref",
            };
            let suffix = match op {
                CompareOp::Lt => "lt",
                CompareOp::Le => "le",
                CompareOp::Ge => "ge",
                CompareOp::Gt => "gt",
                CompareOp::NotEqual => "ne",
            };
            let name = format!("{suffix}_{base}");
            bind_impure(ctx, "lhs", lhs_e, ty.clone(), |ctx, lhs_v| {
                bind_impure(ctx, "rhs", rhs_e, ty, |ctx, rhs_v| prim_call(ctx, &name, vec![lhs_v, rhs_v]))
            })
        }
    }
}

fn bounds_checked_get(ctx: &mut LowerCtx, arr_v: Lambda, arr_tid: Tid, i_v: Lambda) -> Lambda {
    let guard = bounds_guard(ctx, &arr_v, arr_tid, &i_v);
    let item = Lambda::Larraygetitem {
        arr: Box::new(arr_v),
        index: Box::new(i_v),
        tid: arr_tid,
        access: AccessKind::Safe,
        extra: GetItemExtra::NoExtra,
    };
    Lambda::Lsequence {
        exprs: vec![guard],
        last_expr: Box::new(item),
    }
}

fn bounds_checked_set(ctx: &mut LowerCtx, arr_v: Lambda, arr_tid: Tid, i_v: Lambda, v_v: Lambda) -> Lambda {
    let guard = bounds_guard(ctx, &arr_v, arr_tid, &i_v);
    let set = Lambda::Larraysetitem {
        arr: Box::new(arr_v),
        index: Box::new(i_v),
        value: Box::new(v_v),
        tid: arr_tid,
        access: AccessKind::Safe,
    };
    Lambda::Lsequence {
        exprs: vec![guard],
        last_expr: Box::new(set),
    }
}

/// `if i<0 || i>=len { Ppanic() }` (§4.7, §8.2 scenario 6).
fn bounds_guard(ctx: &mut LowerCtx, arr_v: &Lambda, arr_tid: Tid, i_v: &Lambda) -> Lambda {
    let len = Lambda::Lgetfield {
        obj: Box::new(arr_v.clone()),
        tid: arr_tid,
        index: 1,
        kind: FieldKind::Struct,
    };
    let lt_zero = prim_call(ctx, "lt_int", vec![i_v.clone(), int_const(0)]);
    let ge_len = prim_call(ctx, "ge_int", vec![i_v.clone(), len]);
    let oob = prim_call(ctx, "or_bool", vec![lt_zero, ge_len]);
    let panic_call = prim_call(ctx, "panic", vec![]);
    Lambda::Lif {
        pred: Box::new(oob),
        ifso: Box::new(panic_call),
        ifnot: Box::new(Lambda::unit()),
        type_: LowType::I32Unit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BasicConfig;
    use crate::escape::EscapeSet;
    use clam_mcore::Type as Src;

    fn fresh_ctx() -> LowerCtx {
        LowerCtx::new(EscapeSet::default(), BasicConfig::default())
    }

    fn arr_ty() -> Src {
        Src::Array(Box::new(Src::Int))
    }

    #[test]
    fn array_length_reads_the_len_field() {
        let mut ctx = fresh_ctx();
        let arr = ctx.fresh_var("arr", LowType::RefAny);
        let out = rewrite(
            &mut ctx,
            Intrinsic::ArrayLength,
            vec![lvar(&arr)],
            &[arr_ty()],
            &Src::Int,
        );
        match out {
            Lambda::Lgetfield { index, kind, .. } => {
                assert_eq!(index, 1);
                assert_eq!(kind, FieldKind::Struct);
            }
            other => panic!("expected Lgetfield, got {other:?}"),
        }
    }

    #[test]
    fn array_get_emits_a_bounds_guard_before_the_item_read() {
        let mut ctx = fresh_ctx();
        let arr = ctx.fresh_var("arr", LowType::RefAny);
        let i = ctx.fresh_var("i", LowType::I32);
        let out = rewrite(
            &mut ctx,
            Intrinsic::ArrayGet,
            vec![lvar(&arr), lvar(&i)],
            &[arr_ty(), Src::Int],
            &Src::Int,
        );
        match out {
            Lambda::Lsequence { exprs, last_expr } => {
                assert_eq!(exprs.len(), 1);
                assert!(matches!(*last_expr, Lambda::Larraygetitem { access: AccessKind::Safe, .. }));
            }
            other => panic!("expected Lsequence, got {other:?}"),
        }
    }

    #[test]
    fn array_unsafe_get_elides_the_bounds_check() {
        let mut ctx = fresh_ctx();
        let arr = ctx.fresh_var("arr", LowType::RefAny);
        let i = ctx.fresh_var("i", LowType::I32);
        let out = rewrite(
            &mut ctx,
            Intrinsic::ArrayUnsafeGet,
            vec![lvar(&arr), lvar(&i)],
            &[arr_ty(), Src::Int],
            &Src::Int,
        );
        assert!(matches!(out, Lambda::Larraygetitem { access: AccessKind::Unsafe, .. }));
    }

    #[test]
    fn impure_argument_is_hoisted_into_a_let() {
        let mut ctx = fresh_ctx();
        let side_effecting = Lambda::Lapply {
            target: ApplyTarget::StaticFn(ctx.primitive_addr("side_effect")),
            prim: Some("side_effect".to_string()),
            args: vec![],
        };
        let i = ctx.fresh_var("i", LowType::I32);
        let out = rewrite(
            &mut ctx,
            Intrinsic::ArrayUnsafeGet,
            vec![side_effecting, lvar(&i)],
            &[arr_ty(), Src::Int],
            &Src::Int,
        );
        assert!(matches!(out, Lambda::Llet { .. }));
    }

    #[test]
    fn iter_map_synthesizes_a_closure_value() {
        let mut ctx = fresh_ctx();
        let it = ctx.fresh_var("it", LowType::RefAny);
        let f = ctx.fresh_var("f", LowType::RefAny);
        let out = rewrite(
            &mut ctx,
            Intrinsic::IterMap,
            vec![lvar(&it), lvar(&f)],
            &[
                Src::Builtin {
                    name: "Iter".to_string(),
                    args: vec![Src::Int],
                },
                Src::Builtin {
                    name: "Iter".to_string(),
                    args: vec![Src::Bool],
                },
            ],
            &Src::Builtin {
                name: "Iter".to_string(),
                args: vec![Src::Bool],
            },
        );
        assert!(matches!(out, Lambda::Lclosure { .. }));
        assert_eq!(ctx.take_synthesized_fns().len(), 2);
    }

    #[test]
    fn op_compare_specializes_on_the_first_type_argument() {
        let mut ctx = fresh_ctx();
        let a = ctx.fresh_var("a", LowType::I32);
        let b = ctx.fresh_var("b", LowType::I32);
        let out = rewrite(
            &mut ctx,
            Intrinsic::OpCompare(CompareOp::Lt),
            vec![lvar(&a), lvar(&b)],
            &[Src::Int, Src::Int],
            &Src::Bool,
        );
        match out {
            Lambda::Lapply { prim: Some(name), .. } => assert_eq!(name, "lt_int"),
            other => panic!("expected Lapply, got {other:?}"),
        }
    }
}
