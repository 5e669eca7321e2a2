//! Closure conversion for local function bindings (§4.8).
//!
//! Split into a `plan`/`finish` pair rather than one pass, because a
//! self- or mutually-recursive binding's own address and env shape must be
//! known *before* its body is translated (so a recursive reference inside
//! the body resolves to the same address/env the binding will actually
//! get) but the capture-unpacking wrapper around the body can only be
//! built *after* translation produces that body. `plan_binding` mints
//! addresses/tids/env vars and is called first; the `Lowerer` registers
//! the resulting call convention in its scope, translates the body, and
//! then calls `finish_binding` to wrap it and emit the top-level item.

use clam_ir::{
    Addr, AllocKind, ApplyTarget, ClosureAddr, FieldKind, FnKind, FnSig, Lambda, LowType, Tid,
    TopFuncItem, Var,
};

use crate::ctx::LowerCtx;

#[derive(Clone)]
pub enum WellKnownCallInfo {
    NoEnv { addr: Addr },
    /// The captured singleton is passed directly as the env argument — no
    /// struct, no indirection (§4.8 rule 3, `|fvs| = 1`).
    DirectEnv { addr: Addr, env_var: Var },
    /// `|fvs| ≥ 2`: one struct allocated once at the binding site.
    StructEnv { addr: Addr, env_var: Var, tid: Tid },
}

impl WellKnownCallInfo {
    pub fn addr(&self) -> Addr {
        match self {
            WellKnownCallInfo::NoEnv { addr }
            | WellKnownCallInfo::DirectEnv { addr, .. }
            | WellKnownCallInfo::StructEnv { addr, .. } => *addr,
        }
    }

    pub fn env_arg(&self) -> Option<Lambda> {
        match self {
            WellKnownCallInfo::NoEnv { .. } => None,
            WellKnownCallInfo::DirectEnv { env_var, .. }
            | WellKnownCallInfo::StructEnv { env_var, .. } => Some(Lambda::Lvar {
                var: env_var.clone(),
            }),
        }
    }
}

/// Everything decided about one local binding before its body exists.
pub enum BindingPlan {
    Escaping {
        addr: Addr,
        fn_sig_tid: Tid,
        concrete_tid: Option<Tid>,
        env_var: Option<Var>,
    },
    WellKnown(WellKnownCallInfo),
}

impl BindingPlan {
    pub fn call_info(&self) -> Option<WellKnownCallInfo> {
        match self {
            BindingPlan::WellKnown(info) => Some(info.clone()),
            BindingPlan::Escaping { .. } => None,
        }
    }
}

/// Mints whatever addressing this binding needs (§4.8 rules 1-3), without
/// touching its body. `captures` is the binding's free variables in
/// deterministic first-occurrence order, already resolved to `Var`s.
pub fn plan_binding(
    ctx: &mut LowerCtx,
    escapes: bool,
    param_tys: &[LowType],
    return_type: &LowType,
    captures: &[Var],
) -> BindingPlan {
    if escapes {
        let fn_sig = FnSig::new(param_tys.to_vec(), return_type.clone());
        let fn_sig_tid = ctx.types.intern_fn_sig(fn_sig);
        let addr = ctx.addr_table.fresh_addr();
        if captures.is_empty() {
            return BindingPlan::Escaping {
                addr,
                fn_sig_tid,
                concrete_tid: None,
                env_var: None,
            };
        }
        let capture_tys: Vec<LowType> = captures.iter().map(|c| c.ty.clone()).collect();
        let concrete_tid = ctx.types.intern_closure(fn_sig_tid, capture_tys);
        let env_var = ctx.fresh_var("env", LowType::RefAny);
        return BindingPlan::Escaping {
            addr,
            fn_sig_tid,
            concrete_tid: Some(concrete_tid),
            env_var: Some(env_var),
        };
    }

    let addr = ctx.addr_table.fresh_addr();
    match captures.len() {
        0 => BindingPlan::WellKnown(WellKnownCallInfo::NoEnv { addr }),
        1 => BindingPlan::WellKnown(WellKnownCallInfo::DirectEnv {
            addr,
            env_var: captures[0].clone(),
        }),
        _ => {
            let field_tys: Vec<LowType> = captures.iter().map(|c| c.ty.clone()).collect();
            let tid = ctx.types.intern_struct(field_tys);
            let env_var = ctx.fresh_var("env", LowType::Ref(tid));
            BindingPlan::WellKnown(WellKnownCallInfo::StructEnv { addr, env_var, tid })
        }
    }
}

/// Wraps a non-nullable ref capture read back out of a capture record with
/// an assertion primitive (§4.8 rule 2: "non-nullable-ref captures require
/// `Pas_non_null` wrappers").
fn maybe_assert_non_null(ctx: &mut LowerCtx, var: &Var, field: Lambda) -> Lambda {
    if var.ty.is_non_null_ref() {
        let addr = ctx.primitive_addr("as_non_null");
        Lambda::Lapply {
            target: ApplyTarget::StaticFn(addr),
            prim: Some("as_non_null".to_string()),
            args: vec![field],
        }
    } else {
        field
    }
}

fn unpack_struct_env(
    ctx: &mut LowerCtx,
    env_var: &Var,
    tid: Tid,
    captures: &[Var],
    cast_from_any: bool,
    body: Lambda,
) -> Lambda {
    let mut wrapped = body;
    for (index, cap) in captures.iter().enumerate().rev() {
        let env_ref = if cast_from_any {
            Lambda::Lcast {
                expr: Box::new(Lambda::Lvar { var: env_var.clone() }),
                target_type: LowType::Ref(tid),
            }
        } else {
            Lambda::Lvar { var: env_var.clone() }
        };
        let field = Lambda::Lgetfield {
            obj: Box::new(env_ref),
            tid,
            index: index as u32,
            kind: FieldKind::Struct,
        };
        let field = maybe_assert_non_null(ctx, cap, field);
        wrapped = Lambda::Llet {
            name: cap.clone(),
            e: Box::new(field),
            body: Box::new(wrapped),
        };
    }
    wrapped
}

fn push_top_func(
    ctx: &mut LowerCtx,
    addr: Addr,
    params: Vec<Var>,
    body: Lambda,
    return_type: LowType,
    tid: Option<Tid>,
) {
    ctx.push_synthesized(TopFuncItem {
        binder: addr,
        fn_kind: FnKind::TopPrivate,
        params,
        body,
        return_type,
        tid,
    });
}

/// Wraps the now-translated body and emits the top-level item. Returns the
/// Clam value the binder should be bound to (`Lclosure` for escaping,
/// `Lconst 0` placeholder for well-known, per §4.8 rule 3 "no env").
pub fn finish_binding(
    ctx: &mut LowerCtx,
    plan: &BindingPlan,
    params: Vec<Var>,
    captures: Vec<Var>,
    body: Lambda,
    return_type: LowType,
) -> Lambda {
    match plan {
        BindingPlan::Escaping {
            addr,
            fn_sig_tid,
            concrete_tid,
            env_var,
        } => {
            let (full_params, wrapped, tid) = match (concrete_tid, env_var) {
                (Some(concrete_tid), Some(env_var)) => {
                    let wrapped =
                        unpack_struct_env(ctx, env_var, *concrete_tid, &captures, true, body);
                    let mut full = vec![env_var.clone()];
                    full.extend(params);
                    (full, wrapped, *concrete_tid)
                }
                _ => (params, body, *fn_sig_tid),
            };
            push_top_func(ctx, *addr, full_params, wrapped, return_type, Some(tid));
            Lambda::Lclosure {
                captures,
                address: ClosureAddr::Normal(*addr),
                tid,
            }
        }
        BindingPlan::WellKnown(WellKnownCallInfo::NoEnv { addr }) => {
            push_top_func(ctx, *addr, params, body, return_type, None);
            Lambda::unit()
        }
        BindingPlan::WellKnown(WellKnownCallInfo::DirectEnv { addr, env_var }) => {
            let mut full = vec![env_var.clone()];
            full.extend(params);
            push_top_func(ctx, *addr, full, body, return_type, None);
            Lambda::unit()
        }
        BindingPlan::WellKnown(WellKnownCallInfo::StructEnv { addr, env_var, tid }) => {
            let wrapped = unpack_struct_env(ctx, env_var, *tid, &captures, false, body);
            let mut full = vec![env_var.clone()];
            full.extend(params);
            push_top_func(ctx, *addr, full, wrapped, return_type, Some(*tid));
            Lambda::unit()
        }
    }
}

/// Mutually-recursive bundle planning (§4.8 rule 4). Mints one shared
/// capture tid and one address per member *before* any body is
/// translated, so every member's body can reference every peer (and
/// itself) through the addresses this returns. Every member, regardless
/// of individual escape status, is bound through `ClosureAddr::WellKnownMutRec`
/// sharing the one tid — rule 4 overrides rule 3's unit placeholder
/// unconditionally for bundle members, since the bundle's cycle is only
/// resolvable through that shared env. `any_escapes` still decides the
/// shared tid's allocation kind (a plain `Ref_struct` once any member
/// escapes, vs. a `Ref_late_init_struct` when the whole bundle is
/// well-known) — see `plan_mut_rec_group`.
pub struct MutRecPlan {
    pub shared_tid: Option<Tid>,
    pub env_var: Option<Var>,
    pub any_escapes: bool,
    pub member_addrs: Vec<Addr>,
    /// One abstract fn-sig tid per member, used as the fallback `Lclosure`
    /// tid for a bundle with no shared captures.
    pub member_fn_sig_tids: Vec<Tid>,
}

pub fn plan_mut_rec_group(
    ctx: &mut LowerCtx,
    shared_captures: &[Var],
    any_escapes: bool,
    member_sigs: &[FnSig],
) -> MutRecPlan {
    let member_addrs: Vec<Addr> = member_sigs.iter().map(|_| ctx.addr_table.fresh_addr()).collect();
    let member_fn_sig_tids: Vec<Tid> = member_sigs
        .iter()
        .map(|sig| ctx.types.intern_fn_sig(sig.clone()))
        .collect();

    if shared_captures.is_empty() {
        return MutRecPlan {
            shared_tid: None,
            env_var: None,
            any_escapes,
            member_addrs,
            member_fn_sig_tids,
        };
    }

    let field_tys: Vec<LowType> = shared_captures.iter().map(|c| c.ty.clone()).collect();
    let shared_tid = if any_escapes {
        ctx.types.intern_struct(field_tys)
    } else {
        ctx.types.intern_late_init_struct(field_tys)
    };
    let env_var = ctx.fresh_var("mutrec_env", LowType::Ref(shared_tid));

    MutRecPlan {
        shared_tid: Some(shared_tid),
        env_var: Some(env_var),
        any_escapes,
        member_addrs,
        member_fn_sig_tids,
    }
}

/// Packages the bundle's already-translated members. Returns the single
/// shared-env allocation (bound once, before the `Lletrec`) and, per
/// member in order, the `Lclosure` value bound inside the `Lletrec`.
pub fn finish_mut_rec_group(
    ctx: &mut LowerCtx,
    plan: &MutRecPlan,
    shared_captures: Vec<Var>,
    members: Vec<(Vec<Var>, Lambda, LowType)>,
) -> (Option<(Var, Lambda)>, Vec<Lambda>) {
    let env_alloc = plan.env_var.as_ref().map(|env_var| {
        let tid = plan.shared_tid.expect("env_var implies shared_tid");
        let alloc = Lambda::Lallocate {
            kind: AllocKind::Struct,
            tid,
            fields: shared_captures
                .iter()
                .map(|c| Lambda::Lvar { var: c.clone() })
                .collect(),
        };
        (env_var.clone(), alloc)
    });

    let mut closures = Vec::with_capacity(members.len());
    for (idx, (addr, (params, body, return_type))) in
        plan.member_addrs.iter().zip(members).enumerate()
    {
        let (full_params, wrapped) = match (&plan.shared_tid, &plan.env_var) {
            (Some(tid), Some(env_var)) => {
                let wrapped = unpack_struct_env(ctx, env_var, *tid, &shared_captures, false, body);
                let mut full = vec![env_var.clone()];
                full.extend(params);
                (full, wrapped)
            }
            _ => (params, body),
        };
        push_top_func(ctx, *addr, full_params, wrapped, return_type, plan.shared_tid);

        // §4.8 rule 4 overrides rule 3's unit placeholder for *every*
        // member of a mutually-recursive bundle, well-known or escaping:
        // the bundle's "cycle" only exists through the shared late-init
        // env, so each member still needs a real `Lclosure` pointing at
        // that shared tid for peers to recover each other through it. A
        // bundle with no shared captures falls back to its own abstract
        // fn-sig tid, same as a singleton escaping binding would.
        let tid = plan.shared_tid.unwrap_or(plan.member_fn_sig_tids[idx]);
        let closure_value = Lambda::Lclosure {
            captures: shared_captures.clone(),
            address: ClosureAddr::WellKnownMutRec,
            tid,
        };
        closures.push(closure_value);
    }

    (env_alloc, closures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BasicConfig;
    use crate::escape::EscapeSet;

    fn fresh_ctx() -> LowerCtx {
        LowerCtx::new(EscapeSet::default(), BasicConfig::default())
    }

    #[test]
    fn well_known_with_no_captures_binds_a_unit_placeholder() {
        let mut ctx = fresh_ctx();
        let plan = plan_binding(&mut ctx, false, &[], &LowType::I32, &[]);
        assert!(matches!(
            plan,
            BindingPlan::WellKnown(WellKnownCallInfo::NoEnv { .. })
        ));
        let value = finish_binding(&mut ctx, &plan, vec![], vec![], Lambda::unit(), LowType::I32);
        assert_eq!(value, Lambda::unit());
        assert_eq!(ctx.take_synthesized_fns().len(), 1);
    }

    #[test]
    fn well_known_singleton_capture_passes_the_var_directly() {
        let mut ctx = fresh_ctx();
        let x = ctx.fresh_var("x", LowType::I32);
        let plan = plan_binding(&mut ctx, false, &[], &LowType::I32, &[x.clone()]);
        match &plan {
            BindingPlan::WellKnown(WellKnownCallInfo::DirectEnv { env_var, .. }) => {
                assert_eq!(*env_var, x)
            }
            _ => panic!("expected DirectEnv"),
        }
    }

    #[test]
    fn well_known_multi_capture_plans_a_struct() {
        let mut ctx = fresh_ctx();
        let x = ctx.fresh_var("x", LowType::I32);
        let y = ctx.fresh_var("y", LowType::I32);
        let plan = plan_binding(&mut ctx, false, &[], &LowType::I32, &[x, y]);
        assert!(matches!(
            plan,
            BindingPlan::WellKnown(WellKnownCallInfo::StructEnv { .. })
        ));
    }

    #[test]
    fn escaping_binding_produces_a_closure_value() {
        let mut ctx = fresh_ctx();
        let x = ctx.fresh_var("x", LowType::I32);
        let plan = plan_binding(&mut ctx, true, &[], &LowType::I32, &[x.clone()]);
        let value = finish_binding(
            &mut ctx,
            &plan,
            vec![],
            vec![x],
            Lambda::unit(),
            LowType::I32,
        );
        assert!(matches!(value, Lambda::Lclosure { .. }));
    }

    #[test]
    fn well_known_mut_rec_bundle_shares_one_env_across_members() {
        let mut ctx = fresh_ctx();
        let shared = ctx.fresh_var("shared", LowType::I32);
        let sigs = vec![
            FnSig::new(vec![], LowType::I32),
            FnSig::new(vec![], LowType::I32),
        ];
        let plan = plan_mut_rec_group(&mut ctx, &[shared.clone()], false, &sigs);
        assert_eq!(plan.member_addrs.len(), 2);
        let members = vec![
            (vec![], Lambda::unit(), LowType::I32),
            (vec![], Lambda::unit(), LowType::I32),
        ];
        let (env_alloc, closures) = finish_mut_rec_group(&mut ctx, &plan, vec![shared], members);
        assert!(env_alloc.is_some());
        assert_eq!(closures.len(), 2);
        for c in &closures {
            match c {
                Lambda::Lclosure { tid, address, .. } => {
                    assert_eq!(*tid, plan.shared_tid.unwrap());
                    assert!(matches!(address, ClosureAddr::WellKnownMutRec));
                }
                other => panic!("expected Lclosure, got {other:?}"),
            }
        }
    }

    #[test]
    fn escaping_mut_rec_bundle_with_no_shared_captures_uses_its_own_fn_sig_tid() {
        let mut ctx = fresh_ctx();
        let sigs = vec![FnSig::new(vec![], LowType::I32)];
        let plan = plan_mut_rec_group(&mut ctx, &[], true, &sigs);
        let members = vec![(vec![], Lambda::unit(), LowType::I32)];
        let (env_alloc, closures) = finish_mut_rec_group(&mut ctx, &plan, vec![], members);
        assert!(env_alloc.is_none());
        match &closures[0] {
            Lambda::Lclosure { tid, address, .. } => {
                assert_eq!(*tid, plan.member_fn_sig_tids[0]);
                assert!(matches!(address, ClosureAddr::WellKnownMutRec));
            }
            other => panic!("expected Lclosure, got {other:?}"),
        }
    }

    #[test]
    fn mut_rec_addresses_are_minted_before_any_body_exists() {
        let mut ctx = fresh_ctx();
        let sigs = vec![
            FnSig::new(vec![], LowType::I32),
            FnSig::new(vec![], LowType::I32),
        ];
        let plan = plan_mut_rec_group(&mut ctx, &[], false, &sigs);
        assert_ne!(plan.member_addrs[0], plan.member_addrs[1]);
    }
}
