use serde::{Deserialize, Serialize};

use crate::addr::{Addr, Tid};
use crate::low_type::{FnSig, LowType};
use crate::var::{Loc, Var};

/// A literal, at the Clam level. Kept separate from `clam_mcore::Constant`
/// so the two IRs stay decoupled — lowering may narrow or widen the
/// representation (e.g. `Char_to_string` turns a `Char` into a `Str`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Const {
    Int(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Bytes(Vec<u8>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    TailJoin,
    NontailJoin,
}

/// Which calling convention an `Lapply` targets (§3.2).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ApplyTarget {
    /// Indirect call through a first-class closure value.
    Dynamic(Var),
    /// Direct call to a well-known top-level address.
    StaticFn(Addr),
    /// A method dispatch through an object's method table.
    Object {
        obj: Var,
        method_index: u32,
        method_ty: FnSig,
    },
}

/// How `Lclosure` reaches its code pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosureAddr {
    Normal(Addr),
    /// Shares a late-init struct with its mutually-recursive siblings
    /// rather than owning a fresh environment (§4.8 rule 4).
    WellKnownMutRec,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AllocKind {
    Tuple,
    Struct,
    Enum { tag: u32 },
    Object { methods: Vec<Addr> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Tuple,
    Struct,
    Enum,
    Object { number_of_methods: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetFieldKind {
    Struct,
    Enum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessKind {
    Safe,
    Unsafe,
    RevUnsafe,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GetItemExtra {
    NeedNonNullCast,
    NeedSignedInfo { signed: bool },
    NoExtra,
}

/// The Clam expression sum type (§3.2). Every control construct that
/// yields a value carries its lowered `type_` explicitly (§3.3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Lambda {
    Lconst(Const),
    Lvar { var: Var },
    Lassign { var: Var, e: Box<Lambda> },
    Llet { name: Var, e: Box<Lambda>, body: Box<Lambda> },
    /// All of `fns` are closures bound simultaneously; every member may
    /// refer to every other member and to itself through a shared capture
    /// structure (§3.3).
    Lletrec { names: Vec<Var>, fns: Vec<Lambda>, body: Box<Lambda> },
    Lsequence { exprs: Vec<Lambda>, last_expr: Box<Lambda> },
    Lif { pred: Box<Lambda>, ifso: Box<Lambda>, ifnot: Box<Lambda>, type_: LowType },
    Lloop {
        params: Vec<Var>,
        body: Box<Lambda>,
        args: Vec<Lambda>,
        label: String,
        type_: LowType,
    },
    Lbreak { arg: Option<Box<Lambda>>, label: String },
    Lcontinue { args: Vec<Lambda>, label: String },
    /// A local, second-class continuation. `name` is the join's binder;
    /// `Ljoinapply` targets it by name (§3.3: "targets of `Ljoinapply`
    /// only; cannot be stored").
    Ljoinlet {
        name: String,
        params: Vec<Var>,
        e: Box<Lambda>,
        body: Box<Lambda>,
        kind: JoinKind,
        type_: LowType,
    },
    Ljoinapply { name: String, args: Vec<Lambda> },
    Lswitch {
        obj: Var,
        cases: Vec<(u32, Lambda)>,
        default: Option<Box<Lambda>>,
        type_: LowType,
    },
    Lswitchint {
        obj: Var,
        cases: Vec<(i32, Lambda)>,
        default: Option<Box<Lambda>>,
        type_: LowType,
    },
    Lswitchstring {
        obj: Var,
        cases: Vec<(String, Lambda)>,
        default: Option<Box<Lambda>>,
        type_: LowType,
    },
    Lapply {
        target: ApplyTarget,
        /// The intrinsic tag this apply was specialized from, if any —
        /// kept only for debug printing (§6.2: "renders with or without an
        /// intrinsic tag").
        prim: Option<String>,
        args: Vec<Lambda>,
    },
    LstubCall {
        fn_name: String,
        args: Vec<Lambda>,
        params_ty: Vec<LowType>,
        return_ty: LowType,
    },
    Lallocate { kind: AllocKind, tid: Tid, fields: Vec<Lambda> },
    /// `captures` order matches the corresponding capture struct's field
    /// order bit-for-bit (§3.3).
    Lclosure { captures: Vec<Var>, address: ClosureAddr, tid: Tid },
    /// Take the code pointer without wrapping into a closure (raw
    /// lambdas, §3.2).
    LgetRawFunc(Addr),
    Lgetfield { obj: Box<Lambda>, tid: Tid, index: u32, kind: FieldKind },
    Lsetfield { obj: Box<Lambda>, tid: Tid, index: u32, value: Box<Lambda>, kind: SetFieldKind },
    LclosureField { env: Box<Lambda>, index: u32 },
    Lmakearray { tid: Tid, items: Vec<Lambda> },
    Larraygetitem {
        arr: Box<Lambda>,
        index: Box<Lambda>,
        tid: Tid,
        access: AccessKind,
        extra: GetItemExtra,
    },
    Larraysetitem {
        arr: Box<Lambda>,
        index: Box<Lambda>,
        value: Box<Lambda>,
        tid: Tid,
        access: AccessKind,
    },
    /// Change the static ref type; same reference (§3.2).
    Lcast { expr: Box<Lambda>, target_type: LowType },
    Lcatch { body: Box<Lambda>, on_exception: Box<Lambda>, type_: LowType },
    /// Reserved for early-out from stub wrappers and error propagation.
    Lreturn(Box<Lambda>),
    /// Debug location wrapper, elided when debug is off.
    Levent { expr: Box<Lambda>, loc: Loc },
}

impl Lambda {
    pub fn unit() -> Lambda {
        Lambda::Lconst(Const::Int(0))
    }
}
