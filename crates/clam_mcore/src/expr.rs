use serde::{Deserialize, Serialize};

use crate::constant::Constant;
use crate::id::Id;
use crate::types::Type;

/// A function literal. Both `letfn`/`letrec` bindings and anonymous
/// lambdas share this shape; `is_raw` marks a raw lambda whose address is
/// taken without wrapping in a closure (§9, open question).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub params: Vec<Param>,
    pub return_ty: Type,
    pub is_async: bool,
    pub is_raw: bool,
    pub body: Box<Expr>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub id: Id,
    pub ty: Type,
}

/// How an `apply` resolves its callee, per §3.1/§4.1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ApplyKind {
    /// An ordinary call; `func_ty` is the statically-known signature of the
    /// callee captured at the call site (used when the callee later turns
    /// out to be well-known).
    Normal { func_ty: Type },
    /// An async call.
    Async,
    /// A join-point application. The callee is *not* a free variable
    /// (§4.1) — joins are second-class and never escape.
    Join,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstrCase {
    pub tag: u32,
    pub ctor_name: String,
    /// Bound only within this case's `body` (§4.1).
    pub binder: Option<Id>,
    pub body: Expr,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum HandleErrorVariant {
    /// Wrap the handled expression's result into `Ok`/`Err` uniformly.
    ToResult,
    /// Apply a specific join by name with the handled value.
    JoinApply(String),
    /// Error-propagating `return`: rewritten by `ReturnXfm` into a call to
    /// the enclosing function's `raise` join (§4.6).
    ReturnErr,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReturnValue {
    Plain(Box<Expr>),
    Error { value: Box<Expr>, return_ty: Type },
}

/// An MCore expression. Field names mirror §3.1 closely so that a reader
/// can check this module against the spec node-by-node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(Constant),
    /// A variable reference. Carries the type it was checked at, since this
    /// is the only site free-variable analysis has to recover a type for a
    /// captured identifier (§4.1, §4.4).
    Var { id: Id, ty: Type },
    /// A primitive application (`Ppanic`, `Pnull`, comparison ops, …). The
    /// operator name is left as a string so `IntrinsicRewriter` can match
    /// on it without this crate knowing the full primitive table.
    Prim { op: String, args: Vec<Expr>, ty: Type },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Let {
        id: Id,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    /// A single, possibly self-recursive, local function binding.
    LetFn {
        id: Id,
        func: Function,
        body: Box<Expr>,
    },
    /// A group of simultaneously-bound, mutually recursive local
    /// functions. `SccGrouper` later splits this into minimal rec/non-rec
    /// groups.
    LetRec {
        bindings: Vec<(Id, Function)>,
        body: Box<Expr>,
    },
    Lambda(Function),
    Apply {
        kind: ApplyKind,
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Tuple(Vec<Expr>),
    Record {
        type_name: String,
        fields: Vec<(String, Expr)>,
    },
    RecordUpdate {
        base: Box<Expr>,
        type_name: String,
        updates: Vec<(String, Expr)>,
    },
    Field {
        base: Box<Expr>,
        field: String,
        field_ty: Type,
    },
    FieldMutate {
        base: Box<Expr>,
        field: String,
        value: Box<Expr>,
    },
    Constructor {
        enum_name: String,
        ctor_name: String,
        tag: u32,
        args: Vec<Expr>,
    },
    Array(Vec<Expr>),
    Assign {
        id: Id,
        value: Box<Expr>,
        /// The mutable local's type, needed when it is also a free variable
        /// captured by an enclosing closure (§4.1).
        ty: Type,
    },
    Sequence(Vec<Expr>),
    If {
        cond: Box<Expr>,
        ifso: Box<Expr>,
        ifnot: Box<Expr>,
        ty: Type,
    },
    SwitchConstr {
        scrutinee: Box<Expr>,
        cases: Vec<ConstrCase>,
        default: Option<Box<Expr>>,
        ty: Type,
    },
    SwitchConstant {
        scrutinee: Box<Expr>,
        cases: Vec<(Constant, Expr)>,
        default: Box<Expr>,
        ty: Type,
    },
    Loop {
        params: Vec<Param>,
        body: Box<Expr>,
        args: Vec<Expr>,
        label: String,
        ty: Type,
    },
    Break {
        label: String,
        arg: Option<Box<Expr>>,
    },
    Continue {
        label: String,
        args: Vec<Expr>,
    },
    Return(ReturnValue),
    HandleError {
        variant: HandleErrorVariant,
        expr: Box<Expr>,
    },
}

impl Expr {
    pub fn unit() -> Expr {
        Expr::Const(Constant::Unit)
    }
}
