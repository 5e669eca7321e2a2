use serde::{Deserialize, Serialize};

use crate::addr::Tid;

/// A lowered Clam type (§4.4). Every Clam node that carries a `type_`/`tid`
/// field uses one of these.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LowType {
    I32Bool,
    I32Unit,
    I32,
    I64,
    F32,
    F64,
    Ref(Tid),
    RefLazyInit(Tid),
    RefNullable(Tid),
    RefBytes,
    RefString,
    RefFunc,
    RefExtern,
    RefAny,
}

impl LowType {
    pub fn is_non_null_ref(&self) -> bool {
        matches!(
            self,
            LowType::Ref(_) | LowType::RefBytes | LowType::RefString | LowType::RefFunc
        )
    }
}

/// A function signature, interned at most once per shape (§4.4).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FnSig {
    pub params: Vec<LowType>,
    pub ret: Box<LowType>,
}

impl FnSig {
    pub fn new(params: Vec<LowType>, ret: LowType) -> Self {
        FnSig {
            params,
            ret: Box::new(ret),
        }
    }
}

/// An entry in `type_defs`. Every `Tid` resolves to exactly one of these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeDef {
    /// The nominal interface type used at call sites of a first-class
    /// function of this signature; carries only a fn-sig witness.
    ClosureAbstract { fn_sig: FnSig },
    /// A concrete capture record for an escaping function with this
    /// signature and these captured field types, in capture order.
    Closure { fn_sig: Tid, captures: Vec<LowType> },
    /// The shared environment for a mutually-recursive well-known bundle;
    /// fields are filled in after all member closures are allocated.
    LateInitStruct { fields: Vec<LowType> },
    ConcreteObject { abstract_obj: Tid, self_ty: LowType },
    /// An object's method table — one signature per dispatch slot.
    Object { methods: Vec<FnSig> },
    Struct { fields: Vec<LowType> },
    Tuple { fields: Vec<LowType> },
    /// One entry per constructor case, in tag order.
    Enum { cases: Vec<Vec<LowType>> },
}
