use serde::{Deserialize, Serialize};

use crate::expr::{Expr, Function};
use crate::id::Id;
use crate::intrinsic::Intrinsic;
use crate::types::Type;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StubSignature {
    pub params_ty: Vec<Type>,
    pub return_ty: Type,
    /// The foreign symbol this stub dispatches to; opaque to this core.
    pub foreign_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TopItem {
    CtopLet { id: Id, ty: Type, value: Expr },
    CtopFn { id: Id, func: Function, intrinsic: Option<Intrinsic> },
    CtopExpr(Expr),
    CtopStub { id: Id, sig: StubSignature },
}

/// A fully type-checked MCore program — the contract consumed from the
/// front end (§6.1). This is the root serialization unit for the
/// JSON-file boundary described in SPEC_FULL.md §B.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub items: Vec<TopItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::Constant;

    #[test]
    fn round_trips_through_json() {
        let program = Program {
            items: vec![TopItem::CtopExpr(Expr::Const(Constant::Unit))],
        };

        let json = serde_json::to_string(&program).expect("serialize");
        let back: Program = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(program, back);
    }
}
