use serde::{Deserialize, Serialize};

use crate::addr::{Addr, Tid};
use crate::lambda::{Const, Lambda};
use crate::low_type::LowType;
use crate::type_defs::TypeDefs;
use crate::var::Var;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FnKind {
    /// Exported under `export_name`, callable from outside the program.
    TopPub(String),
    TopPrivate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopFuncItem {
    pub binder: Addr,
    pub fn_kind: FnKind,
    pub params: Vec<Var>,
    pub body: Lambda,
    pub return_type: LowType,
    /// Set when this function is a closure implementation body (receives
    /// an environment as its first conceptual parameter) or an object
    /// method wrapper.
    pub tid: Option<Tid>,
}

/// The final output of the middle-end (§3.2): a list of top-level function
/// items, an optional `main`, a mandatory `init` expression, the globals
/// list, and the accumulated type-def table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Prog {
    pub fns: Vec<TopFuncItem>,
    pub main: Option<Lambda>,
    pub init: Lambda,
    pub globals: Vec<(Var, Option<Const>)>,
    pub type_defs: TypeDefs,
}

impl Default for Lambda {
    fn default() -> Self {
        Lambda::unit()
    }
}
