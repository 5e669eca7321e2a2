//! Clam: the closure-converted, explicitly-typed low-level IR emitted by
//! the middle-end.
//!
//! Like `clam_mcore`, this crate only defines data and a debug printer —
//! the actual lowering passes (free-variable analysis, closure conversion,
//! type lowering, ...) live in `clam_lower`.

pub mod addr;
pub mod lambda;
pub mod low_type;
pub mod prog;
pub mod sexp;
pub mod type_defs;
pub mod var;

pub use addr::{Addr, Tid};
pub use lambda::{
    AccessKind, AllocKind, ApplyTarget, ClosureAddr, Const, FieldKind, GetItemExtra, JoinKind,
    Lambda, SetFieldKind,
};
pub use low_type::{FnSig, LowType, TypeDef};
pub use prog::{FnKind, Prog, TopFuncItem};
pub use sexp::{print_lambda, PrintConfig};
pub use type_defs::TypeDefs;
pub use var::{Loc, Var};
