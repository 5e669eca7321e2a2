//! MCore: the typed, high-level functional core IR accepted as input by
//! the Clam middle-end.
//!
//! This crate only defines data. It has no passes, no interning tables and
//! no mutable state — those live in `clam_lower`, which walks this tree to
//! produce `clam_ir::Lambda` output. Every node here already carries an
//! explicit source `Type`; this crate does not check or infer anything.

pub mod constant;
pub mod expr;
pub mod id;
pub mod intrinsic;
pub mod program;
pub mod types;

pub use constant::Constant;
pub use expr::{ApplyKind, ConstrCase, Expr, Function, HandleErrorVariant, Param, ReturnValue};
pub use id::{Id, Provenance};
pub use intrinsic::{CompareOp, Intrinsic};
pub use program::{Program, StubSignature, TopItem};
pub use types::Type;
