//! Lowers a checked `clam_mcore::Program` (MCore) into a `clam_ir::Prog`
//! (Clam). The passes run in the fixed order `transl_prog` describes
//! (§4.9/§5): `EscapeSet` pre-pass, then a top-down walk that threads
//! `FreeVars`/`SccGrouper`/`TypeLowering`/`AddrTable`/`ReturnXfm`/
//! `IntrinsicRewriter`/`ClosureLowering` through one mutable `LowerCtx`.

pub mod addr_table;
pub mod closure;
pub mod config;
pub mod ctx;
pub mod diagnostics;
pub mod error;
pub mod escape;
pub mod free_vars;
pub mod intrinsic_rewriter;
pub mod lower;
pub mod object_methods;
pub mod return_xfm;
pub mod scc;
pub mod type_lowering;

pub use addr_table::{AddrEntry, AddrTable};
pub use config::{parse_internal_params, BasicConfig, InternalParams};
pub use ctx::LowerCtx;
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::ConfigError;
pub use escape::EscapeSet;
pub use free_vars::{free_vars_of_expr, free_vars_of_function, FreeVars};
pub use lower::{transl_prog, Lowerer};
pub use object_methods::{MethodInfo, ObjectMethods};
pub use scc::{group as scc_group, SccGroup, SccKind};
pub use type_lowering::TypeLowering;
