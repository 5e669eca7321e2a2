use serde::{Deserialize, Serialize};

/// A literal constant. The subset that is also constant-foldable into a
/// Clam `globals` entry (§4.9) is `Bool`, `Char`, `Int`, `Int64`, `Double`,
/// and — when the string backend is external — `String`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Unit,
    Bool(bool),
    Char(char),
    Int(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Constant {
    /// Whether this constant can be emitted directly into `prog.globals`
    /// rather than as an `Llet` prefix on `init` (§4.9).
    pub fn is_simple_global(&self, use_js_builtin_string: bool) -> bool {
        match self {
            Constant::Bool(_) | Constant::Char(_) | Constant::Int(_) | Constant::Int64(_) | Constant::Double(_) => {
                true
            }
            Constant::String(_) => !use_js_builtin_string,
            Constant::Unit | Constant::Bytes(_) => false,
        }
    }
}
