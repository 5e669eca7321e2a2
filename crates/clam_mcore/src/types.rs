use serde::{Deserialize, Serialize};

/// Source-level (pre-lowering) type. Every MCore expression, parameter and
/// `handle_error` site carries one of these explicitly (§6.1): this core
/// never infers types, it only consumes them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Unit,
    Bool,
    Char,
    Int,
    Int64,
    Double,
    String,
    Bytes,
    Tuple(Vec<Type>),
    Array(Box<Type>),
    /// `Result<ok, err>`, recognized specially by `ReturnXfm`.
    Result { ok: Box<Type>, err: Box<Type> },
    /// A user struct/record type.
    Record { name: String },
    /// A user enum type; `Constructor` expressions name one of its cases.
    Enum { name: String },
    /// A function type. `is_async` distinguishes `Apply { kind: Async }`
    /// callees from ordinary ones.
    Func {
        params: Vec<Type>,
        ret: Box<Type>,
        is_async: bool,
    },
    /// Array view / bytes view / iterator-shaped builtins that
    /// `IntrinsicRewriter` recognizes by name.
    Builtin { name: String, args: Vec<Type> },
}

impl Type {
    pub fn func(params: Vec<Type>, ret: Type) -> Type {
        Type::Func {
            params,
            ret: Box::new(ret),
            is_async: false,
        }
    }

    /// `op_as_view`/intrinsic matching looks at the outer constructor only.
    pub fn is_result(&self) -> bool {
        matches!(self, Type::Result { .. })
    }

    pub fn builtin_name(&self) -> Option<&str> {
        match self {
            Type::Builtin { name, .. } => Some(name.as_str()),
            Type::Array(_) => Some("FixedArray"),
            _ => None,
        }
    }
}
