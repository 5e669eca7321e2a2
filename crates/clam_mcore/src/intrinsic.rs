use serde::{Deserialize, Serialize};

/// The intrinsic table of §4.7. A `Ctop_fn` carrying one of these is
/// inlined by `IntrinsicRewriter` instead of compiled as an ordinary call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intrinsic {
    FixedArrayIter,
    IterIter,
    IterMap,
    IterFilter,
    IterTake,
    IterReduce,
    IterFlatMap,
    IterRepeat,
    IterConcat,
    IterFromArray,
    ArrayLength,
    ArrayViewLength,
    BytesViewLength,
    ArrayUnsafeGet,
    ArrayUnsafeSet,
    ArrayViewUnsafeGet,
    ArrayViewUnsafeSet,
    BytesViewUnsafeGet,
    BytesViewUnsafeSet,
    ArrayGet,
    ArraySet,
    ArrayViewUnsafeAsView,
    BytesViewUnsafeAsView,
    CharToString,
    /// Polymorphic comparison, specialized on the first type argument.
    OpCompare(CompareOp),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Lt,
    Le,
    Ge,
    Gt,
    NotEqual,
}
