//! Source-type-to-Clam-type lowering with structural sharing (§4.4). Function
//! signatures, array element shapes and result-type pairs are interned so
//! equal shapes collapse to one `tid`; nominal record/enum types are
//! interned by name, since their concrete field layout is owned by the
//! (out-of-scope, §6.1) global type environment this core only consumes.

use std::collections::HashMap;

use clam_ir::{FnSig, LowType, Tid, TypeDef, TypeDefs};

#[derive(Debug, Default)]
pub struct TypeLowering {
    type_defs: TypeDefs,
    next_tid: u32,
    fn_sig_cache: HashMap<FnSig, Tid>,
    array_cache: HashMap<LowType, Tid>,
    view_cache: HashMap<LowType, Tid>,
    sink_cache: HashMap<LowType, Tid>,
    ref_cell_cache: HashMap<LowType, Tid>,
    result_cache: HashMap<(LowType, LowType), Tid>,
    named_cache: HashMap<String, Tid>,
    /// Field order per nominal record/enum-case name, minted lazily on first
    /// use. The real layout lives in the (out-of-scope, §6.1) global type
    /// environment; this just keeps one compilation's field reads and
    /// writes of the same named field pointed at the same index.
    field_order: HashMap<String, Vec<String>>,
}

impl TypeLowering {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_type_defs(self) -> TypeDefs {
        self.type_defs
    }

    pub fn type_defs(&self) -> &TypeDefs {
        &self.type_defs
    }

    fn fresh_tid(&mut self) -> Tid {
        let tid = Tid(self.next_tid);
        self.next_tid += 1;
        tid
    }

    pub fn lower_type(&mut self, ty: &clam_mcore::Type) -> LowType {
        use clam_mcore::Type as Src;
        match ty {
            Src::Unit => LowType::I32Unit,
            Src::Bool => LowType::I32Bool,
            Src::Char => LowType::I32,
            Src::Int => LowType::I32,
            Src::Int64 => LowType::I64,
            Src::Double => LowType::F64,
            Src::String => LowType::RefString,
            Src::Bytes => LowType::RefBytes,
            Src::Tuple(fields) => {
                let lowered: Vec<LowType> = fields.iter().map(|f| self.lower_type(f)).collect();
                LowType::Ref(self.intern_tuple(lowered))
            }
            Src::Array(elem) => {
                let elem = self.lower_type(elem);
                LowType::Ref(self.intern_array(elem))
            }
            Src::Result { ok, err } => {
                let ok = self.lower_type(ok);
                let err = self.lower_type(err);
                LowType::Ref(self.intern_result(ok, err))
            }
            Src::Record { name } => LowType::Ref(self.named_tid(name, || TypeDef::Struct {
                fields: Vec::new(),
            })),
            Src::Enum { name } => LowType::Ref(self.named_tid(name, || TypeDef::Enum {
                cases: Vec::new(),
            })),
            Src::Func { params, ret, .. } => {
                let params: Vec<LowType> = params.iter().map(|p| self.lower_type(p)).collect();
                let ret = self.lower_type(ret);
                let sig = FnSig::new(params, ret);
                LowType::Ref(self.intern_fn_sig(sig))
            }
            Src::Builtin { name, args } => match (name.as_str(), args.as_slice()) {
                ("ArrayView" | "BytesView", [elem]) => {
                    let elem = self.lower_type(elem);
                    LowType::Ref(self.intern_view(elem))
                }
                ("Iter", [elem]) => {
                    let elem = self.lower_type(elem);
                    LowType::Ref(self.intern_sink_sig(elem))
                }
                _ => LowType::RefAny,
            },
        }
    }

    /// `ArrayView`/`BytesView` share one layout: `{ buf, start, len }`,
    /// shared structurally by element type like `intern_array`.
    pub fn intern_view(&mut self, elem: LowType) -> Tid {
        if let Some(tid) = self.view_cache.get(&elem) {
            return *tid;
        }
        let tid = self.fresh_tid();
        self.type_defs.insert(
            tid,
            TypeDef::Struct {
                fields: vec![LowType::RefAny, LowType::I32, LowType::I32],
            },
        );
        self.view_cache.insert(elem, tid);
        tid
    }

    /// Abstract closure type of an iterator's sink callback, `(elem) -> Int`
    /// (the `GO`/`END` sentinel convention, §4.7). Shared by element type.
    pub fn intern_sink_sig(&mut self, elem: LowType) -> Tid {
        if let Some(tid) = self.sink_cache.get(&elem) {
            return *tid;
        }
        let sig = FnSig::new(vec![elem.clone()], LowType::I32);
        let tid = self.intern_fn_sig(sig);
        self.sink_cache.insert(elem, tid);
        tid
    }

    /// Abstract closure interface type for a function signature (§4.4):
    /// materialized at most once per distinct shape.
    pub fn intern_fn_sig(&mut self, sig: FnSig) -> Tid {
        if let Some(tid) = self.fn_sig_cache.get(&sig) {
            return *tid;
        }
        let tid = self.fresh_tid();
        self.type_defs.insert(
            tid,
            TypeDef::ClosureAbstract {
                fn_sig: sig.clone(),
            },
        );
        self.fn_sig_cache.insert(sig, tid);
        tid
    }

    /// A concrete capture record. Minted fresh per closure site: two
    /// escaping closures sharing a signature may still capture different
    /// field shapes.
    pub fn intern_closure(&mut self, fn_sig_tid: Tid, captures: Vec<LowType>) -> Tid {
        let tid = self.fresh_tid();
        self.type_defs.insert(
            tid,
            TypeDef::Closure {
                fn_sig: fn_sig_tid,
                captures,
            },
        );
        tid
    }

    pub fn intern_late_init_struct(&mut self, fields: Vec<LowType>) -> Tid {
        let tid = self.fresh_tid();
        self.type_defs.insert(tid, TypeDef::LateInitStruct { fields });
        tid
    }

    pub fn intern_struct(&mut self, fields: Vec<LowType>) -> Tid {
        let tid = self.fresh_tid();
        self.type_defs.insert(tid, TypeDef::Struct { fields });
        tid
    }

    pub fn intern_concrete_object(&mut self, abstract_obj: Tid, self_ty: LowType) -> Tid {
        let tid = self.fresh_tid();
        self.type_defs.insert(
            tid,
            TypeDef::ConcreteObject {
                abstract_obj,
                self_ty,
            },
        );
        tid
    }

    pub fn intern_object(&mut self, methods: Vec<FnSig>) -> Tid {
        let tid = self.fresh_tid();
        self.type_defs.insert(tid, TypeDef::Object { methods });
        tid
    }

    /// A single-field mutable cell, used by `IntrinsicRewriter` to give an
    /// iterator combinator's sink closure somewhere to keep running state
    /// (`Iter_take`'s counter, `Iter_reduce`'s accumulator) across calls.
    pub fn intern_ref_cell(&mut self, elem: LowType) -> Tid {
        if let Some(tid) = self.ref_cell_cache.get(&elem) {
            return *tid;
        }
        let tid = self.fresh_tid();
        self.type_defs.insert(
            tid,
            TypeDef::Struct {
                fields: vec![elem.clone()],
            },
        );
        self.ref_cell_cache.insert(elem, tid);
        tid
    }

    fn intern_tuple(&mut self, fields: Vec<LowType>) -> Tid {
        let tid = self.fresh_tid();
        self.type_defs.insert(tid, TypeDef::Tuple { fields });
        tid
    }

    fn intern_array(&mut self, elem: LowType) -> Tid {
        if let Some(tid) = self.array_cache.get(&elem) {
            return *tid;
        }
        let tid = self.fresh_tid();
        // `{ buf: Ref_any, len: I32 }` stand-in for `FixedArray`'s backend
        // layout; the element type drives structural sharing even though
        // `buf`'s element-level typing is refined by the backend emitter.
        self.type_defs.insert(
            tid,
            TypeDef::Struct {
                fields: vec![LowType::RefAny, LowType::I32],
            },
        );
        self.array_cache.insert(elem, tid);
        tid
    }

    fn intern_result(&mut self, ok: LowType, err: LowType) -> Tid {
        let key = (ok.clone(), err.clone());
        if let Some(tid) = self.result_cache.get(&key) {
            return *tid;
        }
        let tid = self.fresh_tid();
        self.type_defs.insert(
            tid,
            TypeDef::Enum {
                cases: vec![vec![ok], vec![err]],
            },
        );
        self.result_cache.insert(key, tid);
        tid
    }

    /// Stable, self-consistent field index for a named field of a record
    /// type or a single enum case, minted on first use.
    pub fn record_field_index(&mut self, owner: &str, field: &str) -> u32 {
        let order = self.field_order.entry(owner.to_string()).or_default();
        if let Some(pos) = order.iter().position(|f| f == field) {
            return pos as u32;
        }
        order.push(field.to_string());
        (order.len() - 1) as u32
    }

    fn named_tid(&mut self, name: &str, make_def: impl FnOnce() -> TypeDef) -> Tid {
        if let Some(tid) = self.named_cache.get(name) {
            return *tid;
        }
        let tid = self.fresh_tid();
        self.type_defs.insert(tid, make_def());
        self.named_cache.insert(name.to_string(), tid);
        tid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clam_mcore::Type as Src;

    #[test]
    fn scalar_types_map_directly() {
        let mut tl = TypeLowering::new();
        assert_eq!(tl.lower_type(&Src::Int), LowType::I32);
        assert_eq!(tl.lower_type(&Src::Bool), LowType::I32Bool);
        assert_eq!(tl.lower_type(&Src::Double), LowType::F64);
    }

    #[test]
    fn function_signatures_are_shared_by_shape() {
        let mut tl = TypeLowering::new();
        let a = tl.lower_type(&Src::func(vec![Src::Int], Src::Int));
        let b = tl.lower_type(&Src::func(vec![Src::Int], Src::Int));
        assert_eq!(a, b);
        assert_eq!(tl.type_defs().len(), 1);
    }

    #[test]
    fn distinct_signatures_get_distinct_tids() {
        let mut tl = TypeLowering::new();
        let a = tl.lower_type(&Src::func(vec![Src::Int], Src::Int));
        let b = tl.lower_type(&Src::func(vec![Src::Int], Src::Bool));
        assert_ne!(a, b);
    }

    #[test]
    fn named_record_type_is_stable_across_uses() {
        let mut tl = TypeLowering::new();
        let a = tl.lower_type(&Src::Record {
            name: "Point".to_string(),
        });
        let b = tl.lower_type(&Src::Record {
            name: "Point".to_string(),
        });
        assert_eq!(a, b);
        assert_eq!(tl.type_defs().len(), 1);
    }

    #[test]
    fn result_type_pairs_share_structurally() {
        let mut tl = TypeLowering::new();
        let a = tl.lower_type(&Src::Result {
            ok: Box::new(Src::Int),
            err: Box::new(Src::String),
        });
        let b = tl.lower_type(&Src::Result {
            ok: Box::new(Src::Int),
            err: Box::new(Src::String),
        });
        assert_eq!(a, b);
    }
}
