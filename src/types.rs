//! The type-descriptor tree this crate owns in place of the external type
//! system the distilled spec treats as an opaque collaborator.
//!
//! Grounded on `libxnd/xnd.h`'s tag list and on the teacher's two-phase
//! raw/resolved parsing convention in `til.rs` — here collapsed into a
//! single builder API since there is no on-disk raw encoding to parse.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::XndError;

pub const MAX_DIM: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Ascii,
    Utf8,
    Utf16,
    Utf32,
    Ucs2,
}

impl Encoding {
    pub fn unit_size(self) -> i64 {
        match self {
            Encoding::Ascii | Encoding::Utf8 => 1,
            Encoding::Utf16 | Encoding::Ucs2 => 2,
            Encoding::Utf32 => 4,
        }
    }
}

/// A composed slice, stored on `VarDim` once it has been subscripted.
/// Holds the raw, unadjusted slice key exactly as given to `subscribe`;
/// each row resolves it against its own current length in
/// [`var_indices`], since a ragged dimension's rows can differ in
/// length and so can clamp the same slice key differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedSlice {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

pub type Ty = Arc<Type>;

/// The exhaustive tag set. Every field named here mirrors a field named
/// in SPEC_FULL.md §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    FixedDim {
        shape: i64,
        step: i64,
        elem: Ty,
        optional: bool,
    },
    VarDim {
        elem: Ty,
        offsets: Arc<Vec<i32>>,
        slices: Vec<ComposedSlice>,
        optional: bool,
    },
    VarDimElem {
        index: i64,
        var: Ty,
    },
    Tuple {
        types: Vec<Ty>,
        optional: bool,
    },
    Record {
        fields: Vec<(String, Ty)>,
        optional: bool,
    },
    Union {
        types: Vec<Ty>,
    },
    Ref {
        elem: Ty,
    },
    Constr {
        name: String,
        elem: Ty,
    },
    Nominal {
        name: String,
        elem: Ty,
    },
    Bool {
        optional: bool,
    },
    Int8 {
        optional: bool,
    },
    Int16 {
        optional: bool,
    },
    Int32 {
        optional: bool,
    },
    Int64 {
        optional: bool,
    },
    Uint8 {
        optional: bool,
    },
    Uint16 {
        optional: bool,
    },
    Uint32 {
        optional: bool,
    },
    Uint64 {
        optional: bool,
    },
    Float16 {
        le: bool,
        optional: bool,
    },
    Float32 {
        le: bool,
        optional: bool,
    },
    Float64 {
        le: bool,
        optional: bool,
    },
    BFloat16 {
        le: bool,
        optional: bool,
    },
    Complex32 {
        le: bool,
        optional: bool,
    },
    Complex64 {
        le: bool,
        optional: bool,
    },
    Complex128 {
        le: bool,
        optional: bool,
    },
    FixedString {
        size: i64,
        encoding: Encoding,
        optional: bool,
    },
    FixedBytes {
        size: i64,
        align: i64,
        optional: bool,
    },
    String {
        optional: bool,
    },
    Bytes {
        target_align: i64,
        optional: bool,
    },
    Categorical {
        levels: usize,
        optional: bool,
    },
    Char,
    Module,
    Function,
}

/// Inline storage width, in bytes, of a `String`/`Bytes`/`Ref` leaf: a
/// handle (arena index) rather than a raw pointer. See `master.rs` for
/// the arena this handle indexes into.
pub const HANDLE_SIZE: i64 = 8;
pub const HANDLE_ALIGN: i64 = 8;

impl Type {
    pub fn is_optional(&self) -> bool {
        use Type::*;
        match self {
            FixedDim { optional, .. }
            | VarDim { optional, .. }
            | Tuple { optional, .. }
            | Record { optional, .. }
            | Bool { optional }
            | Int8 { optional }
            | Int16 { optional }
            | Int32 { optional }
            | Int64 { optional }
            | Uint8 { optional }
            | Uint16 { optional }
            | Uint32 { optional }
            | Uint64 { optional }
            | Float16 { optional, .. }
            | Float32 { optional, .. }
            | Float64 { optional, .. }
            | BFloat16 { optional, .. }
            | Complex32 { optional, .. }
            | Complex64 { optional, .. }
            | Complex128 { optional, .. }
            | FixedString { optional, .. }
            | FixedBytes { optional, .. }
            | String { optional }
            | Bytes { optional, .. }
            | Categorical { optional, .. } => *optional,
            _ => false,
        }
    }

    /// Whether this tag or any tag in its subtree can carry an optional
    /// bit. Used to decide whether a bitmap subtree needs to be built.
    pub fn subtree_is_optional(&self) -> bool {
        use Type::*;
        if self.is_optional() {
            return true;
        }
        match self {
            FixedDim { elem, .. } => elem.subtree_is_optional(),
            VarDim { elem, .. } => elem.subtree_is_optional(),
            VarDimElem { var, .. } => var.subtree_is_optional(),
            Tuple { types, .. } => types.iter().any(|t| t.subtree_is_optional()),
            Record { fields, .. } => fields.iter().any(|(_, t)| t.subtree_is_optional()),
            Ref { elem } => elem.subtree_is_optional(),
            Constr { elem, .. } => elem.subtree_is_optional(),
            Nominal { elem, .. } => elem.subtree_is_optional(),
            Union { .. } | Char | Module | Function => false,
            _ => false,
        }
    }

    pub fn ndim(&self) -> i64 {
        match self {
            Type::FixedDim { elem, .. } => 1 + elem.ndim(),
            Type::VarDim { elem, .. } => 1 + elem.ndim(),
            _ => 0,
        }
    }

    /// Size in bytes of one value of this type.
    pub fn datasize(&self) -> i64 {
        use Type::*;
        match self {
            FixedDim { shape, elem, .. } => shape.saturating_mul(elem.datasize()),
            VarDim { elem, .. } => elem.datasize(),
            VarDimElem { var, .. } => var.datasize(),
            Tuple { types, .. } => types.iter().map(|t| t.datasize()).sum(),
            Record { fields, .. } => fields.iter().map(|(_, t)| t.datasize()).sum(),
            Union { types } => 1 + types.iter().map(|t| t.datasize()).max().unwrap_or(0),
            Ref { .. } => HANDLE_SIZE,
            Constr { elem, .. } => elem.datasize(),
            Nominal { elem, .. } => elem.datasize(),
            Bool { .. } | Int8 { .. } | Uint8 { .. } => 1,
            Int16 { .. } | Uint16 { .. } | Float16 { .. } | BFloat16 { .. } => 2,
            Int32 { .. } | Uint32 { .. } | Float32 { .. } | Complex32 { .. } => 4,
            Int64 { .. } | Uint64 { .. } | Float64 { .. } | Complex64 { .. } => 8,
            Complex128 { .. } => 16,
            FixedString { size, encoding, .. } => size * encoding.unit_size(),
            FixedBytes { size, .. } => *size,
            String { .. } => HANDLE_SIZE,
            Bytes { .. } => HANDLE_SIZE,
            Categorical { .. } => 8,
            Char => 1,
            Module | Function => 0,
        }
    }

    pub fn align(&self) -> i64 {
        use Type::*;
        match self {
            FixedDim { elem, .. } => elem.align(),
            VarDim { elem, .. } => elem.align(),
            VarDimElem { var, .. } => var.align(),
            Tuple { types, .. } => types.iter().map(|t| t.align()).max().unwrap_or(1),
            Record { fields, .. } => fields.iter().map(|(_, t)| t.align()).max().unwrap_or(1),
            Union { types } => types.iter().map(|t| t.align()).max().unwrap_or(1),
            Ref { .. } => HANDLE_ALIGN,
            Constr { elem, .. } => elem.align(),
            Nominal { elem, .. } => elem.align(),
            Bool { .. } | Int8 { .. } | Uint8 { .. } | Char => 1,
            Int16 { .. } | Uint16 { .. } | Float16 { .. } | BFloat16 { .. } => 2,
            Int32 { .. } | Uint32 { .. } | Float32 { .. } | Complex32 { .. } => 4,
            Int64 { .. } | Uint64 { .. } | Float64 { .. } | Complex64 { .. } => 8,
            Complex128 { .. } => 8,
            FixedString { encoding, .. } => encoding.unit_size(),
            FixedBytes { align, .. } => *align,
            String { .. } | Bytes { .. } => HANDLE_ALIGN,
            Categorical { .. } => 8,
            Module | Function => 1,
        }
    }

    /// `step` is counted in elements of the immediate `elem` subtree (see
    /// `View::fixed_dim_next`), not bytes, so contiguity has to compare
    /// against the element count of that subtree, not its byte size.
    pub fn is_c_contiguous(&self) -> bool {
        let (shape, step, _) = self.as_ndarray();
        is_contiguous(&shape, &step, &expected_c_strides(&shape))
    }

    pub fn is_f_contiguous(&self) -> bool {
        let (shape, step, _) = self.as_ndarray();
        is_contiguous(&shape, &step, &expected_f_strides(&shape))
    }

    /// Decompose a chain of `FixedDim` into `(shape[], step[], elem)`.
    pub fn as_ndarray(&self) -> (Vec<i64>, Vec<i64>, Ty) {
        let mut shape = Vec::new();
        let mut step = Vec::new();
        let mut cur: &Type = self;
        loop {
            match cur {
                Type::FixedDim {
                    shape: s,
                    step: st,
                    elem,
                    ..
                } => {
                    shape.push(*s);
                    step.push(*st);
                    cur = elem;
                }
                _ => break,
            }
        }
        // recover an owned Ty for the element: walk again to get the Arc.
        let mut cur_ty: Option<Ty> = None;
        let mut walker: &Type = self;
        loop {
            match walker {
                Type::FixedDim { elem, .. } => {
                    cur_ty = Some(elem.clone());
                    walker = elem;
                }
                _ => break,
            }
        }
        (shape, step, cur_ty.unwrap_or_else(|| Arc::new(self.clone())))
    }

    pub fn fixed_dim(elem: Ty, shape: i64, step: i64) -> Ty {
        Arc::new(Type::FixedDim {
            shape,
            step,
            elem,
            optional: false,
        })
    }

    pub fn dtype(&self) -> Ty {
        let mut cur: &Type = self;
        let mut owned = Arc::new(self.clone());
        loop {
            match cur {
                Type::FixedDim { elem, .. } | Type::VarDim { elem, .. } => {
                    owned = elem.clone();
                    cur = elem;
                }
                _ => break,
            }
        }
        owned
    }
}

/// Row-major strides (element units) a shape would have if laid out
/// with the innermost axis varying fastest.
pub(crate) fn expected_c_strides(shape: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1].max(1);
    }
    strides
}

/// Column-major strides (element units) a shape would have if laid out
/// with the outermost axis varying fastest.
pub(crate) fn expected_f_strides(shape: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; shape.len()];
    for i in 1..shape.len() {
        strides[i] = strides[i - 1] * shape[i - 1].max(1);
    }
    strides
}

/// A `shape <= 1` axis is contiguous under any stride since it never
/// actually advances the index.
pub(crate) fn is_contiguous(shape: &[i64], step: &[i64], expected: &[i64]) -> bool {
    shape
        .iter()
        .zip(step.iter())
        .zip(expected.iter())
        .all(|((&s, &st), &e)| s <= 1 || st == e)
}

/// `xnd_slice_adjust_indices`. Returns `(start', stop', step', shape)`.
pub fn slice_adjust_indices(
    length: i64,
    start: i64,
    stop: i64,
    step: i64,
) -> Result<(i64, i64, i64, i64), XndError> {
    if step == 0 {
        return Err(XndError::invalid_argument("slice step must not be zero"));
    }
    // clamp step = -i64::MAX - 1 (i.e. i64::MIN) to -i64::MAX.
    let step = if step == i64::MIN { -i64::MAX } else { step };

    let mut start = start;
    let mut stop = stop;

    if start < 0 {
        start += length;
        if start < 0 {
            start = if step < 0 { -1 } else { 0 };
        }
    } else if start >= length {
        start = if step < 0 { length - 1 } else { length };
    }

    if stop < 0 {
        stop += length;
        if stop < 0 {
            stop = if step < 0 { -1 } else { 0 };
        }
    } else if stop >= length {
        stop = if step < 0 { length - 1 } else { length };
    }

    let shape = if step < 0 {
        if stop < start {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        }
    } else if start < stop {
        (stop - start - 1) / step + 1
    } else {
        0
    };

    Ok((start, stop, step, shape))
}

/// `var_indices(T, index) -> (start, step, shape)`. `T` must be a
/// `VarDim`. Reads `offsets[index]`/`offsets[index+1]` for the row's
/// raw span, then folds every composed slice in order, each resolved
/// against the length the *previous* slice (or the raw span) leaves
/// behind for this particular row — this is what makes slicing a
/// ragged dimension behave correctly per row rather than off of one
/// representative row's length.
pub fn var_indices(ty: &Type, index: i64) -> Result<(i64, i64, i64), XndError> {
    let (offsets, slices) = match ty {
        Type::VarDim { offsets, slices, .. } => (offsets, slices),
        _ => return Err(XndError::runtime("var_indices: not a VarDim")),
    };
    let i = index as usize;
    if i + 1 >= offsets.len() {
        return Err(XndError::index("var_indices: index out of range"));
    }
    let mut start = offsets[i] as i64;
    let mut shape = (offsets[i + 1] as i64 - start).max(0);
    let mut step = 1i64;

    for s in slices {
        let (s_start, _s_stop, s_step, s_shape) =
            slice_adjust_indices(shape, s.start, s.stop, s.step)?;
        start += s_start * step;
        step *= s_step;
        shape = s_shape;
    }

    Ok((start, step, shape))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_leaf() -> Ty {
        Arc::new(Type::Uint16 { optional: false })
    }

    #[test]
    fn fixed_dim_datasize() {
        let t = Type::FixedDim {
            shape: 3,
            step: 2,
            elem: u16_leaf(),
            optional: false,
        };
        assert_eq!(t.datasize(), 6);
        assert_eq!(t.ndim(), 1);
    }

    #[test]
    fn nested_fixed_dim_ndim() {
        let inner = Type::fixed_dim(u16_leaf(), 2, 2);
        let outer = Type::FixedDim {
            shape: 3,
            step: 4,
            elem: inner,
            optional: false,
        };
        assert_eq!(outer.ndim(), 2);
        assert_eq!(outer.datasize(), 3 * 2 * 2);
    }

    #[test]
    fn var_indices_basic() {
        let offsets = Arc::new(vec![0, 2, 5, 6]);
        let t = Type::VarDim {
            elem: u16_leaf(),
            offsets,
            slices: vec![],
            optional: false,
        };
        assert_eq!(var_indices(&t, 0).unwrap(), (0, 1, 2));
        assert_eq!(var_indices(&t, 1).unwrap(), (2, 1, 3));
        assert_eq!(var_indices(&t, 2).unwrap(), (5, 1, 1));
    }

    #[test]
    fn var_indices_folds_composed_slice_per_row_length() {
        // rows of length 4, 2, 5; a `[1:]` slice shortens each by one
        // from the front rather than by one fixed amount.
        let offsets = Arc::new(vec![0, 4, 6, 11]);
        let t = Type::VarDim {
            elem: u16_leaf(),
            offsets,
            slices: vec![ComposedSlice {
                start: 1,
                stop: i64::MAX,
                step: 1,
            }],
            optional: false,
        };
        assert_eq!(var_indices(&t, 0).unwrap(), (1, 1, 3));
        assert_eq!(var_indices(&t, 1).unwrap(), (5, 1, 1));
        assert_eq!(var_indices(&t, 2).unwrap(), (7, 1, 4));
    }

    #[test]
    fn var_indices_folds_two_composed_slices_in_order() {
        let offsets = Arc::new(vec![0, 10]);
        let t = Type::VarDim {
            elem: u16_leaf(),
            offsets,
            slices: vec![
                ComposedSlice { start: 2, stop: 8, step: 1 },
                ComposedSlice { start: 1, stop: i64::MAX, step: 1 },
            ],
            optional: false,
        };
        // [2:8] of a length-10 row gives [2..8) (shape 6, start 2);
        // [1:] of that gives [3..8) (shape 5, start 3).
        assert_eq!(var_indices(&t, 0).unwrap(), (3, 1, 5));
    }
}
