//! Subscription: integer index, field name, and slice keys over a view.
//!
//! Grounded on `libxnd/xnd.c` (`xnd_subscript`/`xnd_index`/`xnd_slice`/
//! `get_index`/`get_index_record`/`apply_stored_index`) and
//! `libxnd/contrib.h`'s `xnd_slice_adjust_indices` for slice
//! normalization (§glossary).

use anyhow::ensure;
use log::{trace, warn};

use crate::bitmap::Bitmap;
use crate::error::XndError;
pub use crate::types::slice_adjust_indices;
use crate::types::{var_indices, ComposedSlice, Ty, Type, MAX_DIM};
use crate::view::View;

fn check_key_count(keys: &[Key]) -> anyhow::Result<()> {
    ensure!(keys.len() <= MAX_DIM, "too many indices: {}", keys.len());
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Index(i64),
    Field(String),
    Slice { start: i64, stop: i64, step: i64 },
}

/// `subscribe(V, keys)`. Dispatches to subtree mode (indices/field
/// names only) or general mode (at least one slice).
pub fn subscribe(view: &View, keys: &[Key]) -> Result<View, XndError> {
    check_key_count(keys).map_err(|e| XndError::index(e.to_string()))?;
    trace!("subscribe: {} key(s)", keys.len());
    if keys.iter().any(|k| matches!(k, Key::Slice { .. })) {
        let result = general(view, keys)?;
        validate_indices(&result.ty)?;
        Ok(result)
    } else {
        subtree(view, keys)
    }
}

fn adjust_index(i: i64, shape: i64) -> Result<i64, XndError> {
    let idx = if i < 0 { i + shape } else { i };
    if idx < 0 || idx >= shape {
        return Err(XndError::index("index out of range"));
    }
    Ok(idx)
}

/// Subtree mode: indices and field names only, transparently unwrapping
/// `Ref`/`Constr`/`Nominal` and implicitly applying stored `VarDimElem`
/// indices along the path.
fn subtree(view: &View, keys: &[Key]) -> Result<View, XndError> {
    trace!("subtree: {} key(s)", keys.len());
    let mut v = view.clone();
    let mut ki = 0usize;

    loop {
        match v.ty.clone().as_ref() {
            Type::Ref { .. } => {
                v = v.ref_next()?;
                continue;
            }
            Type::Constr { .. } => {
                v = v.constr_next()?;
                continue;
            }
            Type::Nominal { .. } => {
                v = v.nominal_next()?;
                continue;
            }
            Type::VarDimElem { index, var } => {
                let retyped = v.with(var.clone(), v.bitmap.clone(), v.index, v.ptr);
                let (_, _, shape) = var_indices(var, v.index)?;
                let idx = adjust_index(*index, shape)?;
                v = retyped.var_dim_next(idx)?;
                continue;
            }
            _ => {}
        }

        if ki >= keys.len() {
            break;
        }

        let ty = v.ty.clone();
        v = match (&keys[ki], ty.as_ref()) {
            (Key::Index(i), Type::FixedDim { shape, .. }) => {
                let idx = adjust_index(*i, *shape)?;
                v.fixed_dim_next(idx)?
            }
            (Key::Index(i), Type::VarDim { .. }) => {
                let (_, _, shape) = var_indices(&v.ty, v.index)?;
                let idx = adjust_index(*i, shape)?;
                v.var_dim_next(idx)?
            }
            (Key::Index(i), Type::Tuple { types, .. }) => {
                let idx = adjust_index(*i, types.len() as i64)?;
                v.tuple_next(idx)?
            }
            (Key::Index(i), Type::Record { fields, .. }) => {
                let idx = adjust_index(*i, fields.len() as i64)?;
                v.record_next(idx)?
            }
            (Key::Field(name), Type::Record { .. }) => {
                let idx = v.record_field_index(name)?;
                v.record_next(idx)?
            }
            (Key::Index(i), Type::Union { .. }) => {
                let tag = v.buffer.data.borrow()[v.ptr] as i64;
                if tag != *i {
                    return Err(XndError::value("union tag mismatch"));
                }
                v.union_next()?
            }
            _ => return Err(XndError::value("invalid key for this type")),
        };
        ki += 1;
    }

    Ok(v)
}

/// General mode: at least one slice key, producing a view with a newly
/// constructed type descriptor.
fn general(view: &View, keys: &[Key]) -> Result<View, XndError> {
    if keys.is_empty() {
        return Ok(view.clone());
    }

    match (&keys[0], view.ty.clone().as_ref()) {
        (Key::Index(i), Type::FixedDim { shape, .. }) => {
            let idx = adjust_index(*i, *shape)?;
            let next = view.fixed_dim_next(idx)?;
            general(&next, &keys[1..])
        }
        (
            Key::Slice { start, stop, step },
            Type::FixedDim {
                shape,
                step: old_step,
                elem,
                optional,
            },
        ) => {
            let (start2, _stop2, step2, new_shape) =
                slice_adjust_indices(*shape, *start, *stop, *step)?;
            let index_after = view.index + start2 * old_step;
            let (tmp_index, tmp_ptr) = if elem.ndim() == 0 {
                (0, view.ptr + (index_after as usize) * (elem.datasize() as usize))
            } else {
                (index_after, view.ptr)
            };
            let tmp_view = view.with(elem.clone(), view.bitmap.clone(), tmp_index, tmp_ptr);
            let inner = general(&tmp_view, &keys[1..])?;
            let new_type = std::sync::Arc::new(Type::FixedDim {
                shape: new_shape,
                step: old_step * step2,
                elem: inner.ty.clone(),
                optional: *optional,
            });
            Ok(View {
                ty: new_type,
                ..inner
            })
        }
        (
            Key::Slice { start, stop, step },
            Type::VarDim {
                elem,
                offsets,
                slices,
                optional,
            },
        ) => {
            // The raw, unadjusted slice key is appended to the composed-
            // slice list rather than resolved now: a ragged dimension's
            // rows can each have a different length, so `var_indices`
            // re-resolves this slice against each row's own length when
            // it is actually read, instead of baking in one row's shape.
            if *step == 0 {
                return Err(XndError::invalid_argument("slice step must not be zero"));
            }
            let mut new_slices = slices.clone();
            new_slices.push(ComposedSlice {
                start: *start,
                stop: *stop,
                step: *step,
            });
            let inner_elem = general_type_only(view, elem, &keys[1..])?;
            let new_type = std::sync::Arc::new(Type::VarDim {
                elem: inner_elem,
                offsets: offsets.clone(),
                slices: new_slices,
                optional: *optional,
            });
            Ok(view.with(new_type, view.bitmap.clone(), view.index, view.ptr))
        }
        (
            Key::Index(i),
            Type::VarDim {
                elem,
                offsets,
                slices,
                optional,
            },
        ) => {
            // Another key in this subscription is a slice, so the
            // overall result may cover more than one row; this index
            // can't be committed to a concrete row now. It is stored on
            // a `VarDimElem` and resolved per row (adjusted against that
            // row's own length) when `subtree` later traverses it.
            let inner_elem = general_type_only(view, elem, &keys[1..])?;
            let var_ty = std::sync::Arc::new(Type::VarDim {
                elem: inner_elem,
                offsets: offsets.clone(),
                slices: slices.clone(),
                optional: *optional,
            });
            let wrapped = std::sync::Arc::new(Type::VarDimElem {
                index: *i,
                var: var_ty,
            });
            Ok(view.with(wrapped, view.bitmap.clone(), view.index, view.ptr))
        }
        (_, Type::Tuple { .. }) | (_, Type::Record { .. }) | (_, Type::Union { .. }) => {
            warn!("general: slicing a tuple/record/union is not implemented");
            Err(XndError::not_implemented(
                "slicing tuples/records/unions is not supported",
            ))
        }
        _ => Err(XndError::value("invalid subscription key")),
    }
}

/// Builds the remainder of the key chain against `elem` at the type
/// level only. A ragged dimension has no single concrete address valid
/// for every row it could end up covering, so deeper dimensions are
/// composed here as a `Ty` and bound to real addresses later, per row,
/// when `subtree` actually traverses a resolved `VarDimElem`/sliced
/// `VarDim`.
fn general_type_only(view: &View, elem: &Ty, keys: &[Key]) -> Result<Ty, XndError> {
    if keys.is_empty() {
        return Ok(elem.clone());
    }
    let dummy = view.with(elem.clone(), Bitmap::empty(), 0, 0);
    let inner = general(&dummy, keys)?;
    Ok(inner.ty)
}

/// Post-flight check that every stored `VarDimElem` index remains valid
/// at every leaf of the resulting ragged shape.
pub fn validate_indices(ty: &Type) -> Result<(), XndError> {
    match ty {
        Type::VarDimElem { index, var } => {
            if let Type::VarDim { offsets, .. } = var.as_ref() {
                for row in 0..offsets.len().saturating_sub(1) {
                    let (_, _, shape) = var_indices(var, row as i64)?;
                    let adjusted = if *index < 0 { *index + shape } else { *index };
                    if adjusted < 0 || adjusted >= shape {
                        return Err(XndError::index(
                            "stored VarDimElem index out of range for some row",
                        ));
                    }
                }
            }
            Ok(())
        }
        Type::FixedDim { elem, .. } => validate_indices(elem),
        Type::VarDim { elem, .. } => validate_indices(elem),
        Type::Tuple { types, .. } => {
            for t in types {
                validate_indices(t)?;
            }
            Ok(())
        }
        Type::Record { fields, .. } => {
            for (_, t) in fields {
                validate_indices(t)?;
            }
            Ok(())
        }
        Type::Ref { elem } | Type::Constr { elem, .. } | Type::Nominal { elem, .. } => {
            validate_indices(elem)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_index_resolves_from_end() {
        assert_eq!(adjust_index(-1, 3).unwrap(), 2);
        assert!(adjust_index(-4, 3).is_err());
    }

    #[test]
    fn slice_step_zero_is_invalid_argument() {
        let err = slice_adjust_indices(10, 0, 10, 0).unwrap_err();
        assert_eq!(err.kind, crate::error::XndErrorKind::InvalidArgument);
    }

    #[test]
    fn slice_full_range_positive_step() {
        let (start, _stop, step, shape) = slice_adjust_indices(10, 0, 10, 1).unwrap();
        assert_eq!((start, step, shape), (0, 1, 10));
    }

    #[test]
    fn slice_min_step_clamped() {
        let (_, _, step, _) = slice_adjust_indices(10, 9, -1, i64::MIN).unwrap();
        assert_eq!(step, -i64::MAX);
    }
}
