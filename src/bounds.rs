//! Recursive bounds check for a borrowed buffer against a type.
//!
//! Ported from `libxnd/bounds.c`: visits only the minimum and maximum
//! element of each dimension (indices `0` and `shape-1`), not every
//! element, propagating a saturating overflow flag through checked
//! 64-bit arithmetic.

use crate::error::XndError;
use crate::overflow::{add_i64, mul_i64};
use crate::types::{var_indices, Type};

/// `bounds_check(T, linear_index, bufsize)`.
pub fn bounds_check(ty: &Type, linear_index: i64, bufsize: i64) -> Result<(), XndError> {
    let mut overflow = false;
    walk(ty, linear_index, 0, &mut overflow, bufsize)?;
    if overflow {
        return Err(XndError::value("bounds check: index calculation overflowed"));
    }
    Ok(())
}

fn walk(
    ty: &Type,
    index: i64,
    ptr: i64,
    overflow: &mut bool,
    bufsize: i64,
) -> Result<(), XndError> {
    if ty.is_optional() {
        return Err(XndError::not_implemented(
            "bounds check: optional types not implemented",
        ));
    }

    match ty {
        Type::FixedDim { shape, step, elem, .. } => {
            if *shape <= 0 {
                return Ok(());
            }
            for &i in &[0i64, shape - 1] {
                let delta = mul_i64(i, *step, overflow);
                let new_index = add_i64(index, delta, overflow);
                let (next_index, next_ptr) = if elem.ndim() == 0 {
                    let off = mul_i64(new_index, elem.datasize(), overflow);
                    (0, add_i64(ptr, off, overflow))
                } else {
                    (new_index, ptr)
                };
                walk(elem, next_index, next_ptr, overflow, bufsize)?;
            }
            Ok(())
        }
        Type::VarDim { elem, .. } => {
            let (start, step, shape) = var_indices(ty, index)?;
            if shape <= 0 {
                return Ok(());
            }
            for &i in &[0i64, shape - 1] {
                let delta = mul_i64(i, step, overflow);
                let new_index = add_i64(start, delta, overflow);
                let (next_index, next_ptr) = if elem.ndim() == 0 {
                    let off = mul_i64(new_index, elem.datasize(), overflow);
                    (0, add_i64(ptr, off, overflow))
                } else {
                    (new_index, ptr)
                };
                walk(elem, next_index, next_ptr, overflow, bufsize)?;
            }
            Ok(())
        }
        Type::Tuple { types, .. } => {
            let mut off = ptr;
            for t in types {
                walk(t, 0, off, overflow, bufsize)?;
                off = add_i64(off, t.datasize(), overflow);
            }
            Ok(())
        }
        Type::Record { fields, .. } => {
            let mut off = ptr;
            for (_, t) in fields {
                walk(t, 0, off, overflow, bufsize)?;
                off = add_i64(off, t.datasize(), overflow);
            }
            Ok(())
        }
        Type::Constr { elem, .. } => walk(elem, index, ptr, overflow, bufsize),
        Type::Nominal { elem, .. } => walk(elem, index, ptr, overflow, bufsize),
        Type::Union { .. }
        | Type::Ref { .. }
        | Type::VarDimElem { .. }
        | Type::Char
        | Type::String { .. }
        | Type::Bytes { .. } => Err(XndError::not_implemented(
            "bounds check not implemented for this type",
        )),
        Type::Module | Type::Function => {
            Err(XndError::runtime("bounds check: abstract type at leaf"))
        }
        _ => {
            let datasize = ty.datasize();
            if ptr < 0 || datasize < 0 || ptr.saturating_add(datasize) > bufsize {
                return Err(XndError::value("bounds check: out of range"));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type as T;
    use std::sync::Arc;

    #[test]
    fn fixed_dim_in_range() {
        let elem = Arc::new(T::Uint16 { optional: false });
        let ty = T::FixedDim {
            shape: 3,
            step: 1,
            elem,
            optional: false,
        };
        assert!(bounds_check(&ty, 0, 6).is_ok());
    }

    #[test]
    fn fixed_dim_out_of_range() {
        let elem = Arc::new(T::Uint16 { optional: false });
        let ty = T::FixedDim {
            shape: 3,
            step: 1,
            elem,
            optional: false,
        };
        assert!(bounds_check(&ty, 0, 4).is_err());
    }

    #[test]
    fn optional_is_not_implemented() {
        let ty = T::Uint16 { optional: true };
        let err = bounds_check(&ty, 0, 16).unwrap_err();
        assert_eq!(err.kind, crate::error::XndErrorKind::NotImplemented);
    }
}
