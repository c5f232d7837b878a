//! Value equality and bit-for-bit identity.
//!
//! `equal` is grounded on `libxnd/equal.c`: a type-tag mismatch raises
//! `NotImplementedError` rather than returning `false`, NA on either
//! side always compares unequal, and containers recurse structurally.
//! `identical` is grounded on `libxnd/identical.c`: a same-pointer
//! short-circuit, then structural type equality, then a byte-for-byte
//! comparison of the bitmap and the data — no numeric coercion.

use std::sync::Arc;

use crate::copy::{read_num, Num};
use crate::error::XndError;
use crate::types::{var_indices, Type};
use crate::view::View;

fn strip(v: &View) -> Result<View, XndError> {
    let mut cur = v.clone();
    loop {
        cur = match cur.ty.as_ref() {
            Type::Ref { .. } => cur.ref_next()?,
            Type::Constr { .. } => cur.constr_next()?,
            Type::Nominal { .. } => cur.nominal_next()?,
            _ => return Ok(cur),
        };
    }
}

fn same_tag(a: &Type, b: &Type) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn num_eq(a: &Num, b: &Num) -> bool {
    a == b
}

/// `xnd_equal(x, y, ctx)`.
pub fn equal(x: &View, y: &View) -> Result<bool, XndError> {
    let x = strip(x)?;
    let y = strip(y)?;

    if !same_tag(&x.ty, &y.ty) {
        return Err(XndError::not_implemented("equal: mismatched type tags"));
    }

    if x.is_na() || y.is_na() {
        return Ok(false);
    }

    match (x.ty.as_ref(), y.ty.as_ref()) {
        (Type::FixedDim { shape: xs, .. }, Type::FixedDim { shape: ys, .. }) => {
            if xs != ys {
                return Ok(false);
            }
            for i in 0..*xs {
                if !equal(&x.fixed_dim_next(i)?, &y.fixed_dim_next(i)?)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Type::VarDim { .. }, Type::VarDim { .. }) => {
            let (_, _, xshape) = var_indices(&x.ty, x.index)?;
            let (_, _, yshape) = var_indices(&y.ty, y.index)?;
            if xshape != yshape {
                return Ok(false);
            }
            for i in 0..xshape {
                if !equal(&x.var_dim_next(i)?, &y.var_dim_next(i)?)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Type::Tuple { types: xt, .. }, Type::Tuple { types: yt, .. }) => {
            if xt.len() != yt.len() {
                return Ok(false);
            }
            for i in 0..xt.len() as i64 {
                if !equal(&x.tuple_next(i)?, &y.tuple_next(i)?)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Type::Record { fields: xf, .. }, Type::Record { fields: yf, .. }) => {
            if xf.len() != yf.len() {
                return Ok(false);
            }
            for i in 0..xf.len() as i64 {
                let name = &xf[i as usize].0;
                let yi = y.record_field_index(name)?;
                if !equal(&x.record_next(i)?, &y.record_next(yi)?)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Type::Union { .. }, Type::Union { .. }) => {
            let xtag = x.buffer.data.borrow()[x.ptr];
            let ytag = y.buffer.data.borrow()[y.ptr];
            if xtag != ytag {
                return Ok(false);
            }
            equal(&x.union_next()?, &y.union_next()?)
        }
        (Type::FixedString { .. }, Type::FixedString { .. })
        | (Type::FixedBytes { .. }, Type::FixedBytes { .. })
        | (Type::Categorical { .. }, Type::Categorical { .. }) => Ok(x.data() == y.data()),
        (Type::String { .. }, Type::String { .. }) => {
            let xh = crate::master::read_handle(&x.data());
            let yh = crate::master::read_handle(&y.data());
            Ok(x.buffer.string_at(xh) == y.buffer.string_at(yh))
        }
        (Type::Bytes { .. }, Type::Bytes { .. }) => {
            let xh = crate::master::read_handle(&x.data());
            let yh = crate::master::read_handle(&y.data());
            Ok(x.buffer.bytes_at(xh) == y.buffer.bytes_at(yh))
        }
        _ => {
            let xn = read_num(&x)?;
            let yn = read_num(&y)?;
            Ok(num_eq(&xn, &yn))
        }
    }
}

/// `xnd_identical(x, y, ctx)`.
pub fn identical(x: &View, y: &View) -> Result<bool, XndError> {
    if Arc::ptr_eq(&x.buffer, &y.buffer) && x.ptr == y.ptr && x.index == y.index {
        return Ok(true);
    }

    if x.ty != y.ty {
        return Ok(false);
    }

    if x.ty.is_optional() {
        let xna = x.is_na();
        let yna = y.is_na();
        if xna != yna {
            return Ok(false);
        }
        if xna {
            return Ok(true);
        }
    }

    match x.ty.as_ref() {
        Type::FixedDim { shape, .. } => {
            for i in 0..*shape {
                if !identical(&x.fixed_dim_next(i)?, &y.fixed_dim_next(i)?)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Type::VarDim { .. } => {
            let (_, _, shape) = var_indices(&x.ty, x.index)?;
            for i in 0..shape {
                if !identical(&x.var_dim_next(i)?, &y.var_dim_next(i)?)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Type::Tuple { types, .. } => {
            for i in 0..types.len() as i64 {
                if !identical(&x.tuple_next(i)?, &y.tuple_next(i)?)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Type::Record { fields, .. } => {
            for i in 0..fields.len() as i64 {
                if !identical(&x.record_next(i)?, &y.record_next(i)?)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Type::Ref { .. } => identical(&x.ref_next()?, &y.ref_next()?),
        Type::Constr { .. } => identical(&x.constr_next()?, &y.constr_next()?),
        Type::Nominal { .. } => identical(&x.nominal_next()?, &y.nominal_next()?),
        Type::Union { .. } => {
            let xtag = x.buffer.data.borrow()[x.ptr];
            let ytag = y.buffer.data.borrow()[y.ptr];
            if xtag != ytag {
                return Ok(false);
            }
            identical(&x.union_next()?, &y.union_next()?)
        }
        Type::String { .. } => {
            let xh = crate::master::read_handle(&x.data());
            let yh = crate::master::read_handle(&y.data());
            Ok(x.buffer.string_at(xh) == y.buffer.string_at(yh))
        }
        Type::Bytes { .. } => {
            let xh = crate::master::read_handle(&x.data());
            let yh = crate::master::read_handle(&y.data());
            Ok(x.buffer.bytes_at(xh) == y.buffer.bytes_at(yh))
        }
        _ => Ok(x.data() == y.data()),
    }
}
