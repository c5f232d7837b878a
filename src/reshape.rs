//! No-copy reshape of a `FixedDim` chain.
//!
//! Grounded on `libxnd/shape.c`'s `xnd_reshape`: same-shape and
//! zero-in-shape fast paths, a C/F-contiguous fast path, and an
//! order-aware dispatch ('C', 'F', 'A'). When the source is not
//! wholly C- or F-contiguous, `xnd_nocopy_reshape` in `contrib.h`
//! folds maximal runs of old/new axes with matching element counts and
//! checks each run for internal contiguity; a run that isn't
//! contiguous means the reshape genuinely needs a copy, which this
//! crate does not perform, so it reports `ValueError` instead.

use std::sync::Arc;

use anyhow::ensure;
use log::{trace, warn};

use crate::error::XndError;
use crate::overflow::mul_i64;
use crate::types::{expected_c_strides, expected_f_strides, is_contiguous, Ty, Type, MAX_DIM};
use crate::view::View;

fn check_element_count(old_n: i64, new_n: i64) -> anyhow::Result<()> {
    ensure!(
        old_n == new_n,
        "reshape: new shape has a different number of elements ({old_n} vs {new_n})"
    );
    Ok(())
}

fn build_chain(dtype: Ty, shape: &[i64], strides: &[i64]) -> Ty {
    let mut ty = dtype;
    for (s, st) in shape.iter().zip(strides.iter()).rev() {
        ty = Arc::new(Type::FixedDim {
            shape: *s,
            step: *st,
            elem: ty,
            optional: false,
        });
    }
    ty
}

/// Folds maximal runs of `old_shape`/`new_shape` axes whose element
/// counts agree and checks that the old strides within each run are
/// actually contiguous (C-order runs read right to left, F-order runs
/// left to right). Returns `None` as soon as one run fails, meaning no
/// stride assignment can satisfy the reshape without copying data.
fn nocopy_reshape_strides(
    old_shape: &[i64],
    old_step: &[i64],
    new_shape: &[i64],
    f_order: bool,
) -> Option<Vec<i64>> {
    let oldnd = old_shape.len();
    let newnd = new_shape.len();
    let mut new_strides = vec![0i64; newnd];

    if oldnd == 0 || newnd == 0 {
        let old_n: i64 = old_shape.iter().product();
        let new_n: i64 = new_shape.iter().product();
        return if old_n == new_n { Some(new_strides) } else { None };
    }

    let (mut oi, mut oj) = (0usize, 1usize);
    let (mut ni, mut nj) = (0usize, 1usize);

    while ni < newnd && oi < oldnd {
        let mut np = new_shape[ni];
        let mut op = old_shape[oi];

        while np != op {
            if np < op {
                if nj >= newnd {
                    return None;
                }
                np *= new_shape[nj];
                nj += 1;
            } else {
                if oj >= oldnd {
                    return None;
                }
                op *= old_shape[oj];
                oj += 1;
            }
        }

        for ok in oi..oj.saturating_sub(1) {
            if f_order {
                if old_step[ok + 1] != old_shape[ok] * old_step[ok] {
                    return None;
                }
            } else if old_step[ok] != old_shape[ok + 1] * old_step[ok + 1] {
                return None;
            }
        }

        if f_order {
            new_strides[ni] = old_step[oi];
            for nk in ni + 1..nj {
                new_strides[nk] = new_strides[nk - 1] * new_shape[nk - 1];
            }
        } else {
            new_strides[nj - 1] = old_step[oj - 1];
            for nk in (ni..nj - 1).rev() {
                new_strides[nk] = new_strides[nk + 1] * new_shape[nk + 1];
            }
        }

        ni = nj;
        nj += 1;
        oi = oj;
        oj += 1;
    }

    Some(new_strides)
}

fn build_view(view: &View, shape: &[i64], strides: &[i64], dtype: Ty) -> Result<View, XndError> {
    if dtype.subtree_is_optional() {
        warn!("reshape: optional dtype is not implemented");
        return Err(XndError::not_implemented(
            "reshape of an optional dtype is not implemented",
        ));
    }
    let new_ty = build_chain(dtype, shape, strides);
    Ok(view.with(new_ty, crate::bitmap::Bitmap::empty(), 0, view.ptr))
}

/// `xnd_reshape(x, shape, order, ctx)`. `order` is `'C'`, `'F'`, or
/// `'A'` (either, preferring C).
pub fn reshape(view: &View, new_shape: &[i64], order: char) -> Result<View, XndError> {
    trace!("reshape: target shape {new_shape:?}, order {order}");
    if new_shape.len() > MAX_DIM {
        return Err(XndError::index("too many dimensions in reshape target"));
    }

    let (old_shape, old_step, dtype) = view.ty.as_ndarray();

    let mut overflow = false;
    let old_n = old_shape.iter().fold(1i64, |a, &s| mul_i64(a, s, &mut overflow));
    let new_n = new_shape.iter().fold(1i64, |a, &s| mul_i64(a, s, &mut overflow));
    if overflow {
        return Err(XndError::value("reshape: element count overflowed"));
    }
    check_element_count(old_n, new_n).map_err(|e| XndError::value(e.to_string()))?;

    if old_shape == new_shape {
        return Ok(view.clone());
    }

    if new_shape.iter().any(|&s| s == 0) {
        let strides = if order == 'F' {
            expected_f_strides(new_shape)
        } else {
            expected_c_strides(new_shape)
        };
        return build_view(view, new_shape, &strides, dtype);
    }

    let c_ok = is_contiguous(&old_shape, &old_step, &expected_c_strides(&old_shape));
    let f_ok = is_contiguous(&old_shape, &old_step, &expected_f_strides(&old_shape));

    match order {
        'C' => {
            if c_ok {
                build_view(view, new_shape, &expected_c_strides(new_shape), dtype)
            } else if let Some(strides) =
                nocopy_reshape_strides(&old_shape, &old_step, new_shape, false)
            {
                build_view(view, new_shape, &strides, dtype)
            } else {
                warn!("reshape: no axis-folding schedule covers {new_shape:?}");
                Err(XndError::value(
                    "reshape: source cannot be folded into the requested shape without a copy",
                ))
            }
        }
        'F' => {
            if f_ok {
                build_view(view, new_shape, &expected_f_strides(new_shape), dtype)
            } else if let Some(strides) =
                nocopy_reshape_strides(&old_shape, &old_step, new_shape, true)
            {
                build_view(view, new_shape, &strides, dtype)
            } else {
                warn!("reshape: no axis-folding schedule covers {new_shape:?}");
                Err(XndError::value(
                    "reshape: source cannot be folded into the requested shape without a copy",
                ))
            }
        }
        'A' => {
            if c_ok {
                build_view(view, new_shape, &expected_c_strides(new_shape), dtype)
            } else if f_ok {
                build_view(view, new_shape, &expected_f_strides(new_shape), dtype)
            } else if let Some(strides) =
                nocopy_reshape_strides(&old_shape, &old_step, new_shape, false)
            {
                build_view(view, new_shape, &strides, dtype)
            } else if let Some(strides) =
                nocopy_reshape_strides(&old_shape, &old_step, new_shape, true)
            {
                build_view(view, new_shape, &strides, dtype)
            } else {
                warn!("reshape: no axis-folding schedule covers {new_shape:?}");
                Err(XndError::value(
                    "reshape: source cannot be folded into the requested shape without a copy",
                ))
            }
        }
        _ => Err(XndError::invalid_argument("order must be 'C', 'F', or 'A'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::{Allocator, Master};

    fn c_contig_2x3(ty_shape: (i64, i64)) -> Master {
        let (a, b) = ty_shape;
        let elem = Arc::new(Type::Uint16 { optional: false });
        let row = Type::fixed_dim(elem, b, 1);
        let ty = Arc::new(Type::FixedDim {
            shape: a,
            step: b,
            elem: row,
            optional: false,
        });
        Master::empty(ty, Allocator::Plain).unwrap()
    }

    #[test]
    fn same_shape_is_identity() {
        let m = c_contig_2x3((2, 3));
        let v = reshape(&m.view, &[2, 3], 'C').unwrap();
        assert_eq!(v.ptr, m.view.ptr);
    }

    #[test]
    fn c_contiguous_reshape_changes_shape() {
        let m = c_contig_2x3((2, 3));
        let v = reshape(&m.view, &[3, 2], 'C').unwrap();
        let (shape, _, _) = v.ty.as_ndarray();
        assert_eq!(shape, vec![3, 2]);
    }

    #[test]
    fn mismatched_element_count_errors() {
        let m = c_contig_2x3((2, 3));
        assert!(reshape(&m.view, &[4, 4], 'C').is_err());
    }

    #[test]
    fn f_order_that_cannot_be_folded_is_a_value_error() {
        let m = c_contig_2x3((2, 3));
        let err = reshape(&m.view, &[3, 2], 'F').unwrap_err();
        assert_eq!(err.kind, crate::error::XndErrorKind::Value);
    }

    #[test]
    fn axis_folding_merges_a_contiguous_inner_run_around_an_irregular_outer_stride() {
        let leaf = Arc::new(Type::Uint16 { optional: false });
        let inner = Arc::new(Type::FixedDim {
            shape: 4,
            step: 1,
            elem: leaf,
            optional: false,
        });
        let middle = Arc::new(Type::FixedDim {
            shape: 3,
            step: 4,
            elem: inner,
            optional: false,
        });
        // outer step 100 instead of 12 makes the whole chain non-contiguous.
        let ty = Arc::new(Type::FixedDim {
            shape: 2,
            step: 100,
            elem: middle,
            optional: false,
        });
        let m = Master::empty(ty, Allocator::Plain).unwrap();

        let v = reshape(&m.view, &[2, 12], 'C').unwrap();
        let (shape, step, _) = v.ty.as_ndarray();
        assert_eq!(shape, vec![2, 12]);
        assert_eq!(step, vec![100, 1]);
    }
}
