//! Balanced partition of a view's outermost dimensions.
//!
//! Grounded on `libxnd/split.c`: `schedule`/`column`/`start`/`stop`
//! name the balanced-partition recursion there. `split` collects the
//! outermost run of `FixedDim` shapes (capped by `max_outer` when
//! positive), then schedules `nparts` across them: an axis that can
//! absorb the remaining count in one pass is sliced into balanced
//! contiguous runs; an axis too small for that is fully consumed (one
//! index per row) and the remainder is rescheduled over the next axis
//! in. `nparts` is adjusted upward whenever the requested count doesn't
//! evenly divide the available shape, mirroring the source's `&mut
//! nparts` out-parameter via the returned `(Vec<View>, i64)` pair.

use anyhow::ensure;
use log::trace;

use crate::error::XndError;
use crate::subscribe::{subscribe, Key};
use crate::types::Type;
use crate::view::View;

fn check_nparts(nparts: i64) -> anyhow::Result<()> {
    ensure!(nparts > 0, "nparts must be positive, got {nparts}");
    Ok(())
}

fn part_start(n: i64, nparts: i64, k: i64) -> i64 {
    let base = n / nparts;
    let rem = n % nparts;
    if k < rem {
        k * (base + 1)
    } else {
        rem * (base + 1) + (k - rem) * base
    }
}

/// Collects outer `FixedDim` shapes from `ty`, stopping at the first
/// non-`FixedDim` tag or once `max_outer` axes are collected (`0`
/// means unlimited).
fn collect_outer_shapes(ty: &Type, max_outer: i64) -> Result<Vec<i64>, XndError> {
    let mut shapes = Vec::new();
    let mut cur = ty;
    loop {
        let (shape, elem) = match cur {
            Type::FixedDim { shape, elem, .. } => (*shape, elem.as_ref()),
            _ => break,
        };
        if shape < 0 {
            return Err(XndError::value("split: negative shape"));
        }
        shapes.push(shape);
        if max_outer > 0 && shapes.len() as i64 >= max_outer {
            break;
        }
        cur = elem;
    }
    if shapes.is_empty() {
        return Err(XndError::not_implemented("split requires an outer FixedDim"));
    }
    Ok(shapes)
}

/// Builds the key-chain schedule for `n` parts over the remaining outer
/// shapes `ms`. Returns the (possibly larger) achieved part count and
/// one key chain per output view.
fn schedule(n: i64, ms: &[i64]) -> (i64, Vec<Vec<Key>>) {
    let axis = match ms.first() {
        Some(&a) => a,
        None => return (1, vec![Vec::new()]),
    };

    if n <= axis {
        let mut leaves = Vec::with_capacity(n as usize);
        for k in 0..n {
            let start = part_start(axis, n, k);
            let stop = part_start(axis, n, k + 1);
            leaves.push(vec![Key::Slice {
                start,
                stop,
                step: 1,
            }]);
        }
        (n, leaves)
    } else {
        let sub_n = (n + axis - 1) / axis;
        let (adjusted_sub_n, sub_leaves) = schedule(sub_n, &ms[1..]);
        let mut leaves = Vec::with_capacity((axis * adjusted_sub_n) as usize);
        for i in 0..axis {
            for sub in &sub_leaves {
                let mut keys = Vec::with_capacity(sub.len() + 1);
                keys.push(Key::Index(i));
                keys.extend(sub.iter().cloned());
                leaves.push(keys);
            }
        }
        (axis * adjusted_sub_n, leaves)
    }
}

/// `xnd_split(x, &mut nparts, max_outer, ctx)`. Returns the output
/// views alongside the achieved part count, which may exceed the
/// requested `nparts` when the outer shapes can't divide evenly into
/// exactly that many balanced pieces.
pub fn split(view: &View, nparts: i64, max_outer: i64) -> Result<(Vec<View>, i64), XndError> {
    check_nparts(nparts).map_err(|e| XndError::invalid_argument(e.to_string()))?;
    trace!("split: requesting {nparts} part(s), max_outer {max_outer}");

    let ms = collect_outer_shapes(view.ty.as_ref(), max_outer)?;
    let (adjusted_nparts, leaves) = schedule(nparts, &ms);
    if adjusted_nparts != nparts {
        trace!("split: adjusted part count {nparts} -> {adjusted_nparts}");
    }

    let mut parts = Vec::with_capacity(leaves.len());
    for keys in &leaves {
        parts.push(subscribe(view, keys)?);
    }
    Ok((parts, adjusted_nparts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::{Allocator, Master};
    use std::sync::Arc;

    fn vector(n: i64) -> Master {
        let elem = Arc::new(Type::Uint16 { optional: false });
        let ty = Arc::new(Type::FixedDim {
            shape: n,
            step: 1,
            elem,
            optional: false,
        });
        Master::empty(ty, Allocator::Plain).unwrap()
    }

    fn matrix(rows: i64, cols: i64) -> Master {
        let elem = Arc::new(Type::Uint16 { optional: false });
        let row = Type::fixed_dim(elem, cols, 1);
        let ty = Arc::new(Type::FixedDim {
            shape: rows,
            step: cols,
            elem: row,
            optional: false,
        });
        Master::empty(ty, Allocator::Plain).unwrap()
    }

    fn part_shape(p: &View) -> i64 {
        match p.ty.as_ref() {
            Type::FixedDim { shape, .. } => *shape,
            _ => panic!("expected FixedDim"),
        }
    }

    #[test]
    fn split_even_gives_equal_parts() {
        let m = vector(10);
        let (parts, n) = split(&m.view, 5, 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(parts.len(), 5);
        for p in &parts {
            assert_eq!(part_shape(p), 2);
        }
    }

    #[test]
    fn split_uneven_is_balanced_within_one() {
        let m = vector(10);
        let (parts, n) = split(&m.view, 3, 0).unwrap();
        assert_eq!(n, 3);
        let shapes: Vec<i64> = parts.iter().map(part_shape).collect();
        assert_eq!(shapes.iter().sum::<i64>(), 10);
        assert!(shapes.iter().max().unwrap() - shapes.iter().min().unwrap() <= 1);
    }

    #[test]
    fn split_rejects_zero_parts() {
        let m = vector(10);
        assert!(split(&m.view, 0, 0).is_err());
    }

    #[test]
    fn split_requesting_more_parts_than_outer_shape_consumes_the_axis_and_recurses() {
        // 3 rows of 4 columns, asking for 6 parts: the outer axis (3) is
        // too small to carve into 6 balanced slices by itself, so it is
        // fully consumed (one index per row) and the remaining factor
        // of ceil(6/3) = 2 is scheduled over the column axis.
        let m = matrix(3, 4);
        let (parts, n) = split(&m.view, 6, 0).unwrap();
        assert_eq!(n, 6);
        assert_eq!(parts.len(), 6);
        for p in &parts {
            // each part indexes a single row and slices the 4 columns
            // into 2 balanced halves of 2 elements each.
            assert_eq!(part_shape(p), 2);
        }
    }

    #[test]
    fn split_adjusts_nparts_up_when_outer_shapes_cannot_divide_evenly() {
        // 2 rows, requesting 5 parts: the outer axis of 2 can't reach 5
        // by itself, so it is fully consumed and rescheduled over the
        // column axis with ceil(5/2) = 3, yielding 2*3 = 6 total parts.
        let m = matrix(2, 4);
        let (parts, n) = split(&m.view, 5, 0).unwrap();
        assert_eq!(n, 6);
        assert_eq!(parts.len(), 6);
    }

    #[test]
    fn max_outer_caps_how_many_axes_the_schedule_may_consume() {
        // capped to one axis: the row dimension is sliced into 3
        // single-row pieces, but the 4-wide column axis inside each
        // part is left untouched rather than folded into the schedule.
        let m = matrix(3, 4);
        let (parts, n) = split(&m.view, 3, 1).unwrap();
        assert_eq!(n, 3);
        for p in &parts {
            assert_eq!(part_shape(p), 1);
            match p.ty.as_ref() {
                Type::FixedDim { elem, .. } => match elem.as_ref() {
                    Type::FixedDim { shape, .. } => assert_eq!(*shape, 4),
                    _ => panic!("expected nested FixedDim"),
                },
                _ => panic!("expected FixedDim"),
            }
        }
    }
}
