//! Cross-module, fixture-heavy integration tests.
//!
//! Mirrors the per-file unit tests but exercises whole operations
//! (subscribe + copy + equal + reshape + split) together against
//! hand-built `Type` fixtures, the way the teacher's own aggregating
//! `src/test.rs` builds fixtures from literal byte arrays rather than
//! parsing them from a string grammar.

use std::sync::Arc;

use rstest::rstest;

use crate::copy::copy;
use crate::equal::{equal, identical};
use crate::master::{Allocator, Master};
use crate::reshape::reshape;
use crate::split::split;
use crate::subscribe::{subscribe, Key};
use crate::types::Type;

fn u16_matrix(rows: i64, cols: i64) -> Master {
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

#[test]
fn subscribe_index_then_index_reaches_scalar() {
    let m = u16_matrix(2, 3);
    let row = subscribe(&m.view, &[Key::Index(1)]).unwrap();
    let cell = subscribe(&row, &[Key::Index(2)]).unwrap();
    assert_eq!(cell.ty.datasize(), 2);
}

#[test]
fn subscribe_out_of_range_index_errors() {
    let m = u16_matrix(2, 3);
    assert!(subscribe(&m.view, &[Key::Index(5)]).is_err());
}

#[test]
fn subscribe_slice_narrows_outer_dimension() {
    let m = u16_matrix(4, 3);
    let v = subscribe(
        &m.view,
        &[Key::Slice {
            start: 1,
            stop: 3,
            step: 1,
        }],
    )
    .unwrap();
    match v.ty.as_ref() {
        Type::FixedDim { shape, .. } => assert_eq!(*shape, 2),
        _ => panic!("expected FixedDim"),
    }
}

#[test]
fn record_field_access_by_name() {
    let ty = Arc::new(Type::Record {
        fields: vec![
            ("x".to_string(), Arc::new(Type::Int32 { optional: false })),
            ("y".to_string(), Arc::new(Type::Int32 { optional: false })),
        ],
        optional: false,
    });
    let m = Master::empty(ty, Allocator::Plain).unwrap();
    let y = subscribe(&m.view, &[Key::Field("y".to_string())]).unwrap();
    y.write_data(&99i32.to_ne_bytes());
    assert_eq!(
        i32::from_ne_bytes(y.data()[..4].try_into().unwrap()),
        99
    );
}

#[rstest]
#[case(2, 3, 6)]
#[case(1, 1, 1)]
#[case(5, 0, 0)]
fn matrix_datasize_matches_shape(#[case] rows: i64, #[case] cols: i64, #[case] expected_elems: i64) {
    let m = u16_matrix(rows, cols);
    assert_eq!(m.view.ty.datasize(), expected_elems * 2);
}

#[test]
fn copy_widens_and_then_values_compare_equal() {
    let src = Master::empty(Arc::new(Type::Int32 { optional: false }), Allocator::Plain).unwrap();
    src.view.write_data(&7i32.to_ne_bytes());
    let dst = Master::empty(Arc::new(Type::Int64 { optional: false }), Allocator::Plain).unwrap();
    copy(&dst.view, &src.view).unwrap();

    let dst2 = Master::empty(Arc::new(Type::Int64 { optional: false }), Allocator::Plain).unwrap();
    dst2.view.write_data(&7i64.to_ne_bytes());
    assert!(equal(&dst.view, &dst2.view).unwrap());
}

#[test]
fn copy_then_identical_requires_exact_type_match() {
    let src = Master::empty(Arc::new(Type::Int32 { optional: false }), Allocator::Plain).unwrap();
    src.view.write_data(&7i32.to_ne_bytes());
    let dst = Master::empty(Arc::new(Type::Int64 { optional: false }), Allocator::Plain).unwrap();
    copy(&dst.view, &src.view).unwrap();
    // different tags (Int32 vs Int64) are never identical, even after
    // a value-preserving copy.
    assert!(!identical(&src.view, &dst.view).unwrap());
}

#[test]
fn reshape_round_trip_preserves_elements() {
    let m = u16_matrix(2, 6);
    let reshaped = reshape(&m.view, &[3, 4], 'C').unwrap();
    let back = reshape(&reshaped, &[2, 6], 'C').unwrap();
    let (shape, _, _) = back.ty.as_ndarray();
    assert_eq!(shape, vec![2, 6]);
}

#[test]
fn split_parts_cover_every_row_exactly_once() {
    let m = u16_matrix(6, 2);
    let (parts, n) = split(&m.view, 3, 0).unwrap();
    assert_eq!(n, 3);
    let mut total = 0i64;
    for p in &parts {
        match p.ty.as_ref() {
            Type::FixedDim { shape, .. } => total += shape,
            _ => panic!("expected FixedDim"),
        }
    }
    assert_eq!(total, 6);
}

#[test]
fn na_scalar_round_trips_through_subscribe() {
    let ty = Arc::new(Type::FixedDim {
        shape: 3,
        step: 1,
        elem: Arc::new(Type::Float64 {
            le: true,
            optional: true,
        }),
        optional: false,
    });
    let m = Master::empty(ty, Allocator::Plain).unwrap();
    let cell = subscribe(&m.view, &[Key::Index(1)]).unwrap();
    assert!(cell.is_na());
    cell.set_valid();
    assert!(cell.is_valid());
}
