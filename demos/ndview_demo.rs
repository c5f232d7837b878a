//! Small CLI over an in-memory fixture, exercising subscribe/copy/equal/
//! reshape/split without needing a file on disk to parse.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use ndview::copy::copy;
use ndview::equal::equal;
use ndview::master::Allocator;
use ndview::reshape::reshape;
use ndview::split::split;
use ndview::subscribe::{subscribe, Key};
use ndview::{Master, Type};

/// Build and operate on a typed in-memory container.
#[derive(Clone, Debug, Parser)]
struct Args {
    /// rows in the demo's fixed-size uint16 matrix
    #[arg(short, long, default_value_t = 4)]
    rows: i64,
    /// columns in the demo's fixed-size uint16 matrix
    #[arg(short, long, default_value_t = 4)]
    cols: i64,
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Print the element at [row, col]
    Index { row: i64, col: i64 },
    /// Print the shape of rows[start..stop]
    Slice { start: i64, stop: i64 },
    /// Reshape the matrix to the given row/col count and print its shape
    Reshape { rows: i64, cols: i64 },
    /// Split the matrix into `nparts` balanced row groups
    Split { nparts: i64 },
    /// Copy the matrix into a wider int32 matrix and check the two compare equal
    CopyWiden,
}

fn matrix(rows: i64, cols: i64) -> Result<Master> {
    let elem = Arc::new(Type::Uint16 { optional: false });
    let row = Type::fixed_dim(elem, cols, 1);
    let ty = Arc::new(Type::FixedDim {
        shape: rows,
        step: cols,
        elem: row,
        optional: false,
    });
    let m = Master::empty(ty, Allocator::Plain)?;
    let mut n = 0u16;
    for r in 0..rows {
        for c in 0..cols {
            let cell = subscribe(&m.view, &[Key::Index(r), Key::Index(c)])?;
            cell.write_data(&n.to_ne_bytes());
            n = n.wrapping_add(1);
        }
    }
    Ok(m)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let m = matrix(args.rows, args.cols)?;

    match args.operation {
        Operation::Index { row, col } => {
            let cell = subscribe(&m.view, &[Key::Index(row), Key::Index(col)])?;
            let bytes = cell.data();
            println!("{}", u16::from_ne_bytes([bytes[0], bytes[1]]));
        }
        Operation::Slice { start, stop } => {
            let v = subscribe(
                &m.view,
                &[Key::Slice {
                    start,
                    stop,
                    step: 1,
                }],
            )?;
            let (shape, _, _) = v.ty.as_ndarray();
            println!("{shape:?}");
        }
        Operation::Reshape { rows, cols } => {
            let v = reshape(&m.view, &[rows, cols], 'C')?;
            let (shape, _, _) = v.ty.as_ndarray();
            println!("{shape:?}");
        }
        Operation::Split { nparts } => {
            let (parts, achieved) = split(&m.view, nparts, 0)?;
            if achieved != nparts {
                println!("requested {nparts} parts, achieved {achieved}");
            }
            for (i, p) in parts.iter().enumerate() {
                let (shape, _, _) = p.ty.as_ndarray();
                println!("part {i}: {shape:?}");
            }
        }
        Operation::CopyWiden => {
            let widen = || -> Result<Master> {
                let dst_elem = Arc::new(Type::Int32 { optional: false });
                let dst_row = Type::fixed_dim(dst_elem, args.cols, 1);
                let dst_ty = Arc::new(Type::FixedDim {
                    shape: args.rows,
                    step: args.cols,
                    elem: dst_row,
                    optional: false,
                });
                let dst = Master::empty(dst_ty, Allocator::Plain)?;
                copy(&dst.view, &m.view)?;
                Ok(dst)
            };
            let a = widen()?;
            let b = widen()?;
            // two independent widening copies of the same source must
            // compare equal once they share a type.
            println!("widened copies equal: {}", equal(&a.view, &b.view)?);

            // comparing the original uint16 source to its own widened
            // copy is a type-tag mismatch, not a value comparison.
            match equal(&m.view, &a.view) {
                Err(e) => println!("comparing across tags: {e}"),
                Ok(v) => println!("comparing across tags: {v}"),
            }
        }
    }

    Ok(())
}
