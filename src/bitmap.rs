//! Recursive per-subtree validity-bitmap tree.
//!
//! Ported from `libxnd/bitmaps.c`: `bitmap_init`/`xnd_bitmap_clear`/
//! `xnd_bitmap_next`/`xnd_set_valid`/`xnd_set_na`/`xnd_is_valid`/
//! `xnd_is_na`. Teardown is ordinary `Drop` on the owned `Vec`s, so
//! there is no separate clear-on-error path: a `Bitmap` under
//! construction that returns `Err` is simply dropped.

use std::cell::RefCell;
use std::sync::Arc;

use log::{trace, warn};

use crate::error::XndError;
use crate::types::Type;

/// `data` is `Arc<RefCell<_>>` rather than a plain `Vec<u8>` so that
/// cloning a `Bitmap` node while descending a view (§4.1) shares the
/// same underlying bits instead of forking them — `set_valid`/`set_na`
/// on a derived view must be visible through the master. Per SPEC_FULL
/// §5 this crate does not implement `Sync` for that shared mutable
/// access; concurrent readers/writers across threads still need
/// external synchronization, exactly as the source documents.
#[derive(Debug, Clone, Default)]
pub struct Bitmap {
    pub data: Option<Arc<RefCell<Vec<u8>>>>,
    pub children: Vec<Bitmap>,
}

fn bitmap_size(nelem: i64) -> usize {
    ((nelem + 7) / 8).max(0) as usize
}

impl Bitmap {
    pub fn empty() -> Self {
        Bitmap {
            data: None,
            children: Vec::new(),
        }
    }

    /// `xnd_bitmap_init(b, t, ctx)` — builds a tree with one leaf.
    pub fn build(ty: &Type) -> Result<Bitmap, XndError> {
        trace!("bitmap: building tree for {ty:?}");
        let mut b = Bitmap::empty();
        init(&mut b, ty, 1)?;
        Ok(b)
    }

    /// `xnd_bitmap_next(x, i, ctx)`.
    pub fn child(&self, index: i64, shape: i64, i: i64) -> Result<Bitmap, XndError> {
        if self.children.is_empty() {
            return Ok(Bitmap::empty());
        }
        if i < 0 || i >= shape {
            return Err(XndError::value("invalid index"));
        }
        let pos = (index * shape + i) as usize;
        self.children
            .get(pos)
            .cloned()
            .ok_or_else(|| XndError::runtime("missing bitmap"))
    }

    pub fn is_valid_bit(&self, index: i64) -> bool {
        match &self.data {
            None => true,
            Some(d) => {
                let n = index as usize;
                (d.borrow()[n / 8] >> (n % 8)) & 1 != 0
            }
        }
    }

    pub fn set_valid(&self, index: i64) {
        let n = index as usize;
        if let Some(d) = self.data.as_ref() {
            d.borrow_mut()[n / 8] |= 1 << (n % 8);
        }
    }

    pub fn set_na(&self, index: i64) {
        let n = index as usize;
        if let Some(d) = self.data.as_ref() {
            d.borrow_mut()[n / 8] &= !(1 << (n % 8));
        }
    }
}

fn bits_new(n: i64) -> Arc<RefCell<Vec<u8>>> {
    Arc::new(RefCell::new(vec![0u8; bitmap_size(n)]))
}

fn init(b: &mut Bitmap, t: &Type, nitems: i64) -> Result<(), XndError> {
    if t.is_optional() {
        if t.ndim() > 0 {
            return Err(XndError::not_implemented(
                "optional dimensions are not implemented",
            ));
        }
        b.data = Some(bits_new(nitems));
    }

    if !t.subtree_is_optional() {
        return Ok(());
    }

    match t {
        Type::FixedDim { shape, elem, .. } => init(b, elem, nitems * shape),
        Type::VarDim { elem, offsets, .. } => {
            let n = if t.ndim() == 1 {
                *offsets.last().unwrap_or(&0) as i64
            } else {
                nitems
            };
            init(b, elem, n)
        }
        Type::Tuple { types, .. } => {
            let shape = types.len() as i64;
            let n = (nitems * shape) as usize;
            b.children = vec![Bitmap::empty(); n];
            for i in 0..nitems {
                for (k, field_ty) in types.iter().enumerate() {
                    let pos = (i * shape) as usize + k;
                    init(&mut b.children[pos], field_ty, 1)?;
                }
            }
            Ok(())
        }
        Type::Record { fields, .. } => {
            let shape = fields.len() as i64;
            let n = (nitems * shape) as usize;
            b.children = vec![Bitmap::empty(); n];
            for i in 0..nitems {
                for (k, (_, field_ty)) in fields.iter().enumerate() {
                    let pos = (i * shape) as usize + k;
                    init(&mut b.children[pos], field_ty, 1)?;
                }
            }
            Ok(())
        }
        Type::Union { .. } => {
            warn!("bitmap: union types with optional members are not implemented");
            Err(XndError::not_implemented(
                "bitmaps are not implemented for union types",
            ))
        }
        Type::Ref { elem } => {
            b.children = vec![Bitmap::empty(); nitems as usize];
            for i in 0..nitems as usize {
                init(&mut b.children[i], elem, 1)?;
            }
            Ok(())
        }
        Type::Constr { elem, .. } => {
            b.children = vec![Bitmap::empty(); nitems as usize];
            for i in 0..nitems as usize {
                init(&mut b.children[i], elem, 1)?;
            }
            Ok(())
        }
        Type::Nominal { elem, .. } => {
            b.children = vec![Bitmap::empty(); nitems as usize];
            for i in 0..nitems as usize {
                init(&mut b.children[i], elem, 1)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn non_optional_scalar_builds_empty_bitmap() {
        let t = Type::Uint16 { optional: false };
        let b = Bitmap::build(&t).unwrap();
        assert!(b.data.is_none());
        assert!(b.is_valid_bit(0));
    }

    #[test]
    fn optional_scalar_builds_one_bit() {
        let t = Type::Uint16 { optional: true };
        let b = Bitmap::build(&t).unwrap();
        assert!(b.data.is_some());
        assert!(!b.is_valid_bit(0));
        b.set_valid(0);
        assert!(b.is_valid_bit(0));
        b.set_na(0);
        assert!(!b.is_valid_bit(0));
    }

    #[test]
    fn fixed_dim_of_optional_scalar_builds_n_bits() {
        let elem = Arc::new(Type::Uint16 { optional: true });
        let t = Type::FixedDim {
            shape: 10,
            step: 2,
            elem,
            optional: false,
        };
        let b = Bitmap::build(&t).unwrap();
        assert_eq!(b.data.as_ref().unwrap().borrow().len(), bitmap_size(10));
    }

    #[test]
    fn union_with_bitmaps_is_not_implemented() {
        let elem = Arc::new(Type::Uint16 { optional: true });
        let t = Type::Union {
            types: vec![elem],
        };
        // only errors once inner subtree_is_optional is true
        let err = Bitmap::build(&t).unwrap_err();
        assert_eq!(err.kind, crate::error::XndErrorKind::NotImplemented);
    }

    #[test]
    fn tuple_of_optionals_builds_children() {
        let a = Arc::new(Type::Uint16 { optional: true });
        let b_ty = Arc::new(Type::Int32 { optional: false });
        let t = Type::Tuple {
            types: vec![a, b_ty],
            optional: false,
        };
        let b = Bitmap::build(&t).unwrap();
        assert_eq!(b.children.len(), 2);
        assert!(b.children[0].data.is_some());
        assert!(b.children[1].data.is_none());
    }
}
