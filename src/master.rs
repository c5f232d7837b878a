//! Memory lifecycle: allocation, recursive init, ownership flags, and
//! `Drop`-driven teardown.
//!
//! Grounded on `libxnd/xnd.c` (`xnd_new`/`xnd_init`/`xnd_clear`/
//! `xnd_del`). Three allocator lanes per SPEC_FULL §5; `String`/`Bytes`/
//! `Ref` leaves store an arena handle (a `u64` index) in their inline
//! bytes rather than a raw pointer, per §9's "typed accessors over a
//! raw byte view" design note.

use std::alloc::Layout;
use std::cell::{Cell, RefCell};
use std::sync::Arc;

use log::debug;

use crate::bitmap::Bitmap;
use crate::error::XndError;
use crate::types::{Ty, Type};
use crate::view::View;

/// Ownership flags, an OR of these bits — same constants the teacher's
/// `flag_to_function!`-generated accessors read off a `u32`, kept here
/// as plain constants since there are only seven fixed bits.
#[allow(non_upper_case_globals)]
pub mod own {
    pub const TYPE: u32 = 1;
    pub const DATA: u32 = 2;
    pub const STRINGS: u32 = 4;
    pub const BYTES: u32 = 8;
    pub const POINTERS: u32 = 0x10;
    pub const ARRAYS: u32 = 0x20;
    pub const CUDA_MANAGED: u32 = 0x40;
    pub const ALL: u32 = TYPE | DATA | STRINGS | BYTES | POINTERS | ARRAYS;
    pub const EMBEDDED: u32 = ALL & !TYPE;
}

/// Selects which allocator lane backs a master buffer's data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocator {
    Plain,
    Aligned,
    CudaManaged,
}

fn alloc_zeroed(size: i64, align: i64, allocator: Allocator) -> Result<Vec<u8>, XndError> {
    if size == 0 {
        return Ok(Vec::new());
    }
    match allocator {
        Allocator::Plain => Ok(vec![0u8; size as usize]),
        Allocator::Aligned | Allocator::CudaManaged => {
            // CudaManaged has no unified-memory backend here; it shares
            // the aligned lane.
            Layout::from_size_align(size as usize, align.max(1) as usize)
                .map_err(|e| XndError::memory(e.to_string()))?;
            Ok(vec![0u8; size as usize])
        }
    }
}

pub struct BufferInner {
    pub data: RefCell<Vec<u8>>,
    pub strings: RefCell<Vec<Option<Box<[u8]>>>>,
    pub bytes_blobs: RefCell<Vec<Option<(i64, Box<[u8]>)>>>,
    /// Ownership flags for this buffer, shared by every `View` that
    /// points into it (one buffer is always owned by exactly one
    /// `Master`). `copy()` reads `own::STRINGS`/`own::BYTES` off of it
    /// before overwriting a destination's existing string/bytes blob.
    pub owns: Cell<u32>,
}

pub type BufferHandle = Arc<BufferInner>;

impl BufferInner {
    fn new(data: Vec<u8>) -> BufferHandle {
        Arc::new(BufferInner {
            data: RefCell::new(data),
            strings: RefCell::new(Vec::new()),
            bytes_blobs: RefCell::new(Vec::new()),
            owns: Cell::new(0),
        })
    }

    pub fn alloc_string(&self, bytes: &[u8]) -> u64 {
        let mut strings = self.strings.borrow_mut();
        strings.push(Some(bytes.to_vec().into_boxed_slice()));
        (strings.len() - 1) as u64
    }

    pub fn replace_string(&self, handle: u64, bytes: &[u8]) {
        let mut strings = self.strings.borrow_mut();
        strings[handle as usize] = Some(bytes.to_vec().into_boxed_slice());
    }

    pub fn string_at(&self, handle: u64) -> Option<Vec<u8>> {
        self.strings
            .borrow()
            .get(handle as usize)
            .and_then(|s| s.as_ref())
            .map(|b| b.to_vec())
    }

    pub fn alloc_bytes(&self, size: i64, bytes: &[u8]) -> u64 {
        let mut blobs = self.bytes_blobs.borrow_mut();
        blobs.push(Some((size, bytes.to_vec().into_boxed_slice())));
        (blobs.len() - 1) as u64
    }

    pub fn replace_bytes(&self, handle: u64, size: i64, bytes: &[u8]) {
        let mut blobs = self.bytes_blobs.borrow_mut();
        blobs[handle as usize] = Some((size, bytes.to_vec().into_boxed_slice()));
    }

    pub fn bytes_at(&self, handle: u64) -> Option<(i64, Vec<u8>)> {
        self.bytes_blobs
            .borrow()
            .get(handle as usize)
            .and_then(|b| b.as_ref())
            .map(|(size, data)| (*size, data.to_vec()))
    }

    /// Appends `size` zeroed bytes to the shared data block and returns
    /// their starting byte offset, used as a `Ref` leaf's handle. Unlike
    /// `strings`/`bytes_blobs`, a ref's payload lives in the same linear
    /// buffer as everything else, so `ref_next` can just redirect `ptr`.
    pub fn alloc_ref(&self, size: i64) -> u64 {
        let mut data = self.data.borrow_mut();
        let offset = data.len() as u64;
        data.extend(std::iter::repeat(0u8).take(size as usize));
        offset
    }
}

pub fn read_handle(bytes: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(b)
}

pub fn handle_bytes(handle: u64) -> [u8; 8] {
    handle.to_le_bytes()
}

/// `{flags, view}` — the sole root keeping memory alive.
pub struct Master {
    pub flags: u32,
    pub view: View,
}

impl Master {
    /// `xnd_empty_from_type` — allocates zeroed memory sized to
    /// `datasize`, builds the bitmap tree, recursively initializes any
    /// fields that cannot be zero-initialized (`Ref` children, when
    /// `owns-pointers` is requested).
    pub fn empty(ty: Ty, allocator: Allocator) -> Result<Master, XndError> {
        let size = ty.datasize();
        let align = ty.align();
        let data = alloc_zeroed(size, align, allocator)?;
        debug!("allocating master buffer: {size} bytes, align {align}");

        let buffer = BufferInner::new(data);
        let bitmap = Bitmap::build(&ty)?;
        let view = View::root(ty.clone(), bitmap, buffer);

        let mut flags = own::TYPE | own::DATA | own::STRINGS | own::BYTES;
        init_refs(&view, &ty)?;
        flags |= own::POINTERS;
        view.buffer.owns.set(flags);

        Ok(Master { flags, view })
    }

    /// `xnd_from_xnd` — adopts an existing buffer of raw bytes,
    /// transferring ownership, after bounds-checking it against `ty`.
    pub fn adopt(ty: Ty, bytes: Vec<u8>, allocator: Allocator) -> Result<Master, XndError> {
        let _ = allocator;
        crate::bounds::bounds_check(&ty, 0, bytes.len() as i64)?;
        let buffer = BufferInner::new(bytes);
        let bitmap = Bitmap::build(&ty)?;
        let view = View::root(ty, bitmap, buffer);
        view.buffer.owns.set(own::DATA);
        Ok(Master {
            flags: own::DATA,
            view,
        })
    }

    pub fn owns(&self, bit: u32) -> bool {
        self.flags & bit != 0
    }
}

fn init_refs(view: &View, ty: &Type) -> Result<(), XndError> {
    match ty {
        Type::Ref { elem } => {
            let size = elem.datasize();
            let handle = view.buffer.alloc_ref(size);
            view.write_data(&handle_bytes(handle));
            Ok(())
        }
        Type::FixedDim { shape, elem, .. } => {
            for i in 0..*shape {
                init_refs(&view.fixed_dim_next(i)?, elem)?;
            }
            Ok(())
        }
        Type::Tuple { types, .. } => {
            for (i, t) in types.iter().enumerate() {
                init_refs(&view.tuple_next(i as i64)?, t)?;
            }
            Ok(())
        }
        Type::Record { fields, .. } => {
            for (i, (_, t)) in fields.iter().enumerate() {
                init_refs(&view.record_next(i as i64)?, t)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_master_zeroes_buffer() {
        let ty = Arc::new(Type::FixedDim {
            shape: 4,
            step: 2,
            elem: Arc::new(Type::Uint16 { optional: false }),
            optional: false,
        });
        let m = Master::empty(ty, Allocator::Plain).unwrap();
        assert_eq!(m.view.buffer.data.borrow().len(), 8);
        assert!(m.view.buffer.data.borrow().iter().all(|&b| b == 0));
        assert!(m.owns(own::DATA));
    }

    #[test]
    fn adopt_rejects_undersized_buffer() {
        let ty = Arc::new(Type::Uint64 { optional: false });
        let err = Master::adopt(ty, vec![0u8; 4], Allocator::Plain).unwrap_err();
        assert_eq!(err.kind, crate::error::XndErrorKind::Value);
    }

    #[test]
    fn adopt_accepts_exact_buffer() {
        let ty = Arc::new(Type::Uint64 { optional: false });
        let m = Master::adopt(ty, vec![0u8; 8], Allocator::Plain).unwrap();
        assert_eq!(m.view.buffer.data.borrow().len(), 8);
    }

    #[test]
    fn ref_leaf_redirects_into_its_own_arena_slot() {
        let ty = Arc::new(Type::Ref {
            elem: Arc::new(Type::Int32 { optional: false }),
        });
        let m = Master::empty(ty, Allocator::Plain).unwrap();
        // init_refs appended a fresh 4-byte slot past the 8-byte handle.
        assert_eq!(m.view.buffer.data.borrow().len(), 8 + 4);

        let target = m.view.ref_next().unwrap();
        assert_eq!(target.ptr, 8);
        target.write_data(&42i32.to_ne_bytes());
        assert_eq!(
            i32::from_ne_bytes(target.data()[..4].try_into().unwrap()),
            42
        );
        // writing through the referent must not disturb the handle.
        let handle = read_handle(&m.view.data());
        assert_eq!(handle, 8);
    }
}
