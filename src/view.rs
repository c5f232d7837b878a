//! `View`, the library's central record, and the traversal primitives.
//!
//! Grounded on `libxnd/xnd.h`'s inline `xnd_fixed_dim_next`/
//! `xnd_var_dim_next`/`xnd_tuple_next`/`xnd_record_next`/`xnd_ref_next`/
//! `xnd_constr_next`/`xnd_nominal_next`, plus a `union_next` this crate
//! adds to keep the tag-dispatch exhaustive (the distilled spec
//! describes it in prose at §4.1 without naming a C symbol).

use std::sync::Arc;

use crate::bitmap::Bitmap;
use crate::error::XndError;
use crate::master::BufferHandle;
use crate::types::{var_indices, Ty, Type};

/// A value in a backing buffer: `{bitmap, index, type, ptr}`.
#[derive(Clone)]
pub struct View {
    pub bitmap: Bitmap,
    pub index: i64,
    pub ty: Ty,
    /// Byte offset into `buffer`, not a raw pointer (§10.2: no `unsafe`
    /// in this crate's public surface).
    pub ptr: usize,
    pub buffer: BufferHandle,
}

impl View {
    pub fn root(ty: Ty, bitmap: Bitmap, buffer: BufferHandle) -> View {
        View {
            bitmap,
            index: 0,
            ty,
            ptr: 0,
            buffer,
        }
    }

    pub fn with(&self, ty: Ty, bitmap: Bitmap, index: i64, ptr: usize) -> View {
        View {
            bitmap,
            index,
            ty,
            ptr,
            buffer: self.buffer.clone(),
        }
    }

    /// Whether the buffer backing this view owns the given `master::own`
    /// bit. Shared by every view into the same buffer.
    pub fn owns(&self, bit: u32) -> bool {
        self.buffer.owns.get() & bit != 0
    }

    pub fn is_valid(&self) -> bool {
        if !self.ty.is_optional() {
            return true;
        }
        self.bitmap.is_valid_bit(self.index)
    }

    pub fn is_na(&self) -> bool {
        if !self.ty.is_optional() {
            return false;
        }
        !self.bitmap.is_valid_bit(self.index)
    }

    pub fn set_valid(&self) {
        debug_assert!(self.ty.is_optional());
        self.bitmap.set_valid(self.index);
    }

    pub fn set_na(&self) {
        debug_assert!(self.ty.is_optional());
        self.bitmap.set_na(self.index);
    }

    pub fn data(&self) -> Vec<u8> {
        let n = self.ty.datasize() as usize;
        self.buffer.data.borrow()[self.ptr..self.ptr + n].to_vec()
    }

    pub fn write_data(&self, bytes: &[u8]) {
        let n = bytes.len();
        self.buffer.data.borrow_mut()[self.ptr..self.ptr + n].copy_from_slice(bytes);
    }

    /// `fixed_dim_next(V, i)`.
    #[inline]
    pub fn fixed_dim_next(&self, i: i64) -> Result<View, XndError> {
        let (shape, elem) = match self.ty.as_ref() {
            Type::FixedDim { shape, elem, .. } => (*shape, elem.clone()),
            _ => return Err(XndError::runtime("fixed_dim_next: not a FixedDim")),
        };
        if i < 0 || i >= shape {
            return Err(XndError::index("index out of range"));
        }

        let step = match self.ty.as_ref() {
            Type::FixedDim { step, .. } => *step,
            _ => unreachable!(),
        };

        let new_index = self.index + i * step;
        let ptr = if elem.ndim() == 0 {
            self.ptr + (new_index as usize) * (elem.datasize() as usize)
        } else {
            self.ptr
        };

        Ok(self.with(elem, self.bitmap.clone(), new_index, ptr))
    }

    /// `var_dim_next(V, start, step, i)`; `start`/`step`/`shape` come
    /// from [`var_indices`].
    #[inline]
    pub fn var_dim_next(&self, i: i64) -> Result<View, XndError> {
        let elem = match self.ty.as_ref() {
            Type::VarDim { elem, .. } => elem.clone(),
            _ => return Err(XndError::runtime("var_dim_next: not a VarDim")),
        };
        let (start, step, shape) = var_indices(&self.ty, self.index)?;
        if i < 0 || i >= shape {
            return Err(XndError::index("index out of range"));
        }

        let new_index = start + i * step;
        let ptr = if elem.ndim() == 0 {
            self.ptr + (new_index as usize) * (elem.datasize() as usize)
        } else {
            self.ptr
        };

        Ok(self.with(elem, self.bitmap.clone(), new_index, ptr))
    }

    /// `tuple_next(V, i)`.
    #[inline]
    pub fn tuple_next(&self, i: i64) -> Result<View, XndError> {
        let types = match self.ty.as_ref() {
            Type::Tuple { types, .. } => types,
            _ => return Err(XndError::runtime("tuple_next: not a Tuple")),
        };
        let shape = types.len() as i64;
        if i < 0 || i >= shape {
            return Err(XndError::index("index out of range"));
        }
        let offset: i64 = types[..i as usize].iter().map(|t| t.datasize()).sum();
        let elem = types[i as usize].clone();
        let bitmap = self.bitmap.child(self.index, shape, i)?;
        Ok(self.with(elem, bitmap, 0, self.ptr + offset as usize))
    }

    /// `record_next(V, i)`.
    #[inline]
    pub fn record_next(&self, i: i64) -> Result<View, XndError> {
        let fields = match self.ty.as_ref() {
            Type::Record { fields, .. } => fields,
            _ => return Err(XndError::runtime("record_next: not a Record")),
        };
        let shape = fields.len() as i64;
        if i < 0 || i >= shape {
            return Err(XndError::index("index out of range"));
        }
        let offset: i64 = fields[..i as usize].iter().map(|(_, t)| t.datasize()).sum();
        let elem = fields[i as usize].1.clone();
        let bitmap = self.bitmap.child(self.index, shape, i)?;
        Ok(self.with(elem, bitmap, 0, self.ptr + offset as usize))
    }

    /// Linear lookup of a record field by name.
    pub fn record_field_index(&self, name: &str) -> Result<i64, XndError> {
        match self.ty.as_ref() {
            Type::Record { fields, .. } => fields
                .iter()
                .position(|(n, _)| n == name)
                .map(|p| p as i64)
                .ok_or_else(|| XndError::value(format!("no such field: {name}"))),
            _ => Err(XndError::runtime("record_field_index: not a Record")),
        }
    }

    /// `ref_next(V)` — reads the 8-byte handle `master::init_refs` wrote
    /// at `self.ptr` and redirects `ptr` to the offset it names, rather
    /// than reinterpreting the handle bytes themselves as the payload.
    #[inline]
    pub fn ref_next(&self) -> Result<View, XndError> {
        let elem = match self.ty.as_ref() {
            Type::Ref { elem } => elem.clone(),
            _ => return Err(XndError::runtime("ref_next: not a Ref")),
        };
        let handle = crate::master::read_handle(&self.data());
        let bitmap = self.bitmap.child(self.index, 1, 0)?;
        Ok(self.with(elem, bitmap, 0, handle as usize))
    }

    /// `constr_next(V)`.
    #[inline]
    pub fn constr_next(&self) -> Result<View, XndError> {
        let elem = match self.ty.as_ref() {
            Type::Constr { elem, .. } => elem.clone(),
            _ => return Err(XndError::runtime("constr_next: not a Constr")),
        };
        let bitmap = self.bitmap.child(self.index, 1, 0)?;
        Ok(self.with(elem, bitmap, 0, self.ptr))
    }

    /// `nominal_next(V)`.
    #[inline]
    pub fn nominal_next(&self) -> Result<View, XndError> {
        let elem = match self.ty.as_ref() {
            Type::Nominal { elem, .. } => elem.clone(),
            _ => return Err(XndError::runtime("nominal_next: not a Nominal")),
        };
        let bitmap = self.bitmap.child(self.index, 1, 0)?;
        Ok(self.with(elem, bitmap, 0, self.ptr))
    }

    /// `union_next(V)` — the discriminator byte lives at `V.ptr`; the
    /// payload starts one byte later.
    #[inline]
    pub fn union_next(&self) -> Result<View, XndError> {
        let types = match self.ty.as_ref() {
            Type::Union { types } => types,
            _ => return Err(XndError::runtime("union_next: not a Union")),
        };
        let tag = self.buffer.data.borrow()[self.ptr] as usize;
        let elem = types
            .get(tag)
            .cloned()
            .ok_or_else(|| XndError::runtime("union tag out of range"))?;
        Ok(self.with(elem, Bitmap::empty(), 0, self.ptr + 1))
    }

    /// Unwraps one level of `Ref` if present, otherwise returns a clone
    /// of self. Used by copy/equal's "unwrap every Ref" loop (§4.4/§4.9).
    pub fn unwrap_ref(&self) -> Result<View, XndError> {
        if matches!(self.ty.as_ref(), Type::Ref { .. }) {
            self.ref_next()
        } else {
            Ok(self.clone())
        }
    }

    pub fn unwrap_all_refs(&self) -> Result<View, XndError> {
        let mut v = self.clone();
        while matches!(v.ty.as_ref(), Type::Ref { .. }) {
            v = v.ref_next()?;
        }
        Ok(v)
    }
}

pub(crate) fn arc_eq(a: &Ty, b: &Ty) -> bool {
    Arc::ptr_eq(a, b)
}
