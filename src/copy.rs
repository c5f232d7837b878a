//! Cross-type copy with numeric coercion.
//!
//! Grounded on `libxnd/copy.c`: NA-first handling, transparent `Ref`
//! unwrapping, structural recursion for container tags, and scalar
//! coercion for the rest. The `2^52` bound below is `copy.c`'s own
//! constant for "every integer up to this magnitude round-trips exactly
//! through an `f64`".

use anyhow::ensure;
use log::warn;

use crate::error::XndError;
use crate::floatpack;
use crate::types::Type;
use crate::view::View;

/// Integers with an absolute value at or below this bound convert to
/// `f64` and back without loss; above it, converting through a float
/// destination is rejected rather than silently truncated.
const EXACT_INT_BOUND: i64 = 1 << 52;

fn check_arity(what: &str, dn: usize, sn: usize) -> anyhow::Result<()> {
    ensure!(dn == sn, "{what} arity mismatch: {dn} vs {sn}");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Num {
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Complex(f64, f64),
}

/// `xnd_copy(dst, src, ctx)`.
pub fn copy(dst: &View, src: &View) -> Result<(), XndError> {
    let dst = unwrap_refs(dst)?;
    let src = unwrap_refs(src)?;

    if src.is_na() {
        if !dst.ty.is_optional() {
            return Err(XndError::value("cannot assign NA to a non-optional slot"));
        }
        dst.set_na();
        return Ok(());
    }

    match (dst.ty.as_ref(), src.ty.as_ref()) {
        (Type::FixedDim { shape: ds, .. }, Type::FixedDim { shape: ss, .. }) => {
            if ds != ss {
                return Err(XndError::value("shape mismatch in fixed dimension copy"));
            }
            for i in 0..*ds {
                copy(&dst.fixed_dim_next(i)?, &src.fixed_dim_next(i)?)?;
            }
        }
        (Type::FixedDim { shape, .. }, Type::VarDim { .. }) => {
            let (_, _, sshape) = crate::types::var_indices(&src.ty, src.index)?;
            if *shape != sshape {
                return Err(XndError::value("shape mismatch in fixed/var copy"));
            }
            for i in 0..*shape {
                copy(&dst.fixed_dim_next(i)?, &src.var_dim_next(i)?)?;
            }
        }
        (Type::VarDim { .. }, Type::VarDim { .. }) => {
            let (_, _, dshape) = crate::types::var_indices(&dst.ty, dst.index)?;
            let (_, _, sshape) = crate::types::var_indices(&src.ty, src.index)?;
            if dshape != sshape {
                return Err(XndError::value("shape mismatch in var dimension copy"));
            }
            for i in 0..dshape {
                copy(&dst.var_dim_next(i)?, &src.var_dim_next(i)?)?;
            }
        }
        (Type::Tuple { types: dt, .. }, Type::Tuple { types: st, .. }) => {
            check_arity("tuple", dt.len(), st.len()).map_err(|e| XndError::value(e.to_string()))?;
            for i in 0..dt.len() as i64 {
                copy(&dst.tuple_next(i)?, &src.tuple_next(i)?)?;
            }
        }
        (Type::Record { fields: df, .. }, Type::Record { fields: sf, .. }) => {
            check_arity("record", df.len(), sf.len())
                .map_err(|e| XndError::value(e.to_string()))?;
            for i in 0..df.len() {
                if sf[i].0 != df[i].0 {
                    return Err(XndError::type_err("record field name mismatch"));
                }
                copy(&dst.record_next(i as i64)?, &src.record_next(i as i64)?)?;
            }
        }
        (Type::Constr { name: dn, .. }, Type::Constr { name: sn, .. }) => {
            if dn != sn {
                return Err(XndError::type_err("constructor name mismatch"));
            }
            copy(&dst.constr_next()?, &src.constr_next()?)?;
        }
        (Type::Nominal { name: dn, .. }, Type::Nominal { name: sn, .. }) => {
            if dn != sn {
                return Err(XndError::type_err("nominal name mismatch"));
            }
            copy(&dst.nominal_next()?, &src.nominal_next()?)?;
        }
        (Type::Constr { elem: de, .. }, _) => {
            let _ = de;
            copy(&dst.constr_next()?, &src_through_constr(&src)?)?;
        }
        (Type::Nominal { elem: de, .. }, _) => {
            let _ = de;
            copy(&dst.nominal_next()?, &src_through_constr(&src)?)?;
        }
        (_, Type::Constr { .. }) => copy(&dst, &src.constr_next()?)?,
        (_, Type::Nominal { .. }) => copy(&dst, &src.nominal_next()?)?,
        (Type::FixedString { size: dsize, encoding: de, .. }, Type::FixedString { size: ssize, encoding: se, .. }) => {
            if dsize != ssize || de != se {
                warn!("copy: fixed string size/encoding mismatch ({dsize}/{de:?} vs {ssize}/{se:?})");
                return Err(XndError::not_implemented(
                    "fixed string copy requires matching size and encoding",
                ));
            }
            dst.write_data(&src.data());
        }
        (Type::FixedBytes { size: dsize, .. }, Type::FixedBytes { size: ssize, .. }) => {
            if dsize != ssize {
                return Err(XndError::value("fixed bytes size mismatch"));
            }
            dst.write_data(&src.data());
        }
        (Type::String { .. }, Type::String { .. }) => {
            let handle = crate::master::read_handle(&dst.data());
            if dst.buffer.string_at(handle).is_some() && !dst.owns(crate::master::own::STRINGS) {
                return Err(XndError::runtime(
                    "cannot overwrite a string slot the destination does not own",
                ));
            }
            let bytes = crate::master::read_handle(&src.data());
            let payload = src
                .buffer
                .string_at(bytes)
                .ok_or_else(|| XndError::runtime("dangling string handle"))?;
            dst.buffer.replace_string(handle, &payload);
        }
        (Type::Bytes { .. }, Type::Bytes { .. }) => {
            let handle = crate::master::read_handle(&dst.data());
            if dst.buffer.bytes_at(handle).is_some() && !dst.owns(crate::master::own::BYTES) {
                return Err(XndError::runtime(
                    "cannot overwrite a bytes slot the destination does not own",
                ));
            }
            let src_handle = crate::master::read_handle(&src.data());
            let (size, payload) = src
                .buffer
                .bytes_at(src_handle)
                .ok_or_else(|| XndError::runtime("dangling bytes handle"))?;
            dst.buffer.replace_bytes(handle, size, &payload);
        }
        (Type::Categorical { levels: dl, .. }, Type::Categorical { levels: sl, .. }) => {
            if dl != sl {
                warn!("copy: categorical level sets differ, not implemented");
                return Err(XndError::not_implemented(
                    "copy between different categorical level sets is not implemented",
                ));
            }
            dst.write_data(&src.data());
        }
        _ => copy_scalar(&dst, &src)?,
    }

    if dst.ty.is_optional() {
        dst.set_valid();
    }
    Ok(())
}

fn unwrap_refs(v: &View) -> Result<View, XndError> {
    v.unwrap_all_refs()
}

fn src_through_constr(v: &View) -> Result<View, XndError> {
    match v.ty.as_ref() {
        Type::Constr { .. } => v.constr_next(),
        Type::Nominal { .. } => v.nominal_next(),
        _ => Ok(v.clone()),
    }
}

fn copy_scalar(dst: &View, src: &View) -> Result<(), XndError> {
    let n = read_num(src)?;
    write_num(dst, n)
}

pub(crate) fn read_num(v: &View) -> Result<Num, XndError> {
    let data = v.data();
    Ok(match v.ty.as_ref() {
        Type::Bool { .. } => Num::Bool(data[0] != 0),
        Type::Int8 { .. } => Num::I64(data[0] as i8 as i64),
        Type::Int16 { .. } => Num::I64(i16::from_ne_bytes([data[0], data[1]]) as i64),
        Type::Int32 { .. } => {
            Num::I64(i32::from_ne_bytes([data[0], data[1], data[2], data[3]]) as i64)
        }
        Type::Int64 { .. } => Num::I64(i64::from_ne_bytes(data[..8].try_into().unwrap())),
        Type::Uint8 { .. } => Num::U64(data[0] as u64),
        Type::Uint16 { .. } => Num::U64(u16::from_ne_bytes([data[0], data[1]]) as u64),
        Type::Uint32 { .. } => {
            Num::U64(u32::from_ne_bytes([data[0], data[1], data[2], data[3]]) as u64)
        }
        Type::Uint64 { .. } => Num::U64(u64::from_ne_bytes(data[..8].try_into().unwrap())),
        Type::Float16 { le, .. } => {
            Num::F64(floatpack::unpack2(&[data[0], data[1]], *le))
        }
        Type::Float32 { le, .. } => {
            Num::F64(floatpack::unpack4(&data[..4].try_into().unwrap(), *le))
        }
        Type::Float64 { le, .. } => {
            Num::F64(floatpack::unpack8(&data[..8].try_into().unwrap(), *le))
        }
        Type::BFloat16 { le, .. } => {
            let bits = if *le {
                u16::from_le_bytes([data[0], data[1]])
            } else {
                u16::from_be_bytes([data[0], data[1]])
            };
            Num::F64(floatpack::bfloat_unpack(bits))
        }
        Type::Complex32 { le, .. } => {
            let re = floatpack::unpack2(&[data[0], data[1]], *le);
            let im = floatpack::unpack2(&[data[2], data[3]], *le);
            Num::Complex(re, im)
        }
        Type::Complex64 { le, .. } => {
            let re = floatpack::unpack4(&data[0..4].try_into().unwrap(), *le);
            let im = floatpack::unpack4(&data[4..8].try_into().unwrap(), *le);
            Num::Complex(re, im)
        }
        Type::Complex128 { le, .. } => {
            let re = floatpack::unpack8(&data[0..8].try_into().unwrap(), *le);
            let im = floatpack::unpack8(&data[8..16].try_into().unwrap(), *le);
            Num::Complex(re, im)
        }
        _ => return Err(XndError::not_implemented("copy: unsupported scalar source type")),
    })
}

fn write_num(dst: &View, n: Num) -> Result<(), XndError> {
    match dst.ty.as_ref() {
        Type::Bool { .. } => dst.write_data(&[if as_bool(&n) { 1 } else { 0 }]),
        Type::Int8 { .. } => {
            let v = as_i64(&n)?;
            in_range(v, i8::MIN as i64, i8::MAX as i64)?;
            dst.write_data(&[(v as i8) as u8]);
        }
        Type::Int16 { .. } => {
            let v = as_i64(&n)?;
            in_range(v, i16::MIN as i64, i16::MAX as i64)?;
            dst.write_data(&(v as i16).to_ne_bytes());
        }
        Type::Int32 { .. } => {
            let v = as_i64(&n)?;
            in_range(v, i32::MIN as i64, i32::MAX as i64)?;
            dst.write_data(&(v as i32).to_ne_bytes());
        }
        Type::Int64 { .. } => {
            let v = as_i64(&n)?;
            dst.write_data(&v.to_ne_bytes());
        }
        Type::Uint8 { .. } => {
            let v = as_u64(&n)?;
            in_urange(v, u8::MAX as u64)?;
            dst.write_data(&[v as u8]);
        }
        Type::Uint16 { .. } => {
            let v = as_u64(&n)?;
            in_urange(v, u16::MAX as u64)?;
            dst.write_data(&(v as u16).to_ne_bytes());
        }
        Type::Uint32 { .. } => {
            let v = as_u64(&n)?;
            in_urange(v, u32::MAX as u64)?;
            dst.write_data(&(v as u32).to_ne_bytes());
        }
        Type::Uint64 { .. } => {
            let v = as_u64(&n)?;
            dst.write_data(&v.to_ne_bytes());
        }
        Type::Float16 { le, .. } => {
            let v = as_f64_checked(&n)?;
            dst.write_data(&floatpack::pack2(v, *le)?);
        }
        Type::Float32 { le, .. } => {
            let v = as_f64_checked(&n)?;
            dst.write_data(&floatpack::pack4(v, *le)?);
        }
        Type::Float64 { le, .. } => {
            let v = as_f64_checked(&n)?;
            dst.write_data(&floatpack::pack8(v, *le));
        }
        Type::BFloat16 { le, .. } => {
            let v = as_f64_checked(&n)?;
            let bits = floatpack::bfloat_pack(v);
            dst.write_data(&if *le {
                bits.to_le_bytes()
            } else {
                bits.to_be_bytes()
            });
        }
        Type::Complex32 { le, .. } => {
            let (re, im) = as_complex(&n)?;
            let mut out = [0u8; 4];
            out[0..2].copy_from_slice(&floatpack::pack2(re, *le)?);
            out[2..4].copy_from_slice(&floatpack::pack2(im, *le)?);
            dst.write_data(&out);
        }
        Type::Complex64 { le, .. } => {
            let (re, im) = as_complex(&n)?;
            let mut out = [0u8; 8];
            out[0..4].copy_from_slice(&floatpack::pack4(re, *le)?);
            out[4..8].copy_from_slice(&floatpack::pack4(im, *le)?);
            dst.write_data(&out);
        }
        Type::Complex128 { le, .. } => {
            let (re, im) = as_complex(&n)?;
            let mut out = [0u8; 16];
            out[0..8].copy_from_slice(&floatpack::pack8(re, *le));
            out[8..16].copy_from_slice(&floatpack::pack8(im, *le));
            dst.write_data(&out);
        }
        _ => return Err(XndError::not_implemented("copy: unsupported scalar destination type")),
    }
    Ok(())
}

fn as_bool(n: &Num) -> bool {
    match n {
        Num::Bool(b) => *b,
        Num::I64(v) => *v != 0,
        Num::U64(v) => *v != 0,
        Num::F64(v) => *v != 0.0,
        Num::Complex(re, im) => *re != 0.0 || *im != 0.0,
    }
}

fn as_i64(n: &Num) -> Result<i64, XndError> {
    match n {
        Num::Bool(b) => Ok(if *b { 1 } else { 0 }),
        Num::I64(v) => Ok(*v),
        Num::U64(v) => i64::try_from(*v).map_err(|_| XndError::value("integer overflow in copy")),
        Num::F64(v) => {
            if v.fract() != 0.0 {
                return Err(XndError::value("cannot copy a non-integral float to an integer"));
            }
            if v.abs() > EXACT_INT_BOUND as f64 {
                return Err(XndError::value("float magnitude too large for exact integer copy"));
            }
            Ok(*v as i64)
        }
        Num::Complex(..) => Err(XndError::value("cannot copy a complex value to an integer")),
    }
}

fn as_u64(n: &Num) -> Result<u64, XndError> {
    let v = as_i64(n)?;
    u64::try_from(v).map_err(|_| XndError::value("negative value cannot be copied to an unsigned type"))
}

fn as_f64_checked(n: &Num) -> Result<f64, XndError> {
    match n {
        Num::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Num::I64(v) => {
            if v.unsigned_abs() as i64 > EXACT_INT_BOUND {
                return Err(XndError::value("integer magnitude too large for exact float copy"));
            }
            Ok(*v as f64)
        }
        Num::U64(v) => {
            if *v > EXACT_INT_BOUND as u64 {
                return Err(XndError::value("integer magnitude too large for exact float copy"));
            }
            Ok(*v as f64)
        }
        Num::F64(v) => Ok(*v),
        Num::Complex(re, im) => {
            if *im != 0.0 {
                return Err(XndError::value("cannot copy a complex value with a nonzero imaginary part to a real type"));
            }
            Ok(*re)
        }
    }
}

fn as_complex(n: &Num) -> Result<(f64, f64), XndError> {
    match n {
        Num::Complex(re, im) => Ok((*re, *im)),
        other => Ok((as_f64_checked(other)?, 0.0)),
    }
}

fn in_range(v: i64, lo: i64, hi: i64) -> Result<(), XndError> {
    if v < lo || v > hi {
        return Err(XndError::value("integer out of range for destination type"));
    }
    Ok(())
}

fn in_urange(v: u64, hi: u64) -> Result<(), XndError> {
    if v > hi {
        return Err(XndError::value("integer out of range for destination type"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::{Allocator, Master};
    use std::sync::Arc;

    fn scalar_master(ty: Type) -> Master {
        Master::empty(Arc::new(ty), Allocator::Plain).unwrap()
    }

    #[test]
    fn copy_int32_to_int64_widens() {
        let src_m = scalar_master(Type::Int32 { optional: false });
        src_m.view.write_data(&42i32.to_ne_bytes());
        let dst_m = scalar_master(Type::Int64 { optional: false });
        copy(&dst_m.view, &src_m.view).unwrap();
        assert_eq!(
            i64::from_ne_bytes(dst_m.view.data()[..8].try_into().unwrap()),
            42
        );
    }

    #[test]
    fn copy_int_to_float_roundtrips_exactly() {
        let src_m = scalar_master(Type::Int64 { optional: false });
        src_m.view.write_data(&1234i64.to_ne_bytes());
        let dst_m = scalar_master(Type::Float64 {
            le: true,
            optional: false,
        });
        copy(&dst_m.view, &src_m.view).unwrap();
        let bytes: [u8; 8] = dst_m.view.data()[..8].try_into().unwrap();
        assert_eq!(floatpack::unpack8(&bytes, true), 1234.0);
    }

    #[test]
    fn copy_oversized_int_to_float_rejected() {
        let src_m = scalar_master(Type::Int64 { optional: false });
        src_m.view.write_data(&(1i64 << 60).to_ne_bytes());
        let dst_m = scalar_master(Type::Float64 {
            le: true,
            optional: false,
        });
        assert!(copy(&dst_m.view, &src_m.view).is_err());
    }

    #[test]
    fn copy_na_requires_optional_destination() {
        let src_m = scalar_master(Type::Int64 { optional: true });
        src_m.view.set_na();
        let dst_m = scalar_master(Type::Int64 { optional: false });
        assert!(copy(&dst_m.view, &src_m.view).is_err());
    }

    #[test]
    fn copy_na_into_optional_destination_sets_na() {
        let src_m = scalar_master(Type::Int64 { optional: true });
        src_m.view.set_na();
        let dst_m = scalar_master(Type::Int64 { optional: true });
        dst_m.view.set_valid();
        copy(&dst_m.view, &src_m.view).unwrap();
        assert!(dst_m.view.is_na());
    }

    #[test]
    fn copy_string_into_owning_destination_replaces_payload() {
        let src_m = scalar_master(Type::String { optional: false });
        let handle = src_m.view.buffer.alloc_string(b"hello");
        src_m.view.write_data(&crate::master::handle_bytes(handle));

        let dst_m = scalar_master(Type::String { optional: false });
        copy(&dst_m.view, &src_m.view).unwrap();

        let dst_handle = crate::master::read_handle(&dst_m.view.data());
        assert_eq!(
            dst_m.view.buffer.string_at(dst_handle).unwrap(),
            b"hello".to_vec()
        );
    }

    #[test]
    fn copy_string_into_non_owning_destination_with_existing_payload_is_rejected() {
        let src_m = scalar_master(Type::String { optional: false });
        let handle = src_m.view.buffer.alloc_string(b"hello");
        src_m.view.write_data(&crate::master::handle_bytes(handle));

        let dst_m = Master::adopt(
            Arc::new(Type::String { optional: false }),
            vec![0u8; 8],
            Allocator::Plain,
        )
        .unwrap();
        dst_m.view.buffer.alloc_string(b"already there");

        let err = copy(&dst_m.view, &src_m.view).unwrap_err();
        assert_eq!(err.kind, crate::error::XndErrorKind::Runtime);
    }
}
