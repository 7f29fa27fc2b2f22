//! Decoding of stored variables into [ndarray] arrays.

use crate::error::WxError;
use crate::filter_pipeline::filter_pipeline;
use crate::manifest::VariableEncoding;
use crate::models::{DType, Order};
use crate::types::byte_order::{SwapBytes, NATIVE_BYTE_ORDER};
use crate::types::dvalue::TryFromDValue;
use crate::types::Missing;

use bytes::Bytes;
use ndarray::prelude::*;
use ndarray::{ErrorKind, ShapeBuilder, ShapeError};
use num_traits::ToPrimitive;

/// A numeric element type that variables may be stored as.
pub trait Element:
    Copy
    + std::fmt::Debug
    + PartialOrd
    + Send
    + Sync
    + ToPrimitive
    + SwapBytes
    + TryFromDValue
    + zerocopy::FromBytes
    + 'static
{
}

impl<T> Element for T where
    T: Copy
        + std::fmt::Debug
        + PartialOrd
        + Send
        + Sync
        + ToPrimitive
        + SwapBytes
        + TryFromDValue
        + zerocopy::FromBytes
        + 'static
{
}

/// Convert from Bytes to `&[T]`.
///
/// Zerocopy provides a mechanism for converting between types.
/// Correct alignment of the data is necessary.
///
/// # Arguments
///
/// * `data`: Bytes containing data to convert.
fn from_bytes<T: zerocopy::FromBytes>(data: &Bytes) -> Result<&[T], WxError> {
    let layout = zerocopy::LayoutVerified::<_, [T]>::new_slice(&data[..]).ok_or(
        WxError::FromBytes {
            type_name: std::any::type_name::<T>(),
        },
    )?;
    Ok(layout.into_slice())
}

/// Returns `data`, copied into an 8-byte aligned buffer if it is not already suitably aligned
/// for `T`.
fn aligned<T>(data: Bytes) -> Bytes {
    if data.as_ptr().align_offset(std::mem::align_of::<T>()) == 0 {
        return data;
    }
    let mut buf = maligned::align_first::<u8, maligned::A8>(data.len());
    buf.extend_from_slice(&data);
    buf.into()
}

/// Returns a `[time, latitude, longitude]` view of `data`.
fn build_array_from_shape<T>(
    shape: [usize; 3],
    order: Option<Order>,
    data: &[T],
) -> Result<ArrayView3<T>, WxError> {
    let expected: usize = shape.iter().product();
    if data.len() != expected {
        return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
    }
    let view = match order {
        Some(Order::F) => ArrayView3::from_shape(shape.f(), data),
        _ => ArrayView3::from_shape(shape, data),
    };
    Ok(view?)
}

/// Decode typed elements, converting missing values to NaN.
fn decode_typed<T: Element>(
    variable: &VariableEncoding,
    data: Bytes,
    shape: [usize; 3],
) -> Result<Array3<f64>, WxError> {
    let data = aligned::<T>(data);
    let values = from_bytes::<T>(&data)?;
    let view = build_array_from_shape(shape, variable.order, values)?;
    let missing = variable
        .missing
        .as_ref()
        .map(Missing::<T>::try_from)
        .transpose()?;
    let swap = variable.byte_order.unwrap_or(NATIVE_BYTE_ORDER) != NATIVE_BYTE_ORDER;
    Ok(view.map(|value| {
        let value = if swap { value.swap_bytes() } else { *value };
        match &missing {
            Some(missing) if missing.is_missing(&value) => f64::NAN,
            _ => value.to_f64().unwrap_or(f64::NAN),
        }
    }))
}

/// Decode the stored bytes of a variable into a `[time, latitude, longitude]` array of f64.
///
/// Values flagged as missing by the variable's missing data descriptor become NaN.
///
/// # Arguments
///
/// * `variable`: Encoding of the variable
/// * `data`: Stored bytes of the variable
/// * `shape`: Shape of the decoded variable
pub fn decode_variable(
    variable: &VariableEncoding,
    data: &Bytes,
    shape: [usize; 3],
) -> Result<Array3<f64>, WxError> {
    let decoded_size = shape.iter().product::<usize>() * variable.dtype.size_of();
    let data = filter_pipeline(variable, data, decoded_size)?;
    if data.len() != decoded_size {
        return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
    }
    match variable.dtype {
        DType::Int32 => decode_typed::<i32>(variable, data, shape),
        DType::Int64 => decode_typed::<i64>(variable, data, shape),
        DType::Uint32 => decode_typed::<u32>(variable, data, shape),
        DType::Uint64 => decode_typed::<u64>(variable, data, shape),
        DType::Float32 => decode_typed::<f32>(variable, data, shape),
        DType::Float64 => decode_typed::<f64>(variable, data, shape),
    }
}
