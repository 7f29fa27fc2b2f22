//! Data value representing a value of any [DType](crate::models::DType)
//!
//! Missing-value sentinels are written into dataset manifests as JSON numbers, before the
//! element type of the variable they describe is known.

use crate::error::WxError;

/// A value of any DType.
///
/// This is an alias of the Number type from serde_json: an enum over i64, u64 and f64, where
/// floating point numbers must be finite.
pub type DValue = serde_json::Number;

/// Attempt to convert from a [DValue] to specific numeric type.
// TryFrom<DValue> can't be implemented for primitive types, since both are foreign.
pub trait TryFromDValue: Sized {
    /// Try to convert from a [DValue] to a numeric type.
    fn try_from_dvalue(value: DValue) -> Result<Self, WxError>;
}

fn incompatible(value: &DValue) -> WxError {
    WxError::IncompatibleMissing(value.clone())
}

macro_rules! impl_try_from_dvalue_int {
    ($t:ty, $as_wide:ident) => {
        impl TryFromDValue for $t {
            fn try_from_dvalue(value: DValue) -> Result<Self, WxError> {
                let wide = value.$as_wide().ok_or_else(|| incompatible(&value))?;
                Self::try_from(wide).map_err(|_| incompatible(&value))
            }
        }
    };
}

impl_try_from_dvalue_int!(i32, as_i64);
impl_try_from_dvalue_int!(i64, as_i64);
impl_try_from_dvalue_int!(u32, as_u64);
impl_try_from_dvalue_int!(u64, as_u64);

impl TryFromDValue for f32 {
    fn try_from_dvalue(value: DValue) -> Result<Self, WxError> {
        // Values too large for an f32 become infinite here.
        let float = value.as_f64().ok_or_else(|| incompatible(&value))? as f32;
        if float.is_finite() {
            Ok(float)
        } else {
            Err(incompatible(&value))
        }
    }
}

impl TryFromDValue for f64 {
    fn try_from_dvalue(value: DValue) -> Result<Self, WxError> {
        value.as_f64().ok_or_else(|| incompatible(&value))
    }
}
