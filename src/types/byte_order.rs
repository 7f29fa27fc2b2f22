//! Byte order of stored variables.

use serde::{Deserialize, Serialize};

#[cfg(target_endian = "big")]
pub const NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Big;

#[cfg(target_endian = "little")]
pub const NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Little;

/// Byte order / endianness.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Big Endian
    Big,
    /// Little Endian
    #[default]
    Little,
}

impl ByteOrder {
    /// Whether values stored in this order must be byte swapped on this host.
    pub fn is_native(self) -> bool {
        self == NATIVE_BYTE_ORDER
    }
}

/// Reverse the byte order of a value.
pub trait SwapBytes: Copy {
    fn swap_bytes(self) -> Self;
}

macro_rules! impl_swap_bytes_int {
    ($($t:ty),*) => {
        $(impl SwapBytes for $t {
            fn swap_bytes(self) -> Self {
                <$t>::swap_bytes(self)
            }
        })*
    };
}

impl_swap_bytes_int!(i32, i64, u32, u64);

impl SwapBytes for f32 {
    fn swap_bytes(self) -> Self {
        f32::from_bits(self.to_bits().swap_bytes())
    }
}

impl SwapBytes for f64 {
    fn swap_bytes(self) -> Self {
        f64::from_bits(self.to_bits().swap_bytes())
    }
}
