//! Filter implementations.

pub mod shuffle;

use crate::error::WxError;
use crate::models;

use bytes::Bytes;

/// Decodes some bytes using the specified filter and returns the result.
///
/// # Arguments
///
/// * `filter`: Filter algorithm
/// * `data`: Filtered data [Bytes]
pub fn decode(filter: &models::Filter, data: &Bytes) -> Result<Bytes, WxError> {
    match filter {
        models::Filter::Shuffle { element_size } => shuffle::deshuffle(data, *element_size),
    }
}
