//! Byte shuffle filter

use bytes::Bytes;

use crate::error::WxError;

/// Decode the byte shuffle filter.
///
/// The byte shuffle filter encodes data by reordering bytes with the aim of improving compression
/// ratio. For an array of N elements where each element is M bytes, the filter writes the 0th byte
/// of each element first, followed by the 1st byte of each element, and so on. This function
/// inverts the shuffle filter.
///
/// The result is 8-byte aligned, so it may be reinterpreted as an array of any supported type.
///
/// # Arguments
///
/// * `data`: `Bytes` to deshuffle.
/// * `element_size`: Size of each element in bytes.
pub fn deshuffle(data: &Bytes, element_size: usize) -> Result<Bytes, WxError> {
    if element_size == 0 || data.len() % element_size != 0 {
        return Err(WxError::FromBytes {
            type_name: "shuffled elements",
        });
    }
    let mut result = maligned::align_first::<u8, maligned::A8>(data.len());
    result.resize(data.len(), 0);
    if data.is_empty() {
        return Ok(result.into());
    }
    // Fixed element sizes let the compiler unroll the inner loop.
    match element_size {
        4 => deshuffle_into::<4>(data, &mut result),
        8 => deshuffle_into::<8>(data, &mut result),
        _ => {
            let num_elements = data.len() / element_size;
            for (byte, plane) in data.chunks_exact(num_elements).enumerate() {
                for (i, value) in plane.iter().enumerate() {
                    result[i * element_size + byte] = *value;
                }
            }
        }
    }
    Ok(result.into())
}

fn deshuffle_into<const N: usize>(data: &[u8], result: &mut [u8]) {
    let num_elements = data.len() / N;
    for (i, element) in result.chunks_exact_mut(N).enumerate() {
        for (byte, value) in element.iter_mut().enumerate() {
            *value = data[byte * num_elements + i];
        }
    }
}
