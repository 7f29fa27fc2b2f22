//! Compression and filter pipeline.

use crate::compression;
use crate::error::WxError;
use crate::filters;
use crate::manifest::VariableEncoding;

use bytes::Bytes;

/// Returns data after applying a filter pipeline.
///
/// The pipeline is applied in the reverse order to when the data was written: decompression
/// first, then each filter from last to first.
///
/// # Arguments
///
/// * `variable`: Encoding of the variable
/// * `data`: Stored bytes of the variable
/// * `decoded_size`: Expected size of the decoded data in bytes
pub fn filter_pipeline(
    variable: &VariableEncoding,
    data: &Bytes,
    decoded_size: usize,
) -> Result<Bytes, WxError> {
    let mut data = if let Some(compression) = variable.compression {
        compression::decompress(compression, data, decoded_size)?
    } else {
        data.clone()
    };
    if let Some(filters) = &variable.filters {
        for filter in filters.iter().rev() {
            data = filters::decode(filter, &data)?;
        }
    }
    Ok(data)
}
