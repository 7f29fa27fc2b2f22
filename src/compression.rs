//! (De)compression support.

use crate::error::WxError;
use crate::models;

use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use zune_inflate::{DeflateDecoder, DeflateOptions};

/// Decompresses some Bytes and returns the uncompressed data.
///
/// # Arguments
///
/// * `compression`: Compression algorithm
/// * `data`: Compressed data [Bytes](bytes::Bytes)
/// * `size_hint`: Expected size of the uncompressed data in bytes
pub fn decompress(
    compression: models::Compression,
    data: &Bytes,
    size_hint: usize,
) -> Result<Bytes, WxError> {
    match compression {
        models::Compression::Gzip => decompress_flate2_gzip(data, size_hint),
        models::Compression::Zlib => decompress_zune_zlib(data, size_hint),
    }
}

fn decompress_flate2_gzip(data: &Bytes, size_hint: usize) -> Result<Bytes, WxError> {
    let mut decoder = GzDecoder::<&[u8]>::new(data);
    // Decoded values are reinterpreted as numbers with an alignment of up to 8 bytes. Reserve the
    // expected size up front so that the aligned buffer is not reallocated while decoding.
    let mut buf = maligned::align_first::<u8, maligned::A8>(size_hint.max(data.len()));
    decoder
        .read_to_end(&mut buf)
        .map_err(WxError::DecompressionFlate2)?;
    Ok(buf.into())
}

fn decompress_zune_zlib(data: &Bytes, size_hint: usize) -> Result<Bytes, WxError> {
    let options = DeflateOptions::default().set_size_hint(size_hint.max(data.len()));
    let mut decoder = DeflateDecoder::new_with_options(data, options);
    let data = decoder.decode_zlib()?;
    Ok(data.into())
}
