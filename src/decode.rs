//! NIfTI-1 decoding: gzip sniffing, signature check, header and payload.

use std::borrow::Cow;
use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use ndarray::{Axis as ArrayAxis, Ix3};
use nifti::{InMemNiftiVolume, IntoNdArray, NiftiHeader};

use crate::error::DecodeError;
use crate::volume::{DecodedVolume, Dims, SampleType, Spacing};

/// Size of the fixed NIfTI-1 header.
pub const NIFTI1_HEADER_SIZE: usize = 348;
const MAGIC_OFFSET: usize = 344;
const MAGIC_SINGLE_FILE: &[u8; 4] = b"n+1\0";
const MAGIC_PAIR: &[u8; 4] = b"ni1\0";

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Inflate `bytes` if they carry a gzip header, otherwise borrow them.
pub fn decompress(bytes: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    if !is_gzip(bytes) {
        return Ok(Cow::Borrowed(bytes));
    }
    let mut out = Vec::with_capacity(bytes.len() * 4);
    GzDecoder::new(Cursor::new(bytes))
        .read_to_end(&mut out)
        .map_err(DecodeError::Compression)?;
    Ok(Cow::Owned(out))
}

/// Fail fast unless `bytes` starts with a NIfTI-1 header.
pub fn check_signature(bytes: &[u8]) -> Result<(), DecodeError> {
    if bytes.len() < NIFTI1_HEADER_SIZE {
        return Err(DecodeError::Signature(format!(
            "{} bytes, need at least {NIFTI1_HEADER_SIZE}",
            bytes.len()
        )));
    }
    let magic = &bytes[MAGIC_OFFSET..MAGIC_OFFSET + 4];
    if magic != MAGIC_SINGLE_FILE && magic != MAGIC_PAIR {
        return Err(DecodeError::Signature(format!(
            "magic {:?}",
            String::from_utf8_lossy(magic)
        )));
    }
    Ok(())
}

/// Decode a (possibly gzip-compressed) NIfTI-1 buffer.
pub fn decode_volume(bytes: &[u8]) -> Result<DecodedVolume, DecodeError> {
    let raw = decompress(bytes)?;
    check_signature(&raw)?;

    let header = NiftiHeader::from_reader(Cursor::new(&raw[..NIFTI1_HEADER_SIZE]))
        .map_err(|e| DecodeError::Header(e.to_string()))?;
    let dims = grid_dims(&header)?;
    let spacing: Spacing = [header.pixdim[1], header.pixdim[2], header.pixdim[3]];
    let sample_type = SampleType::from_code(header.datatype)?;

    let vox_offset = (header.vox_offset.max(NIFTI1_HEADER_SIZE as f32)) as usize;
    if vox_offset >= raw.len() {
        return Err(DecodeError::Payload(format!(
            "vox_offset {vox_offset} beyond end of {}-byte buffer",
            raw.len()
        )));
    }

    let volume = InMemNiftiVolume::from_reader(&raw[vox_offset..], &header)
        .map_err(|e| DecodeError::Payload(e.to_string()))?;
    let mut array = volume
        .into_ndarray::<f64>()
        .map_err(|e| DecodeError::Payload(e.to_string()))?;
    // Trailing singleton dimensions (time, components) are dropped by
    // taking the first entry along each of them.
    while array.ndim() > 3 {
        let last = array.ndim() - 1;
        array = array.index_axis_move(ArrayAxis(last), 0);
    }
    let grid = array
        .into_dimensionality::<Ix3>()
        .map_err(|e| DecodeError::Payload(e.to_string()))?;

    // Reversing the axes makes logical iteration order i-fastest, which is
    // the flat layout DecodedVolume expects.
    let values: Vec<f64> = grid.t().iter().copied().collect();
    log::debug!(
        "decoded NIfTI {dims:?} {sample_type:?} spacing {spacing:?} ({} bytes)",
        raw.len()
    );
    DecodedVolume::from_native(&values, sample_type, dims, spacing)
}

fn grid_dims(header: &NiftiHeader) -> Result<Dims, DecodeError> {
    let ndim = header.dim[0] as usize;
    let dims = [header.dim[1] as usize, header.dim[2] as usize, header.dim[3] as usize];
    if ndim < 3 || ndim > 7 || dims.iter().any(|&n| n == 0) {
        return Err(DecodeError::InvalidDimensions(format!(
            "dim = {:?}",
            &header.dim[..]
        )));
    }
    Ok(dims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_gzip_magic() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x08]));
        assert!(!is_gzip(&[0x1f]));
        assert!(!is_gzip(b"n+1\0"));
    }

    #[test]
    fn plain_bytes_are_borrowed() {
        let bytes = [1u8, 2, 3];
        assert!(matches!(decompress(&bytes).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn corrupt_gzip_is_a_compression_error() {
        let err = decompress(&[0x1f, 0x8b, 0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, DecodeError::Compression(_)));
    }

    #[test]
    fn short_buffer_fails_signature() {
        let err = check_signature(&[0u8; 100]).unwrap_err();
        assert!(matches!(err, DecodeError::Signature(_)));
    }

    #[test]
    fn accepts_both_nifti1_magics() {
        let mut header = vec![0u8; NIFTI1_HEADER_SIZE];
        header[MAGIC_OFFSET..].copy_from_slice(b"n+1\0");
        assert!(check_signature(&header).is_ok());
        header[MAGIC_OFFSET..].copy_from_slice(b"ni1\0");
        assert!(check_signature(&header).is_ok());
        header[MAGIC_OFFSET..].copy_from_slice(b"n+2\0");
        assert!(check_signature(&header).is_err());
    }

    #[test]
    fn html_error_page_is_not_nifti() {
        let page = "<html><body>502 Bad Gateway</body></html>".repeat(20);
        let err = decode_volume(page.as_bytes()).unwrap_err();
        assert!(err.to_string().starts_with("not a NIfTI file"));
    }
}
