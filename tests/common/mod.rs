//! Common test utilities: NIfTI-1 byte builders.

#![allow(dead_code)]

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

pub const DT_UINT8: i16 = 2;
pub const DT_INT16: i16 = 4;
pub const DT_FLOAT32: i16 = 16;
pub const DT_FLOAT64: i16 = 64;
pub const DT_RGB24: i16 = 128;

const VOX_OFFSET: usize = 352;

/// Single-file little-endian NIfTI-1 image with the given `dim` (without the
/// leading rank entry), datatype and raw payload.
pub fn nifti_bytes(dim: &[usize], spacing: [f32; 3], datatype: i16, bitpix: i16, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; VOX_OFFSET];
    out[0..4].copy_from_slice(&348i32.to_le_bytes());

    let mut dims = [1i16; 8];
    dims[0] = dim.len() as i16;
    for (slot, &n) in dims[1..].iter_mut().zip(dim) {
        *slot = n as i16;
    }
    for (i, d) in dims.iter().enumerate() {
        out[40 + 2 * i..42 + 2 * i].copy_from_slice(&d.to_le_bytes());
    }
    out[70..72].copy_from_slice(&datatype.to_le_bytes());
    out[72..74].copy_from_slice(&bitpix.to_le_bytes());

    let pixdim = [1.0f32, spacing[0], spacing[1], spacing[2], 1.0, 1.0, 1.0, 1.0];
    for (i, p) in pixdim.iter().enumerate() {
        out[76 + 4 * i..80 + 4 * i].copy_from_slice(&p.to_le_bytes());
    }
    out[108..112].copy_from_slice(&(VOX_OFFSET as f32).to_le_bytes());
    out[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    out[344..348].copy_from_slice(b"n+1\0");

    out.extend_from_slice(payload);
    out
}

pub fn nifti_f32(dims: [usize; 3], spacing: [f32; 3], values: &[f32]) -> Vec<u8> {
    let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    nifti_bytes(&dims, spacing, DT_FLOAT32, 32, &payload)
}

pub fn nifti_f64(dims: [usize; 3], spacing: [f32; 3], values: &[f64]) -> Vec<u8> {
    let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    nifti_bytes(&dims, spacing, DT_FLOAT64, 64, &payload)
}

pub fn nifti_i16(dims: [usize; 3], spacing: [f32; 3], values: &[i16]) -> Vec<u8> {
    let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    nifti_bytes(&dims, spacing, DT_INT16, 16, &payload)
}

pub fn nifti_u8(dims: [usize; 3], spacing: [f32; 3], values: &[u8]) -> Vec<u8> {
    nifti_bytes(&dims, spacing, DT_UINT8, 8, values)
}

/// Float volume whose value at `[i, j, k]` is `f(i, j, k)`, stored i-fastest.
pub fn nifti_fn(dims: [usize; 3], spacing: [f32; 3], f: impl Fn(usize, usize, usize) -> f32) -> Vec<u8> {
    let mut values = Vec::with_capacity(dims.iter().product());
    for k in 0..dims[2] {
        for j in 0..dims[1] {
            for i in 0..dims[0] {
                values.push(f(i, j, k));
            }
        }
    }
    nifti_f32(dims, spacing, &values)
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("gzip write");
    encoder.finish().expect("gzip finish")
}
