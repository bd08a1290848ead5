use ndarray::{ArrayView2, ArrayView3, Axis as ArrayAxis, ShapeBuilder};

use crate::error::DecodeError;

/// Grid size `(nx, ny, nz)`.
pub type Dims = [usize; 3];

/// Millimetres per voxel step along each axis, always positive.
pub type Spacing = [f32; 3];

/// Storage type of the samples in the source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl SampleType {
    /// Map a NIfTI-1 `datatype` header code.
    pub fn from_code(code: i16) -> Result<Self, DecodeError> {
        match code {
            2 => Ok(Self::Uint8),
            4 => Ok(Self::Int16),
            8 => Ok(Self::Int32),
            16 => Ok(Self::Float32),
            64 => Ok(Self::Float64),
            256 => Ok(Self::Int8),
            512 => Ok(Self::Uint16),
            768 => Ok(Self::Uint32),
            other => Err(DecodeError::UnsupportedDatatype(other)),
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, Self::Float32 | Self::Float64)
    }
}

/// A decoded volume in canonical `f32` form.
///
/// Samples are stored flat with `i` varying fastest, so voxel `(i, j, k)`
/// lives at `i + j*nx + k*nx*ny`. Instances are never mutated after
/// construction; a new load produces a new volume.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedVolume {
    samples: Vec<f32>,
    dims: Dims,
    spacing: Spacing,
    range: (f32, f32),
    source_type: SampleType,
}

impl DecodedVolume {
    /// Build a volume from samples already in floating range.
    pub fn from_samples(samples: Vec<f32>, dims: Dims, spacing: Spacing) -> Result<Self, DecodeError> {
        Self::build(samples, dims, spacing, SampleType::Float32)
    }

    /// Build a volume from values read in their native type.
    ///
    /// Float data keeps its values (narrowed to `f32`). Integer data is
    /// rescaled so the buffer's own minimum maps to 0.0 and its maximum to
    /// 1.0; absolute units are lost for integer-sourced volumes.
    pub fn from_native(
        values: &[f64],
        source_type: SampleType,
        dims: Dims,
        spacing: Spacing,
    ) -> Result<Self, DecodeError> {
        let samples = if source_type.is_integer() {
            let (min, max) = min_max(values.iter().copied());
            let range = if max > min { max - min } else { 1.0 };
            values.iter().map(|&v| ((v - min) / range) as f32).collect()
        } else {
            values.iter().map(|&v| v as f32).collect()
        };
        Self::build(samples, dims, spacing, source_type)
    }

    fn build(samples: Vec<f32>, dims: Dims, spacing: Spacing, source_type: SampleType) -> Result<Self, DecodeError> {
        if dims.iter().any(|&n| n == 0) {
            return Err(DecodeError::InvalidDimensions(format!("{dims:?}")));
        }
        let expected = dims[0] * dims[1] * dims[2];
        if samples.len() != expected {
            return Err(DecodeError::Payload(format!(
                "expected {expected} samples for {dims:?}, got {}",
                samples.len()
            )));
        }
        if let Some(index) = samples.iter().position(|v| !v.is_finite()) {
            return Err(DecodeError::NonFiniteSample { index });
        }
        let (min, max) = min_max(samples.iter().map(|&v| v as f64));
        Ok(Self {
            samples,
            dims,
            spacing: spacing.map(sanitize_spacing),
            range: (min as f32, max as f32),
            source_type,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    /// Cached `(min, max)` over all samples.
    pub fn intensity_range(&self) -> (f32, f32) {
        self.range
    }

    pub fn source_type(&self) -> SampleType {
        self.source_type
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn same_grid(&self, other: &DecodedVolume) -> bool {
        self.dims == other.dims
    }

    pub fn linear_index(&self, [i, j, k]: [usize; 3]) -> usize {
        let [nx, ny, _] = self.dims;
        i + j * nx + k * nx * ny
    }

    pub fn value_at(&self, index: [usize; 3]) -> Option<f32> {
        if index.iter().zip(self.dims).any(|(&i, n)| i >= n) {
            return None;
        }
        self.samples.get(self.linear_index(index)).copied()
    }

    /// The samples as an `(nx, ny, nz)` array in column-major layout.
    pub fn view(&self) -> ArrayView3<'_, f32> {
        ArrayView3::from_shape(self.dims.f(), &self.samples)
            .expect("sample count is validated against dims at construction")
    }

    /// 2D cut through the volume at `index` along `normal` (0 = X, 1 = Y, 2 = Z).
    ///
    /// The remaining two axes keep their ascending order, so an axial cut is
    /// indexed `[[i, j]]`, coronal `[[i, k]]` and sagittal `[[j, k]]`.
    pub fn plane(&self, normal: usize, index: usize) -> ArrayView2<'_, f32> {
        self.view().index_axis_move(ArrayAxis(normal), index)
    }
}

fn sanitize_spacing(v: f32) -> f32 {
    if v.is_finite() && v != 0.0 {
        v.abs()
    } else {
        1.0
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(mn, mx), v| (mn.min(v), mx.max(v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn integer_samples_are_rescaled_to_unit_range() {
        let values = [10.0, 15.0, 20.0, 12.5];
        let vol = DecodedVolume::from_native(&values, SampleType::Int16, [4, 1, 1], [2.0; 3]).unwrap();
        assert_eq!(vol.intensity_range(), (0.0, 1.0));
        assert_abs_diff_eq!(vol.samples()[1], 0.5);
        assert_abs_diff_eq!(vol.samples()[3], 0.25);
    }

    #[test]
    fn constant_integer_volume_maps_to_zero() {
        let vol = DecodedVolume::from_native(&[7.0; 8], SampleType::Uint8, [2, 2, 2], [1.0; 3]).unwrap();
        assert!(vol.samples().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn float_samples_keep_their_units() {
        let vol = DecodedVolume::from_native(&[-3.5, 0.0, 8.25], SampleType::Float64, [3, 1, 1], [1.0; 3]).unwrap();
        assert_eq!(vol.samples(), &[-3.5, 0.0, 8.25]);
        assert_eq!(vol.intensity_range(), (-3.5, 8.25));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let err = DecodedVolume::from_samples(vec![], [0, 4, 4], [1.0; 3]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidDimensions(_)));
    }

    #[test]
    fn non_finite_sample_is_rejected() {
        let err = DecodedVolume::from_samples(vec![0.0, f32::NAN], [2, 1, 1], [1.0; 3]).unwrap_err();
        assert!(matches!(err, DecodeError::NonFiniteSample { index: 1 }));
    }

    #[test]
    fn spacing_is_stored_as_magnitude() {
        let vol = DecodedVolume::from_samples(vec![0.0; 8], [2, 2, 2], [-2.0, 0.0, 1.5]).unwrap();
        assert_eq!(vol.spacing(), [2.0, 1.0, 1.5]);
    }

    #[test]
    fn view_matches_linear_index_order() {
        let samples: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let vol = DecodedVolume::from_samples(samples, [2, 3, 4], [1.0; 3]).unwrap();
        let view = vol.view();
        for k in 0..4 {
            for j in 0..3 {
                for i in 0..2 {
                    assert_eq!(view[[i, j, k]], vol.samples()[vol.linear_index([i, j, k])]);
                }
            }
        }
        let coronal = vol.plane(1, 2);
        assert_eq!(coronal.dim(), (2, 4));
        assert_eq!(coronal[[1, 3]], vol.value_at([1, 2, 3]).unwrap());
    }
}
