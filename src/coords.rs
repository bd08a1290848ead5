//! Voxel index <-> millimetre coordinate mapping.
//!
//! Two conventions exist. The 2 mm MNI template grid (91×109×91) uses the
//! template's known origin offsets; any other grid is centred on its middle
//! voxel and scaled by voxel spacing. In both, X is mirrored: a larger array
//! index means a smaller (more leftward) X coordinate.

use crate::volume::{Dims, Spacing};

pub const MNI_2MM_DIMS: Dims = [91, 109, 91];
pub const MNI_2MM_VOXEL: f64 = 2.0;
/// Coordinate of voxel 0 along each axis of the MNI 2 mm grid.
pub const MNI_2MM_ORIGIN: [f64; 3] = [90.0, -126.0, -72.0];
const SPACING_TOLERANCE: f64 = 1e-3;

/// A spatial axis of the volume grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        }
    }

    fn sign(self) -> f64 {
        match self {
            Axis::X => -1.0,
            Axis::Y | Axis::Z => 1.0,
        }
    }
}

/// Coordinate convention, resolved once when a working grid is established.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GridConvention {
    /// MNI 2 mm template grid with fixed affine constants.
    Standard,
    /// Grid centred on `floor(n/2)` and scaled by the per-axis spacing.
    Generic { spacing: Spacing },
}

impl GridConvention {
    pub fn detect(dims: Dims, spacing: Spacing) -> Self {
        let spacing_ok = spacing
            .iter()
            .all(|&s| (s as f64 - MNI_2MM_VOXEL).abs() < SPACING_TOLERANCE);
        if dims == MNI_2MM_DIMS && spacing_ok {
            GridConvention::Standard
        } else {
            GridConvention::Generic { spacing }
        }
    }

    pub fn index_to_coordinate(&self, i: usize, n: usize, axis: Axis) -> f64 {
        let i = i as f64;
        match self {
            GridConvention::Standard => {
                axis.sign() * MNI_2MM_VOXEL * i + MNI_2MM_ORIGIN[axis.index()]
            }
            GridConvention::Generic { spacing } => {
                let mm = spacing[axis.index()] as f64;
                axis.sign() * (i - (n / 2) as f64) * mm
            }
        }
    }

    /// Inverse of [`index_to_coordinate`](Self::index_to_coordinate),
    /// rounded to the nearest voxel and clamped into `[0, n-1]`.
    pub fn coordinate_to_index(&self, c_mm: f64, n: usize, axis: Axis) -> usize {
        let v = match self {
            GridConvention::Standard => {
                (c_mm - MNI_2MM_ORIGIN[axis.index()]) / (axis.sign() * MNI_2MM_VOXEL)
            }
            GridConvention::Generic { spacing } => {
                let mm = spacing[axis.index()] as f64;
                axis.sign() * (c_mm / mm) + (n / 2) as f64
            }
        };
        clamp_index(v.round(), n)
    }
}

fn clamp_index(v: f64, n: usize) -> usize {
    let max = n.saturating_sub(1) as f64;
    if v.is_nan() {
        return 0;
    }
    v.clamp(0.0, max) as usize
}

/// The working grid: dimensions, spacing and the convention they imply.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Grid {
    dims: Dims,
    spacing: Spacing,
    convention: GridConvention,
}

impl Grid {
    pub fn new(dims: Dims, spacing: Spacing) -> Self {
        Self {
            dims,
            spacing,
            convention: GridConvention::detect(dims, spacing),
        }
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    pub fn convention(&self) -> GridConvention {
        self.convention
    }

    pub fn center(&self) -> [usize; 3] {
        self.dims.map(|n| n / 2)
    }

    pub fn clamp(&self, index: [usize; 3]) -> [usize; 3] {
        [0, 1, 2].map(|a| index[a].min(self.dims[a].saturating_sub(1)))
    }

    pub fn axis_to_coordinate(&self, axis: Axis, i: usize) -> f64 {
        self.convention
            .index_to_coordinate(i, self.dims[axis.index()], axis)
    }

    pub fn axis_to_index(&self, axis: Axis, c_mm: f64) -> usize {
        self.convention
            .coordinate_to_index(c_mm, self.dims[axis.index()], axis)
    }

    pub fn to_coordinate(&self, index: [usize; 3]) -> [f64; 3] {
        Axis::ALL.map(|axis| self.axis_to_coordinate(axis, index[axis.index()]))
    }

    pub fn to_index(&self, coordinate: [f64; 3]) -> [usize; 3] {
        Axis::ALL.map(|axis| self.axis_to_index(axis, coordinate[axis.index()]))
    }
}

/// Render a millimetre value for a text field: at most four decimals and
/// never `-0`.
pub fn format_mm(v: f64) -> String {
    let rounded = (v * 1e4).round() / 1e4;
    if rounded == 0.0 {
        "0".to_string()
    } else {
        format!("{rounded}")
    }
}
