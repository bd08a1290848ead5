//! Tri-planar slice rendering: grey background, thresholded map overlay and
//! crosshair, one RGBA raster per anatomical plane.

use std::path::Path;

use image::{ImageBuffer, Rgba, RgbaImage};

use crate::coords::Axis;
use crate::volume::{DecodedVolume, Dims};

pub type Rgb = [u8; 3];

/// One of the three orthogonal viewing planes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Plane {
    Axial,
    Coronal,
    Sagittal,
}

impl Plane {
    pub const ALL: [Plane; 3] = [Plane::Axial, Plane::Coronal, Plane::Sagittal];

    pub fn label(self) -> &'static str {
        match self {
            Plane::Axial => "Axial",
            Plane::Coronal => "Coronal",
            Plane::Sagittal => "Sagittal",
        }
    }

    /// Axis the plane cuts across; the slice index runs along it.
    pub fn normal(self) -> Axis {
        match self {
            Plane::Axial => Axis::Z,
            Plane::Coronal => Axis::Y,
            Plane::Sagittal => Axis::X,
        }
    }

    /// `(horizontal, vertical)` axes of the rendered raster.
    pub fn in_plane(self) -> (Axis, Axis) {
        match self {
            Plane::Axial => (Axis::X, Axis::Y),
            Plane::Coronal => (Axis::X, Axis::Z),
            Plane::Sagittal => (Axis::Y, Axis::Z),
        }
    }

    pub fn raster_size(self, dims: Dims) -> (usize, usize) {
        let (h, v) = self.in_plane();
        (dims[h.index()], dims[v.index()])
    }

    fn mirrors_horizontal(self, mirror_x: bool) -> bool {
        mirror_x && self.in_plane().0 == Axis::X
    }

    /// Voxel under screen pixel `(sx, sy)`, keeping the normal coordinate of
    /// `cursor`. Out-of-raster positions clamp to the edge.
    pub fn screen_to_voxel(self, sx: usize, sy: usize, dims: Dims, cursor: [usize; 3], mirror_x: bool) -> [usize; 3] {
        let (w, h) = self.raster_size(dims);
        let sx = sx.min(w.saturating_sub(1));
        let sy = sy.min(h.saturating_sub(1));
        let (h_axis, v_axis) = self.in_plane();
        let mut voxel = cursor;
        voxel[h_axis.index()] = if self.mirrors_horizontal(mirror_x) { w - 1 - sx } else { sx };
        voxel[v_axis.index()] = h - 1 - sy;
        voxel
    }

    /// Screen pixel where `voxel` projects onto this plane.
    pub fn voxel_to_screen(self, voxel: [usize; 3], dims: Dims, mirror_x: bool) -> (usize, usize) {
        let (w, h) = self.raster_size(dims);
        let (h_axis, v_axis) = self.in_plane();
        let u = voxel[h_axis.index()].min(w.saturating_sub(1));
        let v = voxel[v_axis.index()].min(h.saturating_sub(1));
        let sx = if self.mirrors_horizontal(mirror_x) { w - 1 - u } else { u };
        (sx, h - 1 - v)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThresholdMode {
    Percentile,
    AbsoluteValue,
}

/// User-adjustable rendering and map request parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayParams {
    /// Smoothing kernel FWHM in mm, sent with the map request.
    pub smoothing_fwhm: f64,
    pub overlay_opacity: f32,
    pub threshold_mode: ThresholdMode,
    pub percentile: f32,
    pub threshold_value: f32,
    pub use_abs: bool,
    pub positive_only: bool,
}

impl Default for DisplayParams {
    fn default() -> Self {
        Self {
            smoothing_fwhm: 10.0,
            overlay_opacity: 0.5,
            threshold_mode: ThresholdMode::Percentile,
            percentile: 95.0,
            threshold_value: 0.0,
            use_abs: false,
            positive_only: true,
        }
    }
}

impl DisplayParams {
    /// Clamp every field into its valid range.
    pub fn sanitized(mut self) -> Self {
        self.smoothing_fwhm = if self.smoothing_fwhm.is_finite() { self.smoothing_fwhm.max(0.0) } else { 0.0 };
        self.overlay_opacity = if self.overlay_opacity.is_finite() { self.overlay_opacity.clamp(0.0, 1.0) } else { 0.5 };
        self.percentile = if self.percentile.is_finite() { self.percentile.clamp(0.0, 100.0) } else { 95.0 };
        if !self.threshold_value.is_finite() {
            self.threshold_value = 0.0;
        }
        self
    }
}

/// Percentile of `samples` by floor rank over a strided sample.
///
/// Buffers longer than `sample_cap` are read with stride
/// `ceil(len / sample_cap)`, so the result is approximate for large volumes.
pub fn percentile(samples: &[f32], p: f32, sample_cap: usize) -> Option<f32> {
    if samples.is_empty() {
        return None;
    }
    let step = samples.len().div_ceil(sample_cap.max(1)).max(1);
    let mut picked: Vec<f32> = samples.iter().step_by(step).copied().collect();
    picked.sort_unstable_by(f32::total_cmp);
    let p = p.clamp(0.0, 100.0) as f64;
    let rank = ((p / 100.0) * (picked.len() - 1) as f64).floor() as usize;
    picked.get(rank.min(picked.len() - 1)).copied()
}

/// Threshold the overlay filter compares against, computed once per redraw.
pub fn overlay_threshold(map: &DecodedVolume, params: &DisplayParams, sample_cap: usize) -> Option<f32> {
    match params.threshold_mode {
        ThresholdMode::AbsoluteValue => Some(params.threshold_value),
        ThresholdMode::Percentile => percentile(map.samples(), params.percentile, sample_cap),
    }
}

/// Whether a raw map value is drawn as overlay.
///
/// `positive_only` is checked against the raw value so that `use_abs`
/// cannot let negative values through.
pub fn passes_overlay(raw: f32, threshold: Option<f32>, use_abs: bool, positive_only: bool) -> bool {
    let v = if use_abs { raw.abs() } else { raw };
    let pass = match threshold {
        Some(t) => v >= t,
        None => v > 0.0,
    };
    pass && !(positive_only && raw <= 0.0)
}

/// Linear blend of `base` towards `color` by `alpha`, truncated.
pub fn blend(base: Rgb, color: Rgb, alpha: f32) -> Rgb {
    let a = alpha.clamp(0.0, 1.0);
    [0, 1, 2].map(|c| ((1.0 - a) * base[c] as f32 + a * color[c] as f32) as u8)
}

/// An RGBA pixel buffer, row-major with row 0 at the top.
#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Raster {
    pub fn new(width: usize, height: usize) -> Self {
        let mut pixels = vec![0u8; width * height * 4];
        for px in pixels.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Self { width, height, pixels }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let o = (y * self.width + x) * 4;
        [self.pixels[o], self.pixels[o + 1], self.pixels[o + 2], self.pixels[o + 3]]
    }

    pub fn rgb(&self, x: usize, y: usize) -> Rgb {
        let [r, g, b, _] = self.pixel(x, y);
        [r, g, b]
    }

    fn put(&mut self, x: usize, y: usize, rgb: Rgb) {
        let o = (y * self.width + x) * 4;
        self.pixels[o..o + 3].copy_from_slice(&rgb);
        self.pixels[o + 3] = 255;
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        ImageBuffer::from_fn(self.width as u32, self.height as u32, |x, y| {
            Rgba(self.pixel(x as usize, y as usize))
        })
    }

    pub fn save_png(&self, path: &Path) -> Result<(), image::ImageError> {
        self.to_rgba_image().save_with_format(path, image::ImageFormat::Png)
    }
}

/// Colours and orientation of rendered views.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderStyle {
    pub highlight: Rgb,
    pub crosshair: Rgb,
    /// Draw increasing X index towards screen left.
    pub mirror_x: bool,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            highlight: [255, 0, 0],
            crosshair: [255, 255, 255],
            mirror_x: true,
        }
    }
}

/// Everything one redraw reads, with grid compatibility already resolved.
#[derive(Clone, Copy, Debug)]
pub struct Scene<'a> {
    dims: Dims,
    background: Option<&'a DecodedVolume>,
    map: Option<&'a DecodedVolume>,
    cursor: [usize; 3],
    opacity: f32,
    use_abs: bool,
    positive_only: bool,
    threshold: Option<f32>,
}

impl<'a> Scene<'a> {
    /// Volumes whose grid differs from `dims` are left out. The map is also
    /// left out when it disagrees with a present background, so a grid
    /// mismatch renders as "no overlay".
    pub fn new(
        dims: Dims,
        background: Option<&'a DecodedVolume>,
        map: Option<&'a DecodedVolume>,
        cursor: [usize; 3],
        params: &DisplayParams,
        threshold: Option<f32>,
    ) -> Self {
        let background = background.filter(|bg| bg.dims() == dims);
        let map = map.filter(|m| m.dims() == dims && background.map_or(true, |bg| bg.same_grid(m)));
        Self {
            dims,
            background,
            map,
            cursor,
            opacity: params.overlay_opacity,
            use_abs: params.use_abs,
            positive_only: params.positive_only,
            threshold,
        }
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn cursor(&self) -> [usize; 3] {
        self.cursor
    }

    pub fn has_background(&self) -> bool {
        self.background.is_some()
    }

    pub fn has_overlay(&self) -> bool {
        self.map.is_some()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Compositor {
    style: RenderStyle,
}

impl Compositor {
    pub fn new(style: RenderStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &RenderStyle {
        &self.style
    }

    /// Render `plane` at the cursor's slice.
    pub fn render(&self, scene: &Scene<'_>, plane: Plane) -> Raster {
        let index = scene.cursor[plane.normal().index()];
        self.render_slice(scene, plane, index)
    }

    pub fn render_slice(&self, scene: &Scene<'_>, plane: Plane, slice_index: usize) -> Raster {
        let dims = scene.dims;
        let (w, h) = plane.raster_size(dims);
        let mut raster = Raster::new(w, h);
        if w == 0 || h == 0 {
            return raster;
        }
        let normal = plane.normal().index();
        let slice_index = slice_index.min(dims[normal].saturating_sub(1));
        let mirror = plane.mirrors_horizontal(self.style.mirror_x);

        let bg_plane = scene.background.map(|bg| bg.plane(normal, slice_index));
        let map_plane = scene.map.map(|m| m.plane(normal, slice_index));
        let (bg_min, bg_max) = scene.background.map_or((0.0, 1.0), |bg| bg.intensity_range());
        let bg_range = if bg_max > bg_min { bg_max - bg_min } else { 1.0 };

        for sy in 0..h {
            let v = h - 1 - sy;
            for sx in 0..w {
                let u = if mirror { w - 1 - sx } else { sx };
                let gray = match &bg_plane {
                    Some(p) => ((p[[u, v]] - bg_min) / bg_range).clamp(0.0, 1.0) * 255.0,
                    None => 0.0,
                } as u8;
                let mut rgb = [gray; 3];
                if let Some(p) = &map_plane {
                    if passes_overlay(p[[u, v]], scene.threshold, scene.use_abs, scene.positive_only) {
                        rgb = blend(rgb, self.style.highlight, scene.opacity);
                    }
                }
                raster.put(sx, sy, rgb);
            }
        }

        let (cx, cy) = plane.voxel_to_screen(scene.cursor, dims, self.style.mirror_x);
        for y in 0..h {
            raster.put(cx, y, self.style.crosshair);
        }
        for x in 0..w {
            raster.put(x, cy, self.style.crosshair);
        }
        raster
    }

    /// Render all three planes in [`Plane::ALL`] order.
    pub fn render_all(&self, scene: &Scene<'_>) -> [Raster; 3] {
        Plane::ALL.map(|plane| self.render(scene, plane))
    }
}
