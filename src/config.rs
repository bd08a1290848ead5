use crate::compositor::{DisplayParams, RenderStyle};

/// Background template served next to the web build.
pub const DEFAULT_BACKGROUND_URL: &str = "static/mni_2mm.nii.gz";
pub const DEFAULT_API_BASE: &str = "http://localhost:5000";
/// Percentile estimation reads at most about this many map samples.
pub const DEFAULT_PERCENTILE_SAMPLE_CAP: usize = 200_000;

/// Fixed parameters of the `/query/{q}/nii` request besides the FWHM.
#[derive(Clone, Debug, PartialEq)]
pub struct MapRequestConfig {
    pub voxel_mm: f64,
    pub kernel: String,
    pub radius_mm: f64,
}

impl Default for MapRequestConfig {
    fn default() -> Self {
        Self {
            voxel_mm: 2.0,
            kernel: "gauss".to_string(),
            radius_mm: 6.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ViewerConfig {
    pub api_base: String,
    pub background_url: String,
    pub map_request: MapRequestConfig,
    pub percentile_sample_cap: usize,
    pub style: RenderStyle,
    pub initial_params: DisplayParams,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            background_url: DEFAULT_BACKGROUND_URL.to_string(),
            map_request: MapRequestConfig::default(),
            percentile_sample_cap: DEFAULT_PERCENTILE_SAMPLE_CAP,
            style: RenderStyle::default(),
            initial_params: DisplayParams::default(),
        }
    }
}

impl ViewerConfig {
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_background_url(mut self, url: impl Into<String>) -> Self {
        self.background_url = url.into();
        self
    }

    pub fn with_percentile_sample_cap(mut self, cap: usize) -> Self {
        self.percentile_sample_cap = cap.max(1);
        self
    }
}
