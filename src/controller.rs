//! Viewer state and the rules that mutate it.
//!
//! The controller never performs I/O. Starting a load returns a
//! [`LoadTicket`] for the host's [`Loader`](crate::fetch::Loader), and the
//! host hands the resulting [`Completion`] back through [`ViewerController::complete`].

use std::sync::Arc;

use crate::compositor::{overlay_threshold, Compositor, DisplayParams, Plane, Raster, Scene};
use crate::config::ViewerConfig;
use crate::coords::{format_mm, Axis, Grid};
use crate::fetch::{CancelToken, Completion, LoadTicket, Role};
use crate::query::map_url;
use crate::volume::DecodedVolume;

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed(String),
}

impl LoadStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadStatus::Loading)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            LoadStatus::Failed(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Background lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    BackgroundLoading,
    Ready,
}

/// Map lifecycle, independent of the background.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapPhase {
    Absent,
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Default)]
struct Slot {
    volume: Option<Arc<DecodedVolume>>,
    status: LoadStatus,
    generation: u64,
    cancel: Option<CancelToken>,
    url: Option<String>,
}

impl Slot {
    fn supersede(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.generation += 1;
    }

    fn begin(&mut self, role: Role, url: String) -> LoadTicket {
        self.supersede();
        let cancel = CancelToken::new();
        self.cancel = Some(cancel.clone());
        self.url = Some(url.clone());
        self.status = LoadStatus::Loading;
        LoadTicket {
            role,
            generation: self.generation,
            url,
            cancel,
        }
    }

    fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.generation && self.status.is_loading()
    }
}

/// Cursor, editable coordinate text and display parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewerState {
    pub cursor: [usize; 3],
    pub coord_text: [String; 3],
    pub params: DisplayParams,
}

pub struct ViewerController {
    config: ViewerConfig,
    compositor: Compositor,
    background: Slot,
    map: Slot,
    grid: Option<Grid>,
    state: ViewerState,
    query: String,
    threshold: Option<f32>,
    dirty: bool,
}

impl ViewerController {
    pub fn new(config: ViewerConfig) -> Self {
        let params = config.initial_params.clone().sanitized();
        Self {
            compositor: Compositor::new(config.style),
            config,
            background: Slot::default(),
            map: Slot::default(),
            grid: None,
            state: ViewerState {
                cursor: [0; 3],
                coord_text: Default::default(),
                params,
            },
            query: String::new(),
            threshold: None,
            dirty: true,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref()
    }

    pub fn phase(&self) -> Phase {
        match (&self.background.status, &self.background.volume) {
            (LoadStatus::Loading, _) => Phase::BackgroundLoading,
            (_, Some(_)) => Phase::Ready,
            _ => Phase::Idle,
        }
    }

    pub fn map_phase(&self) -> MapPhase {
        match &self.map.status {
            LoadStatus::Loading => MapPhase::Loading,
            LoadStatus::Failed(_) => MapPhase::Error,
            LoadStatus::Loaded if self.map.volume.is_some() => MapPhase::Ready,
            _ => MapPhase::Absent,
        }
    }

    pub fn status(&self, role: Role) -> &LoadStatus {
        &self.slot(role).status
    }

    pub fn volume(&self, role: Role) -> Option<&Arc<DecodedVolume>> {
        self.slot(role).volume.as_ref()
    }

    fn slot(&self, role: Role) -> &Slot {
        match role {
            Role::Background => &self.background,
            Role::Map => &self.map,
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Slot {
        match role {
            Role::Background => &mut self.background,
            Role::Map => &mut self.map,
        }
    }

    /// Start loading the configured background template.
    pub fn begin_background_load(&mut self) -> LoadTicket {
        let url = self.config.background_url.clone();
        self.begin_load(Role::Background, url)
    }

    /// Start loading `url` into `role`, superseding its in-flight load.
    /// The currently shown volume stays until the new one arrives.
    pub fn begin_load(&mut self, role: Role, url: impl Into<String>) -> LoadTicket {
        let ticket = self.slot_mut(role).begin(role, url.into());
        self.dirty = true;
        ticket
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Replace the query. The previous map is dropped at once; a non-empty
    /// query yields the ticket of its map load.
    pub fn set_query(&mut self, query: &str) -> Option<LoadTicket> {
        let query = query.trim();
        if query == self.query {
            return None;
        }
        self.query = query.to_string();
        self.refetch_map()
    }

    fn refetch_map(&mut self) -> Option<LoadTicket> {
        self.map.volume = None;
        self.threshold = None;
        self.dirty = true;
        if self.query.is_empty() {
            self.map.supersede();
            self.map.url = None;
            self.map.status = LoadStatus::Idle;
            return None;
        }
        let url = map_url(
            &self.config.api_base,
            &self.query,
            &self.config.map_request,
            self.state.params.smoothing_fwhm,
        );
        Some(self.begin_load(Role::Map, url))
    }

    /// Apply new display parameters. Only a smoothing change needs a new
    /// map; everything else is a redraw.
    pub fn set_params(&mut self, params: DisplayParams) -> Option<LoadTicket> {
        let params = params.sanitized();
        if params == self.state.params {
            return None;
        }
        let refetch = params.smoothing_fwhm != self.state.params.smoothing_fwhm;
        self.state.params = params;
        self.refresh_threshold();
        self.dirty = true;
        if refetch {
            self.refetch_map()
        } else {
            None
        }
    }

    /// Publish a finished load. Returns `false` when the completion belongs
    /// to a superseded generation and was discarded.
    pub fn complete(&mut self, completion: Completion) -> bool {
        let Completion { ticket, result } = completion;
        let role = ticket.role;
        if !self.slot(role).is_current(&ticket) {
            log::debug!(
                "discarding stale {role} load #{} of {}",
                ticket.generation,
                ticket.url
            );
            return false;
        }
        let slot = self.slot_mut(role);
        slot.cancel = None;
        match result {
            Ok(volume) => {
                log::info!("{role} loaded: dims {:?} spacing {:?}", volume.dims(), volume.spacing());
                slot.volume = Some(Arc::new(volume));
                slot.status = LoadStatus::Loaded;
                self.adopt_grid(role);
                if role == Role::Map {
                    self.refresh_threshold();
                }
                self.check_grid_match();
            }
            Err(err) => {
                if err.is_aborted() {
                    log::debug!("{role} load aborted: {err}");
                } else {
                    log::warn!("{role} load failed: {err}");
                }
                slot.volume = None;
                slot.status = LoadStatus::Failed(err.to_string());
                if role == Role::Map {
                    self.threshold = None;
                }
            }
        }
        self.dirty = true;
        true
    }

    fn adopt_grid(&mut self, role: Role) {
        let volume = match role {
            Role::Background => self.background.volume.as_ref(),
            // The map only defines the grid while no background is loaded.
            Role::Map if self.background.volume.is_none() => self.map.volume.as_ref(),
            Role::Map => None,
        };
        let Some(volume) = volume else { return };
        let grid = Grid::new(volume.dims(), volume.spacing());
        // A background always recentres; a map on the current grid keeps the cursor.
        if role == Role::Map && self.grid == Some(grid) {
            return;
        }
        log::info!("working grid {:?} ({:?})", grid.dims(), grid.convention());
        self.state.cursor = grid.center();
        self.grid = Some(grid);
        self.refresh_coordinate_text();
    }

    fn check_grid_match(&self) {
        if let (Some(bg), Some(map)) = (&self.background.volume, &self.map.volume) {
            if !bg.same_grid(map) {
                log::warn!(
                    "map grid {:?} does not match background {:?}; overlay disabled",
                    map.dims(),
                    bg.dims()
                );
            }
        }
    }

    fn refresh_threshold(&mut self) {
        self.threshold = self.map.volume.as_ref().and_then(|m| {
            overlay_threshold(m, &self.state.params, self.config.percentile_sample_cap)
        });
    }

    /// Threshold the overlay currently uses, if a map is loaded.
    pub fn threshold(&self) -> Option<f32> {
        self.threshold
    }

    /// Whether a loaded map is actually drawn over the working grid.
    pub fn overlay_visible(&self) -> bool {
        self.scene().is_some_and(|s| s.has_overlay())
    }

    /// Move the cursor to the voxel under screen pixel `(sx, sy)` of `plane`.
    pub fn click(&mut self, plane: Plane, sx: usize, sy: usize) {
        let Some(grid) = self.grid else { return };
        let mirror_x = self.compositor.style().mirror_x;
        let voxel = plane.screen_to_voxel(sx, sy, grid.dims(), self.state.cursor, mirror_x);
        self.move_cursor(voxel);
    }

    /// Step the slice of `plane` by `delta`, clamped to the grid.
    pub fn step_slice(&mut self, plane: Plane, delta: i64) {
        let Some(grid) = self.grid else { return };
        let axis = plane.normal().index();
        let n = grid.dims()[axis] as i64;
        let mut cursor = self.state.cursor;
        cursor[axis] = (cursor[axis] as i64 + delta).clamp(0, n - 1) as usize;
        self.move_cursor(cursor);
    }

    fn move_cursor(&mut self, index: [usize; 3]) {
        let Some(grid) = self.grid else { return };
        let index = grid.clamp(index);
        if index != self.state.cursor {
            self.state.cursor = index;
            self.dirty = true;
        }
        self.refresh_coordinate_text();
    }

    pub fn cursor(&self) -> [usize; 3] {
        self.state.cursor
    }

    pub fn cursor_coordinate(&self) -> Option<[f64; 3]> {
        self.grid.map(|g| g.to_coordinate(self.state.cursor))
    }

    pub fn coordinate_text(&self, axis: Axis) -> &str {
        &self.state.coord_text[axis.index()]
    }

    /// Edit the coordinate text of `axis` without committing it.
    pub fn set_coordinate_text(&mut self, axis: Axis, text: impl Into<String>) {
        self.state.coord_text[axis.index()] = text.into();
    }

    /// Commit the edited text of `axis`. Empty, `-`, unparseable and
    /// non-finite entries leave the cursor alone.
    pub fn commit_coordinate(&mut self, axis: Axis) -> bool {
        let Some(grid) = self.grid else { return false };
        let text = self.state.coord_text[axis.index()].trim();
        if text.is_empty() || text == "-" {
            return false;
        }
        let Ok(mm) = text.parse::<f64>() else {
            return false;
        };
        if !mm.is_finite() {
            return false;
        }
        let mut cursor = self.state.cursor;
        cursor[axis.index()] = grid.axis_to_index(axis, mm);
        self.move_cursor(cursor);
        true
    }

    fn refresh_coordinate_text(&mut self) {
        if let Some(grid) = self.grid {
            let mm = grid.to_coordinate(self.state.cursor);
            self.state.coord_text = mm.map(format_mm);
        }
    }

    /// Link to download the current statistical map.
    pub fn map_download_url(&self) -> Option<&str> {
        if self.query.is_empty() {
            return None;
        }
        self.map.url.as_deref()
    }

    /// Supersede both pipelines; late completions are discarded.
    pub fn teardown(&mut self) {
        for role in [Role::Background, Role::Map] {
            let slot = self.slot_mut(role);
            slot.supersede();
            if slot.status.is_loading() {
                slot.status = LoadStatus::Idle;
            }
        }
    }

    /// Consume the pending redraw request.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn scene(&self) -> Option<Scene<'_>> {
        let grid = self.grid?;
        Some(Scene::new(
            grid.dims(),
            self.background.volume.as_deref(),
            self.map.volume.as_deref(),
            self.state.cursor,
            &self.state.params,
            self.threshold,
        ))
    }

    /// Rasters in [`Plane::ALL`] order, once a grid exists.
    pub fn render_views(&self) -> Option<[Raster; 3]> {
        self.scene().map(|scene| self.compositor.render_all(&scene))
    }
}
