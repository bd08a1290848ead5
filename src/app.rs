//! eframe host: menu, query bar, the 2x2 grid of views and controls, and
//! the catalog side panel.

use eframe::egui;

use crate::api::{RelatedOrder, YearOrder};
use crate::catalog::Catalog;
use crate::compositor::{Plane, Raster, ThresholdMode};
use crate::config::ViewerConfig;
use crate::controller::{LoadStatus, ViewerController};
use crate::coords::Axis;
use crate::fetch::{Listing, Loader, Role};
use crate::query::{append_term, extract_terms};

pub struct ViewerApp {
    controller: ViewerController,
    catalog: Catalog,
    loader: Loader,
    query_input: String,
    terms: Vec<String>,
    term_filter: String,
    /// FWHM being edited; applied when the drag or edit ends.
    fwhm_edit: f64,
    textures: Option<[egui::TextureHandle; 3]>,
    scroll_accum: [f32; 3],
    notice: Option<String>,
}

impl ViewerApp {
    /// Start the background and term-list loads, and the query loads when
    /// `initial_query` is set.
    pub fn new(config: ViewerConfig, loader: Loader, initial_query: Option<&str>) -> Self {
        let mut catalog = Catalog::new(config.api_base.clone());
        let mut controller = ViewerController::new(config);
        loader.spawn(controller.begin_background_load());
        loader.spawn_listing(catalog.request_terms());
        let fwhm_edit = controller.state().params.smoothing_fwhm;
        let mut app = Self {
            controller,
            catalog,
            loader,
            query_input: initial_query.unwrap_or_default().to_string(),
            terms: Vec::new(),
            term_filter: String::new(),
            fwhm_edit,
            textures: None,
            scroll_accum: [0.0; 3],
            notice: None,
        };
        if !app.query_input.trim().is_empty() {
            app.submit_query();
        }
        app
    }

    fn submit_query(&mut self) {
        self.terms = extract_terms(&self.query_input);
        if self.query_input.trim() == self.controller.query() {
            return;
        }
        if let Some(ticket) = self.controller.set_query(&self.query_input) {
            self.loader.spawn(ticket);
        }
        for ticket in self.catalog.set_query(&self.query_input) {
            self.loader.spawn_listing(ticket);
        }
    }

    /// Append a clicked term to the query and run it.
    fn add_term(&mut self, term: &str) {
        self.query_input = append_term(&self.query_input, term);
        self.submit_query();
    }

    fn poll_loads(&mut self) {
        for completion in self.loader.poll() {
            self.controller.complete(completion);
        }
        for completion in self.loader.poll_listings() {
            self.catalog.complete(completion);
        }
    }

    fn refresh_textures(&mut self, ctx: &egui::Context) {
        if !self.controller.take_redraw() && self.textures.is_some() {
            return;
        }
        self.textures = self.controller.render_views().map(|rasters| {
            [0, 1, 2].map(|i| {
                ctx.load_texture(
                    Plane::ALL[i].label(),
                    color_image(&rasters[i]),
                    egui::TextureOptions::NEAREST,
                )
            })
        });
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn pick_and_load(&mut self, role: Role) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("NIfTI", &["nii", "gz"])
            .pick_file()
        {
            let ticket = self.controller.begin_load(role, path.to_string_lossy());
            self.loader.spawn(ticket);
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn export_views(&mut self) {
        let Some(rasters) = self.controller.render_views() else {
            self.notice = Some("Nothing to export yet.".to_string());
            return;
        };
        let Some(dir) = rfd::FileDialog::new().pick_folder() else {
            return;
        };
        for (plane, raster) in Plane::ALL.iter().zip(&rasters) {
            let path = dir.join(format!("{}.png", plane.label().to_lowercase()));
            if let Err(e) = raster.save_png(&path) {
                log::warn!("export of {} failed: {e}", path.display());
                self.notice = Some(format!("Export failed: {e}"));
                return;
            }
        }
        log::info!("exported views to {}", dir.display());
        self.notice = Some(format!("Saved 3 views to {}", dir.display()));
    }

    fn menu_bar(&mut self, ui: &mut egui::Ui) {
        egui::MenuBar::new().ui(ui, |ui| {
            ui.menu_button("File", |ui| {
                #[cfg(not(target_arch = "wasm32"))]
                {
                    if ui.button("Load background…").clicked() {
                        ui.close();
                        self.pick_and_load(Role::Background);
                    }
                    if ui.button("Load map…").clicked() {
                        ui.close();
                        self.pick_and_load(Role::Map);
                    }
                    if ui.button("Export views as PNG…").clicked() {
                        ui.close();
                        self.export_views();
                    }
                    ui.separator();
                }
                if ui.button("Reload background").clicked() {
                    ui.close();
                    let ticket = self.controller.begin_background_load();
                    self.loader.spawn(ticket);
                }
            });
        });
    }

    fn query_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Query");
            let resp = ui.add(
                egui::TextEdit::singleline(&mut self.query_input)
                    .hint_text("e.g. emotion AND (amygdala OR hippocampus)")
                    .desired_width(360.0),
            );
            let submitted = resp.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if submitted || ui.button("Search").clicked() {
                self.submit_query();
            }
            if !self.terms.is_empty() {
                ui.label(
                    egui::RichText::new(format!("terms: {}", self.terms.join(", ")))
                        .color(egui::Color32::GRAY),
                );
            }
        });
        ui.horizontal(|ui| {
            status_line(ui, "Background", self.controller.status(Role::Background));
            status_line(ui, "Map", self.controller.status(Role::Map));
            let mismatch = self.controller.volume(Role::Background).is_some()
                && self.controller.volume(Role::Map).is_some()
                && !self.controller.overlay_visible();
            if mismatch {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    "Map grid differs from background; overlay hidden.",
                );
            }
            if let Some(notice) = &self.notice {
                ui.label(notice);
            }
        });
    }

    fn controls(&mut self, ui: &mut egui::Ui) {
        ui.heading("Cursor");
        egui::Grid::new("cursor_mm").num_columns(2).show(ui, |ui| {
            for axis in Axis::ALL {
                ui.label(format!("{} (mm)", axis.label()));
                let mut text = self.controller.coordinate_text(axis).to_string();
                let resp = ui.add(egui::TextEdit::singleline(&mut text).desired_width(80.0));
                if resp.changed() {
                    self.controller.set_coordinate_text(axis, text);
                }
                if resp.lost_focus() {
                    self.controller.commit_coordinate(axis);
                }
                ui.end_row();
            }
        });
        let [i, j, k] = self.controller.cursor();
        ui.label(format!("voxel [{i}, {j}, {k}]"));

        ui.separator();
        ui.heading("Overlay");
        let mut params = self.controller.state().params.clone();
        ui.horizontal(|ui| {
            ui.selectable_value(&mut params.threshold_mode, ThresholdMode::Percentile, "Percentile");
            ui.selectable_value(&mut params.threshold_mode, ThresholdMode::AbsoluteValue, "Absolute value");
        });
        match params.threshold_mode {
            ThresholdMode::Percentile => {
                ui.add(
                    egui::DragValue::new(&mut params.percentile)
                        .range(0.0..=100.0)
                        .speed(0.5)
                        .prefix("p "),
                );
            }
            ThresholdMode::AbsoluteValue => {
                ui.add(egui::DragValue::new(&mut params.threshold_value).speed(0.05));
            }
        }
        if let Some(t) = self.controller.threshold() {
            ui.label(format!("threshold {t:.3}"));
        }
        ui.add(egui::Slider::new(&mut params.overlay_opacity, 0.0..=1.0).text("opacity"));
        ui.checkbox(&mut params.use_abs, "Use |value|");
        ui.checkbox(&mut params.positive_only, "Positive only");
        ui.horizontal(|ui| {
            ui.label("FWHM");
            let resp = ui.add(
                egui::DragValue::new(&mut self.fwhm_edit)
                    .range(0.0..=40.0)
                    .speed(0.5)
                    .suffix(" mm"),
            );
            if resp.drag_stopped() || resp.lost_focus() {
                params.smoothing_fwhm = self.fwhm_edit;
            }
        });
        if params != self.controller.state().params {
            if let Some(ticket) = self.controller.set_params(params) {
                self.loader.spawn(ticket);
            }
            self.fwhm_edit = self.controller.state().params.smoothing_fwhm;
        }

        if let Some(url) = self.controller.map_download_url() {
            ui.separator();
            ui.hyperlink_to("Download map (NIfTI)", url);
        }
    }

    fn catalog_panel(&mut self, ui: &mut egui::Ui) {
        let mut picked: Option<String> = None;

        egui::CollapsingHeader::new(format!("Terms ({})", self.catalog.term_count()))
            .default_open(true)
            .show(ui, |ui| {
                ui.add(egui::TextEdit::singleline(&mut self.term_filter).hint_text("filter terms"));
                listing_status(ui, self.catalog.status(Listing::Terms));
                let matches = self.catalog.terms_matching(&self.term_filter);
                let row_height = ui.text_style_height(&egui::TextStyle::Body);
                egui::ScrollArea::vertical()
                    .id_salt("terms")
                    .max_height(220.0)
                    .show_rows(ui, row_height, matches.len(), |ui, rows| {
                        for term in &matches[rows] {
                            if ui.link(*term).clicked() {
                                picked = Some(term.to_string());
                            }
                        }
                    });
            });

        egui::CollapsingHeader::new("Related terms")
            .default_open(true)
            .show(ui, |ui| {
                let candidates = self.terms.clone();
                let mut target = self.catalog.related_target().map(str::to_string);
                ui.horizontal(|ui| {
                    egui::ComboBox::from_id_salt("related_target")
                        .selected_text(target.as_deref().unwrap_or("(enter a query)"))
                        .show_ui(ui, |ui| {
                            for term in &candidates {
                                ui.selectable_value(&mut target, Some(term.clone()), term.as_str());
                            }
                        });
                    let mut order = self.catalog.related_order();
                    ui.selectable_value(&mut order, RelatedOrder::CoCount, "co-count");
                    ui.selectable_value(&mut order, RelatedOrder::Jaccard, "Jaccard");
                    if order != self.catalog.related_order() {
                        self.catalog.set_related_order(order);
                    }
                });
                if let Some(term) = target {
                    if let Some(ticket) = self.catalog.select_related_target(&term) {
                        self.loader.spawn_listing(ticket);
                    }
                }
                listing_status(ui, self.catalog.status(Listing::RelatedTerms));
                egui::ScrollArea::vertical()
                    .id_salt("related")
                    .max_height(220.0)
                    .show(ui, |ui| {
                        egui::Grid::new("related_grid").striped(true).show(ui, |ui| {
                            for related in self.catalog.related() {
                                if ui.link(related.term.as_str()).clicked() {
                                    picked = Some(related.term.clone());
                                }
                                ui.label(related.co_count.map_or("-".to_string(), |c| c.to_string()));
                                ui.label(related.jaccard.map_or("-".to_string(), |j| format!("{j:.3}")));
                                ui.end_row();
                            }
                        });
                    });
            });

        egui::CollapsingHeader::new(format!("Studies ({})", self.catalog.studies().len()))
            .default_open(true)
            .show(ui, |ui| {
                let mut order = self.catalog.year_order();
                ui.horizontal(|ui| {
                    ui.selectable_value(&mut order, YearOrder::NewestFirst, "Newest first");
                    ui.selectable_value(&mut order, YearOrder::OldestFirst, "Oldest first");
                });
                if order != self.catalog.year_order() {
                    self.catalog.set_year_order(order);
                }
                listing_status(ui, self.catalog.status(Listing::Studies));
                egui::ScrollArea::vertical().id_salt("studies").show(ui, |ui| {
                    for study in self.catalog.studies() {
                        ui.group(|ui| {
                            ui.label(egui::RichText::new(study.title.as_deref().unwrap_or("(untitled)")).strong());
                            let meta: Vec<String> = [
                                study.authors.clone(),
                                study.journal.clone(),
                                study.year().map(|y| y.to_string()),
                            ]
                            .into_iter()
                            .flatten()
                            .collect();
                            if !meta.is_empty() {
                                ui.label(egui::RichText::new(meta.join(" · ")).color(egui::Color32::GRAY));
                            }
                            if let Some(url) = study.pubmed_url() {
                                ui.hyperlink_to("PubMed", url);
                            }
                        });
                    }
                });
            });

        if let Some(term) = picked {
            self.add_term(&term);
        }
    }

    /// Paint one plane into a cell and route clicks and scrolling to it.
    fn plane_cell(&mut self, ui: &mut egui::Ui, slot: usize, texture: &egui::TextureHandle, cell: egui::Vec2) {
        let Some(grid) = self.controller.grid().copied() else {
            return;
        };
        let plane = Plane::ALL[slot];
        let (w, h) = plane.raster_size(grid.dims());
        let (h_axis, v_axis) = plane.in_plane();
        let spacing = grid.spacing();
        let size = Self::fit_size(w, h, spacing[h_axis.index()], spacing[v_axis.index()], cell.x, cell.y);

        let (cell_rect, response) = ui.allocate_exact_size(cell, egui::Sense::click_and_drag());
        let img_rect = egui::Rect::from_min_size(cell_rect.min + (cell - size) / 2.0, size);
        let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
        let color = plane_color(plane);
        ui.painter().image(texture.id(), img_rect, uv, egui::Color32::WHITE);
        ui.painter().rect_stroke(
            img_rect,
            0.0,
            egui::Stroke::new(1.0, color),
            egui::StrokeKind::Outside,
        );

        let label_strip = egui::Rect::from_min_size(cell_rect.min, egui::vec2(cell_rect.width(), 22.0));
        ui.painter().rect_filled(label_strip, 0.0, egui::Color32::from_black_alpha(160));
        let normal = plane.normal();
        let mm = grid.axis_to_coordinate(normal, self.controller.cursor()[normal.index()]);
        ui.painter().text(
            label_strip.left_center() + egui::vec2(6.0, 0.0),
            egui::Align2::LEFT_CENTER,
            format!("{}  {} = {mm:.1} mm", plane.label(), normal.label()),
            egui::FontId::proportional(14.0),
            color,
        );

        if response.clicked() || response.dragged() {
            if let Some(pos) = response.interact_pointer_pos() {
                if img_rect.contains(pos) {
                    let rel = (pos - img_rect.min) / img_rect.size();
                    let sx = (rel.x * w as f32) as usize;
                    let sy = (rel.y * h as f32) as usize;
                    self.controller.click(plane, sx, sy);
                }
            }
        }

        if ui.rect_contains_pointer(cell_rect) {
            self.scroll_accum[slot] += ui.input(|i| i.raw_scroll_delta.y);
            let step = 30.0_f32;
            while self.scroll_accum[slot] >= step {
                self.scroll_accum[slot] -= step;
                self.controller.step_slice(plane, 1);
            }
            while self.scroll_accum[slot] <= -step {
                self.scroll_accum[slot] += step;
                self.controller.step_slice(plane, -1);
            }
        }
    }

    /// Return the physical display size for a slice, preserving aspect ratio
    /// while fitting within the given bounding box.
    fn fit_size(
        nvox_w: usize,
        nvox_h: usize,
        vox_w: f32,
        vox_h: f32,
        max_w: f32,
        max_h: f32,
    ) -> egui::Vec2 {
        let phys_w = nvox_w as f32 * vox_w;
        let phys_h = nvox_h as f32 * vox_h;
        let scale = (max_w / phys_w).min(max_h / phys_h);
        egui::vec2(phys_w * scale, phys_h * scale)
    }
}

impl Drop for ViewerApp {
    fn drop(&mut self) {
        self.controller.teardown();
        self.catalog.teardown();
    }
}

impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_loads();

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            self.menu_bar(ui);
            self.query_bar(ui);
        });

        egui::SidePanel::right("catalog")
            .resizable(true)
            .default_width(320.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| self.catalog_panel(ui));
            });

        self.refresh_textures(ctx);

        let frame = egui::Frame::new()
            .fill(egui::Color32::BLACK)
            .inner_margin(0.0);
        egui::CentralPanel::default().frame(frame).show(ctx, |ui| {
            let Some(textures) = self.textures.clone() else {
                let msg = match self.controller.status(Role::Background) {
                    LoadStatus::Failed(err) => format!("Background failed to load.\n{err}"),
                    _ => "Loading background…".to_string(),
                };
                ui.centered_and_justified(|ui| {
                    ui.label(egui::RichText::new(msg).color(egui::Color32::GRAY).size(20.0));
                });
                return;
            };

            let avail = ui.available_size();
            let spacing = ui.spacing().item_spacing;
            let cell = egui::vec2((avail.x - spacing.x) / 2.0, (avail.y - spacing.y) / 2.0);

            // Axial | controls
            ui.horizontal(|ui| {
                ui.allocate_ui(cell, |ui| self.plane_cell(ui, 0, &textures[0], cell));
                ui.allocate_ui(cell, |ui| {
                    egui::Frame::new().inner_margin(8.0).show(ui, |ui| {
                        egui::ScrollArea::vertical().show(ui, |ui| self.controls(ui));
                    });
                });
            });
            // Coronal | Sagittal
            ui.horizontal(|ui| {
                ui.allocate_ui(cell, |ui| self.plane_cell(ui, 1, &textures[1], cell));
                ui.allocate_ui(cell, |ui| self.plane_cell(ui, 2, &textures[2], cell));
            });
        });

        ctx.request_repaint(); // completions arrive between frames
    }
}

fn color_image(raster: &Raster) -> egui::ColorImage {
    egui::ColorImage::from_rgba_unmultiplied([raster.width(), raster.height()], raster.pixels())
}

fn plane_color(plane: Plane) -> egui::Color32 {
    match plane {
        Plane::Axial => egui::Color32::YELLOW,
        Plane::Coronal => egui::Color32::GREEN,
        Plane::Sagittal => egui::Color32::RED,
    }
}

fn status_line(ui: &mut egui::Ui, label: &str, status: &LoadStatus) {
    match status {
        LoadStatus::Idle => {}
        LoadStatus::Loading => {
            ui.spinner();
            ui.label(format!("{label}: loading…"));
        }
        LoadStatus::Loaded => {
            ui.label(format!("{label}: loaded"));
        }
        LoadStatus::Failed(msg) => {
            ui.colored_label(egui::Color32::RED, format!("{label}: {msg}"));
        }
    }
}

fn listing_status(ui: &mut egui::Ui, status: &LoadStatus) {
    match status {
        LoadStatus::Loading => {
            ui.spinner();
        }
        LoadStatus::Failed(msg) => {
            ui.colored_label(egui::Color32::RED, msg);
        }
        LoadStatus::Idle | LoadStatus::Loaded => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_size_preserves_physical_aspect() {
        let size = ViewerApp::fit_size(91, 109, 2.0, 2.0, 400.0, 400.0);
        assert!((size.y - 400.0).abs() < 1e-3);
        assert!((size.x / size.y - 91.0 / 109.0).abs() < 1e-4);

        let size = ViewerApp::fit_size(10, 10, 1.0, 3.0, 300.0, 300.0);
        assert!((size.x - 100.0).abs() < 1e-3);
        assert!((size.y - 300.0).abs() < 1e-3);
    }

    #[test]
    fn raster_becomes_color_image() {
        let raster = Raster::new(3, 2);
        let image = color_image(&raster);
        assert_eq!(image.size, [3, 2]);
        assert_eq!(image.pixels[0], egui::Color32::BLACK);
    }
}
