mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lotus_viewer::controller::MapPhase;
use lotus_viewer::fetch::FileSource;
use lotus_viewer::query::{append_term, extract_terms};
use lotus_viewer::{Axis, Catalog, Listing, LoadStatus, Loader, Plane, Raster, Role, ViewerConfig, ViewerController};

use common::*;

const WAIT: Duration = Duration::from_secs(30);

fn write(dir: &Path, name: &str, bytes: &[u8]) {
    std::fs::write(dir.join(name), bytes).unwrap();
}

fn setup(dir: &Path, background: &str) -> (ViewerController, Loader) {
    let config = ViewerConfig::default().with_background_url(background);
    let loader = Loader::new(Arc::new(FileSource::new(dir)));
    (ViewerController::new(config), loader)
}

fn load(controller: &mut ViewerController, loader: &Loader, role: Role, url: &str) -> bool {
    loader.spawn(controller.begin_load(role, url));
    let completion = loader.wait(WAIT).expect("load timed out");
    controller.complete(completion)
}

fn overlay_pixels(raster: &Raster) -> usize {
    let mut n = 0;
    for y in 0..raster.height() {
        for x in 0..raster.width() {
            let [r, g, b] = raster.rgb(x, y);
            if r > g && r > b {
                n += 1;
            }
        }
    }
    n
}

#[test]
fn background_load_establishes_standard_grid() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "mni.nii.gz", &gzip(&nifti_fn([91, 109, 91], [2.0; 3], |i, _, _| i as f32)));
    let (mut controller, loader) = setup(dir.path(), "mni.nii.gz");

    loader.spawn(controller.begin_background_load());
    let completion = loader.wait(WAIT).expect("load timed out");
    assert!(controller.complete(completion));

    assert_eq!(controller.status(Role::Background), &LoadStatus::Loaded);
    assert_eq!(controller.cursor(), [45, 54, 45]);
    assert_eq!(controller.cursor_coordinate(), Some([0.0, -18.0, 18.0]));
    assert_eq!(controller.coordinate_text(Axis::X), "0");
}

#[test]
fn mismatched_map_renders_background_only() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bg.nii", &nifti_fn([91, 109, 91], [2.0; 3], |_, _, _| 0.0));
    write(dir.path(), "map.nii", &nifti_fn([64, 64, 40], [3.0; 3], |_, _, _| 5.0));
    let (mut controller, loader) = setup(dir.path(), "bg.nii");

    assert!(load(&mut controller, &loader, Role::Background, "bg.nii"));
    assert!(load(&mut controller, &loader, Role::Map, "map.nii"));

    assert_eq!(controller.map_phase(), MapPhase::Ready);
    assert_eq!(controller.grid().unwrap().dims(), [91, 109, 91]);
    assert!(!controller.overlay_visible());
    let views = controller.render_views().unwrap();
    assert!(views.iter().all(|r| overlay_pixels(r) == 0));
}

#[test]
fn matching_map_is_drawn_over_background() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bg.nii", &nifti_fn([8, 8, 8], [1.0; 3], |_, _, _| 0.0));
    write(dir.path(), "map.nii", &nifti_fn([8, 8, 8], [1.0; 3], |i, _, _| if i < 4 { 5.0 } else { -5.0 }));
    let (mut controller, loader) = setup(dir.path(), "bg.nii");

    assert!(load(&mut controller, &loader, Role::Background, "bg.nii"));
    assert!(load(&mut controller, &loader, Role::Map, "map.nii"));

    assert!(controller.overlay_visible());
    let [axial, _, sagittal] = controller.render_views().unwrap();
    // Half the axial plane is positive; the crosshair covers one row and one column.
    let overlay = overlay_pixels(&axial);
    assert!(overlay > 0 && overlay <= 32, "{overlay}");
    // Cursor X = 4 lies in the negative half, so the sagittal slice stays grey.
    assert_eq!(overlay_pixels(&sagittal), 0);
}

#[test]
fn superseded_load_never_publishes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.nii", &nifti_fn([4, 4, 4], [1.0; 3], |_, _, _| 1.0));
    write(dir.path(), "b.nii", &nifti_fn([6, 6, 6], [1.0; 3], |_, _, _| 2.0));
    let (mut controller, loader) = setup(dir.path(), "a.nii");

    loader.spawn(controller.begin_load(Role::Map, "a.nii"));
    loader.spawn(controller.begin_load(Role::Map, "b.nii"));
    let mut published = 0;
    for _ in 0..2 {
        let completion = loader.wait(WAIT).expect("load timed out");
        if controller.complete(completion) {
            published += 1;
        }
    }
    assert_eq!(published, 1);
    assert_eq!(controller.grid().unwrap().dims(), [6, 6, 6]);
}

#[test]
fn missing_file_reports_failure_and_keeps_running() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, loader) = setup(dir.path(), "absent.nii.gz");
    loader.spawn(controller.begin_background_load());
    assert!(controller.complete(loader.wait(WAIT).expect("load timed out")));
    let error = controller.status(Role::Background).error().unwrap().to_string();
    assert!(error.contains("absent.nii.gz"), "{error}");
    assert!(controller.render_views().is_none());
}

#[test]
fn click_then_commit_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bg.nii", &nifti_fn([91, 109, 91], [2.0; 3], |_, _, _| 1.0));
    let (mut controller, loader) = setup(dir.path(), "bg.nii");
    assert!(load(&mut controller, &loader, Role::Background, "bg.nii"));

    // Coronal raster is 91 x 91; screen x 0 is the highest X index under mirroring.
    controller.click(Plane::Coronal, 0, 90);
    assert_eq!(controller.cursor(), [90, 54, 0]);
    assert_eq!(controller.coordinate_text(Axis::X), "-90");
    assert_eq!(controller.coordinate_text(Axis::Z), "-72");

    controller.set_coordinate_text(Axis::Y, "0");
    assert!(controller.commit_coordinate(Axis::Y));
    assert_eq!(controller.cursor(), [90, 63, 0]);
}

#[test]
fn exports_rendered_views_as_png() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bg.nii", &nifti_fn([6, 5, 4], [1.0; 3], |i, j, k| (i + j + k) as f32));
    let (mut controller, loader) = setup(dir.path(), "bg.nii");
    assert!(load(&mut controller, &loader, Role::Background, "bg.nii"));

    let views = controller.render_views().unwrap();
    for (plane, raster) in Plane::ALL.iter().zip(&views) {
        let path = dir.path().join(format!("{}.png", plane.label()));
        raster.save_png(&path).unwrap();
        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (raster.width() as u32, raster.height() as u32));
    }
}

#[test]
fn query_terms_drop_boolean_operators() {
    assert_eq!(
        extract_terms("emotion AND (amygdala OR hippocampus)"),
        ["emotion", "amygdala", "hippocampus"]
    );
}

#[test]
fn catalog_listings_flow_through_the_loader() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("terms"), r#"{"terms": ["reward", "pain", "painful"]}"#).unwrap();
    std::fs::create_dir_all(dir.path().join("query/pain")).unwrap();
    std::fs::write(
        dir.path().join("query/pain/studies"),
        r#"{"results": [{"title": "Heat", "pmid": 11, "year": 2004}, {"title": "Cold", "PMID": "12", "year": 2019}]}"#,
    )
    .unwrap();
    let api = dir.path().to_string_lossy().into_owned();
    let loader = Loader::new(Arc::new(FileSource::new(dir.path())));
    let mut catalog = Catalog::new(api.as_str());

    loader.spawn_listing(catalog.request_terms());
    assert!(catalog.complete(loader.wait_listing(WAIT).expect("listing timed out")));
    assert_eq!(catalog.terms_matching("pain"), ["pain", "painful"]);

    let query = append_term("", catalog.terms_matching("pain")[0]);
    let mut tickets = catalog.set_query(&query).into_iter();
    loader.spawn_listing(tickets.next().unwrap());
    assert!(catalog.complete(loader.wait_listing(WAIT).expect("listing timed out")));
    let titles: Vec<_> = catalog.studies().iter().map(|s| s.title.as_deref().unwrap()).collect();
    assert_eq!(titles, ["Cold", "Heat"]);
    assert_eq!(
        catalog.studies()[1].pubmed_url().as_deref(),
        Some("https://pubmed.ncbi.nlm.nih.gov/11/")
    );

    // No related-terms file exists for this term.
    let related = tickets.next().unwrap();
    assert_eq!(related.listing, Listing::RelatedTerms);
    loader.spawn_listing(related);
    assert!(catalog.complete(loader.wait_listing(WAIT).expect("listing timed out")));
    assert!(catalog.status(Listing::RelatedTerms).error().is_some());
}
