//! Tri-planar NIfTI viewer for statistical maps of meta-analysis queries.
//!
//! [`decode`] turns NIfTI-1 bytes into a [`DecodedVolume`], [`coords`] maps
//! voxels to millimetres, [`compositor`] renders the three planes and
//! [`controller`] owns the interactive state while [`catalog`] tracks the
//! term and study listings. [`app`] hosts it all in eframe.

pub mod api;
pub mod app;
pub mod catalog;
pub mod compositor;
pub mod config;
pub mod controller;
pub mod coords;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod query;
pub mod volume;

pub use catalog::Catalog;
pub use compositor::{Compositor, DisplayParams, Plane, Raster, ThresholdMode};
pub use config::ViewerConfig;
pub use controller::{LoadStatus, ViewerController};
pub use coords::{Axis, Grid, GridConvention};
pub use decode::decode_volume;
pub use error::{DecodeError, FetchError, LoadError};
pub use fetch::{Completion, Listing, ListingCompletion, ListingTicket, LoadTicket, Loader, Role};
pub use volume::DecodedVolume;
