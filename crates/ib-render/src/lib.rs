//! Geometry and raster helpers shared by the editor and the generation
//! pipeline: wire routing, hit testing, and annotation baking.

pub mod bake;
pub mod hit;
pub mod route;

pub use bake::{BakeError, ImageCompositor, MarkerStyle, RasterCompositor, bake_annotations};
pub use hit::{Hit, HitTolerance, drop_target, hit_test};
pub use route::ConnectionRoute;
