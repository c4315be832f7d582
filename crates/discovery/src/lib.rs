pub mod positions;
pub mod shape;

pub use positions::{Template, TemplateDetector, TemplateMap};
pub use shape::{group_by_shape, ShapeKey, ShapedUrl};
