pub mod annotate;
pub mod font;
pub mod loader;
pub mod transforms;

pub use annotate::Annotator;
pub use loader::ImageLoader;
pub use transforms::{ImageTransforms, Letterbox};
