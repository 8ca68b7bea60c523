mod geom;
mod io;
mod settings;

pub use geom::*;
pub use io::*;
pub use settings::*;

/// A frame as it travels through the pipeline: an 8-bit, 3-channel raster.
pub type Frame = image::RgbImage;
