pub mod coordinate;
pub mod image;
pub mod utils;
pub mod video;
