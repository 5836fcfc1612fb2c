pub mod landmark_helper;
pub mod landmark_indices;
pub mod viseme;
pub mod warp_helper;
