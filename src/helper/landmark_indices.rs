//! Named landmark groups of the 468-point face mesh model.
//!
//! These index lists belong to the upstream model topology. A model with a
//! different topology gets its own `LandmarkIndexTable` value.

use serde::{Deserialize, Serialize};

pub const FACE_MESH_LANDMARK_COUNT: usize = 468;

pub const LIP_UPPER: [usize; 12] = [61, 185, 40, 39, 37, 0, 267, 269, 270, 409, 291, 13];

pub const LIP_LOWER: [usize; 11] = [146, 91, 181, 84, 17, 314, 405, 321, 375, 78, 14];

pub const LEFT_EYE: [usize; 16] = [
    263, 249, 390, 373, 374, 380, 381, 382, 362, 398, 384, 385, 386, 387, 388, 466,
];

pub const RIGHT_EYE: [usize; 16] = [
    33, 7, 163, 144, 145, 153, 154, 155, 133, 173, 157, 158, 159, 160, 161, 246,
];

pub const LEFT_EYEBROW: [usize; 19] = [
    276, 283, 282, 295, 285, 300, 293, 334, 296, 336, 383, 353, 301, 368, 298, 333, 299, 337, 251,
];

pub const RIGHT_EYEBROW: [usize; 19] = [
    46, 53, 52, 65, 55, 70, 63, 105, 66, 107, 156, 124, 71, 139, 68, 104, 69, 108, 21,
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LandmarkIndexTable {
    pub lip_upper: Vec<usize>,
    pub lip_lower: Vec<usize>,
    pub left_eye: Vec<usize>,
    pub right_eye: Vec<usize>,
    pub left_eyebrow: Vec<usize>,
    pub right_eyebrow: Vec<usize>,
}

impl LandmarkIndexTable {
    pub fn face_mesh() -> Self {
        LandmarkIndexTable {
            lip_upper: LIP_UPPER.to_vec(),
            lip_lower: LIP_LOWER.to_vec(),
            left_eye: LEFT_EYE.to_vec(),
            right_eye: RIGHT_EYE.to_vec(),
            left_eyebrow: LEFT_EYEBROW.to_vec(),
            right_eyebrow: RIGHT_EYEBROW.to_vec(),
        }
    }

    /// Largest index referenced by any group.
    pub fn max_index(&self) -> Option<usize> {
        [
            &self.lip_upper,
            &self.lip_lower,
            &self.left_eye,
            &self.right_eye,
            &self.left_eyebrow,
            &self.right_eyebrow,
        ]
        .iter()
        .flat_map(|group| group.iter().copied())
        .max()
    }
}

impl Default for LandmarkIndexTable {
    fn default() -> Self {
        Self::face_mesh()
    }
}
