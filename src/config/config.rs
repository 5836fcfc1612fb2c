use std::fs;
use std::path::Path;

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};

use crate::helper::viseme::VisemeShapeTable;

/// Distinct images whose landmarks the pipeline keeps.
pub const DEFAULT_LANDMARK_CACHE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LandmarkConfig {
    pub face_detector_model: String,
    pub face_mesh_model: String,
    pub max_num_faces: usize,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: i32,
    pub mesh_input_size: i32,
    pub crop_scale: f32,
    pub scale: f64,
    pub lip_openness_max: f32,
    /// Images remembered by the pipeline's landmark cache, 0 disables it.
    pub cache_capacity: usize,
}

impl LandmarkConfig {
    pub fn new() -> Self {
        LandmarkConfig {
            face_detector_model: "models/face_detection_yunet_2023mar.onnx".to_string(),
            face_mesh_model: "models/face_landmark.onnx".to_string(),
            max_num_faces: 1,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            top_k: 5000,
            mesh_input_size: 192,
            crop_scale: 1.5,
            scale: 1.0 / 255.0,
            lip_openness_max: 50.0,
            cache_capacity: DEFAULT_LANDMARK_CACHE_CAPACITY,
        }
    }
}

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Border handling for pixels the warp samples from outside the source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BorderMode {
    Constant,
    Replicate,
    Reflect,
}

impl BorderMode {
    pub fn to_opencv(self) -> i32 {
        match self {
            BorderMode::Constant => opencv::core::BORDER_CONSTANT,
            BorderMode::Replicate => opencv::core::BORDER_REPLICATE,
            BorderMode::Reflect => opencv::core::BORDER_REFLECT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WarpConfig {
    /// Openness above which a viseme counts as an opening articulation.
    pub openness_threshold: f32,
    /// Default mouth ROI, as fractions of the image size.
    pub roi_center_y: f32,
    pub roi_width: f32,
    pub roi_height: f32,
    pub border_mode: BorderMode,
    pub parallel: bool,
    pub shapes: VisemeShapeTable,
}

impl WarpConfig {
    pub fn new() -> Self {
        WarpConfig {
            openness_threshold: 0.5,
            roi_center_y: 0.75,
            roi_width: 1.0 / 6.0,
            roi_height: 1.0 / 8.0,
            border_mode: BorderMode::Constant,
            parallel: true,
            shapes: VisemeShapeTable::builtin(),
        }
    }
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    pub frame_rate: f64,
    pub fourcc: String,
    pub frame_extension: String,
}

impl VideoConfig {
    pub fn new() -> Self {
        VideoConfig {
            frame_rate: 30.0,
            fourcc: "mp4v".to_string(),
            frame_extension: "png".to_string(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub landmark: LandmarkConfig,
    pub warp: WarpConfig,
    pub video: VideoConfig,
}

impl PipelineConfig {
    /// from_json_file loads a config, filling every missing field with its default.
    ///
    /// # Arguments
    /// * `path` - path of a JSON document
    ///
    /// # Returns
    /// * `Result<PipelineConfig, Error>`
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("config - cannot read {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("config - cannot parse {}", path.display()))?;
        Ok(config)
    }
}
