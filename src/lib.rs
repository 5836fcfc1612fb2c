pub mod utils;
pub mod pipeline;
pub mod config;
pub mod helper;
pub mod error;
pub mod modules;

pub use config::config::{LandmarkConfig, PipelineConfig, WarpConfig};
pub use error::{Degraded, Error};
pub use helper::landmark_helper::{FaceLandmarkSet, FrameLandmarks, LandmarkExtractor};
pub use helper::viseme::{build_viseme_sequence, Viseme, VisemeShape, VisemeShapeTable};
pub use helper::warp_helper::{FrameStatus, VisemeWarpEngine, WarpStrategy, WarpedFrame};
pub use modules::face_mesh_client::{FaceMeshClient, FaceMeshModel};
pub use pipeline::pipeline::LipSyncPipeline;
pub use utils::coordinate::{BoundingBox, LandmarkPoint};
