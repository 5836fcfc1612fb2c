use std::path::Path;
use std::sync::Arc;

use anyhow::Error;
use ndarray::{Array2, ArrayView2};
use opencv::core::Mat;
use opencv::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::config::LandmarkConfig;
use crate::error::Degraded;
use crate::helper::landmark_indices::LandmarkIndexTable;
use crate::modules::face_mesh_client::{FaceMeshClient, FaceMeshModel};
use crate::utils::coordinate::{BoundingBox, LandmarkPoint};
use crate::utils::image::{decode_image, read_image};

/// Lip points needed before `lip_openness` measures anything.
pub const MIN_LIP_POINTS_FOR_OPENNESS: usize = 12;

/// Landmarks of one detected face, in pixel space.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FaceLandmarkSet {
    pub landmarks: Vec<LandmarkPoint>,
    pub lip_upper: Vec<LandmarkPoint>,
    pub lip_lower: Vec<LandmarkPoint>,
    pub left_eye: Vec<LandmarkPoint>,
    pub right_eye: Vec<LandmarkPoint>,
    pub left_eyebrow: Vec<LandmarkPoint>,
    pub right_eyebrow: Vec<LandmarkPoint>,
    pub image_width: i32,
    pub image_height: i32,
    pub landmark_count: usize,
}

impl FaceLandmarkSet {
    /// Upper lip points followed by lower lip points.
    pub fn lip_contour(&self) -> Vec<LandmarkPoint> {
        self.lip_upper.iter().chain(self.lip_lower.iter()).copied().collect()
    }

    pub fn bounds(&self) -> BoundingBox {
        face_bounds(&self.landmarks)
    }

    pub fn lip_bounds(&self) -> BoundingBox {
        face_bounds(&self.lip_contour())
    }
}

/// Landmarks of one frame of a video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameLandmarks {
    pub frame_index: usize,
    pub landmarks: Vec<FaceLandmarkSet>,
}

/// face_bounds returns the tight box around `points`, or an all-zero box when empty.
pub fn face_bounds(points: &[LandmarkPoint]) -> BoundingBox {
    let Some(first) = points.first() else {
        return BoundingBox::default();
    };

    points.iter().skip(1).fold(
        BoundingBox { x_min: first.x, y_min: first.y, x_max: first.x, y_max: first.y },
        |bbox, p| BoundingBox {
            x_min: bbox.x_min.min(p.x),
            y_min: bbox.y_min.min(p.y),
            x_max: bbox.x_max.max(p.x),
            y_max: bbox.y_max.max(p.y),
        },
    )
}

/// lip_openness approximates how open the mouth is.
///
/// The first six lip points are averaged against the next six on the y axis
/// and the gap is divided by `max_distance` pixels. This is an empirical
/// scale, not a calibrated measurement. Fewer than twelve points give `0.0`.
///
/// # Arguments
/// * `lips` - lip contour, upper points first
/// * `max_distance` - gap in pixels that counts as fully open
///
/// # Returns
/// * `f32` in `[0, 1]`
pub fn lip_openness(lips: &[LandmarkPoint], max_distance: f32) -> f32 {
    if lips.len() < MIN_LIP_POINTS_FOR_OPENNESS || max_distance <= 0.0 {
        return 0.0;
    }

    let mean_y = |points: &[LandmarkPoint]| points.iter().map(|p| p.y).sum::<f32>() / points.len() as f32;
    let upper = mean_y(&lips[0..6]);
    let lower = mean_y(&lips[6..12]);
    let openness = (lower - upper).abs() / max_distance;

    if openness.is_finite() {
        openness.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn select(points: &[LandmarkPoint], indices: &[usize]) -> Vec<LandmarkPoint> {
    indices.iter().filter_map(|&i| points.get(i).copied()).collect()
}

/// Finds faces and turns model output into named landmark groups.
///
/// Every query degrades to an empty or zero result instead of failing, so an
/// extractor without a model is still usable.
#[derive(Clone)]
pub struct LandmarkExtractor {
    model: Option<Arc<dyn FaceMeshModel>>,
    indices: LandmarkIndexTable,
    max_num_faces: usize,
    lip_openness_max: f32,
}

impl LandmarkExtractor {

    /// new loads the OpenCV face mesh backend described by `config`.
    ///
    /// A backend that fails to load is reported here, once; the extractor is
    /// still returned and every later call yields no faces.
    pub fn new(config: &LandmarkConfig) -> Self {
        let model: Option<Arc<dyn FaceMeshModel>> = match FaceMeshClient::new(config) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!(error = %e, "landmark_helper - face mesh model unavailable, landmarks disabled");
                None
            }
        };
        Self::from_parts(model, config)
    }

    /// with_model builds an extractor around an already constructed backend.
    pub fn with_model(model: Arc<dyn FaceMeshModel>, config: &LandmarkConfig) -> Self {
        Self::from_parts(Some(model), config)
    }

    /// without_model builds an extractor that never finds a face.
    pub fn without_model(config: &LandmarkConfig) -> Self {
        Self::from_parts(None, config)
    }

    fn from_parts(model: Option<Arc<dyn FaceMeshModel>>, config: &LandmarkConfig) -> Self {
        LandmarkExtractor {
            model,
            indices: LandmarkIndexTable::face_mesh(),
            max_num_faces: config.max_num_faces,
            lip_openness_max: config.lip_openness_max,
        }
    }

    pub fn with_indices(mut self, indices: LandmarkIndexTable) -> Self {
        self.indices = indices;
        self
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn indices(&self) -> &LandmarkIndexTable {
        &self.indices
    }

    /// detect returns up to `max_num_faces` landmark sets for `image`.
    ///
    /// # Arguments
    /// * `image` - BGR image
    ///
    /// # Returns
    /// * `Vec<FaceLandmarkSet>` - empty when there is no model, no face or an error
    pub fn detect(&self, image: &Mat) -> Vec<FaceLandmarkSet> {
        self.try_detect(image).unwrap_or_else(|reason| {
            match &reason {
                Degraded::InferenceFailed(_) => warn!(reason = %reason, "landmark_helper - landmark inference failed"),
                _ => debug!(reason = %reason, "landmark_helper - skipping detection"),
            }
            vec![]
        })
    }

    /// try_detect is `detect` that reports why no landmarks could be produced.
    ///
    /// `Ok(vec![])` means the model ran and found no face; an `Err` means the
    /// model could not answer for this image.
    pub fn try_detect(&self, image: &Mat) -> Result<Vec<FaceLandmarkSet>, Degraded> {
        let Some(model) = &self.model else {
            return Err(Degraded::NoModel);
        };
        if image.empty() {
            return Err(Degraded::EmptyImage);
        }

        let raw_faces = model.infer(image).map_err(|e| Degraded::InferenceFailed(e.to_string()))?;

        let image_shape = (image.cols(), image.rows());
        Ok(raw_faces
            .iter()
            .take(self.max_num_faces)
            .map(|raw| self.extract_groups(raw.view(), image_shape))
            .collect())
    }

    /// detect_path reads an image from disk and runs `detect` on it.
    pub fn detect_path<P: AsRef<Path>>(&self, path: P) -> Vec<FaceLandmarkSet> {
        match read_image(path.as_ref()) {
            Ok(image) => self.detect(&image),
            Err(e) => {
                warn!(error = %e, path = %path.as_ref().display(), "landmark_helper - cannot read image");
                vec![]
            }
        }
    }

    /// detect_bytes decodes an encoded image and runs `detect` on it.
    pub fn detect_bytes(&self, im_bytes: &[u8]) -> Vec<FaceLandmarkSet> {
        match decode_image(im_bytes) {
            Ok(image) => self.detect(&image),
            Err(e) => {
                warn!(error = %e, "landmark_helper - cannot decode image");
                vec![]
            }
        }
    }

    /// detect_sequence runs `detect` on every frame independently, in parallel.
    ///
    /// Results keep frame order.
    pub fn detect_sequence(&self, frames: &[Mat]) -> Vec<FrameLandmarks> {
        frames
            .par_iter()
            .enumerate()
            .map(|(frame_index, frame)| FrameLandmarks { frame_index, landmarks: self.detect(frame) })
            .collect()
    }

    /// extract_groups scales normalized landmarks to pixels and picks the named groups.
    ///
    /// Group indices beyond the number of landmarks are skipped, so a short
    /// landmark list yields shorter groups rather than an error.
    ///
    /// # Arguments
    /// * `raw` - `n x 3` (or `n x 2`) normalized landmarks
    /// * `image_shape` - `(width, height)` of the source image
    ///
    /// # Returns
    /// * `FaceLandmarkSet`
    pub fn extract_groups(&self, raw: ArrayView2<f32>, image_shape: (i32, i32)) -> FaceLandmarkSet {
        let (width, height) = image_shape;
        let landmarks: Vec<LandmarkPoint> = if raw.ncols() < 2 {
            vec![]
        } else {
            raw.outer_iter()
                .map(|row| LandmarkPoint {
                    x: row[0] * width as f32,
                    y: row[1] * height as f32,
                    z: row.get(2).copied().unwrap_or(0.0),
                })
                .collect()
        };

        FaceLandmarkSet {
            lip_upper: select(&landmarks, &self.indices.lip_upper),
            lip_lower: select(&landmarks, &self.indices.lip_lower),
            left_eye: select(&landmarks, &self.indices.left_eye),
            right_eye: select(&landmarks, &self.indices.right_eye),
            left_eyebrow: select(&landmarks, &self.indices.left_eyebrow),
            right_eyebrow: select(&landmarks, &self.indices.right_eyebrow),
            image_width: width,
            image_height: height,
            landmark_count: landmarks.len(),
            landmarks,
        }
    }

    pub fn face_bounds(&self, points: &[LandmarkPoint]) -> BoundingBox {
        face_bounds(points)
    }

    /// lip_openness of a lip contour, using the configured pixel scale.
    pub fn lip_openness(&self, lips: &[LandmarkPoint]) -> f32 {
        lip_openness(lips, self.lip_openness_max)
    }
}

/// landmarks_to_json serializes landmark sets for a presentation layer.
pub fn landmarks_to_json(sets: &[FaceLandmarkSet]) -> Result<String, Error> {
    Ok(serde_json::to_string(sets)?)
}

/// landmarks_from_json reads landmark sets written by `landmarks_to_json`.
pub fn landmarks_from_json(json: &str) -> Result<Vec<FaceLandmarkSet>, Error> {
    Ok(serde_json::from_str(json)?)
}

/// Raw model output for a `(width, height)` image from pixel-space points.
pub fn normalize_points(points: &[(f32, f32, f32)], image_shape: (i32, i32)) -> Array2<f32> {
    let (width, height) = (image_shape.0 as f32, image_shape.1 as f32);
    let mut raw = Array2::<f32>::zeros((points.len(), 3));
    for (i, &(x, y, z)) in points.iter().enumerate() {
        raw[[i, 0]] = x / width;
        raw[[i, 1]] = y / height;
        raw[[i, 2]] = z;
    }
    raw
}
