use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Error;
use opencv::core::Mat;
use opencv::prelude::*;
use parking_lot::Mutex;
use tokio::task;
use tracing::{debug, info};

use crate::config::config::{PipelineConfig, VideoConfig, DEFAULT_LANDMARK_CACHE_CAPACITY};
use crate::helper::landmark_helper::{landmarks_to_json, FaceLandmarkSet, LandmarkExtractor};
use crate::helper::viseme::{build_viseme_sequence, Viseme};
use crate::helper::warp_helper::{VisemeWarpEngine, WarpedFrame};
use crate::utils::image::decode_image;
use crate::utils::video::{save_frames, to_video};

/// Landmarks of recently seen images, least recently used evicted first.
struct LandmarkCache {
    capacity: usize,
    entries: HashMap<u64, Arc<Vec<FaceLandmarkSet>>>,
    order: VecDeque<u64>,
}

impl LandmarkCache {
    fn new(capacity: usize) -> Self {
        LandmarkCache { capacity, entries: HashMap::new(), order: VecDeque::new() }
    }

    fn touch(&mut self, key: u64) {
        if let Some(pos) = self.order.iter().position(|&k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key);
    }

    fn get(&mut self, key: u64) -> Option<Arc<Vec<FaceLandmarkSet>>> {
        let hit = self.entries.get(&key).cloned()?;
        self.touch(key);
        Some(hit)
    }

    fn insert(&mut self, key: u64, landmarks: Arc<Vec<FaceLandmarkSet>>) {
        if self.capacity == 0 {
            return;
        }
        self.entries.insert(key, landmarks);
        self.touch(key);
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else { break };
            self.entries.remove(&oldest);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Landmark extraction and viseme warping behind one async handle.
///
/// Cloning is cheap; clones share the models and the landmark cache. All
/// image work runs on the blocking thread pool.
#[derive(Clone)]
pub struct LipSyncPipeline {
    extractor: Arc<LandmarkExtractor>,
    engine: Arc<VisemeWarpEngine>,
    video: VideoConfig,
    cache: Arc<Mutex<LandmarkCache>>,
}

impl LipSyncPipeline {

    /// new initializes new instance of the pipeline
    pub fn new(extractor: LandmarkExtractor, engine: VisemeWarpEngine, video: VideoConfig) -> Self {
        LipSyncPipeline {
            extractor: Arc::new(extractor),
            engine: Arc::new(engine),
            video,
            cache: Arc::new(Mutex::new(LandmarkCache::new(DEFAULT_LANDMARK_CACHE_CAPACITY))),
        }
    }

    /// with_cache_capacity bounds the landmark cache to `capacity` images, 0 disables it.
    pub fn with_cache_capacity(self, capacity: usize) -> Self {
        LipSyncPipeline { cache: Arc::new(Mutex::new(LandmarkCache::new(capacity))), ..self }
    }

    /// from_config loads the landmark models and builds the warp engine.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            LandmarkExtractor::new(&config.landmark),
            VisemeWarpEngine::new(config.warp.clone()),
            config.video.clone(),
        )
        .with_cache_capacity(config.landmark.cache_capacity)
    }

    pub fn extractor(&self) -> &LandmarkExtractor {
        &self.extractor
    }

    pub fn engine(&self) -> &VisemeWarpEngine {
        &self.engine
    }

    pub fn cached_images(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// get_landmarks detects faces in `image`, reusing earlier results for identical images.
    ///
    /// # Arguments
    /// * `image` - BGR image
    ///
    /// # Returns
    /// * `Arc<Vec<FaceLandmarkSet>>`
    pub async fn get_landmarks(&self, image: Mat) -> Result<Arc<Vec<FaceLandmarkSet>>, Error> {
        let extractor = self.extractor.clone();
        let cache = self.cache.clone();
        let landmarks = task::spawn_blocking(move || cached_detect(&extractor, &cache, &image)).await?;
        Ok(landmarks)
    }

    /// get_landmarks_json decodes an encoded image and returns its landmarks as JSON.
    ///
    /// Undecodable input yields an empty list, like an image without a face.
    pub async fn get_landmarks_json(&self, im_bytes: Vec<u8>) -> Result<String, Error> {
        let image = match decode_image(&im_bytes) {
            Ok(image) => image,
            Err(e) => {
                debug!(error = %e, "pipeline - cannot decode image, reporting no faces");
                return landmarks_to_json(&[]);
            }
        };
        let landmarks = self.get_landmarks(image).await?;
        landmarks_to_json(&landmarks)
    }

    /// animate_detailed warps `image` once per viseme and reports how each frame was made.
    ///
    /// # Arguments
    /// * `image` - BGR portrait
    /// * `visemes` - mouth shapes, in playback order
    /// * `use_landmarks` - locate the mouth with the landmark model first
    ///
    /// # Returns
    /// * `Vec<WarpedFrame>` - one frame per viseme, same order
    pub async fn animate_detailed(&self, image: Mat, visemes: Vec<Viseme>, use_landmarks: bool) -> Result<Vec<WarpedFrame>, Error> {
        let extractor = self.extractor.clone();
        let engine = self.engine.clone();
        let cache = self.cache.clone();

        let frames = task::spawn_blocking(move || {
            let landmarks = if use_landmarks {
                cached_detect(&extractor, &cache, &image)
            } else {
                Arc::new(vec![])
            };
            engine.warp_detailed(&image, &visemes, Some(landmarks.as_slice()))
        })
        .await?;
        Ok(frames)
    }

    /// animate is `animate_detailed` without the per-frame report.
    pub async fn animate(&self, image: Mat, visemes: Vec<Viseme>, use_landmarks: bool) -> Result<Vec<Mat>, Error> {
        let frames = self.animate_detailed(image, visemes, use_landmarks).await?;
        Ok(frames.into_iter().map(|frame| frame.image).collect())
    }

    /// animate_text articulates `text` with the placeholder letter mapping at the configured frame rate.
    pub async fn animate_text(&self, image: Mat, text: &str, use_landmarks: bool) -> Result<Vec<Mat>, Error> {
        let visemes = build_viseme_sequence(text, self.video.frame_rate.round() as u32);
        self.animate(image, visemes, use_landmarks).await
    }

    /// render_frames animates `image` and writes the frames as numbered stills under `dir`.
    pub async fn render_frames(&self, image: Mat, visemes: Vec<Viseme>, use_landmarks: bool, dir: PathBuf) -> Result<Vec<PathBuf>, Error> {
        let frames = self.animate(image, visemes, use_landmarks).await?;
        let extension = self.video.frame_extension.clone();
        task::spawn_blocking(move || save_frames(&frames, &dir, &extension)).await?
    }

    /// render_video animates `image` and muxes the frames into one container at `path`.
    pub async fn render_video(&self, image: Mat, visemes: Vec<Viseme>, use_landmarks: bool, path: PathBuf) -> Result<PathBuf, Error> {
        let frames = self.animate(image, visemes, use_landmarks).await?;
        let video = self.video.clone();
        let written = task::spawn_blocking(move || to_video(&frames, video.frame_rate, &path, &video.fourcc)).await??;
        info!(path = %written.display(), "pipeline - rendered video");
        Ok(written)
    }
}

/// Content key of an image, `None` when its pixels cannot be read in one piece.
fn image_key(image: &Mat) -> Option<u64> {
    let data = image.data_bytes().ok()?;
    let mut hasher = DefaultHasher::new();
    (image.rows(), image.cols(), image.typ()).hash(&mut hasher);
    data.hash(&mut hasher);
    Some(hasher.finish())
}

fn cached_detect(extractor: &LandmarkExtractor, cache: &Mutex<LandmarkCache>, image: &Mat) -> Arc<Vec<FaceLandmarkSet>> {
    let key = image_key(image);
    if let Some(hit) = key.and_then(|k| cache.lock().get(k)) {
        debug!("pipeline - landmark cache hit");
        return hit;
    }

    match extractor.try_detect(image) {
        Ok(landmarks) => {
            let landmarks = Arc::new(landmarks);
            if let Some(k) = key {
                cache.lock().insert(k, landmarks.clone());
            }
            landmarks
        }
        Err(reason) => {
            debug!(reason = %reason, "pipeline - no landmarks, result not cached");
            Arc::new(vec![])
        }
    }
}
