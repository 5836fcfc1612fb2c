use nalgebra::Point2;
use opencv::core::{Mat, Scalar, Size, DECOMP_LU};
use opencv::imgproc::{get_affine_transform, get_perspective_transform, warp_affine, warp_perspective, INTER_LINEAR};
use opencv::prelude::*;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::config::WarpConfig;
use crate::error::Degraded;
use crate::helper::landmark_helper::FaceLandmarkSet;
use crate::helper::viseme::{Viseme, VisemeShape};
use crate::utils::coordinate::LandmarkPoint;
use crate::utils::utils::{is_invertible_transform, mat_to_matrix3, points_to_vector_of_point2f};

/// How a frame's geometry was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarpStrategy {
    /// Homography from four lip landmark correspondences.
    LandmarkPerspective,
    /// Affine transform from exactly three lip landmark correspondences.
    LandmarkAffine,
    /// Homography from a fixed mouth rectangle below the image centre.
    DefaultRegion,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameStatus {
    Warped(WarpStrategy),
    /// Landmarks were supplied but a coarser strategy had to be used.
    FellBack { strategy: WarpStrategy, reason: Degraded },
    /// The frame is an untouched copy of the source.
    Unmodified(Degraded),
}

impl FrameStatus {
    pub fn strategy(&self) -> Option<WarpStrategy> {
        match self {
            FrameStatus::Warped(strategy) => Some(*strategy),
            FrameStatus::FellBack { strategy, .. } => Some(*strategy),
            FrameStatus::Unmodified(_) => None,
        }
    }

    pub fn is_unmodified(&self) -> bool {
        matches!(self, FrameStatus::Unmodified(_))
    }
}

pub struct WarpedFrame {
    pub viseme: Viseme,
    pub image: Mat,
    pub status: FrameStatus,
}

/// Point correspondences a frame is warped through.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpPlan {
    pub strategy: WarpStrategy,
    pub src: Vec<Point2<f32>>,
    pub dst: Vec<Point2<f32>>,
}

/// Deforms the mouth of a still portrait, one frame per viseme.
///
/// Frames are independent: each one is a fresh output of a warp that only
/// reads the source, so frame `i` depends on `visemes[i]`, the source and
/// the landmarks alone.
#[derive(Debug, Clone, Default)]
pub struct VisemeWarpEngine {
    config: WarpConfig,
}

impl VisemeWarpEngine {
    pub fn new(config: WarpConfig) -> Self {
        VisemeWarpEngine { config }
    }

    pub fn config(&self) -> &WarpConfig {
        &self.config
    }

    pub fn shape(&self, viseme: Viseme) -> VisemeShape {
        self.config.shapes.get(viseme)
    }

    /// warp returns one frame per viseme, each the size of `image`.
    ///
    /// # Arguments
    /// * `image` - BGR source portrait
    /// * `visemes` - mouth shapes, in playback order
    /// * `landmarks` - faces found in `image`; the first one drives the warp
    ///
    /// # Returns
    /// * `Vec<Mat>`
    pub fn warp(&self, image: &Mat, visemes: &[Viseme], landmarks: Option<&[FaceLandmarkSet]>) -> Vec<Mat> {
        self.warp_detailed(image, visemes, landmarks)
            .into_iter()
            .map(|frame| frame.image)
            .collect()
    }

    /// warp_symbols is `warp` for raw symbols; unknown ones articulate as `A`.
    pub fn warp_symbols<S: AsRef<str>>(&self, image: &Mat, symbols: &[S], landmarks: Option<&[FaceLandmarkSet]>) -> Vec<Mat> {
        let visemes: Vec<Viseme> = symbols.iter().map(|s| Viseme::from_symbol(s.as_ref())).collect();
        self.warp(image, &visemes, landmarks)
    }

    /// warp_detailed is `warp` plus how every frame was produced.
    pub fn warp_detailed(&self, image: &Mat, visemes: &[Viseme], landmarks: Option<&[FaceLandmarkSet]>) -> Vec<WarpedFrame> {
        let run = |&viseme: &Viseme| self.warp_frame(image, viseme, landmarks);

        let frames: Vec<WarpedFrame> = if self.config.parallel {
            visemes.par_iter().map(run).collect()
        } else {
            visemes.iter().map(run).collect()
        };

        let unmodified = frames.iter().filter(|f| f.status.is_unmodified()).count();
        if unmodified > 0 {
            warn!(unmodified, total = frames.len(), "warp_helper - some frames fell back to the source image");
        }
        frames
    }

    /// warp_frame deforms `source` into a new frame; failures return a copy of the source.
    pub fn warp_frame(&self, source: &Mat, viseme: Viseme, landmarks: Option<&[FaceLandmarkSet]>) -> WarpedFrame {
        if source.empty() {
            return WarpedFrame { viseme, image: Mat::default(), status: FrameStatus::Unmodified(Degraded::EmptyImage) };
        }

        let shape = self.shape(viseme);
        let default_plan = || self.plan_default_region(source.cols(), source.rows(), shape);

        let (plan, fallback) = match landmarks.and_then(|faces| faces.first()) {
            Some(face) => {
                let lips = face.lip_contour();
                match self.plan_landmark_warp(&lips, shape) {
                    Some(plan) => (plan, None),
                    None => {
                        debug!(points = lips.len(), "warp_helper - too few lip points, using default region");
                        (default_plan(), Some(Degraded::InsufficientGeometry(lips.len())))
                    }
                }
            }
            None => (default_plan(), None),
        };

        match self.apply(source, &plan) {
            Ok(image) => {
                let status = match fallback {
                    Some(reason) => FrameStatus::FellBack { strategy: plan.strategy, reason },
                    None => FrameStatus::Warped(plan.strategy),
                };
                WarpedFrame { viseme, image, status }
            }
            Err(reason) => {
                debug!(viseme = %viseme, reason = %reason, "warp_helper - frame left unmodified");
                let image = source.try_clone().unwrap_or_else(|e| {
                    warn!(error = %e, "warp_helper - cannot copy source for unmodified frame");
                    Mat::default()
                });
                WarpedFrame { viseme, image, status: FrameStatus::Unmodified(reason) }
            }
        }
    }

    /// plan_landmark_warp scales the lip contour about its centroid.
    ///
    /// Width scales by `lip_width_factor`. Height scales by
    /// `VisemeShape::vertical_scale`, which opens the mouth above the
    /// openness threshold and closes it otherwise. Four or more points give
    /// a perspective plan over the first four, three give an affine plan.
    ///
    /// # Returns
    /// * `Option<WarpPlan>` - `None` with fewer than three lip points
    pub fn plan_landmark_warp(&self, lips: &[LandmarkPoint], shape: VisemeShape) -> Option<WarpPlan> {
        let strategy = match lips.len() {
            0..=2 => return None,
            3 => WarpStrategy::LandmarkAffine,
            _ => WarpStrategy::LandmarkPerspective,
        };
        let used = if strategy == WarpStrategy::LandmarkAffine { 3 } else { 4 };

        let points: Vec<Point2<f32>> = lips.iter().map(|p| Point2::new(p.x, p.y)).collect();
        let sum = points.iter().fold(nalgebra::Vector2::<f32>::zeros(), |acc, p| acc + p.coords);
        let centroid = Point2::from(sum / points.len() as f32);

        let vertical = shape.vertical_scale(self.config.openness_threshold);
        let src: Vec<Point2<f32>> = points.iter().take(used).copied().collect();
        let dst: Vec<Point2<f32>> = src
            .iter()
            .map(|p| {
                Point2::new(
                    centroid.x + (p.x - centroid.x) * shape.lip_width_factor,
                    centroid.y + (p.y - centroid.y) * vertical,
                )
            })
            .collect();

        Some(WarpPlan { strategy, src, dst })
    }

    /// plan_default_region maps the usual mouth rectangle of a front-facing portrait.
    ///
    /// The rectangle is centred at `(w/2, 3h/4)` with size `(w/6, h/8)` by
    /// default and is resized by the shape's width and height factors, with an
    /// extra `1 + openness` on the height for opening shapes.
    pub fn plan_default_region(&self, width: i32, height: i32, shape: VisemeShape) -> WarpPlan {
        let (w, h) = (width as f32, height as f32);
        let (cx, cy) = (w / 2.0, h * self.config.roi_center_y);
        let (rw, rh) = (w * self.config.roi_width, h * self.config.roi_height);

        let boost = if shape.lip_openness > self.config.openness_threshold {
            1.0 + shape.lip_openness
        } else {
            1.0
        };
        let (nw, nh) = (rw * shape.lip_width_factor, rh * shape.lip_height_factor * boost);

        let corners = |half_w: f32, half_h: f32| {
            vec![
                Point2::new(cx - half_w, cy - half_h),
                Point2::new(cx + half_w, cy - half_h),
                Point2::new(cx + half_w, cy + half_h),
                Point2::new(cx - half_w, cy + half_h),
            ]
        };

        WarpPlan {
            strategy: WarpStrategy::DefaultRegion,
            src: corners(rw / 2.0, rh / 2.0),
            dst: corners(nw / 2.0, nh / 2.0),
        }
    }

    /// apply warps the whole source through the plan's transform.
    ///
    /// The region transform is applied to every pixel rather than blended
    /// back over the untouched face.
    fn apply(&self, source: &Mat, plan: &WarpPlan) -> Result<Mat, Degraded> {
        let failed = |e: opencv::Error| Degraded::WarpFailed(e.to_string());
        let src = points_to_vector_of_point2f(&plan.src);
        let dst = points_to_vector_of_point2f(&plan.dst);
        let size = Size::new(source.cols(), source.rows());
        let border_mode = self.config.border_mode.to_opencv();

        let transform = match plan.strategy {
            WarpStrategy::LandmarkAffine => get_affine_transform(&src, &dst).map_err(failed)?,
            WarpStrategy::LandmarkPerspective | WarpStrategy::DefaultRegion => {
                get_perspective_transform(&src, &dst, DECOMP_LU).map_err(failed)?
            }
        };

        let matrix = mat_to_matrix3(&transform).map_err(|e| Degraded::WarpFailed(e.to_string()))?;
        if !is_invertible_transform(&matrix) {
            return Err(Degraded::SingularTransform);
        }

        let mut warped = Mat::default();
        match plan.strategy {
            WarpStrategy::LandmarkAffine => {
                warp_affine(source, &mut warped, &transform, size, INTER_LINEAR, border_mode, Scalar::all(0.0))
                    .map_err(failed)?;
            }
            WarpStrategy::LandmarkPerspective | WarpStrategy::DefaultRegion => {
                warp_perspective(source, &mut warped, &transform, size, INTER_LINEAR, border_mode, Scalar::all(0.0))
                    .map_err(failed)?;
            }
        }
        Ok(warped)
    }
}

#[cfg(test)]
mod tests {
    use opencv::core::{Rect, Vec3b, CV_8UC3};
    use proptest::prelude::*;

    use super::*;
    use crate::utils::coordinate::BoundingBox;

    fn textured(width: i32, height: i32) -> Mat {
        let mut img = Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(0.0)).unwrap();
        for y in 0..height {
            for x in 0..width {
                let px = img.at_2d_mut::<Vec3b>(y, x).unwrap();
                *px = Vec3b::from([
                    ((x * 7 + y * 3) % 256) as u8,
                    ((x * 5 + y * 11) % 256) as u8,
                    ((x ^ y) % 256) as u8,
                ]);
            }
        }
        img
    }

    fn bytes(img: &Mat) -> Vec<u8> {
        img.data_bytes().unwrap().to_vec()
    }

    fn region_bytes(img: &Mat, rect: Rect) -> Vec<u8> {
        Mat::roi(img, rect).unwrap().try_clone().unwrap().data_bytes().unwrap().to_vec()
    }

    fn lip_face(points: Vec<LandmarkPoint>) -> FaceLandmarkSet {
        let half = points.len() / 2;
        FaceLandmarkSet {
            lip_upper: points[..half].to_vec(),
            lip_lower: points[half..].to_vec(),
            image_width: 400,
            image_height: 400,
            landmark_count: points.len(),
            landmarks: points,
            ..Default::default()
        }
    }

    /// 20 points on an ellipse around (200, 300).
    fn ellipse_lips() -> Vec<LandmarkPoint> {
        (0..20)
            .map(|i| {
                let t = i as f32 / 20.0 * std::f32::consts::TAU;
                LandmarkPoint::new(200.0 + 40.0 * t.cos(), 300.0 + 15.0 * t.sin(), 0.0)
            })
            .collect()
    }

    fn engine() -> VisemeWarpEngine {
        VisemeWarpEngine::new(WarpConfig::new())
    }

    #[test]
    fn test_default_region_vowels() {
        let image = textured(400, 400);
        let visemes: Vec<Viseme> = ["A", "E", "I", "O", "U", "A"].iter().map(|s| Viseme::from_symbol(s)).collect();
        let frames = engine().warp_detailed(&image, &visemes, None);

        assert_eq!(frames.len(), 6);
        let mouth = Rect::new(167, 275, 66, 50);
        for (frame, viseme) in frames.iter().zip(&visemes) {
            assert_eq!(frame.viseme, *viseme);
            assert_eq!(frame.status, FrameStatus::Warped(WarpStrategy::DefaultRegion));
            assert_eq!(frame.image.cols(), 400);
            assert_eq!(frame.image.rows(), 400);
            assert_ne!(region_bytes(&frame.image, mouth), region_bytes(&image, mouth));
        }
        assert_ne!(bytes(&frames[0].image), bytes(&frames[3].image));
        assert_eq!(bytes(&frames[0].image), bytes(&frames[5].image));
    }

    #[test]
    fn test_source_is_not_mutated() {
        let image = textured(120, 90);
        let before = bytes(&image);
        let _ = engine().warp(&image, &[Viseme::O, Viseme::M], None);
        assert_eq!(bytes(&image), before);
    }

    #[test]
    fn test_warp_is_deterministic() {
        let image = textured(160, 120);
        let visemes = [Viseme::A, Viseme::S, Viseme::O, Viseme::M];
        let faces = vec![lip_face(ellipse_lips())];

        for landmarks in [None, Some(faces.as_slice())] {
            let first: Vec<Vec<u8>> = engine().warp(&image, &visemes, landmarks).iter().map(bytes).collect();
            let second: Vec<Vec<u8>> = engine().warp(&image, &visemes, landmarks).iter().map(bytes).collect();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let image = textured(160, 120);
        let visemes = build_mixed_sequence();
        let mut config = WarpConfig::new();
        config.parallel = false;

        let sequential: Vec<Vec<u8>> = VisemeWarpEngine::new(config).warp(&image, &visemes, None).iter().map(bytes).collect();
        let parallel: Vec<Vec<u8>> = engine().warp(&image, &visemes, None).iter().map(bytes).collect();
        assert_eq!(sequential, parallel);
    }

    fn build_mixed_sequence() -> Vec<Viseme> {
        vec![Viseme::H, Viseme::E, Viseme::L, Viseme::L, Viseme::O, Viseme::W, Viseme::B, Viseme::P]
    }

    #[test]
    fn test_unknown_symbol_warps_like_a() {
        let image = textured(100, 100);
        let unknown = engine().warp_symbols(&image, &["??", "o"], None);
        let reference = engine().warp(&image, &[Viseme::A], None);
        assert_eq!(bytes(&unknown[0]), bytes(&reference[0]));
        assert_eq!(bytes(&unknown[1]), bytes(&reference[0]));
    }

    #[test]
    fn test_landmark_guided_perspective() {
        let image = textured(400, 400);
        let face = lip_face(ellipse_lips());
        let faces = vec![face.clone()];
        let frames = engine().warp_detailed(&image, &[Viseme::A, Viseme::M], Some(faces.as_slice()));

        for frame in &frames {
            assert_eq!(frame.status, FrameStatus::Warped(WarpStrategy::LandmarkPerspective));
            assert_eq!((frame.image.cols(), frame.image.rows()), (400, 400));
        }
        assert_ne!(bytes(&frames[0].image), bytes(&frames[1].image));

        let plan = engine().plan_landmark_warp(&face.lip_contour(), engine().shape(Viseme::A)).unwrap();
        let lip_box: BoundingBox = face.lip_bounds();
        assert_eq!(plan.src.len(), 4);
        assert!(plan.src.iter().all(|p| lip_box.contains(p.x, p.y)));
    }

    #[test]
    fn test_landmark_plan_scales_about_centroid() {
        let lips = vec![
            LandmarkPoint::new(0.0, -10.0, 0.0),
            LandmarkPoint::new(10.0, 0.0, 0.0),
            LandmarkPoint::new(0.0, 10.0, 0.0),
            LandmarkPoint::new(-10.0, 0.0, 0.0),
        ];

        let opening = VisemeShape::new(0.8, 1.2, 1.0);
        let plan = engine().plan_landmark_warp(&lips, opening).unwrap();
        assert_eq!(plan.strategy, WarpStrategy::LandmarkPerspective);
        assert!((plan.dst[0].y - (-18.0)).abs() < 1e-4);
        assert!((plan.dst[1].x - 12.0).abs() < 1e-4);

        let closing = VisemeShape::new(0.4, 1.0, 1.0);
        let plan = engine().plan_landmark_warp(&lips, closing).unwrap();
        assert!((plan.dst[2].y - 8.0).abs() < 1e-4);
        assert!((plan.dst[3].x - (-10.0)).abs() < 1e-4);
    }

    #[test]
    fn test_three_lip_points_use_affine() {
        let image = textured(200, 200);
        let faces = vec![lip_face(vec![
            LandmarkPoint::new(80.0, 150.0, 0.0),
            LandmarkPoint::new(120.0, 150.0, 0.0),
            LandmarkPoint::new(100.0, 165.0, 0.0),
        ])];
        let frames = engine().warp_detailed(&image, &[Viseme::O], Some(faces.as_slice()));
        assert_eq!(frames[0].status, FrameStatus::Warped(WarpStrategy::LandmarkAffine));
        assert_ne!(bytes(&frames[0].image), bytes(&image));
    }

    #[test]
    fn test_two_lip_points_fall_back_to_default_region() {
        let image = textured(200, 200);
        let faces = vec![lip_face(vec![
            LandmarkPoint::new(80.0, 150.0, 0.0),
            LandmarkPoint::new(120.0, 150.0, 0.0),
        ])];
        let frames = engine().warp_detailed(&image, &[Viseme::E], Some(faces.as_slice()));
        assert_eq!(
            frames[0].status,
            FrameStatus::FellBack {
                strategy: WarpStrategy::DefaultRegion,
                reason: Degraded::InsufficientGeometry(2),
            }
        );

        let reference = engine().warp(&image, &[Viseme::E], None);
        assert_eq!(bytes(&frames[0].image), bytes(&reference[0]));
    }

    #[test]
    fn test_empty_landmark_list_uses_default_region() {
        let image = textured(100, 100);
        let frames = engine().warp_detailed(&image, &[Viseme::U], Some(&[][..]));
        assert_eq!(frames[0].status, FrameStatus::Warped(WarpStrategy::DefaultRegion));
    }

    #[test]
    fn test_collapsed_lips_leave_frame_unmodified() {
        let image = textured(200, 200);
        let collapsed = vec![LandmarkPoint::new(100.0, 150.0, 0.0); 6];
        let faces = vec![lip_face(collapsed)];
        let frames = engine().warp_detailed(&image, &[Viseme::A, Viseme::O], Some(faces.as_slice()));

        assert_eq!(frames.len(), 2);
        for frame in &frames {
            assert_eq!(frame.status, FrameStatus::Unmodified(Degraded::SingularTransform));
            assert_eq!(bytes(&frame.image), bytes(&image));
        }
    }

    #[test]
    fn test_unmodified_frames_do_not_alias_the_source() {
        let image = textured(120, 90);
        let before = bytes(&image);
        let faces = vec![lip_face(vec![LandmarkPoint::new(60.0, 70.0, 0.0); 6])];
        let mut frames = engine().warp_detailed(&image, &[Viseme::A, Viseme::O], Some(faces.as_slice()));

        assert!(frames.iter().all(|f| f.status.is_unmodified()));
        assert_ne!(frames[0].image.data(), frames[1].image.data());
        for frame in &mut frames {
            assert_ne!(frame.image.data(), image.data());
            *frame.image.at_2d_mut::<Vec3b>(0, 0).unwrap() = Vec3b::from([1, 2, 3]);
        }
        assert_eq!(bytes(&image), before);
    }

    #[test]
    fn test_warp_frame_borrows_the_source() {
        let image = textured(80, 60);
        let frame = engine().warp_frame(&image, Viseme::O, None);
        assert_eq!(frame.status, FrameStatus::Warped(WarpStrategy::DefaultRegion));
        assert_ne!(frame.image.data(), image.data());
        assert_eq!((frame.image.cols(), frame.image.rows()), (80, 60));
    }

    #[test]
    fn test_empty_image_keeps_frame_count() {
        let frames = engine().warp_detailed(&Mat::default(), &[Viseme::A, Viseme::B, Viseme::K], None);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.status == FrameStatus::Unmodified(Degraded::EmptyImage)));
        assert!(engine().warp(&textured(10, 10), &[], None).is_empty());
    }

    #[test]
    fn test_default_region_plan_geometry() {
        let shape = VisemeShape::new(0.9, 1.5, 1.0);
        let plan = engine().plan_default_region(600, 400, shape);
        // centre (300, 300), source rect 100 x 50
        assert!((plan.src[0] - Point2::new(250.0, 275.0)).norm() < 1e-3);
        assert!((plan.src[2] - Point2::new(350.0, 325.0)).norm() < 1e-3);
        // width 150, height 50 * 1.0 * 1.9
        assert!((plan.dst[1].x - 375.0).abs() < 1e-3);
        assert!((plan.dst[1].y - (300.0 - 47.5)).abs() < 1e-3);

        let closed = engine().plan_default_region(600, 400, VisemeShape::new(0.2, 1.0, 0.8));
        assert!((closed.dst[3].y - 320.0).abs() < 1e-3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_frame_order_follows_viseme_order(
            visemes in Just(vec![Viseme::A, Viseme::O, Viseme::M, Viseme::E, Viseme::U, Viseme::F]).prop_shuffle()
        ) {
            let image = textured(64, 48);
            let frames = engine().warp(&image, &visemes, None);
            prop_assert_eq!(frames.len(), visemes.len());
            for (frame, &viseme) in frames.iter().zip(&visemes) {
                let single = engine().warp(&image, &[viseme], None);
                prop_assert_eq!(bytes(frame), bytes(&single[0]));
            }
        }
    }
}
