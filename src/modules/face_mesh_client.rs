use std::path::Path;

use anyhow::Error;
use ndarray::Array2;
use opencv::core::{Mat, Ptr, Rect, Scalar, Size, CV_32F};
use opencv::dnn::{self, Net};
use opencv::objdetect::FaceDetectorYN;
use opencv::prelude::*;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::config::LandmarkConfig;

/// A dense face landmark model.
///
/// `infer` returns one `n x 3` array per detected face, in detection order,
/// holding `x` and `y` normalized to `[0, 1]` by the image size and a raw
/// relative depth `z`.
pub trait FaceMeshModel: Send + Sync {
    fn infer(&self, image: &Mat) -> Result<Vec<Array2<f32>>, Error>;
}

/// Face mesh backed by OpenCV: YuNet finds faces, then a face mesh ONNX
/// network regresses the landmarks on a square crop around each face.
pub struct FaceMeshClient {
    detector: Mutex<Ptr<FaceDetectorYN>>,
    mesh: Mutex<Net>,
    input_size: i32,
    crop_scale: f32,
    scale: f64,
}

impl FaceMeshClient {
    pub fn new(config: &LandmarkConfig) -> Result<Self, Error> {
        for model in [&config.face_detector_model, &config.face_mesh_model] {
            if !Path::new(model).exists() {
                return Err(crate::error::Error::ModelUnavailable(format!("{model} does not exist")).into());
            }
        }

        let detector = FaceDetectorYN::create(
            &config.face_detector_model,
            "",
            Size::new(320, 320),
            config.score_threshold,
            config.nms_threshold,
            config.top_k,
            dnn::DNN_BACKEND_DEFAULT,
            dnn::DNN_TARGET_CPU,
        )?;

        let mesh = dnn::read_net_from_onnx(&config.face_mesh_model)?;
        if mesh.empty()? {
            return Err(crate::error::Error::ModelUnavailable(format!(
                "{} loaded as an empty network", config.face_mesh_model
            )).into());
        }

        Ok(FaceMeshClient {
            detector: Mutex::new(detector),
            mesh: Mutex::new(mesh),
            input_size: config.mesh_input_size,
            crop_scale: config.crop_scale,
            scale: config.scale,
        })
    }

    /// detect_faces returns the face boxes found by the detector, best score first.
    pub fn detect_faces(&self, image: &Mat) -> Result<Vec<Rect>, Error> {
        let mut faces = Mat::default();
        {
            let mut detector = self.detector.lock();
            detector.set_input_size(Size::new(image.cols(), image.rows()))?;
            detector.detect(image, &mut faces)?;
        }

        let mut boxes: Vec<Rect> = Vec::with_capacity(faces.rows().max(0) as usize);
        for row in 0..faces.rows() {
            let x = *faces.at_2d::<f32>(row, 0)?;
            let y = *faces.at_2d::<f32>(row, 1)?;
            let w = *faces.at_2d::<f32>(row, 2)?;
            let h = *faces.at_2d::<f32>(row, 3)?;
            boxes.push(Rect::new(x as i32, y as i32, w as i32, h as i32));
        }
        Ok(boxes)
    }

    /// preprocess packs the `crop` region of `image` into an RGB network blob.
    pub fn preprocess(&self, image: &Mat, crop: Rect) -> Result<Mat, Error> {
        let roi = Mat::roi(image, crop)?.try_clone()?;
        let blob = dnn::blob_from_image(
            &roi,
            self.scale,
            Size::new(self.input_size, self.input_size),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;
        Ok(blob)
    }
}

impl FaceMeshModel for FaceMeshClient {
    fn infer(&self, image: &Mat) -> Result<Vec<Array2<f32>>, Error> {
        let faces = self.detect_faces(image)?;
        let crops = face_crops(&faces, self.crop_scale, image.cols(), image.rows());
        debug!(faces = faces.len(), usable = crops.len(), "face_mesh_client - detected faces");

        let image_size = Size::new(image.cols(), image.rows());
        let mut results: Vec<Array2<f32>> = Vec::with_capacity(crops.len());
        for crop in crops {
            let blob = self.preprocess(image, crop)?;
            let output = {
                let mut mesh = self.mesh.lock();
                mesh.set_input(&blob, "", 1.0, Scalar::default())?;
                mesh.forward_single("")?
            };
            results.push(postprocess(output.data_typed::<f32>()?, crop, self.input_size, image_size)?);
        }
        Ok(results)
    }
}

/// postprocess maps raw network output from crop pixels to normalized image coordinates.
///
/// # Arguments
/// * `output` - flat `x, y, z` triples in `input_size` network pixels; a trailing partial triple is ignored
/// * `crop` - image region the network saw, stretched to `input_size` on both axes
/// * `input_size` - side of the square network input
/// * `image_size` - size of the full image
///
/// # Returns
/// * `Array2<f32>` - `n x 3`, `x` and `y` in `[0, 1]` of the image, `z` scaled like `x`
pub fn postprocess(output: &[f32], crop: Rect, input_size: i32, image_size: Size) -> Result<Array2<f32>, Error> {
    if input_size <= 0 || image_size.width <= 0 || image_size.height <= 0 {
        return Err(Error::msg("face_mesh_client - input and image sizes must be positive"));
    }
    let n = output.len() / 3;
    if n == 0 {
        return Err(Error::msg("face_mesh_client - face mesh output is empty"));
    }
    let raw = Array2::from_shape_vec((n, 3), output[..n * 3].to_vec())?;

    let input = input_size as f32;
    let (img_w, img_h) = (image_size.width as f32, image_size.height as f32);
    let mut landmarks = Array2::<f32>::zeros((n, 3));
    for (i, row) in raw.outer_iter().enumerate() {
        landmarks[[i, 0]] = (crop.x as f32 + row[0] / input * crop.width as f32) / img_w;
        landmarks[[i, 1]] = (crop.y as f32 + row[1] / input * crop.height as f32) / img_h;
        landmarks[[i, 2]] = row[2] / input * crop.width as f32 / img_w;
    }
    Ok(landmarks)
}

/// face_crops returns the mesh crop of every face, skipping faces outside the image.
pub fn face_crops(faces: &[Rect], scale: f32, cols: i32, rows: i32) -> Vec<Rect> {
    faces
        .iter()
        .filter_map(|&face| {
            let crop = square_crop(face, scale, cols, rows);
            if crop.is_none() {
                debug!(?face, "face_mesh_client - face box lies outside the image, skipping");
            }
            crop
        })
        .collect()
}

/// Square box of side `max(w, h) * scale` centred on `face`, clipped to the image.
fn square_crop(face: Rect, scale: f32, cols: i32, rows: i32) -> Option<Rect> {
    let side = (face.width.max(face.height) as f32 * scale).round() as i32;
    let cx = face.x + face.width / 2;
    let cy = face.y + face.height / 2;

    let x0 = (cx - side / 2).max(0);
    let y0 = (cy - side / 2).max(0);
    let x1 = (cx - side / 2 + side).min(cols);
    let y1 = (cy - side / 2 + side).min(rows);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
}
