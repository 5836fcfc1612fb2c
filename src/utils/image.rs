use std::path::Path;

use anyhow::Error;
use opencv::core::{Mat, Point, Scalar, Vector, CV_8UC3};
use opencv::imgcodecs::{imdecode, imencode, imread, IMREAD_COLOR};
use opencv::imgproc::{self, FONT_HERSHEY_SIMPLEX, LINE_8, LINE_AA};
use opencv::prelude::*;

/// decode_image decodes an encoded still image into a BGR matrix.
///
/// Frames stay in BGR throughout the crate, matching `imread` and `imwrite`.
pub fn decode_image(im_bytes: &[u8]) -> Result<Mat, Error> {
    let img_as_mat = Mat::from_slice(im_bytes)?;
    let img_bgr = imdecode(&img_as_mat, IMREAD_COLOR)?;
    if img_bgr.empty() {
        return Err(Error::msg("image - cannot decode image bytes"));
    }
    Ok(img_bgr)
}

/// read_image loads a still image from disk as BGR.
pub fn read_image(path: &Path) -> Result<Mat, Error> {
    let path_str = path
        .to_str()
        .ok_or_else(|| Error::msg(format!("image - path is not valid UTF-8: {}", path.display())))?;
    let img = imread(path_str, IMREAD_COLOR)?;
    if img.empty() {
        return Err(Error::msg(format!("image - cannot read {}", path.display())));
    }
    Ok(img)
}

/// encode_image encodes `img` with the codec picked by `ext` (e.g. ".png").
pub fn encode_image(img: &Mat, ext: &str) -> Result<Vec<u8>, Error> {
    let mut buffer: Vector<u8> = Vector::new();
    let ok = imencode(ext, img, &mut buffer, &Vector::new())?;
    if !ok {
        return Err(Error::msg(format!("image - cannot encode frame as {ext}")));
    }
    Ok(buffer.to_vec())
}

/// placeholder_avatar draws the stand-in portrait used before a real one is supplied.
///
/// A vertical blue gradient inside a circle on black, a glow ring and the
/// words "AI" / "Avatar".
pub fn placeholder_avatar(width: i32, height: i32) -> Result<Mat, Error> {
    let mut gradient = Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(0.0))?;
    for y in 0..height {
        let factor = y as f64 / height as f64;
        let g = 191.0 * (1.0 - factor) + 100.0 * factor;
        let b = 255.0 * (1.0 - factor) + 200.0 * factor;
        imgproc::line(
            &mut gradient,
            Point::new(0, y),
            Point::new(width - 1, y),
            Scalar::new(b, g, 0.0, 0.0),
            1,
            LINE_8,
            0,
        )?;
    }

    let center = Point::new(width / 2, height / 2);
    let radius = (width.min(height) / 2 - 20).max(1);

    let mut mask = Mat::new_rows_cols_with_default(height, width, opencv::core::CV_8UC1, Scalar::all(0.0))?;
    imgproc::circle(&mut mask, center, radius, Scalar::all(255.0), -1, LINE_AA, 0)?;

    let mut avatar = Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(0.0))?;
    gradient.copy_to_masked(&mut avatar, &mask)?;

    for i in 0..20 {
        let alpha = 1.0 - i as f64 / 20.0;
        imgproc::circle(
            &mut avatar,
            center,
            radius + i,
            Scalar::new(255.0 * alpha, 191.0 * alpha, 0.0, 0.0),
            1,
            LINE_AA,
            0,
        )?;
    }

    let white = Scalar::all(255.0);
    let black = Scalar::all(0.0);
    let title = Point::new(width / 2 - 30, height / 2 - 10);
    imgproc::put_text(&mut avatar, "AI", Point::new(title.x + 2, title.y + 2), FONT_HERSHEY_SIMPLEX, 1.6, black, 3, LINE_AA, false)?;
    imgproc::put_text(&mut avatar, "AI", title, FONT_HERSHEY_SIMPLEX, 1.6, white, 3, LINE_AA, false)?;

    let subtitle = Point::new(width / 2 - 45, height / 2 + 30);
    imgproc::put_text(&mut avatar, "Avatar", Point::new(subtitle.x + 1, subtitle.y + 1), FONT_HERSHEY_SIMPLEX, 0.8, black, 2, LINE_AA, false)?;
    imgproc::put_text(&mut avatar, "Avatar", subtitle, FONT_HERSHEY_SIMPLEX, 0.8, white, 2, LINE_AA, false)?;

    Ok(avatar)
}

#[cfg(test)]
mod tests {
    use opencv::core::Vec3b;

    use super::*;

    #[test]
    fn test_placeholder_avatar() {
        let avatar = placeholder_avatar(400, 400).unwrap();
        assert_eq!(avatar.cols(), 400);
        assert_eq!(avatar.rows(), 400);
        assert_eq!(avatar.channels(), 3);

        // corners are outside the circle
        assert_eq!(*avatar.at_2d::<Vec3b>(0, 0).unwrap(), Vec3b::from([0, 0, 0]));
        // the gradient is blue-green, red stays at zero
        let px = *avatar.at_2d::<Vec3b>(100, 200).unwrap();
        assert!(px[0] > 200 && px[2] == 0);
    }

    #[test]
    fn test_encode_decode_keeps_channel_order() {
        let img = Mat::new_rows_cols_with_default(8, 8, CV_8UC3, Scalar::new(10.0, 20.0, 250.0, 0.0)).unwrap();
        let png = encode_image(&img, ".png").unwrap();
        let decoded = decode_image(&png).unwrap();
        assert_eq!(*decoded.at_2d::<Vec3b>(3, 3).unwrap(), Vec3b::from([10, 20, 250]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_image(b"not an image").is_err());
        assert!(decode_image(&[]).is_err());
        assert!(read_image(Path::new("/nonexistent/avatar.jpg")).is_err());
    }
}
