use anyhow::{Error, Result};
use nalgebra::{Matrix3, Point2};
use opencv::core::{Mat, Point2f, Vector, CV_64F};
use opencv::prelude::*;

/// Determinants smaller than this mark a transform as degenerate.
const MIN_DETERMINANT: f64 = 1e-9;

pub fn points_to_vector_of_point2f(points: &[Point2<f32>]) -> Vector<Point2f> {
    let mut vec = Vector::new();
    for point in points {
        vec.push(Point2f::new(point.x, point.y));
    }
    vec
}

/// mat_to_matrix3 reads a 3x3 (perspective) or 2x3 (affine) `CV_64F` transform.
pub fn mat_to_matrix3(m: &Mat) -> Result<Matrix3<f64>> {
    if m.typ() != CV_64F || m.cols() != 3 || !(m.rows() == 2 || m.rows() == 3) {
        return Err(Error::msg(format!(
            "utils - expected a 2x3 or 3x3 CV_64F transform, got {}x{} of type {}",
            m.rows(), m.cols(), m.typ()
        )));
    }

    let mut matrix = Matrix3::<f64>::identity();
    for r in 0..m.rows() {
        for c in 0..3 {
            matrix[(r as usize, c as usize)] = *m.at_2d::<f64>(r, c)?;
        }
    }
    Ok(matrix)
}

/// is_invertible_transform rejects non-finite or (near) singular transforms.
pub fn is_invertible_transform(matrix: &Matrix3<f64>) -> bool {
    matrix.iter().all(|v| v.is_finite()) && matrix.determinant().abs() > MIN_DETERMINANT
}
