use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::image::Image;
use crate::my_types::*;

/// 3x3 Sobel kernels, row-major, for x and y derivatives
const SOBEL_X: [[f64; 3]; 3] = [[-1., 0., 1.], [-2., 0., 2.], [-1., 0., 1.]];
const SOBEL_Y: [[f64; 3]; 3] = [[-1., -2., -1.], [0., 0., 0.], [1., 2., 1.]];

/// Half size of the block the gradient covariance is summed over
const BLOCK_RADIUS: i32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectorParams {
    pub max_count: usize,
    pub quality_level: f64,
    pub min_distance: f64,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            max_count: 200,
            quality_level: 0.3,
            min_distance: 7.,
        }
    }
}

impl From<&Config> for DetectorParams {
    fn from(config: &Config) -> Self {
        Self {
            max_count: config.max_count,
            quality_level: config.quality_level,
            min_distance: config.min_distance,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Corner {
    pub point: Vector2d,
    /// Minimum eigenvalue of the gradient covariance
    pub score: f64,
}

/// Shi-Tomasi corner selection
pub struct Detector {
    params: DetectorParams,
    /// per-pixel corner response, rows are image rows
    response: Matrixd,
    ix: Vec<f64>,
    iy: Vec<f64>,
}

impl Detector {
    pub fn new(params: DetectorParams) -> Self {
        Detector {
            params,
            response: Matrixd::zeros(0, 0),
            ix: vec![],
            iy: vec![],
        }
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut DetectorParams {
        &mut self.params
    }

    /// Strongest corners of the image, at most `max_count`, strongest first.
    pub fn select(&mut self, image: &Image) -> Vec<Corner> {
        self.select_excluding(image, &[], self.params.max_count)
    }

    /// Like `select`, but also keeps `min_distance` to the `existing` points
    /// and returns at most `budget` corners.
    pub fn select_excluding(
        &mut self,
        image: &Image,
        existing: &[Vector2d],
        budget: usize,
    ) -> Vec<Corner> {
        let budget = usize::min(budget, self.params.max_count);
        if budget == 0 || image.width < 3 || image.height < 3 {
            return vec![];
        }

        self.compute_response(image);
        let max_score = self.response.max();
        if max_score <= 0. {
            return vec![];
        }
        let threshold = self.params.quality_level * max_score;

        let mut candidates = vec![];
        for y in 1..image.height - 1 {
            for x in 1..image.width - 1 {
                let score = self.response[(y, x)];
                if score > 0. && score >= threshold && self.is_local_max(x, y) {
                    candidates.push(Corner {
                        point: Vector2d::new(x as f64, y as f64),
                        score,
                    });
                }
            }
        }
        // stable sort keeps raster order between equal scores
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        let min_distance2 = self.params.min_distance.powi(2);
        let mut corners: Vec<Corner> = vec![];
        for candidate in candidates {
            if !far_from_all(&candidate.point, existing, min_distance2)
                || !far_from_all(&candidate.point, corners.iter().map(|c| &c.point), min_distance2)
            {
                continue;
            }
            corners.push(candidate);
            if corners.len() >= budget {
                break;
            }
        }
        debug!(
            "selected {} corners, max score {max_score:.1}",
            corners.len()
        );
        corners
    }

    fn is_local_max(&self, x: usize, y: usize) -> bool {
        let score = self.response[(y, x)];
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                if self.response[(ny, nx)] > score {
                    return false;
                }
            }
        }
        true
    }

    /// Minimum eigenvalue of the summed gradient covariance at every pixel
    fn compute_response(&mut self, image: &Image) {
        let (w, h) = (image.width, image.height);
        self.ix.clear();
        self.iy.clear();
        for y in 0..h as i32 {
            for x in 0..w as i32 {
                let mut gx = 0.;
                let mut gy = 0.;
                for (ky, (row_x, row_y)) in SOBEL_X.iter().zip(SOBEL_Y.iter()).enumerate() {
                    for kx in 0..3 {
                        let v = image.value(
                            reflect101(x + kx as i32 - 1, w),
                            reflect101(y + ky as i32 - 1, h),
                        ) as f64;
                        gx += row_x[kx] * v;
                        gy += row_y[kx] * v;
                    }
                }
                self.ix.push(gx);
                self.iy.push(gy);
            }
        }

        self.response = Matrixd::zeros(h, w);
        for y in 0..h as i32 {
            for x in 0..w as i32 {
                let mut gradient = Matrix2d::zeros();
                for dy in -BLOCK_RADIUS..=BLOCK_RADIUS {
                    for dx in -BLOCK_RADIUS..=BLOCK_RADIUS {
                        let i = reflect101(y + dy, h) * w + reflect101(x + dx, w);
                        let (gx, gy) = (self.ix[i], self.iy[i]);
                        gradient[(0, 0)] += gx * gx;
                        gradient[(0, 1)] += gx * gy;
                        gradient[(1, 1)] += gy * gy;
                    }
                }
                gradient[(1, 0)] = gradient[(0, 1)];
                self.response[(y as usize, x as usize)] = min_eigenvalue(&gradient);
            }
        }
    }
}

fn far_from_all<'a>(
    point: &Vector2d,
    others: impl IntoIterator<Item = &'a Vector2d>,
    min_distance2: f64,
) -> bool {
    others
        .into_iter()
        .all(|q| (point - q).norm_squared() >= min_distance2)
}

/// Smaller eigenvalue of a symmetric 2x2 matrix
pub fn min_eigenvalue(m: &Matrix2d) -> f64 {
    let half_trace = (m[(0, 0)] + m[(1, 1)]) / 2.;
    let half_diff = (m[(0, 0)] - m[(1, 1)]) / 2.;
    half_trace - (half_diff * half_diff + m[(0, 1)] * m[(1, 0)]).sqrt()
}

/// Mirror an index into `0..n` without repeating the edge pixel
fn reflect101(i: i32, n: usize) -> usize {
    let n = n as i32;
    let i = if i < 0 { -i } else { i };
    let i = if i >= n { 2 * n - 2 - i } else { i };
    i.clamp(0, n - 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_image() -> Image {
        let mut image = Image::zeros(100, 100);
        let patch = Image {
            data: vec![255; 25],
            width: 5,
            height: 5,
        };
        image.set_sub_image_i32(50, 50, &patch);
        image
    }

    #[test]
    fn test_single_square() {
        let mut detector = Detector::new(DetectorParams::default());
        let corners = detector.select(&square_image());
        assert_eq!(corners.len(), 1);
        let p = corners[0].point;
        // inside or adjacent to the square covering 50..=54
        assert!(p.x >= 49. && p.x <= 55. && p.y >= 49. && p.y <= 55.);
    }

    #[test]
    fn test_square_corners_without_min_distance() {
        let mut detector = Detector::new(DetectorParams {
            min_distance: 0.,
            ..Default::default()
        });
        let corners = detector.select(&square_image());
        assert_eq!(corners.len(), 4);
    }

    #[test]
    fn test_flat_image() {
        let mut detector = Detector::new(DetectorParams::default());
        assert!(detector.select(&Image::zeros(40, 30)).is_empty());
        assert!(detector.select(&Image::zeros(2, 2)).is_empty());
    }

    #[test]
    fn test_selection_properties() {
        let image = Image::texture(160, 120, 0.);
        let params = DetectorParams {
            max_count: 40,
            quality_level: 0.2,
            min_distance: 9.,
        };
        let mut detector = Detector::new(params.clone());
        let corners = detector.select(&image);
        assert!(!corners.is_empty());
        assert!(corners.len() <= params.max_count);

        let max_score = detector.response.max();
        for (i, a) in corners.iter().enumerate() {
            assert!(a.score >= params.quality_level * max_score);
            for b in &corners[i + 1..] {
                assert!((a.point - b.point).norm() >= params.min_distance);
                assert!(a.score >= b.score);
            }
        }
    }

    #[test]
    fn test_select_excluding() {
        let image = Image::texture(160, 120, 0.);
        let mut detector = Detector::new(DetectorParams::default());
        let first = detector.select(&image);
        let existing: Vec<Vector2d> = first.iter().take(5).map(|c| c.point).collect();

        let extra = detector.select_excluding(&image, &existing, 3);
        assert!(extra.len() <= 3);
        for corner in &extra {
            for p in &existing {
                assert!((corner.point - p).norm() >= 7.);
            }
        }
        assert!(detector.select_excluding(&image, &existing, 0).is_empty());
    }

    #[test]
    fn test_reflect101() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(2, 5), 2);
    }
}
