use anyhow::{bail, Result};
use nalgebra as na;
use serde::Serialize;

use crate::config::Config;
use crate::frame::PyramidFrame;
use crate::image::*;
use crate::my_types::*;

/// Closed integer window offsets `[[x_min, x_max], [y_min, y_max]]`
type Range = [[i32; 2]; 2];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlowParams {
    /// side of the square integration window
    pub window_size: usize,
    pub max_level: usize,
    pub epsilon: f64,
    pub max_iterations: usize,
    pub min_eig_threshold: f64,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            window_size: 21,
            max_level: 3,
            epsilon: 0.01,
            max_iterations: 30,
            min_eig_threshold: 1e-4,
        }
    }
}

impl From<&Config> for FlowParams {
    fn from(config: &Config) -> Self {
        Self {
            window_size: config.window_size,
            max_level: config.max_level,
            epsilon: config.epsilon,
            max_iterations: config.max_iterations,
            min_eig_threshold: config.min_eig_threshold,
        }
    }
}

/// Per-point tracking result, index aligned with the input points
#[derive(Clone, Debug, Default)]
pub struct FlowOutput {
    pub points: Vec<Vector2d>,
    pub status: Vec<bool>,
    /// mean absolute intensity residual over the window
    pub error: Vec<f64>,
}

impl FlowOutput {
    fn with_capacity(n: usize) -> Self {
        Self {
            points: Vec::with_capacity(n),
            status: Vec::with_capacity(n),
            error: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn tracked_count(&self) -> usize {
        self.status.iter().filter(|&&s| s).count()
    }
}

pub struct OpticalFlow {
    params: FlowParams,
    ix: Matrixd,
    iy: Matrixd,
    it: Matrixd,
    grid: Matrixd,
}

impl OpticalFlow {
    pub fn new(params: FlowParams) -> Result<OpticalFlow> {
        if params.window_size < 3 {
            bail!("optical flow window must be at least 3 pixels, got {}", params.window_size);
        }
        let win = params.window_size;
        Ok(OpticalFlow {
            params,
            ix: na::DMatrix::zeros(win, win),
            iy: na::DMatrix::zeros(win, win),
            it: na::DMatrix::zeros(win, win),
            grid: na::DMatrix::zeros(win, win),
        })
    }

    /// Build a pyramid frame with the level limits this estimator expects
    pub fn pyramid_frame(&self, image: Image, unused_frame: Option<PyramidFrame>) -> Result<PyramidFrame> {
        PyramidFrame::new(image, unused_frame, self.params.max_level, self.params.window_size)
    }

    /// Estimate where `points0` moved between the two frames. The output has
    /// one entry per input point; failed points keep their input position.
    pub fn track(
        &mut self,
        pyramid_frame0: &PyramidFrame,
        pyramid_frame1: &PyramidFrame,
        points0: &[Vector2d],
    ) -> Result<FlowOutput> {
        let size0 = (pyramid_frame0.width(), pyramid_frame0.height());
        let size1 = (pyramid_frame1.width(), pyramid_frame1.height());
        if size0 != size1 {
            bail!("frame size changed from {size0:?} to {size1:?}");
        }
        let mut output = FlowOutput::with_capacity(points0.len());
        if points0.is_empty() {
            return Ok(output);
        }

        let levels = usize::min(pyramid_frame0.level_count(), pyramid_frame1.level_count()) - 1;
        for point0 in points0 {
            match self.process_point(pyramid_frame0, pyramid_frame1, *point0, levels) {
                Some((point1, error)) => {
                    output.points.push(point1);
                    output.status.push(true);
                    output.error.push(error);
                }
                None => {
                    output.points.push(*point0);
                    output.status.push(false);
                    output.error.push(f64::MAX);
                }
            }
        }
        Ok(output)
    }

    /// ref http://robots.stanford.edu/cs223b04/algo_tracking.pdf
    fn process_point(
        &mut self,
        pyramid_frame0: &PyramidFrame,
        pyramid_frame1: &PyramidFrame,
        point0: Vector2d,
        levels: usize,
    ) -> Option<(Vector2d, f64)> {
        let epsilon2 = self.params.epsilon.powi(2);
        let r = (self.params.window_size - 1) / 2;

        let mut g = Vector2d::zeros();
        let mut d = Vector2d::zeros();
        let mut error = 0.;
        for level in (0..levels + 1).rev() {
            let level0 = pyramid_frame0.get_image_at_level(level);
            let level1 = pyramid_frame1.get_image_at_level(level);
            let u = point0 / u32::pow(2, level as u32) as f64;
            let range = integration_range(level0, u, r, 1)?;
            // compute the derivative
            scharr(level0, u, range, &mut self.ix, &mut self.iy, &mut self.grid);
            let gradient = spatial_gradient(&self.ix, &self.iy);
            let area = (self.ix.nrows() * self.ix.ncols()) as f64;
            if gradient.symmetric_eigenvalues().min() / area < self.params.min_eig_threshold {
                return None;
            }
            let inv_gradient = gradient.try_inverse()?;

            let mut converged = false;
            let mut nu = Vector2d::zeros();
            for _ in 0..self.params.max_iterations {
                error = image_difference(range, &self.grid, &mut self.it, level1, u + g + nu)?;
                let eta = flow_vector(&inv_gradient, &self.ix, &self.iy, &self.it);
                nu += eta;
                if eta.norm_squared() < epsilon2 {
                    converged = true;
                    break;
                }
            }
            if !converged {
                return None;
            }

            d = nu;
            if level > 0 {
                g = 2. * (g + d)
            }
        }

        let point1 = point0 + g + d;
        let inside = (0..2).all(|i| {
            point1[i] >= 0. && point1[i] < pyramid_frame0.get_image_at_level(0).size(i) as f64
        });
        inside.then_some((point1, error))
    }
}

/// Convenience wrapper building both pyramids for a single pair of images
pub fn track(
    prev_image: &Image,
    next_image: &Image,
    prev_points: &[Vector2d],
    params: &FlowParams,
) -> Result<FlowOutput> {
    let mut flow = OpticalFlow::new(params.clone())?;
    let frame0 = flow.pyramid_frame(prev_image.clone(), None)?;
    let frame1 = flow.pyramid_frame(next_image.clone(), None)?;
    flow.track(&frame0, &frame1, prev_points)
}

fn flow_vector(inv_gradient: &Matrix2d, ix: &Matrixd, iy: &Matrixd, it: &Matrixd) -> Vector2d {
    let mut b = Vector2d::zeros();

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            b[0] += it[(y, x)] * ix[(y, x)];
            b[1] += it[(y, x)] * iy[(y, x)];
        }
    }

    inv_gradient * b
}

/// Fill `it` with the difference between the reference window and the
/// window around `center` in the next level. Returns the mean absolute
/// difference, or None when `center` left the level.
fn image_difference(
    range: Range,
    i0: &Matrixd,
    it: &mut Matrixd,
    level: &Image,
    center: Vector2d,
) -> Option<f64> {
    if !inside_level(level, center) {
        return None;
    }
    fill_grid(level, range, center, it);
    *it *= -1.;
    *it += i0.view((1, 1), (it.nrows(), it.ncols()));
    Some(it.iter().map(|v| v.abs()).sum::<f64>() / it.len() as f64)
}

fn spatial_gradient(ix: &Matrixd, iy: &Matrixd) -> Matrix2d {
    assert_eq!(ix.nrows(), iy.nrows());
    assert_eq!(ix.ncols(), iy.ncols());

    let mut x2 = 0.;
    let mut y2 = 0.;
    let mut xy = 0.;

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            x2 += ix[(y, x)] * ix[(y, x)];
            y2 += iy[(y, x)] * iy[(y, x)];
            xy += ix[(y, x)] * iy[(y, x)];
        }
    }

    Matrix2d::new(x2, xy, xy, y2)
}

/// ref https://theailearner.com/tag/scharr-operator/
fn scharr(
    level: &Image,
    center: Vector2d,
    range: Range,
    out_x: &mut Matrixd,
    out_y: &mut Matrixd,
    grid: &mut Matrixd,
) {
    let grange = [
        [range[0][0] - 1, range[0][1] + 1],
        [range[1][0] - 1, range[1][1] + 1],
    ];
    fill_grid(level, grange, center, grid);

    *out_x = Matrixd::zeros(grid.nrows() - 2, grid.ncols() - 2);
    *out_y = Matrixd::zeros(grid.nrows() - 2, grid.ncols() - 2);
    for y in 1..(grid.nrows() - 1) {
        for x in 1..(grid.ncols() - 1) {
            out_x[(y - 1, x - 1)] =
                (10. * grid[(y, x + 1)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y - 1, x + 1)]
                    - 10. * grid[(y, x - 1)]
                    - 3. * grid[(y + 1, x - 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
            out_y[(y - 1, x - 1)] =
                (10. * grid[(y + 1, x)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y + 1, x - 1)]
                    - 10. * grid[(y - 1, x)]
                    - 3. * grid[(y - 1, x + 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
        }
    }
}

fn fill_grid(level: &Image, range: Range, center: Vector2d, grid: &mut Matrixd) {
    *grid = na::DMatrix::zeros(
        (range[1][1] - range[1][0] + 1) as usize,
        (range[0][1] - range[0][0] + 1) as usize,
    );

    for (y_ind, y) in (range[1][0]..=range[1][1]).enumerate() {
        for (x_ind, x) in (range[0][0]..=range[0][1]).enumerate() {
            grid[(y_ind, x_ind)] = level.bilinear(center[0] + x as f64, center[1] + y as f64);
        }
    }
}

fn inside_level(level: &Image, center: Vector2d) -> bool {
    (0..2).all(|i| center[i] >= 0. && center[i] <= (level.size(i) - 1) as f64)
}

/// Returns closed range of integer steps that can be taken without going outside
/// the image borders. Returns None if the center point is outside the level
/// boundaries or the window would be empty.
fn integration_range(level: &Image, center: Vector2d, r: usize, padding: i32) -> Option<Range> {
    let r = r as i32;
    let mut range = [[0, 0], [0, 0]];
    for i in 0..2 {
        let s = level.size(i) as i32;
        if center[i] < 0. || center[i] > (s - 1) as f64 {
            return None;
        }
        let n = center[i] as i32;
        let fract = if center[i].fract() > 0. { 1 } else { 0 };
        range[i] = [
            i32::max(-r, -n + padding),
            i32::min(r, s - n - padding - 1 - fract),
        ];
        if range[i][0] > range[i][1] {
            return None;
        }
    }
    Some(range)
}
