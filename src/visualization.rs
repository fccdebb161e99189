use anyhow::Result;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use ndarray as nd;

use crate::my_types::*;

pub const TRAIL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const MARKER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const MARKER_RADIUS: i32 = 3;

pub trait AsArray {
    fn try_as_array(&self) -> Result<nd::Array3<u8>>;
}

impl AsArray for RgbImage {
    fn try_as_array(&self) -> Result<nd::Array3<u8>> {
        let (width, height) = self.dimensions();
        let a = nd::ArrayView3::from_shape((height as usize, width as usize, 3), self.as_raw().as_slice())?;
        Ok(a.to_owned())
    }
}

/// Trail buffer accumulating every tracked segment of the session
#[derive(Clone, Debug)]
pub struct TrajectoryOverlay {
    image: RgbImage,
    thickness: u32,
}

impl TrajectoryOverlay {
    pub fn new(width: u32, height: u32, thickness: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
            thickness: thickness.max(1),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn draw_segment(&mut self, from: Vector2d, to: Vector2d) {
        let (x0, y0) = (from.x as f32, from.y as f32);
        let (x1, y1) = (to.x as f32, to.y as f32);
        for oy in 0..self.thickness {
            for ox in 0..self.thickness {
                let (ox, oy) = (ox as f32, oy as f32);
                draw_line_segment_mut(&mut self.image, (x0 + ox, y0 + oy), (x1 + ox, y1 + oy), TRAIL_COLOR);
            }
        }
    }

    /// Remove `fraction` of every trail's intensity
    pub fn fade(&mut self, fraction: f64) {
        if fraction <= 0. {
            return;
        }
        let keep = (1. - fraction).clamp(0., 1.);
        for v in self.image.iter_mut() {
            *v = (*v as f64 * keep) as u8;
        }
    }

    pub fn clear(&mut self) {
        for v in self.image.iter_mut() {
            *v = 0;
        }
    }

    /// `frame + overlay` with per-channel saturation
    pub fn composite(&self, frame: &RgbImage) -> RgbImage {
        let mut output = frame.clone();
        for (out, trail) in output.iter_mut().zip(self.image.iter()) {
            *out = out.saturating_add(*trail);
        }
        output
    }
}

pub fn draw_markers(frame: &mut RgbImage, points: impl IntoIterator<Item = Vector2d>) {
    for point in points {
        let center = (point.x.round() as i32, point.y.round() as i32);
        draw_filled_circle_mut(frame, center, MARKER_RADIUS, MARKER_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_and_composite() {
        let mut overlay = TrajectoryOverlay::new(20, 10, 1);
        overlay.draw_segment(Vector2d::new(2., 5.), Vector2d::new(12., 5.));
        assert_eq!(*overlay.image().get_pixel(7, 5), TRAIL_COLOR);
        assert_eq!(*overlay.image().get_pixel(7, 2), Rgb([0, 0, 0]));

        let frame = RgbImage::from_pixel(20, 10, Rgb([100, 100, 100]));
        let output = overlay.composite(&frame);
        assert_eq!(*output.get_pixel(7, 5), Rgb([100, 255, 100]));
        assert_eq!(*output.get_pixel(7, 2), Rgb([100, 100, 100]));
    }

    #[test]
    fn test_thickness() {
        let mut overlay = TrajectoryOverlay::new(20, 10, 2);
        overlay.draw_segment(Vector2d::new(2., 5.), Vector2d::new(12., 5.));
        assert_eq!(*overlay.image().get_pixel(7, 6), TRAIL_COLOR);
    }

    #[test]
    fn test_fade_and_clear() {
        let mut overlay = TrajectoryOverlay::new(20, 10, 1);
        overlay.draw_segment(Vector2d::new(2., 5.), Vector2d::new(12., 5.));
        overlay.fade(0.);
        assert_eq!(overlay.image().get_pixel(7, 5)[1], 255);
        overlay.fade(0.5);
        assert_eq!(overlay.image().get_pixel(7, 5)[1], 127);
        overlay.clear();
        assert!(overlay.image().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_markers() {
        let mut frame = RgbImage::new(20, 20);
        draw_markers(&mut frame, [Vector2d::new(10., 10.)]);
        assert_eq!(*frame.get_pixel(10, 10), MARKER_COLOR);
        assert_eq!(*frame.get_pixel(12, 10), MARKER_COLOR);
        assert_eq!(*frame.get_pixel(0, 0), Rgb([0, 0, 0]));
        // markers partly outside the frame are clipped
        draw_markers(&mut frame, [Vector2d::new(0., 19.)]);
    }

    #[test]
    fn test_as_array() {
        let mut frame = RgbImage::new(4, 2);
        frame.put_pixel(3, 1, Rgb([1, 2, 3]));
        let array = frame.try_as_array().unwrap();
        assert_eq!(array.shape(), &[2, 4, 3]);
        assert_eq!(array[[1, 3, 2]], 3);
    }
}
