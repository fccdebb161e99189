use image::{GrayImage, RgbImage};

/// Row-major grayscale image storage
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Image {
    /// Create an empty image
    pub fn empty() -> Image {
        Image {
            data: vec![],
            width: 0,
            height: 0,
        }
    }

    /// Create a black image
    pub fn zeros(width: usize, height: usize) -> Image {
        Image {
            data: vec![0; width * height],
            width,
            height,
        }
    }

    /// Luminance of a color frame
    pub fn from_rgb(frame: &RgbImage) -> Image {
        image::imageops::grayscale(frame).into()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Get the size for a chosen dimension
    pub fn size(&self, dim: usize) -> usize {
        if dim == 0 {
            self.width
        } else {
            self.height
        }
    }

    #[inline(always)]
    pub fn value(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline(always)]
    pub fn value_i32(&self, x: i32, y: i32) -> u8 {
        self.data[y as usize * self.width + x as usize]
    }

    #[inline(always)]
    pub fn set_value(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }

    /// Sub-pixel intensity. Coordinates outside the image are clamped to
    /// the border.
    pub fn bilinear(&self, x: f64, y: f64) -> f64 {
        let x = x.clamp(0., (self.width - 1) as f64);
        let y = y.clamp(0., (self.height - 1) as f64);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = usize::min(x0 + 1, self.width - 1);
        let y1 = usize::min(y0 + 1, self.height - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let top = self.value(x0, y0) as f64 * (1. - fx) + self.value(x1, y0) as f64 * fx;
        let bottom = self.value(x0, y1) as f64 * (1. - fx) + self.value(x1, y1) as f64 * fx;
        top * (1. - fy) + bottom * fy
    }

    /// Copy `patch` with its top-left corner at (x, y), clipping at the borders
    pub fn set_sub_image_i32(&mut self, x: i32, y: i32, patch: &Image) {
        for py in 0..patch.height as i32 {
            for px in 0..patch.width as i32 {
                let (tx, ty) = (x + px, y + py);
                if tx < 0 || ty < 0 || tx >= self.width as i32 || ty >= self.height as i32 {
                    continue;
                }
                self.data[ty as usize * self.width + tx as usize] = patch.value_i32(px, py);
            }
        }
    }
}

impl From<GrayImage> for Image {
    fn from(gray: GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        Image {
            data: gray.into_raw(),
            width: width as usize,
            height: height as usize,
        }
    }
}

#[cfg(test)]
impl Image {
    /// Smooth periodic texture with plenty of corners, translated by `shift_x`
    pub fn texture(width: usize, height: usize, shift_x: f64) -> Image {
        let mut image = Image::zeros(width, height);
        for y in 0..height {
            for x in 0..width {
                let (fx, fy) = (x as f64 - shift_x, y as f64);
                let v = 128.
                    + 60. * (fx / 5.).sin() * (fy / 7.).cos()
                    + 40. * ((fx + fy) / 9.).sin();
                image.set_value(x, y, v as u8);
            }
        }
        image
    }
}
