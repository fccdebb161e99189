use anyhow::Result;

use crate::image::Image;
use crate::pyramid::Pyramid;

#[derive(Debug)]
pub struct PyramidFrame {
    /// original image
    pub image: Image,
    /// downsized images
    pub pyramid: Pyramid,
}

impl PyramidFrame {
    /// Build the pyramid for `image`. Passing the frame that is no longer
    /// needed lets the pyramid levels reuse its buffers.
    pub fn new(
        image: Image,
        unused_frame: Option<PyramidFrame>,
        max_level: usize,
        min_size: usize,
    ) -> Result<PyramidFrame> {
        let mut pyramid = unused_frame
            .map(|frame| frame.pyramid)
            .unwrap_or_else(Pyramid::empty);
        pyramid.compute(&image, max_level, min_size)?;
        Ok(PyramidFrame { image, pyramid })
    }

    /// Number of usable levels including the original image
    pub fn level_count(&self) -> usize {
        self.pyramid.levels.len() + 1
    }

    pub fn get_image_at_level(&self, level: usize) -> &Image {
        if level == 0 {
            &self.image
        } else {
            &self.pyramid.levels[level - 1]
        }
    }

    pub fn width(&self) -> usize {
        self.image.width
    }

    pub fn height(&self) -> usize {
        self.image.height
    }
}
