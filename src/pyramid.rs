use anyhow::{bail, Result};

use crate::image::Image;

/// Downscaled copies of a frame. `levels[0]` is half the parent size.
#[derive(Debug)]
pub struct Pyramid {
    pub levels: Vec<Image>,
    pub parent_size: [usize; 2],
}

impl Pyramid {
    pub fn empty() -> Self {
        Self {
            levels: vec![],
            parent_size: [0; 2],
        }
    }

    /// Build up to `level_count` levels. A level is only built while both of
    /// its dimensions stay above `min_size`, so the pyramid may come out
    /// shorter than requested.
    pub fn compute(&mut self, frame: &Image, level_count: usize, min_size: usize) -> Result<()> {
        if frame.is_empty() {
            bail!("cannot build a pyramid from an empty image");
        }
        self.compute_levels(frame, level_count, min_size);
        self.parent_size = [frame.width, frame.height];
        Ok(())
    }

    fn compute_levels(&mut self, frame: &Image, level_count: usize, min_size: usize) {
        let mut used = 0;
        let [mut w, mut h] = [frame.width, frame.height];
        while used < level_count {
            let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
            if cw <= min_size || ch <= min_size {
                break;
            }
            used += 1;
            w = cw;
            h = ch;
        }

        while self.levels.len() < used {
            self.levels.push(Image::empty())
        }
        self.levels.truncate(used);
        if used == 0 {
            return;
        }
        downscale(frame, &mut self.levels[0]);
        for i in 0..(used - 1) {
            let rest = &mut self.levels[i..];
            // split_first_mut Returns the first and all the rest of the elements of the slice, or None if it is empty
            if let Some((parent, rest)) = rest.split_first_mut() {
                downscale(parent, &mut rest[0]);
            }
        }
    }
}

/// downscale the parent image and store the result in child. Odd sizes
/// round up.
fn downscale(parent: &Image, child: &mut Image) {
    let w = parent.width as i32;
    let h = parent.height as i32;

    let w_half = (w + 1) / 2;
    let h_half = (h + 1) / 2;
    child.data.clear();
    child.width = w_half as usize;
    child.height = h_half as usize;

    let v = |x: i32, y: i32| -> u16 {
        // prevent pixel out of bounds
        let x = x.clamp(0, w - 1);
        let y = y.clamp(0, h - 1);
        parent.value(x as usize, y as usize) as u16
    };

    for y in 0..h_half {
        let y2 = 2 * y;
        for x in 0..w_half {
            let x2 = 2 * x;
            // separable (1 2 1) / 4 kernel in both directions
            let value = (4 * v(x2, y2)
                + 2 * (v(x2 + 1, y2) + v(x2 - 1, y2) + v(x2, y2 + 1) + v(x2, y2 - 1))
                + (v(x2 + 1, y2 + 1) + v(x2 - 1, y2 - 1) + v(x2 - 1, y2 + 1) + v(x2 + 1, y2 - 1))
                + 8)
                / 16;
            child.data.push(value as u8);
        }
    }
}
