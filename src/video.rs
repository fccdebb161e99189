use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use image::{Rgb, RgbImage};
use log::{debug, warn};
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Serialize;

/// A stream of color frames, all of the same size
pub trait VideoSource {
    /// Next frame, `None` once the stream is exhausted
    fn read(&mut self) -> Result<Option<RgbImage>>;

    /// Number of frames, when known up front
    fn len_hint(&self) -> Option<u64> {
        None
    }
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        (**self).read()
    }

    fn len_hint(&self) -> Option<u64> {
        (**self).len_hint()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum PixelFormat {
    Gray,
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Rgb24 => 3,
        }
    }
}

/// Headerless fixed-size frames, e.g. the output of `ffmpeg -f rawvideo`
pub struct RawVideoInput<R> {
    reader: R,
    width: u32,
    height: u32,
    format: PixelFormat,
    buffer: Vec<u8>,
    frame_count: Option<u64>,
    finished: bool,
}

impl RawVideoInput<BufReader<File>> {
    pub fn open(path: &Path, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("cannot open video {}", path.display()))?;
        let file_size = file.metadata()?.len();
        let mut input = RawVideoInput::new(BufReader::new(file), width, height, format)?;
        input.frame_count = Some(file_size / input.frame_size() as u64);
        Ok(input)
    }
}

impl<R: Read> RawVideoInput<R> {
    pub fn new(reader: R, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("video frames must not be empty, got {width}x{height}");
        }
        let frame_size = width as usize * height as usize * format.bytes_per_pixel();
        Ok(RawVideoInput {
            reader,
            width,
            height,
            format,
            buffer: vec![0; frame_size],
            frame_count: None,
            finished: false,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.buffer.len()
    }

    /// Fill the frame buffer, returning how many bytes were read before the
    /// stream ended
    fn fill(&mut self) -> Result<usize> {
        let mut filled = 0;
        while filled < self.buffer.len() {
            match self.reader.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err).context("failed to read video frame"),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> VideoSource for RawVideoInput<R> {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        if self.finished {
            return Ok(None);
        }
        let filled = self.fill()?;
        if filled < self.buffer.len() {
            self.finished = true;
            if filled > 0 {
                warn!(
                    "dropping truncated trailing frame ({filled} of {} bytes)",
                    self.buffer.len()
                );
            }
            return Ok(None);
        }

        let frame = match self.format {
            PixelFormat::Rgb24 => RgbImage::from_raw(self.width, self.height, self.buffer.clone())
                .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))?,
            PixelFormat::Gray => {
                let mut frame = RgbImage::new(self.width, self.height);
                for (pixel, &v) in frame.pixels_mut().zip(self.buffer.iter()) {
                    *pixel = Rgb([v, v, v]);
                }
                frame
            }
        };
        Ok(Some(frame))
    }

    fn len_hint(&self) -> Option<u64> {
        self.frame_count
    }
}

#[derive(Clone, Copy, Debug)]
struct Blob {
    x: f64,
    y: f64,
    sigma: f64,
    amplitude: f64,
}

/// Random Gaussian blobs on a torus, panned at a constant velocity in
/// pixels per frame
pub struct SyntheticVideo {
    width: u32,
    height: u32,
    frames: Option<u64>,
    velocity: (f64, f64),
    blobs: Vec<Blob>,
    frame_index: u64,
    canvas: Vec<f64>,
}

impl SyntheticVideo {
    const BACKGROUND: f64 = 128.;
    /// Blobs per this many pixels
    const BLOB_AREA: u32 = 300;

    /// `frames = None` streams forever
    pub fn new(width: u32, height: u32, frames: Option<u64>, velocity: (f64, f64), seed: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("video frames must not be empty, got {width}x{height}");
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let blob_count = ((width * height) / Self::BLOB_AREA).max(1);
        let blobs = (0..blob_count)
            .map(|_| {
                let sign = if rng.gen_bool(0.5) { 1. } else { -1. };
                Blob {
                    x: rng.gen_range(0. ..width as f64),
                    y: rng.gen_range(0. ..height as f64),
                    sigma: rng.gen_range(1.5..4.),
                    amplitude: sign * rng.gen_range(50. ..110.),
                }
            })
            .collect();
        debug!("synthetic video {width}x{height} with {blob_count} blobs, seed {seed}");
        Ok(SyntheticVideo {
            width,
            height,
            frames,
            velocity,
            blobs,
            frame_index: 0,
            canvas: vec![0.; width as usize * height as usize],
        })
    }

    fn render(&mut self) -> RgbImage {
        let (w, h) = (self.width as i64, self.height as i64);
        let t = self.frame_index as f64;
        self.canvas.iter_mut().for_each(|v| *v = Self::BACKGROUND);
        for blob in &self.blobs {
            let cx = (blob.x + self.velocity.0 * t).rem_euclid(w as f64);
            let cy = (blob.y + self.velocity.1 * t).rem_euclid(h as f64);
            let reach = (3. * blob.sigma).ceil() as i64;
            let inv = 1. / (2. * blob.sigma * blob.sigma);
            let (x0, y0) = (cx.floor() as i64, cy.floor() as i64);
            for y in y0 - reach..=y0 + reach + 1 {
                let dy = y as f64 - cy;
                let row = y.rem_euclid(h) * w;
                for x in x0 - reach..=x0 + reach + 1 {
                    let dx = x as f64 - cx;
                    let v = blob.amplitude * (-(dx * dx + dy * dy) * inv).exp();
                    self.canvas[(row + x.rem_euclid(w)) as usize] += v;
                }
            }
        }

        let mut frame = RgbImage::new(self.width, self.height);
        for (pixel, &v) in frame.pixels_mut().zip(self.canvas.iter()) {
            let v = v.round().clamp(0., 255.) as u8;
            *pixel = Rgb([v, v, v]);
        }
        frame
    }
}

impl VideoSource for SyntheticVideo {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        if self.frames.map_or(false, |n| self.frame_index >= n) {
            return Ok(None);
        }
        let frame = self.render();
        self.frame_index += 1;
        Ok(Some(frame))
    }

    fn len_hint(&self) -> Option<u64> {
        self.frames
    }
}

/// The wrapped source produced nothing within the read timeout
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("no frame within {} ms", .timeout.as_millis())]
pub struct SourceStalled {
    pub timeout: Duration,
}

/// Reads another source on a producer thread so a stalled device cannot
/// block the tracking loop forever. At most one frame is buffered ahead.
pub struct TimeoutSource {
    receiver: Receiver<Result<Option<RgbImage>>>,
    timeout: Duration,
    len_hint: Option<u64>,
    finished: bool,
}

impl TimeoutSource {
    pub fn spawn<S>(mut source: S, timeout: Duration) -> Result<Self>
    where
        S: VideoSource + Send + 'static,
    {
        let len_hint = source.len_hint();
        let (sender, receiver) = sync_channel(1);
        thread::Builder::new()
            .name("video-source".to_string())
            .spawn(move || loop {
                let frame = source.read();
                let last = !matches!(frame, Ok(Some(_)));
                if sender.send(frame).is_err() || last {
                    break;
                }
            })
            .context("failed to start the video reader thread")?;
        Ok(TimeoutSource {
            receiver,
            timeout,
            len_hint,
            finished: false,
        })
    }
}

impl VideoSource for TimeoutSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        if self.finished {
            return Ok(None);
        }
        match self.receiver.recv_timeout(self.timeout) {
            Ok(frame) => {
                if !matches!(frame, Ok(Some(_))) {
                    self.finished = true;
                }
                frame
            }
            Err(RecvTimeoutError::Timeout) => Err(SourceStalled {
                timeout: self.timeout,
            }
            .into()),
            Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn len_hint(&self) -> Option<u64> {
        self.len_hint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_raw_gray_frames() {
        let bytes: Vec<u8> = (0..24).collect();
        let mut input = RawVideoInput::new(Cursor::new(bytes), 4, 3, PixelFormat::Gray).unwrap();
        assert_eq!(input.frame_size(), 12);

        let frame = input.read().unwrap().unwrap();
        assert_eq!(frame.dimensions(), (4, 3));
        assert_eq!(*frame.get_pixel(1, 2), Rgb([9, 9, 9]));
        let frame = input.read().unwrap().unwrap();
        assert_eq!(*frame.get_pixel(0, 0), Rgb([12, 12, 12]));
        assert!(input.read().unwrap().is_none());
        assert!(input.read().unwrap().is_none());
    }

    #[test]
    fn test_raw_rgb_frames() {
        let bytes = vec![1, 2, 3, 4, 5, 6];
        let mut input = RawVideoInput::new(Cursor::new(bytes), 2, 1, PixelFormat::Rgb24).unwrap();
        let frame = input.read().unwrap().unwrap();
        assert_eq!(*frame.get_pixel(1, 0), Rgb([4, 5, 6]));
        assert!(input.read().unwrap().is_none());
    }

    #[test]
    fn test_raw_truncated_frame() {
        let bytes = vec![7; 12 + 5];
        let mut input = RawVideoInput::new(Cursor::new(bytes), 4, 3, PixelFormat::Gray).unwrap();
        assert!(input.read().unwrap().is_some());
        assert!(input.read().unwrap().is_none());
    }

    #[test]
    fn test_raw_rejects_empty_size() {
        assert!(RawVideoInput::new(Cursor::new(vec![]), 0, 3, PixelFormat::Gray).is_err());
    }

    #[test]
    fn test_synthetic_video() {
        let mut video = SyntheticVideo::new(64, 48, Some(2), (3., 0.), 7).unwrap();
        assert_eq!(video.len_hint(), Some(2));
        let frame0 = video.read().unwrap().unwrap();
        let frame1 = video.read().unwrap().unwrap();
        assert!(video.read().unwrap().is_none());

        // textured, not a flat background
        let first = frame0.get_pixel(0, 0)[0];
        assert!(frame0.pixels().any(|p| p[0] != first));

        // the texture wraps around while moving 3 pixels right per frame
        for y in 0..48 {
            for x in 0..64 {
                let a = frame0.get_pixel(x, y)[0] as i32;
                let b = frame1.get_pixel((x + 3) % 64, y)[0] as i32;
                assert!((a - b).abs() <= 1, "({x}, {y}): {a} vs {b}");
            }
        }

        // same seed, same video
        let mut again = SyntheticVideo::new(64, 48, Some(2), (3., 0.), 7).unwrap();
        assert_eq!(again.read().unwrap().unwrap(), frame0);
        let mut other = SyntheticVideo::new(64, 48, Some(2), (3., 0.), 8).unwrap();
        assert_ne!(other.read().unwrap().unwrap(), frame0);
    }

    struct SlowSource {
        delay: Duration,
        remaining: usize,
    }

    impl VideoSource for SlowSource {
        fn read(&mut self) -> Result<Option<RgbImage>> {
            thread::sleep(self.delay);
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(RgbImage::new(4, 4)))
        }

        fn len_hint(&self) -> Option<u64> {
            Some(self.remaining as u64)
        }
    }

    #[test]
    fn test_timeout_source_passes_frames() {
        let source = SlowSource {
            delay: Duration::from_millis(1),
            remaining: 3,
        };
        let mut source = TimeoutSource::spawn(source, Duration::from_secs(5)).unwrap();
        assert_eq!(source.len_hint(), Some(3));
        for _ in 0..3 {
            assert!(source.read().unwrap().is_some());
        }
        assert!(source.read().unwrap().is_none());
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn test_timeout_source_stalls() {
        let source = SlowSource {
            delay: Duration::from_millis(500),
            remaining: 1,
        };
        let mut source = TimeoutSource::spawn(source, Duration::from_millis(20)).unwrap();
        let err = source.read().unwrap_err();
        let stalled = err.downcast_ref::<SourceStalled>().unwrap();
        assert_eq!(stalled.timeout, Duration::from_millis(20));
    }
}
