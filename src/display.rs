use std::path::Path;

use anyhow::{Context as AnyhowContext, Result};
use image::RgbImage;
use rerun::{RecordingStream, RecordingStreamBuilder};

use crate::visualization::AsArray;

/// Where composited frames go
pub trait DisplaySink {
    fn show(&mut self, frame_index: usize, frame: &RgbImage) -> Result<()>;
}

impl<S: DisplaySink + ?Sized> DisplaySink for Box<S> {
    fn show(&mut self, frame_index: usize, frame: &RgbImage) -> Result<()> {
        (**self).show(frame_index, frame)
    }
}

pub struct NullSink;

impl DisplaySink for NullSink {
    fn show(&mut self, _frame_index: usize, _frame: &RgbImage) -> Result<()> {
        Ok(())
    }
}

/// Logs every frame to a rerun recording, viewable with `rerun <file>.rrd`
pub struct RerunSink {
    recorder: RecordingStream,
    entity_path: String,
}

impl RerunSink {
    pub fn save(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let recorder = RecordingStreamBuilder::new("sparse-tracker")
            .save(path)
            .with_context(|| format!("cannot write recording {}", path.display()))?;
        Ok(RerunSink {
            recorder,
            entity_path: "camera/tracks".to_string(),
        })
    }
}

impl DisplaySink for RerunSink {
    fn show(&mut self, frame_index: usize, frame: &RgbImage) -> Result<()> {
        self.recorder.set_time_sequence("frame", frame_index as i64);
        self.recorder.log(
            self.entity_path.as_str(),
            &rerun::Image::try_from(frame.try_as_array()?)?,
        )?;
        Ok(())
    }
}
