use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use serde::Serialize;
use tracing::{info, warn, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::control::{ControlSignal, ControlSource, NoControl};
use crate::display::{DisplaySink, NullSink};
use crate::image::Image;
use crate::tracker::Tracker;
use crate::video::{SourceStalled, VideoSource};
use crate::visualization::draw_markers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EndReason {
    EndOfStream,
    Stopped,
    Cancelled,
    SourceStalled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// frames read and processed
    pub frames: usize,
    pub end_reason: EndReason,
    pub live: usize,
    pub ids_allocated: usize,
}

/// Capture, track, draw, show and react to input until the stream ends
pub struct Session {
    tracker: Tracker,
    source: Box<dyn VideoSource>,
    sink: Box<dyn DisplaySink>,
    control: Box<dyn ControlSource>,
    cancel: Arc<AtomicBool>,
    /// one JSON `StepReport` per line
    stats: Option<Box<dyn Write>>,
}

impl Session {
    pub fn new(tracker: Tracker, source: Box<dyn VideoSource>) -> Self {
        Session {
            tracker,
            source,
            sink: Box::new(NullSink),
            control: Box::new(NoControl),
            cancel: Arc::new(AtomicBool::new(false)),
            stats: None,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn DisplaySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_control(mut self, control: Box<dyn ControlSource>) -> Self {
        self.control = control;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_stats(mut self, stats: Box<dyn Write>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn run(&mut self) -> Result<SessionSummary> {
        let mut frames = 0;
        let end_reason = loop {
            if self.cancel.load(Ordering::Relaxed) {
                break EndReason::Cancelled;
            }

            let mut frame = match self.source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => break EndReason::EndOfStream,
                Err(err) => match err.downcast_ref::<SourceStalled>() {
                    Some(stalled) => {
                        warn!("video source stalled, {stalled}");
                        break EndReason::SourceStalled;
                    }
                    None => return Err(err.context(format!("failed to read frame {frames}"))),
                },
            };

            let outcome = self.tracker.process(Image::from_rgb(&frame))?;
            draw_markers(&mut frame, outcome.pairs.iter().map(|pair| pair.new));
            let shown = match self.tracker.state() {
                Some(state) => state.overlay().composite(&frame),
                None => frame,
            };
            self.sink.show(outcome.report.frame_index, &shown)?;

            if let Some(stats) = self.stats.as_mut() {
                serde_json::to_writer(&mut *stats, &outcome.report)?;
                writeln!(stats).context("failed to write step statistics")?;
            }
            frames += 1;
            Span::current().pb_inc(1);

            match self.control.poll() {
                ControlSignal::Continue => {}
                ControlSignal::Stop => break EndReason::Stopped,
                ControlSignal::Reseed => self.tracker.request_reseed(),
                ControlSignal::Param(change) => self.tracker.apply(change),
            }
        };

        if let Some(stats) = self.stats.as_mut() {
            stats.flush()?;
        }
        let summary = SessionSummary {
            frames,
            end_reason,
            live: self.tracker.live_count(),
            ids_allocated: self.tracker.ids_allocated(),
        };
        info!(
            "session ended ({:?}) after {} frames, {} live points",
            summary.end_reason, summary.frames, summary.live
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::control::ParamChange;
    use crate::video::{SyntheticVideo, TimeoutSource};
    use anyhow::bail;
    use image::RgbImage;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Duration;

    type Shown = Rc<RefCell<Vec<(usize, RgbImage)>>>;

    struct CollectSink(Shown);

    impl DisplaySink for CollectSink {
        fn show(&mut self, frame_index: usize, frame: &RgbImage) -> Result<()> {
            self.0.borrow_mut().push((frame_index, frame.clone()));
            Ok(())
        }
    }

    /// Raises the cancel flag once the given frame was shown
    struct CancelSink {
        cancel: Arc<AtomicBool>,
        after: usize,
    }

    impl DisplaySink for CancelSink {
        fn show(&mut self, frame_index: usize, _frame: &RgbImage) -> Result<()> {
            if frame_index == self.after {
                self.cancel.store(true, Ordering::Relaxed);
            }
            Ok(())
        }
    }

    struct ScriptedControl(VecDeque<ControlSignal>);

    impl ControlSource for ScriptedControl {
        fn poll(&mut self) -> ControlSignal {
            self.0.pop_front().unwrap_or(ControlSignal::Continue)
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenSource;

    impl VideoSource for BrokenSource {
        fn read(&mut self) -> Result<Option<RgbImage>> {
            bail!("device unplugged")
        }
    }

    fn synthetic_session(frames: u64) -> Session {
        let tracker = Tracker::new(&Config::default()).unwrap();
        let video = SyntheticVideo::new(120, 90, Some(frames), (3., 0.), 1).unwrap();
        Session::new(tracker, Box::new(video))
    }

    #[test]
    fn test_end_of_stream() {
        let shown = Shown::default();
        let stats = SharedBuffer::default();
        let mut session = synthetic_session(3)
            .with_sink(Box::new(CollectSink(shown.clone())))
            .with_stats(Box::new(stats.clone()));
        let summary = session.run().unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.end_reason, EndReason::EndOfStream);
        assert!(summary.live > 0);
        assert!(summary.ids_allocated >= summary.live);

        let shown = shown.borrow();
        let indices: Vec<usize> = shown.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        // nothing tracked yet on the first frame, trails afterwards
        let has_trail = |frame: &RgbImage| frame.pixels().any(|p| p[1] > p[2]);
        assert!(!has_trail(&shown[0].1));
        assert!(has_trail(&shown[2].1));

        let stats = String::from_utf8(stats.0.borrow().clone()).unwrap();
        let lines: Vec<&str> = stats.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last["frame_index"], 2);
        assert_eq!(last["live"], summary.live);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["reseeded"], first["live"]);
    }

    #[test]
    fn test_stop_signal() {
        let control = ScriptedControl(VecDeque::from([ControlSignal::Continue, ControlSignal::Stop]));
        let mut session = synthetic_session(10).with_control(Box::new(control));
        let summary = session.run().unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.end_reason, EndReason::Stopped);
    }

    #[test]
    fn test_param_signal() {
        let control = ScriptedControl(VecDeque::from([ControlSignal::Param(ParamChange::MaxCount(5))]));
        let mut session = synthetic_session(3).with_control(Box::new(control));
        let summary = session.run().unwrap();
        assert_eq!(summary.end_reason, EndReason::EndOfStream);
        assert!(summary.live <= 5);
        assert_eq!(session.tracker().detector_params().max_count, 5);
    }

    #[test]
    fn test_cancellation() {
        let cancel = Arc::new(AtomicBool::new(true));
        let mut session = synthetic_session(10).with_cancel_flag(cancel);
        let summary = session.run().unwrap();
        assert_eq!(summary.frames, 0);
        assert_eq!(summary.end_reason, EndReason::Cancelled);
        assert!(!session.tracker().is_tracking());

        let cancel = Arc::new(AtomicBool::new(false));
        let sink = CancelSink {
            cancel: cancel.clone(),
            after: 1,
        };
        let mut session = synthetic_session(10).with_cancel_flag(cancel).with_sink(Box::new(sink));
        let summary = session.run().unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.end_reason, EndReason::Cancelled);
    }

    #[test]
    fn test_stalled_source() {
        struct Stuck;

        impl VideoSource for Stuck {
            fn read(&mut self) -> Result<Option<RgbImage>> {
                std::thread::sleep(Duration::from_millis(500));
                Ok(None)
            }
        }

        let source = TimeoutSource::spawn(Stuck, Duration::from_millis(20)).unwrap();
        let tracker = Tracker::new(&Config::default()).unwrap();
        let mut session = Session::new(tracker, Box::new(source));
        let summary = session.run().unwrap();
        assert_eq!(summary.frames, 0);
        assert_eq!(summary.end_reason, EndReason::SourceStalled);
    }

    #[test]
    fn test_source_error() {
        let tracker = Tracker::new(&Config::default()).unwrap();
        let mut session = Session::new(tracker, Box::new(BrokenSource));
        let err = session.run().unwrap_err();
        assert!(format!("{err:#}").contains("device unplugged"));
    }
}
