use anyhow::{bail, Context as AnyhowContext, Result};
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::control::ParamChange;
use crate::detector::{Detector, DetectorParams};
use crate::feature::{self, Feature, StepReport, TrackedPair};
use crate::frame::PyramidFrame;
use crate::image::Image;
use crate::my_types::*;
use crate::optical_flow::{FlowParams, OpticalFlow};
use crate::stationary::Stationary;
use crate::visualization::TrajectoryOverlay;

/// Everything carried from one frame to the next
#[derive(Debug)]
pub struct TrackState {
    previous: PyramidFrame,
    features: Vec<Feature>,
    overlay: TrajectoryOverlay,
    /// frame no longer needed, its pyramid buffers are reused
    spare: Option<PyramidFrame>,
}

impl TrackState {
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn overlay(&self) -> &TrajectoryOverlay {
        &self.overlay
    }

    pub fn previous_image(&self) -> &Image {
        &self.previous.image
    }
}

#[derive(Debug)]
enum Phase {
    Uninitialized,
    Tracking(TrackState),
}

#[derive(Clone, Debug, Default)]
pub struct StepOutcome {
    pub report: StepReport,
    /// points that survived the step, index aligned old/new
    pub pairs: Vec<TrackedPair>,
}

pub struct Tracker {
    detector: Detector,
    optical_flow: OpticalFlow,
    phase: Phase,
    stationary: Stationary,
    reseed_fraction: f64,
    reseed_requested: bool,
    trail_fade: f64,
    trail_thickness: u32,
    max_error: Option<f64>,
    next_id: TrackId,
    /// Index of the next frame to process
    frame_index: usize,
}

impl Tracker {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Tracker {
            detector: Detector::new(DetectorParams::from(config)),
            optical_flow: OpticalFlow::new(FlowParams::from(config))?,
            phase: Phase::Uninitialized,
            stationary: Stationary::new(),
            reseed_fraction: config.reseed_fraction,
            reseed_requested: false,
            trail_fade: config.trail_fade,
            trail_thickness: config.trail_thickness,
            max_error: config.max_error,
            next_id: TrackId(0),
            frame_index: 0,
        })
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.phase, Phase::Tracking(_))
    }

    pub fn state(&self) -> Option<&TrackState> {
        match &self.phase {
            Phase::Uninitialized => None,
            Phase::Tracking(state) => Some(state),
        }
    }

    pub fn live_count(&self) -> usize {
        self.state().map_or(0, |state| state.features.len())
    }

    /// Number of track ids handed out so far
    pub fn ids_allocated(&self) -> usize {
        self.next_id.0
    }

    pub fn detector_params(&self) -> &DetectorParams {
        self.detector.params()
    }

    /// Top up the point set with the next processed frame
    pub fn request_reseed(&mut self) {
        self.reseed_requested = true;
    }

    pub fn apply(&mut self, change: ParamChange) {
        debug!("parameter change {change:?}");
        match change {
            ParamChange::MaxCount(max_count) => self.set_max_count(max_count),
            ParamChange::AdjustMaxCount(delta) => {
                let max_count = self.detector.params().max_count as i64 + delta;
                self.set_max_count(max_count.max(1) as usize);
            }
            ParamChange::QualityLevel(quality_level) => {
                if quality_level > 0. && quality_level <= 1. {
                    self.detector.params_mut().quality_level = quality_level;
                }
            }
            ParamChange::MinDistance(min_distance) => {
                self.detector.params_mut().min_distance = min_distance.max(0.);
            }
            ParamChange::ClearTrails => {
                if let Phase::Tracking(state) = &mut self.phase {
                    state.overlay.clear();
                }
            }
        }
    }

    fn set_max_count(&mut self, max_count: usize) {
        let max_count = max_count.max(1);
        self.detector.params_mut().max_count = max_count;
        if let Phase::Tracking(state) = &mut self.phase {
            state.features.truncate(max_count);
        }
    }

    /// Advance by one frame. The first frame seeds the point set.
    pub fn process(&mut self, image: Image) -> Result<StepOutcome> {
        let outcome = match std::mem::replace(&mut self.phase, Phase::Uninitialized) {
            Phase::Uninitialized => {
                let (state, outcome) = self.initialize(image)?;
                self.phase = Phase::Tracking(state);
                outcome
            }
            Phase::Tracking(mut state) => {
                let outcome = self.step(&mut state, image);
                self.phase = Phase::Tracking(state);
                outcome?
            }
        };
        self.frame_index += 1;
        Ok(outcome)
    }

    fn initialize(&mut self, image: Image) -> Result<(TrackState, StepOutcome)> {
        if image.is_empty() {
            bail!("cannot start tracking on an empty frame");
        }
        let corners = self.detector.select(&image);
        let features: Vec<Feature> = corners
            .iter()
            .map(|corner| Feature {
                point: corner.point,
                id: self.next_id.next(),
            })
            .collect();
        info!(
            "tracking {} points on a {}x{} frame",
            features.len(),
            image.width,
            image.height
        );

        let overlay =
            TrajectoryOverlay::new(image.width as u32, image.height as u32, self.trail_thickness);
        let previous = self.optical_flow.pyramid_frame(image, None)?;
        let report = StepReport {
            frame_index: self.frame_index,
            reseeded: features.len(),
            live: features.len(),
            ..Default::default()
        };
        self.reseed_requested = false;
        let state = TrackState {
            previous,
            features,
            overlay,
            spare: None,
        };
        Ok((state, StepOutcome { report, pairs: vec![] }))
    }

    fn step(&mut self, state: &mut TrackState, image: Image) -> Result<StepOutcome> {
        let size = (state.previous.width(), state.previous.height());
        if (image.width, image.height) != size {
            bail!(
                "frame {} is {}x{}, the session started with {}x{}",
                self.frame_index,
                image.width,
                image.height,
                size.0,
                size.1
            );
        }
        let next = self.optical_flow.pyramid_frame(image, state.spare.take())?;
        let points0 = feature::points(&state.features);
        let flow = self
            .optical_flow
            .track(&state.previous, &next, &points0)
            .with_context(|| format!("optical flow failed on frame {}", self.frame_index))?;

        state.overlay.fade(self.trail_fade);
        let mut pairs = Vec::with_capacity(flow.len());
        let mut survivors = Vec::with_capacity(flow.len());
        for (i, feature) in state.features.iter().enumerate() {
            let error = flow.error[i];
            let accepted = flow.status[i] && self.max_error.map_or(true, |max| error <= max);
            if !accepted {
                trace!("lost track {} at {:?}", feature.id.0, feature.point.as_slice());
                continue;
            }
            let pair = TrackedPair {
                id: feature.id,
                old: feature.point,
                new: flow.points[i],
                error,
            };
            state.overlay.draw_segment(pair.old, pair.new);
            survivors.push(Feature {
                point: pair.new,
                id: pair.id,
            });
            pairs.push(pair);
        }
        let lost = state.features.len() - survivors.len();
        state.features = survivors;
        state.spare = Some(std::mem::replace(&mut state.previous, next));

        let reseeded = if self.needs_reseed(state.features.len()) {
            self.reseed(state)
        } else {
            0
        };

        let count = pairs.len().max(1) as f64;
        let report = StepReport {
            frame_index: self.frame_index,
            tracked: pairs.len(),
            lost,
            reseeded,
            live: state.features.len(),
            mean_displacement: pairs.iter().map(|p| p.displacement()).sum::<f64>() / count,
            mean_error: pairs.iter().map(|p| p.error).sum::<f64>() / count,
            stationary: self.stationary.is_static(&pairs),
        };
        debug!(
            "frame {}: tracked {}, lost {}, reseeded {}",
            report.frame_index, report.tracked, report.lost, report.reseeded
        );
        Ok(StepOutcome { report, pairs })
    }

    fn needs_reseed(&self, live: usize) -> bool {
        if self.reseed_requested {
            return true;
        }
        let floor = (self.reseed_fraction * self.detector.params().max_count as f64).round() as usize;
        self.reseed_fraction > 0. && live < floor
    }

    /// Select new points on the latest frame away from the survivors
    fn reseed(&mut self, state: &mut TrackState) -> usize {
        self.reseed_requested = false;
        let existing = feature::points(&state.features);
        let budget = self.detector.params().max_count.saturating_sub(existing.len());
        let corners = self
            .detector
            .select_excluding(&state.previous.image, &existing, budget);
        for corner in &corners {
            state.features.push(Feature {
                point: corner.point,
                id: self.next_id.next(),
            });
        }
        if !corners.is_empty() {
            info!(
                "re-seeded {} points, {} live",
                corners.len(),
                state.features.len()
            );
        }
        corners.len()
    }
}
