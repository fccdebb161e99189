use serde::Serialize;

use crate::my_types::*;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Feature {
    pub point: Vector2d,
    pub id: TrackId,
}

/// A point that survived one step, before and after
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedPair {
    pub id: TrackId,
    pub old: Vector2d,
    pub new: Vector2d,
    pub error: f64,
}

impl TrackedPair {
    pub fn displacement(&self) -> f64 {
        (self.new - self.old).norm()
    }
}

/// Summary of one tracking step
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StepReport {
    pub frame_index: usize,
    /// points carried over from the previous frame
    pub tracked: usize,
    /// points dropped this step
    pub lost: usize,
    /// points added by the selector this step
    pub reseeded: usize,
    /// points alive after the step
    pub live: usize,
    pub mean_displacement: f64,
    pub mean_error: f64,
    pub stationary: bool,
}

pub fn points(features: &[Feature]) -> Vec<Vector2d> {
    features.iter().map(|f| f.point).collect()
}
