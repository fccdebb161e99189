use nalgebra as na;
use serde::Serialize;

pub type Vector2d = na::Vector2<f64>;
pub type Matrix2d = na::Matrix2<f64>;

pub type Matrixd = na::DMatrix<f64>;

/// Identity of a tracked point. Allocated once, never reused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TrackId(pub usize);

impl TrackId {
    /// Return the current id and advance the counter
    pub fn next(&mut self) -> TrackId {
        let id = *self;
        self.0 += 1;
        id
    }
}
