use crate::feature::TrackedPair;

#[derive(Debug)]
pub struct Stationary {
    max_displacement: f64,
}

impl Stationary {
    pub fn new() -> Self {
        let max_displacement = 1_f64.powi(2);
        Self { max_displacement }
    }

    /// True when every tracked point moved less than a pixel. Nothing
    /// tracked means nothing to judge.
    pub fn is_static(&self, pairs: &[TrackedPair]) -> bool {
        if pairs.is_empty() {
            return false;
        }
        for pair in pairs {
            if (pair.new - pair.old).norm_squared() >= self.max_displacement {
                return false;
            }
        }
        true
    }
}

impl Default for Stationary {
    fn default() -> Self {
        Self::new()
    }
}
