use anyhow::{bail, Result};
use clap::Parser;
use serde::Serialize;

/// Tracking parameters. Defaults match the CLI defaults.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[derive(clap::Parser)]
pub struct Config {
    /// Upper bound on the number of tracked points
    #[clap(long, default_value = "200")]
    pub max_count: usize,

    /// Fraction of the strongest corner response a point must reach
    #[clap(long, default_value = "0.3")]
    pub quality_level: f64,

    /// Minimum pixel distance between selected points
    #[clap(long, default_value = "7")]
    pub min_distance: f64,

    /// Side of the square optical flow window
    #[clap(long, default_value = "21")]
    pub window_size: usize,

    /// Highest pyramid level, 0 tracks on the full image only
    #[clap(long, default_value = "3")]
    pub max_level: usize,

    /// Stop iterating once the update is smaller than this (pixels)
    #[clap(long, default_value = "0.01")]
    pub epsilon: f64,

    #[clap(long, default_value = "30")]
    pub max_iterations: usize,

    /// Reject windows whose normalized minimum gradient eigenvalue is below this
    #[clap(long, default_value = "0.0001")]
    pub min_eig_threshold: f64,

    /// Drop points whose mean residual exceeds this
    #[clap(long)]
    pub max_error: Option<f64>,

    /// Re-seed when fewer than `reseed_fraction * max_count` points survive, 0 disables
    #[clap(long, default_value = "0.3")]
    pub reseed_fraction: f64,

    /// Fraction of the trail intensity removed each frame, 0 keeps trails forever
    #[clap(long, default_value = "0")]
    pub trail_fade: f64,

    #[clap(long, default_value = "2")]
    pub trail_thickness: u32,

    #[clap(long, default_value = "0")]
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["sparse-tracker"])
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_count == 0 {
            bail!("max_count must be positive");
        }
        if !(self.quality_level > 0. && self.quality_level <= 1.) {
            bail!("quality_level must be in (0, 1], got {}", self.quality_level);
        }
        if !(self.min_distance >= 0.) {
            bail!("min_distance must not be negative, got {}", self.min_distance);
        }
        if self.window_size < 3 {
            bail!("window_size must be at least 3, got {}", self.window_size);
        }
        if !(self.epsilon > 0.) || self.max_iterations == 0 {
            bail!("epsilon and max_iterations must be positive");
        }
        if !(0. ..=1.).contains(&self.reseed_fraction) {
            bail!("reseed_fraction must be in [0, 1], got {}", self.reseed_fraction);
        }
        if !(0. ..=1.).contains(&self.trail_fade) {
            bail!("trail_fade must be in [0, 1], got {}", self.trail_fade);
        }
        if let Some(max_error) = self.max_error {
            if !(max_error >= 0.) {
                bail!("max_error must not be negative, got {max_error}");
            }
        }
        if self.trail_thickness == 0 {
            bail!("trail_thickness must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_count, 200);
        assert_eq!(config.quality_level, 0.3);
        assert_eq!(config.min_distance, 7.);
        assert_eq!(config.window_size, 21);
        assert_eq!(config.max_level, 3);
        assert_eq!(config.max_iterations, 30);
        assert_eq!(config.epsilon, 0.01);
        assert_eq!(config.max_error, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_overrides() {
        let config =
            Config::parse_from(["sparse-tracker", "--max-count", "50", "--trail-fade", "0.1"]);
        assert_eq!(config.max_count, 50);
        assert_eq!(config.trail_fade, 0.1);
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = Config::default();
        config.quality_level = 0.;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.window_size = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reseed_fraction = 1.5;
        assert!(config.validate().is_err());
    }
}
