use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const DEFAULT_ALTERNATIVES: [char; 5] = ['A', 'B', 'C', 'D', 'E'];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub preprocess: PreprocessConfig,
    pub hough: HoughConfig,
    pub grid: GridConfig,
    pub ensemble: EnsembleConfig,
    pub identity: IdentityConfig,
}

impl ReaderConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Pages with a mean luminance below this get the strongest CLAHE boost.
    pub dark_mean: f64,
    /// Pages with a mean luminance above this get the mildest CLAHE boost.
    pub bright_mean: f64,
    pub dark_clip_limit: f64,
    pub normal_clip_limit: f64,
    pub bright_clip_limit: f64,
    pub tile_grid: i32,
    pub bilateral_diameter: i32,
    pub bilateral_sigma_color: f64,
    pub bilateral_sigma_space: f64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            dark_mean: 100.0,
            bright_mean: 200.0,
            dark_clip_limit: 3.0,
            normal_clip_limit: 2.0,
            bright_clip_limit: 1.0,
            tile_grid: 8,
            bilateral_diameter: 9,
            bilateral_sigma_color: 75.0,
            bilateral_sigma_space: 75.0,
        }
    }
}

/// One `HoughCircles` parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoughParams {
    pub min_dist: f64,
    /// Upper Canny threshold.
    pub param1: f64,
    /// Accumulator threshold.
    pub param2: f64,
    pub min_radius: i32,
    pub max_radius: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoughConfig {
    pub blur_kernel: i32,
    pub blur_sigma: f64,
    pub sweeps: Vec<HoughParams>,
}

impl Default for HoughConfig {
    fn default() -> Self {
        let p = |min_dist, param1, param2, min_radius, max_radius| HoughParams {
            min_dist,
            param1,
            param2,
            min_radius,
            max_radius,
        };
        Self {
            blur_kernel: 5,
            blur_sigma: 1.5,
            sweeps: vec![
                p(19.0, 45.0, 28.0, 8, 21),
                p(20.0, 40.0, 25.0, 8, 22),
                p(21.0, 35.0, 20.0, 7, 23),
                p(18.0, 50.0, 30.0, 9, 20),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Maximum vertical distance (exclusive) between a circle and its row key.
    pub row_tolerance: i32,
    pub alternatives: Vec<char>,
    pub rows_per_column: usize,
    /// The largest x gap must exceed the median gap by this factor to count as
    /// a column break.
    pub column_gap_factor: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            row_tolerance: 22,
            alternatives: DEFAULT_ALTERNATIVES.to_vec(),
            rows_per_column: 20,
            column_gap_factor: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleWeights {
    pub dark_fraction: f64,
    pub binary_fraction: f64,
    pub inverted_fraction: f64,
    pub deviation: f64,
    pub darkness: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            dark_fraction: 0.30,
            binary_fraction: 0.30,
            inverted_fraction: 0.20,
            deviation: 0.10,
            darkness: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub weights: EnsembleWeights,
    pub roi_margin: i32,
    /// Gray level below which a pixel counts as dark.
    pub dark_threshold: u8,
    /// Global threshold used to build the binary image.
    pub binary_threshold: f64,
    /// Inverted level above which a pixel counts as inked.
    pub inverted_threshold: u8,
    /// Standard deviation mapped to a full deviation score.
    pub deviation_scale: f64,
    /// Best scores below this are too faint to be a mark.
    pub min_fill: f64,
    /// Best-vs-second gaps below this are too close to call.
    pub min_margin: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            weights: EnsembleWeights::default(),
            roi_margin: 2,
            dark_threshold: 115,
            binary_threshold: 127.0,
            inverted_threshold: 140,
            deviation_scale: 35.0,
            min_fill: 0.10,
            min_margin: 0.06,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub min_len: usize,
    pub max_len: usize,
    /// Skew corrections smaller than this (degrees) are not applied.
    pub skew_threshold_deg: f64,
    /// Line segments steeper than this (degrees) are ignored for skew.
    pub max_skew_deg: f64,
    pub adaptive_block_size: i32,
    pub adaptive_c: f64,
    pub contrast_clip_limit: f64,
    pub contrast_tile_grid: i32,
    pub canny_low: f64,
    pub canny_high: f64,
    /// Accumulator votes a line segment needs.
    pub line_votes: i32,
    /// Shortest segment, as a fraction of the shorter page side.
    pub min_line_fraction: f64,
    pub max_line_gap: f64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            min_len: 10,
            max_len: 12,
            skew_threshold_deg: 0.5,
            max_skew_deg: 45.0,
            adaptive_block_size: 31,
            adaptive_c: 10.0,
            contrast_clip_limit: 2.0,
            contrast_tile_grid: 8,
            canny_low: 50.0,
            canny_high: 150.0,
            line_votes: 100,
            min_line_fraction: 0.125,
            max_line_gap: 10.0,
        }
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg: ReaderConfig =
            serde_json::from_str(r#"{"ensemble": {"min_margin": 0.1}, "grid": {"rows_per_column": 25}}"#)
                .unwrap();
        assert_eq!(cfg.ensemble.min_margin, 0.1);
        assert_eq!(cfg.ensemble.min_fill, 0.10);
        assert_eq!(cfg.grid.rows_per_column, 25);
        assert_eq!(cfg.grid.row_tolerance, 22);
        assert_eq!(cfg.hough.sweeps.len(), 4);
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = EnsembleWeights::default();
        let sum = w.dark_fraction + w.binary_fraction + w.inverted_fraction + w.deviation + w.darkness;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_config_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reader.json");
        std::fs::write(&path, r#"{"identity": {"min_len": 8}}"#).unwrap();
        let cfg = ReaderConfig::from_path(&path).unwrap();
        assert_eq!(cfg.identity.min_len, 8);
        assert_eq!(cfg.identity.max_len, 12);
    }

    #[test]
    fn test_identity_detector_settings() {
        let cfg: IdentityConfig =
            serde_json::from_str(r#"{"canny_low": 30.0, "line_votes": 60, "contrast_tile_grid": 4}"#).unwrap();
        assert_eq!(cfg.canny_low, 30.0);
        assert_eq!(cfg.canny_high, 150.0);
        assert_eq!(cfg.line_votes, 60);
        assert_eq!(cfg.min_line_fraction, 0.125);
        assert_eq!(cfg.max_line_gap, 10.0);
        assert_eq!(cfg.contrast_tile_grid, 4);
        assert_eq!(cfg.contrast_clip_limit, 2.0);
    }
}
