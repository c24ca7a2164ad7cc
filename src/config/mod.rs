//! Configuration types for the grain tracking pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for labeling non-indexed regions of a segmentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelingConfig {
    /// Axis of the segmentation volume that indexes time
    #[serde(default)]
    pub time_axis: usize,

    /// Give unindexed pixels their own region labels before extracting centroids
    #[serde(default = "default_include_non_indexed")]
    pub include_non_indexed: bool,

    /// Newly labeled components smaller than this (in pixels) revert to background.
    /// 0 disables the filter.
    #[serde(default)]
    pub min_size: usize,
}

fn default_include_non_indexed() -> bool {
    true
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            time_axis: 0,
            include_non_indexed: default_include_non_indexed(),
            min_size: 0,
        }
    }
}

/// Configuration for frame-to-frame centroid linking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkingConfig {
    /// Maximum displacement between frames, in pixels
    #[serde(default = "default_search_range")]
    pub search_range: f64,

    /// Smallest search range the adaptive search may shrink to
    #[serde(default = "default_adaptive_stop")]
    pub adaptive_stop: f64,

    /// Factor applied to the search range on each adaptive retry
    #[serde(default = "default_adaptive_step")]
    pub adaptive_step: f64,

    /// Number of frames a track may go unmatched before it ends
    #[serde(default)]
    pub memory: usize,

    /// Largest subnetwork (in source tracks) solved exhaustively
    #[serde(default = "default_max_subnet_size")]
    pub max_subnet_size: usize,
}

fn default_search_range() -> f64 {
    8.0
}

fn default_adaptive_stop() -> f64 {
    0.5
}

fn default_adaptive_step() -> f64 {
    0.5
}

fn default_max_subnet_size() -> usize {
    30
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            search_range: default_search_range(),
            adaptive_stop: default_adaptive_stop(),
            adaptive_step: default_adaptive_step(),
            memory: 0,
            max_subnet_size: default_max_subnet_size(),
        }
    }
}

/// Configuration for slip-band angle detection within a grain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlipBandConfig {
    /// Multiplier applied to the grain's mean shear to get the band threshold
    #[serde(default = "default_threshold_multiplier")]
    pub threshold_multiplier: f64,

    /// Lower bound on the band threshold
    #[serde(default = "default_minimum_threshold")]
    pub minimum_threshold: f64,

    /// Median filter window applied to the thresholded map (0 disables)
    #[serde(default = "default_median_size")]
    pub median_size: usize,
}

fn default_threshold_multiplier() -> f64 {
    1.6
}

fn default_minimum_threshold() -> f64 {
    0.013
}

fn default_median_size() -> usize {
    3
}

impl Default for SlipBandConfig {
    fn default() -> Self {
        Self {
            threshold_multiplier: default_threshold_multiplier(),
            minimum_threshold: default_minimum_threshold(),
            median_size: default_median_size(),
        }
    }
}

/// Configuration for rendered plots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotConfig {
    /// Output image width in pixels
    #[serde(default = "default_plot_width")]
    pub width: u32,

    /// Output image height in pixels
    #[serde(default = "default_plot_height")]
    pub height: u32,

    /// Render on a dark background
    #[serde(default = "default_dark_background")]
    pub dark_background: bool,
}

fn default_plot_width() -> u32 {
    1024
}

fn default_plot_height() -> u32 {
    768
}

fn default_dark_background() -> bool {
    true
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: default_plot_width(),
            height: default_plot_height(),
            dark_background: default_dark_background(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub labeling: LabelingConfig,

    #[serde(default)]
    pub linking: LinkingConfig,

    #[serde(default)]
    pub slip_bands: SlipBandConfig,

    #[serde(default)]
    pub plot: PlotConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_linking_config() {
        let config = LinkingConfig::default();
        assert_eq!(config.search_range, 8.0);
        assert_eq!(config.adaptive_stop, 0.5);
        assert_eq!(config.adaptive_step, 0.5);
        assert_eq!(config.memory, 0);
    }

    #[test]
    fn test_default_pipeline_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.labeling.time_axis, 0);
        assert!(config.labeling.include_non_indexed);
        assert_eq!(config.slip_bands.median_size, 3);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: PipelineConfig =
            serde_yaml::from_str("linking:\n  search_range: 4.0\n").unwrap();
        assert_eq!(config.linking.search_range, 4.0);
        assert_eq!(config.linking.adaptive_step, 0.5);
        assert_eq!(config.slip_bands.minimum_threshold, 0.013);
    }

    #[test]
    fn test_yaml_round_trip_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yml");

        let mut config = PipelineConfig::default();
        config.labeling.min_size = 12;
        config.to_yaml(&path).unwrap();

        let loaded = PipelineConfig::from_yaml(&path).unwrap();
        assert_eq!(loaded.labeling.min_size, 12);
    }
}
