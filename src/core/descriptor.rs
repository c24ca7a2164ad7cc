//! Dataset descriptors for multi-timepoint DIC/EBSD experiments.
//!
//! A descriptor is a YAML file naming the DIC and EBSD sources of every
//! timepoint, the registration landmarks linking them, and the grain, shear
//! and slip trace grids exported from the crystallographic analysis.
//! Relative paths resolve against the descriptor's own directory.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while reading or applying a descriptor.
#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("failed to read descriptor '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid descriptor '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("descriptor has no timepoints")]
    NoTimepoints,

    #[error("timepoint {timepoint}: {dic} DIC landmarks but {ebsd} EBSD landmarks")]
    HomologousPointMismatch {
        timepoint: usize,
        dic: usize,
        ebsd: usize,
    },

    #[error("crop margins {crop:?} do not fit a {rows}x{cols} grid")]
    CropTooLarge {
        crop: Crop,
        rows: usize,
        cols: usize,
    },
}

/// Result type for descriptor operations.
pub type Result<T> = std::result::Result<T, DescriptorError>;

/// Registration model used to warp EBSD grains onto the DIC grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformType {
    #[default]
    Affine,
    Projective,
    Polynomial,
}

/// Margins removed from each edge of a grid, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crop {
    /// Columns removed from the left and right edges
    #[serde(default)]
    pub x: [usize; 2],

    /// Rows removed from the top and bottom edges
    #[serde(default)]
    pub y: [usize; 2],
}

impl Crop {
    /// Apply the margins to a 2-D grid.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::CropTooLarge`] if the margins leave no pixels.
    pub fn apply<T: Clone>(&self, grid: &ArrayView2<T>) -> Result<Array2<T>> {
        let (rows, cols) = grid.dim();
        let row_end = rows.checked_sub(self.y[1]).filter(|&end| end > self.y[0]);
        let col_end = cols.checked_sub(self.x[1]).filter(|&end| end > self.x[0]);

        match (row_end, col_end) {
            (Some(row_end), Some(col_end)) => {
                Ok(grid.slice(s![self.y[0]..row_end, self.x[0]..col_end]).to_owned())
            }
            _ => Err(DescriptorError::CropTooLarge {
                crop: *self,
                rows,
                cols,
            }),
        }
    }
}

/// Matching landmarks in DIC and EBSD pixel coordinates, as `(x, y)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HomologousPoints {
    #[serde(default)]
    pub dic: Vec<[f64; 2]>,

    #[serde(default)]
    pub ebsd: Vec<[f64; 2]>,
}

/// Sources and exported grids of one timepoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timepoint {
    /// DIC displacement map (`.txt`)
    pub dic: PathBuf,

    /// EBSD map base path; looked up next to the DIC map when absent
    #[serde(default)]
    pub ebsd: Option<PathBuf>,

    #[serde(default)]
    pub crop: Option<Crop>,

    #[serde(default)]
    pub homologous_points: HomologousPoints,

    /// Grain label grid on the DIC pixel grid
    pub grains: PathBuf,

    /// Max-shear grid on the DIC pixel grid
    #[serde(default)]
    pub shear: Option<PathBuf>,

    /// Predicted slip traces per grain
    #[serde(default)]
    pub slip_traces: Option<PathBuf>,
}

/// A multi-timepoint DIC/EBSD dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Micrometres per DIC pixel
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Smallest grain kept when segmenting the EBSD map, in pixels
    #[serde(default = "default_min_grain_size")]
    pub min_grain_size: usize,

    /// Misorientation (degrees) separating two grains
    #[serde(default = "default_misorientation_tolerance")]
    pub misorientation_tolerance: f64,

    /// Loading direction used for Schmid factors
    #[serde(default = "default_load_vector")]
    pub load_vector: [f64; 3],

    #[serde(default)]
    pub transform_type: TransformType,

    pub timepoints: Vec<Timepoint>,
}

fn default_scale() -> f64 {
    25.0 / 2048.0
}

fn default_min_grain_size() -> usize {
    10
}

fn default_misorientation_tolerance() -> f64 {
    10.0
}

fn default_load_vector() -> [f64; 3] {
    [1.0, 0.0, 0.0]
}

impl DatasetDescriptor {
    /// Load a descriptor from YAML and resolve its paths.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Parse`] naming the file when a required key
    /// is missing or malformed, and a validation error when the timepoints are
    /// empty or their landmark lists differ in length.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| DescriptorError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut descriptor: DatasetDescriptor =
            serde_yaml::from_str(&content).map_err(|e| DescriptorError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;

        descriptor.validate()?;
        if let Some(base) = path.parent() {
            descriptor.resolve_paths(base);
        }

        log::debug!(
            "loaded descriptor {} with {} timepoints",
            path.display(),
            descriptor.timepoints.len()
        );
        Ok(descriptor)
    }

    /// Check timepoint count and landmark pairing.
    pub fn validate(&self) -> Result<()> {
        if self.timepoints.is_empty() {
            return Err(DescriptorError::NoTimepoints);
        }
        for (timepoint, tp) in self.timepoints.iter().enumerate() {
            let points = &tp.homologous_points;
            if points.dic.len() != points.ebsd.len() {
                return Err(DescriptorError::HomologousPointMismatch {
                    timepoint,
                    dic: points.dic.len(),
                    ebsd: points.ebsd.len(),
                });
            }
        }
        Ok(())
    }

    /// Make every relative path absolute with respect to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for tp in &mut self.timepoints {
            resolve(&mut tp.dic);
            resolve(&mut tp.grains);
            tp.ebsd.iter_mut().for_each(resolve);
            tp.shear.iter_mut().for_each(resolve);
            tp.slip_traces.iter_mut().for_each(resolve);
        }
    }

    /// Number of timepoints.
    pub fn len(&self) -> usize {
        self.timepoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timepoints.is_empty()
    }
}
