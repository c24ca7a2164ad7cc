//! Per-grain band-angle plot that follows the selected label.
//!
//! The widget measures every grain of every timepoint once, at
//! construction, and keeps those properties in a cache keyed by
//! `(time, label)`. Each selection or timepoint event recomputes the band
//! angle profile of the selected grain, pairs it with that grain's
//! predicted slip traces and, when an output path is set, renders the polar
//! band-angle distribution.

use std::collections::HashMap;
use std::path::PathBuf;

use ndarray::{ArrayView2, ArrayViewD, Axis, Ix2};
use rayon::prelude::*;
use thiserror::Error;

use super::events::{Event, Observer};
use super::layers::{ImageLayerView, LabeledLayerView};
use crate::config::PipelineConfig;
use crate::processors::regions::{grain_properties, GrainProperties};
use crate::processors::slip_bands::{dominant_angle, grain_band_profile, SlipTrace, SlipTraceTable};
use crate::visualization::{plot_band_angle_distribution, VisualizationError};

/// Errors that can occur in the grain plot widget.
#[derive(Error, Debug)]
pub enum WidgetError {
    #[error("labels shape {labels:?} does not match image shape {image:?}")]
    ShapeMismatch { labels: Vec<usize>, image: Vec<usize> },

    #[error("expected 2-D or time-stacked 3-D layers, got {ndim}-D")]
    UnsupportedDimensionality { ndim: usize },

    #[error(transparent)]
    Visualization(#[from] VisualizationError),
}

/// Result type for widget operations.
pub type Result<T> = std::result::Result<T, WidgetError>;

/// Band-angle result for one grain at one timepoint.
#[derive(Debug, Clone, PartialEq)]
pub struct BandAnglePlot {
    pub time: usize,
    pub label: i64,
    /// Maximum radon intensity per degree over a half turn
    pub profile: Vec<f64>,
    pub traces: Vec<SlipTrace>,
    /// Angle (degrees) of the strongest band
    pub dominant_angle: Option<usize>,
    /// Grain area in squared scale units
    pub area: f64,
}

/// Grain plot widget.
pub struct GrainPlots {
    cache: HashMap<(usize, i64), GrainProperties>,
    slip_traces: SlipTraceTable,
    config: PipelineConfig,
    output: Option<PathBuf>,
    pixel_area: f64,
    selected_label: i64,
    current_time: usize,
    last_plot: Option<BandAnglePlot>,
}

/// Split a layer into 2-D frames along its leading time axis.
fn frames<'a, T>(data: &'a ArrayViewD<'a, T>) -> Result<Vec<ArrayView2<'a, T>>> {
    match data.ndim() {
        2 => Ok(vec![data
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| WidgetError::UnsupportedDimensionality { ndim: 2 })?]),
        3 => data
            .axis_iter(Axis(0))
            .map(|frame| {
                frame
                    .into_dimensionality::<Ix2>()
                    .map_err(|_| WidgetError::UnsupportedDimensionality { ndim: 3 })
            })
            .collect(),
        ndim => Err(WidgetError::UnsupportedDimensionality { ndim }),
    }
}

/// Measure every grain of every frame.
fn build_cache(
    labels: &dyn LabeledLayerView,
    image: &dyn ImageLayerView,
) -> Result<HashMap<(usize, i64), GrainProperties>> {
    let label_data = labels.data();
    let image_data = image.data();
    if label_data.shape() != image_data.shape() {
        return Err(WidgetError::ShapeMismatch {
            labels: label_data.shape().to_vec(),
            image: image_data.shape().to_vec(),
        });
    }

    let label_frames = frames(&label_data)?;
    let image_frames = frames(&image_data)?;

    let cache: HashMap<(usize, i64), GrainProperties> = label_frames
        .par_iter()
        .zip(image_frames.par_iter())
        .enumerate()
        .flat_map_iter(|(t, (labels, image))| {
            grain_properties(labels, image)
                .into_iter()
                .map(move |props| ((t, props.label), props))
        })
        .collect();

    log::debug!(
        "cached properties of {} grains over {} timepoints",
        cache.len(),
        label_frames.len()
    );
    Ok(cache)
}

impl GrainPlots {
    /// Build the widget and its grain property cache.
    ///
    /// # Arguments
    ///
    /// * `labels` - Grain labels, 2-D or stacked along a leading time axis
    /// * `image` - Max-shear values with the same shape as `labels`
    /// * `slip_traces` - Predicted slip traces per `(time, label)`
    /// * `config` - Slip band and plot settings
    /// * `output` - PNG path rewritten on every update, if any
    ///
    /// # Errors
    ///
    /// Returns [`WidgetError::ShapeMismatch`] or
    /// [`WidgetError::UnsupportedDimensionality`] for incompatible layers.
    pub fn new(
        labels: &dyn LabeledLayerView,
        image: &dyn ImageLayerView,
        slip_traces: SlipTraceTable,
        config: PipelineConfig,
        output: Option<PathBuf>,
    ) -> Result<Self> {
        let cache = build_cache(labels, image)?;
        let scale = labels.scale();
        let pixel_area = match scale.len() {
            n if n >= 2 => scale[n - 2] * scale[n - 1],
            _ => 1.0,
        };

        Ok(Self {
            cache,
            slip_traces,
            config,
            output,
            pixel_area,
            selected_label: labels.selected_label(),
            current_time: 0,
            last_plot: None,
        })
    }

    /// Re-measure all grains, e.g. after the layer data changed.
    pub fn rebuild(&mut self, labels: &dyn LabeledLayerView, image: &dyn ImageLayerView) -> Result<()> {
        self.cache = build_cache(labels, image)?;
        self.selected_label = labels.selected_label();
        Ok(())
    }

    pub fn selected_label(&self) -> i64 {
        self.selected_label
    }

    pub fn current_time(&self) -> usize {
        self.current_time
    }

    /// Number of cached `(time, label)` entries.
    pub fn cached_grains(&self) -> usize {
        self.cache.len()
    }

    /// Cached properties of one grain.
    pub fn grain(&self, time: usize, label: i64) -> Option<&GrainProperties> {
        self.cache.get(&(time, label))
    }

    /// The most recent plot, kept when a later selection had no grain.
    pub fn last_plot(&self) -> Option<&BandAnglePlot> {
        self.last_plot.as_ref()
    }

    /// Recompute the plot for the current selection.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the selected label has no grain at the current
    /// timepoint; the previous plot is kept.
    pub fn update(&mut self) -> Result<Option<&BandAnglePlot>> {
        let key = (self.current_time, self.selected_label);
        let Some(grain) = self.cache.get(&key) else {
            log::debug!(
                "no grain {} at timepoint {}, keeping previous plot",
                self.selected_label,
                self.current_time
            );
            return Ok(None);
        };

        let profile = grain_band_profile(grain, &self.config.slip_bands);
        let traces = self.slip_traces.get(key.0, key.1).to_vec();

        if let Some(path) = &self.output {
            plot_band_angle_distribution(path, &profile, &traces, &self.config.plot)?;
            log::info!("grain {} band angle plot written to {}", key.1, path.display());
        }

        self.last_plot = Some(BandAnglePlot {
            time: key.0,
            label: key.1,
            dominant_angle: dominant_angle(&profile),
            area: grain.area() as f64 * self.pixel_area,
            profile,
            traces,
        });
        Ok(self.last_plot.as_ref())
    }
}

impl Observer for GrainPlots {
    fn notify(&mut self, event: &Event) {
        match *event {
            Event::SelectedLabelChanged(label) => self.selected_label = label,
            Event::TimepointChanged(time) => self.current_time = time,
        }
        if let Err(e) = self.update() {
            log::warn!("failed to update grain plot: {}", e);
        }
    }
}
