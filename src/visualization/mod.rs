//! Visualization tools for tracks and slip-band angles.
//!
//! This module renders PNG plots with the plotters library:
//! - Trajectories in image coordinates, colored by track id
//! - Polar band-angle distributions with predicted slip traces overlaid
//! - Max-shear maps of single grains

use std::path::Path;

use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::config::PlotConfig;
use crate::core::tracks::TrackTable;
use crate::processors::regions::GrainProperties;
use crate::processors::slip_bands::{periodic_angles_deg, periodic_profile, SlipTrace};

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Nothing to plot")]
    Empty,

    #[error("Cannot plot {ndim}-D tracks, need at least 2 spatial axes")]
    UnsupportedDimensionality { ndim: usize },
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Color palette for track visualization.
const TRACK_COLORS: &[(u8, u8, u8)] = &[
    (228, 26, 28),   // Red
    (55, 126, 184),  // Blue
    (77, 175, 74),   // Green
    (152, 78, 163),  // Purple
    (255, 127, 0),   // Orange
    (255, 255, 51),  // Yellow
    (166, 86, 40),   // Brown
    (247, 129, 191), // Pink
    (153, 153, 153), // Gray
    (0, 206, 209),   // Turquoise
    (138, 43, 226),  // Blue Violet
    (50, 205, 50),   // Lime Green
    (255, 20, 147),  // Deep Pink
    (0, 191, 255),   // Deep Sky Blue
    (255, 215, 0),   // Gold
];

/// Radial extent of slip trace lines relative to the profile maximum.
const TRACE_HEIGHT: f64 = 1.05;

fn plotting_error<E: std::fmt::Display>(e: E) -> VisualizationError {
    VisualizationError::PlottingError(e.to_string())
}

fn background(config: &PlotConfig) -> RGBColor {
    if config.dark_background {
        BLACK
    } else {
        WHITE
    }
}

fn foreground(config: &PlotConfig) -> RGBColor {
    if config.dark_background {
        WHITE
    } else {
        BLACK
    }
}

/// Map a named trace color to RGB; unknown names use the foreground color.
fn named_color(name: &str, config: &PlotConfig) -> RGBColor {
    match name.to_ascii_lowercase().as_str() {
        "blue" => RGBColor(31, 119, 180),
        "green" => RGBColor(44, 160, 44),
        "red" => RGBColor(214, 39, 40),
        "purple" => RGBColor(148, 103, 189),
        "orange" => RGBColor(255, 127, 14),
        _ => foreground(config),
    }
}

fn track_color(track_id: u64) -> RGBColor {
    let c = TRACK_COLORS[(track_id as usize) % TRACK_COLORS.len()];
    RGBColor(c.0, c.1, c.2)
}

/// Plot every track as a polyline in image coordinates and save as PNG.
///
/// The last two spatial axes are drawn as `(x, y)` with `y` growing
/// downwards, as in the label images.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `tracks` - Track table with at least two spatial axes
/// * `config` - Plot size and background
pub fn plot_tracks(output_path: &Path, tracks: &TrackTable, config: &PlotConfig) -> Result<()> {
    if tracks.is_empty() {
        return Err(VisualizationError::Empty);
    }
    if tracks.ndim < 2 {
        return Err(VisualizationError::UnsupportedDimensionality { ndim: tracks.ndim });
    }

    let y_axis = tracks.ndim - 2;
    let x_axis = tracks.ndim - 1;

    // Compute bounds with padding
    let (mut x_min, mut x_max, mut y_min, mut y_max) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
    for row in &tracks.rows {
        x_min = x_min.min(row.coords[x_axis]);
        x_max = x_max.max(row.coords[x_axis]);
        y_min = y_min.min(row.coords[y_axis]);
        y_max = y_max.max(row.coords[y_axis]);
    }
    let x_padding = ((x_max - x_min) * 0.05).max(1.0);
    let y_padding = ((y_max - y_min) * 0.05).max(1.0);

    let root = BitMapBackend::new(output_path, (config.width, config.height)).into_drawing_area();
    root.fill(&background(config)).map_err(plotting_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(
            (x_min - x_padding)..(x_max + x_padding),
            (y_max + y_padding)..(y_min - y_padding),
        )
        .map_err(plotting_error)?;

    for track_id in tracks.track_ids() {
        let color = track_color(track_id);
        let points: Vec<(f64, f64)> = tracks
            .track(track_id)
            .iter()
            .map(|row| (row.coords[x_axis], row.coords[y_axis]))
            .collect();

        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))
            .map_err(plotting_error)?;
        chart
            .draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 3, color.filled())))
            .map_err(plotting_error)?;
    }

    root.present().map_err(plotting_error)?;
    log::debug!(
        "plotted {} tracks to {}",
        tracks.track_ids().len(),
        output_path.display()
    );
    Ok(())
}

/// Polar position of `radius` at `angle_deg`, zero pointing down and
/// angles growing counterclockwise.
fn polar_point(angle_deg: f64, radius: f64) -> (f64, f64) {
    let theta = angle_deg.to_radians();
    (radius * theta.sin(), -radius * theta.cos())
}

/// Plot a band-angle distribution on polar axes and save as PNG.
///
/// `profile` holds one value per degree over a half turn; it is drawn
/// periodically over the full circle. Each slip trace is drawn as two
/// radial lines (its angle and the opposite one) reaching 1.05 times the
/// profile maximum, in the trace's color.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `profile` - Band angle profile from [`crate::processors::slip_bands::band_angle_profile`]
/// * `traces` - Predicted slip traces of the grain
/// * `config` - Plot size and background
pub fn plot_band_angle_distribution(
    output_path: &Path,
    profile: &[f64],
    traces: &[SlipTrace],
    config: &PlotConfig,
) -> Result<()> {
    if profile.is_empty() {
        return Err(VisualizationError::Empty);
    }

    let periodic = periodic_profile(profile);
    let angles = periodic_angles_deg(periodic.len());
    let max_value = profile.iter().copied().fold(0.0_f64, f64::max);
    let trace_height = TRACE_HEIGHT * max_value;
    let extent = trace_height.max(f64::EPSILON) * 1.1;

    let size = config.width.min(config.height);
    let root = BitMapBackend::new(output_path, (size, size)).into_drawing_area();
    root.fill(&background(config)).map_err(plotting_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(-extent..extent, -extent..extent)
        .map_err(plotting_error)?;

    // Polar grid: outer ring and the four quarter spokes
    let grid_color = foreground(config).mix(0.3);
    chart
        .draw_series(LineSeries::new(
            (0..=360).map(|a| polar_point(a as f64, trace_height)),
            grid_color,
        ))
        .map_err(plotting_error)?;
    for spoke in [0.0, 90.0, 180.0, 270.0] {
        chart
            .draw_series(LineSeries::new(
                [(0.0, 0.0), polar_point(spoke, trace_height)],
                grid_color,
            ))
            .map_err(plotting_error)?;
    }

    chart
        .draw_series(LineSeries::new(
            angles
                .iter()
                .zip(&periodic)
                .map(|(&angle, &value)| polar_point(angle, value)),
            foreground(config).stroke_width(2),
        ))
        .map_err(plotting_error)?;

    for trace in traces {
        let color = named_color(&trace.color, config);
        for angle in [trace.angle_deg, trace.opposite_deg()] {
            chart
                .draw_series(LineSeries::new(
                    [(0.0, 0.0), polar_point(angle, trace_height)],
                    color.stroke_width(2),
                ))
                .map_err(plotting_error)?;
        }
    }

    root.present().map_err(plotting_error)?;
    log::debug!(
        "plotted band angle distribution with {} traces to {}",
        traces.len(),
        output_path.display()
    );
    Ok(())
}

/// Plot the max-shear map inside a grain's bounding box and save as PNG.
///
/// Pixels outside the grain are left as background; values are shaded from
/// blue (low) to red (high) over the grain's own range.
pub fn plot_grain_shear(output_path: &Path, grain: &GrainProperties, config: &PlotConfig) -> Result<()> {
    let values = grain.values();
    if values.is_empty() {
        return Err(VisualizationError::Empty);
    }
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = if hi > lo { hi - lo } else { 1.0 };

    let (min_row, min_col, max_row, max_col) = grain.bbox;
    let root = BitMapBackend::new(output_path, (config.width, config.height)).into_drawing_area();
    root.fill(&background(config)).map_err(plotting_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(
            (min_col as f64 - 0.5)..(max_col as f64 + 0.5),
            (max_row as f64 + 0.5)..(min_row as f64 - 0.5),
        )
        .map_err(plotting_error)?;

    let pixels = grain
        .mask
        .indexed_iter()
        .filter(|(_, inside)| **inside)
        .map(|((r, c), _)| {
            let value = grain.intensity[[r, c]];
            let t = if value.is_finite() { (value - lo) / span } else { 0.0 };
            let color = HSLColor(0.66 * (1.0 - t), 0.9, 0.5);
            let (y, x) = ((min_row + r) as f64, (min_col + c) as f64);
            Rectangle::new([(x - 0.5, y - 0.5), (x + 0.5, y + 0.5)], color.filled())
        });
    chart.draw_series(pixels).map_err(plotting_error)?;

    root.present().map_err(plotting_error)?;
    Ok(())
}
