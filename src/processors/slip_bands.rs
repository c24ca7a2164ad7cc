//! Slip-band angle detection from max-shear maps.
//!
//! Bands of localized shear inside a grain show up as straight streaks.
//! Thresholding the grain's shear map, cleaning it with a median filter and
//! taking a radon transform turns each streak into a sharp peak; the
//! maximum of every projection gives a profile over 0..180 degrees whose
//! peaks are the band angles. These are compared against the slip trace
//! angles predicted from crystal orientation.

use std::collections::HashMap;

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SlipBandConfig;
use crate::processors::regions::GrainProperties;

/// Number of projection angles (one per degree over a half turn).
pub const NUM_ANGLES: usize = 180;

/// Plot colors for the first slip planes, in plane order.
pub const PLANE_COLORS: [&str; 4] = ["blue", "green", "red", "purple"];

/// Predicted slip trace of one slip plane in a grain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlipTrace {
    /// Slip plane number (1-based).
    pub plane: u32,
    /// Crystallographic plane label, e.g. `(111)`.
    pub plane_label: String,
    /// Largest Schmid factor among the plane's slip directions.
    pub schmid_factor: f64,
    /// Trace angle in degrees, in `[0, 360)`.
    pub angle_deg: f64,
    /// Plot color name.
    pub color: String,
}

impl SlipTrace {
    /// The same trace seen from the opposite direction.
    pub fn opposite_deg(&self) -> f64 {
        (self.angle_deg + 180.0) % 360.0
    }
}

/// Default plot color for a 1-based slip plane number.
pub fn plane_color(plane: u32) -> &'static str {
    let idx = (plane.max(1) as usize - 1) % PLANE_COLORS.len();
    PLANE_COLORS[idx]
}

/// Slip traces of every grain, keyed by `(time, label)`.
#[derive(Debug, Clone, Default)]
pub struct SlipTraceTable {
    traces: HashMap<(usize, i64), Vec<SlipTrace>>,
}

impl SlipTraceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trace for a grain; traces keep insertion order.
    pub fn insert(&mut self, time: usize, label: i64, trace: SlipTrace) {
        self.traces.entry((time, label)).or_default().push(trace);
    }

    /// Traces of a grain, empty if none are known.
    pub fn get(&self, time: usize, label: i64) -> &[SlipTrace] {
        self.traces
            .get(&(time, label))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Move every trace of `other` into this table.
    pub fn merge(&mut self, other: SlipTraceTable) {
        for (key, traces) in other.traces {
            self.traces.entry(key).or_default().extend(traces);
        }
    }

    /// Number of grains with at least one trace.
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

/// Reflect an out-of-range index back into `0..n` (half-sample symmetric).
fn reflect_index(mut i: isize, n: usize) -> usize {
    let n = n as isize;
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i as usize;
        }
    }
}

/// Median filter with a square `size × size` window and reflected borders.
pub fn median_filter(image: &ArrayView2<f64>, size: usize) -> Array2<f64> {
    let (h, w) = image.dim();
    if size <= 1 || h == 0 || w == 0 {
        return image.to_owned();
    }

    let before = (size / 2) as isize;
    let mut window = Vec::with_capacity(size * size);

    Array2::from_shape_fn((h, w), |(r, c)| {
        window.clear();
        for dr in 0..size as isize {
            let rr = reflect_index(r as isize + dr - before, h);
            for dc in 0..size as isize {
                let cc = reflect_index(c as isize + dc - before, w);
                window.push(image[[rr, cc]]);
            }
        }
        window.sort_by(|a, b| a.total_cmp(b));
        window[window.len() / 2]
    })
}

/// Bilinear sample, zero outside the image.
fn sample_bilinear(image: &Array2<f64>, y: f64, x: f64) -> f64 {
    let (h, w) = image.dim();
    if y < 0.0 || x < 0.0 || y > (h - 1) as f64 || x > (w - 1) as f64 {
        return 0.0;
    }
    let y0 = y.floor() as usize;
    let x0 = x.floor() as usize;
    let y1 = (y0 + 1).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let fy = y - y0 as f64;
    let fx = x - x0 as f64;

    let top = image[[y0, x0]] * (1.0 - fx) + image[[y0, x1]] * fx;
    let bottom = image[[y1, x0]] * (1.0 - fx) + image[[y1, x1]] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Radon transform over 0..180 degrees in one-degree steps.
///
/// The image is zero-padded to a square large enough to hold it at any
/// rotation. Row `i` of the result is the projection at `i` degrees (column
/// sums of the image rotated about its center). Angles are computed in
/// parallel.
pub fn radon(image: &ArrayView2<f64>) -> Vec<Vec<f64>> {
    let (h, w) = image.dim();
    if h == 0 || w == 0 {
        return vec![Vec::new(); NUM_ANGLES];
    }

    let side = ((h * h + w * w) as f64).sqrt().ceil() as usize;
    let off_r = (side - h) / 2;
    let off_c = (side - w) / 2;
    let mut padded = Array2::<f64>::zeros((side, side));
    padded
        .slice_mut(ndarray::s![off_r..off_r + h, off_c..off_c + w])
        .assign(image);

    let center = (side / 2) as f64;

    (0..NUM_ANGLES)
        .into_par_iter()
        .map(|deg| {
            let (sin, cos) = (deg as f64).to_radians().sin_cos();
            let mut projection = vec![0.0; side];
            for (col, slot) in projection.iter_mut().enumerate() {
                let x = col as f64 - center;
                let mut sum = 0.0;
                for row in 0..side {
                    let y = row as f64 - center;
                    let src_x = cos * x + sin * y + center;
                    let src_y = -sin * x + cos * y + center;
                    sum += sample_bilinear(&padded, src_y, src_x);
                }
                *slot = sum;
            }
            projection
        })
        .collect()
}

/// Maximum radon intensity at each angle of a (shear) map.
///
/// With a `threshold` the map is first binarized (`value > threshold`; `NaN`
/// never passes). Without one, `NaN` values count as 0. An optional median
/// filter of the given window size is applied before the transform.
///
/// # Returns
///
/// [`NUM_ANGLES`] values, index = angle in degrees.
pub fn band_angle_profile(
    map: &ArrayView2<f64>,
    threshold: Option<f64>,
    median_size: Option<usize>,
) -> Vec<f64> {
    let mut filtered = match threshold {
        Some(t) => map.mapv(|v| if v > t { 1.0 } else { 0.0 }),
        None => map.mapv(|v| if v.is_nan() { 0.0 } else { v }),
    };

    if let Some(size) = median_size {
        filtered = median_filter(&filtered.view(), size);
    }

    radon(&filtered.view())
        .into_iter()
        .map(|projection| projection.into_iter().fold(0.0, f64::max))
        .collect()
}

/// Band threshold for a grain: `max(multiplier * mean, minimum)`.
///
/// Non-finite values are ignored in the mean.
pub fn grain_threshold(values: &[f64], config: &SlipBandConfig) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let mean = if finite.is_empty() {
        0.0
    } else {
        finite.iter().sum::<f64>() / finite.len() as f64
    };
    (config.threshold_multiplier * mean).max(config.minimum_threshold)
}

/// Band angle profile of one grain.
///
/// Pixels of the bounding box outside the grain are excluded (set to `NaN`
/// before thresholding).
pub fn grain_band_profile(grain: &GrainProperties, config: &SlipBandConfig) -> Vec<f64> {
    let threshold = grain_threshold(&grain.values(), config);

    let mut grain_map = grain.intensity.clone();
    grain_map.zip_mut_with(&grain.mask, |v, &inside| {
        if !inside {
            *v = f64::NAN;
        }
    });

    let median = (config.median_size > 1).then_some(config.median_size);
    log::debug!(
        "grain {}: band threshold {:.4}, median window {:?}",
        grain.label,
        threshold,
        median
    );
    band_angle_profile(&grain_map.view(), Some(threshold), median)
}

/// Extend a half-turn profile to a full turn.
///
/// The profile is repeated twice and closed with its first value, so a
/// 180-sample profile becomes 361 samples spanning 0..=360 degrees.
pub fn periodic_profile(profile: &[f64]) -> Vec<f64> {
    let mut periodic = Vec::with_capacity(profile.len() * 2 + 1);
    periodic.extend_from_slice(profile);
    periodic.extend_from_slice(profile);
    if let Some(&first) = profile.first() {
        periodic.push(first);
    }
    periodic
}

/// Evenly spaced angles in degrees from 0 to 360 inclusive.
pub fn periodic_angles_deg(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n).map(|i| 360.0 * i as f64 / (n - 1) as f64).collect(),
    }
}

/// Angle (degrees) of the strongest band, or `None` for an empty or flat profile.
pub fn dominant_angle(profile: &[f64]) -> Option<usize> {
    let (idx, &max) = profile
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    if max > 0.0 {
        Some(idx)
    } else {
        None
    }
}
