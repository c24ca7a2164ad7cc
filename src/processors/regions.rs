//! Per-region measurements on labeled frames.
//!
//! Non-positive labels are treated as background and never reported.
//! Regions are always returned in ascending label order so a frame's
//! centroids can be zipped with its labels.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView2, ArrayViewD};

/// Centroid and size of one labeled region.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Region label (always positive).
    pub label: i64,
    /// Number of pixels in the region.
    pub area: usize,
    /// Mean pixel index along each axis of the frame.
    pub centroid: Vec<f64>,
}

/// Compute the centroid of every positive-label region in a frame.
///
/// The centroid is the mean index of the region's pixels along each axis,
/// in the frame's axis order. A frame without positive labels yields an
/// empty vector.
pub fn frame_regions(frame: &ArrayViewD<i64>) -> Vec<Region> {
    let ndim = frame.ndim();
    let mut sums: BTreeMap<i64, (Vec<f64>, usize)> = BTreeMap::new();

    for (index, &label) in frame.indexed_iter() {
        if label <= 0 {
            continue;
        }
        let (sum, count) = sums
            .entry(label)
            .or_insert_with(|| (vec![0.0; ndim], 0));
        for d in 0..ndim {
            sum[d] += index[d] as f64;
        }
        *count += 1;
    }

    sums.into_iter()
        .map(|(label, (sum, count))| Region {
            label,
            area: count,
            centroid: sum.into_iter().map(|s| s / count as f64).collect(),
        })
        .collect()
}

/// Centroid coordinates of every positive-label region, ascending by label.
pub fn frame_centroids(frame: &ArrayViewD<i64>) -> Vec<Vec<f64>> {
    frame_regions(frame)
        .into_iter()
        .map(|region| region.centroid)
        .collect()
}

/// Bounding box, mask and intensity crop of one grain in a 2-D frame.
#[derive(Debug, Clone)]
pub struct GrainProperties {
    pub label: i64,
    /// `(min_row, min_col, max_row, max_col)`, max exclusive.
    pub bbox: (usize, usize, usize, usize),
    /// Pixels of the bounding box that belong to the grain.
    pub mask: Array2<bool>,
    /// Intensity values over the bounding box.
    pub intensity: Array2<f64>,
}

impl GrainProperties {
    /// Intensity values of the grain's own pixels.
    pub fn values(&self) -> Vec<f64> {
        self.intensity
            .iter()
            .zip(self.mask.iter())
            .filter_map(|(&v, &inside)| if inside { Some(v) } else { None })
            .collect()
    }

    /// Number of pixels in the grain.
    pub fn area(&self) -> usize {
        self.mask.iter().filter(|&&inside| inside).count()
    }
}

/// Measure every positive-label grain of a 2-D frame against an intensity image.
///
/// # Returns
///
/// One [`GrainProperties`] per label, ascending by label. Empty if the
/// labels and intensity shapes differ.
pub fn grain_properties(labels: &ArrayView2<i64>, intensity: &ArrayView2<f64>) -> Vec<GrainProperties> {
    if labels.dim() != intensity.dim() {
        log::warn!(
            "label shape {:?} does not match intensity shape {:?}",
            labels.dim(),
            intensity.dim()
        );
        return Vec::new();
    }

    // (min_row, min_col, max_row, max_col) per label
    let mut boxes: BTreeMap<i64, (usize, usize, usize, usize)> = BTreeMap::new();
    for ((row, col), &label) in labels.indexed_iter() {
        if label <= 0 {
            continue;
        }
        let bbox = boxes
            .entry(label)
            .or_insert((row, col, row + 1, col + 1));
        bbox.0 = bbox.0.min(row);
        bbox.1 = bbox.1.min(col);
        bbox.2 = bbox.2.max(row + 1);
        bbox.3 = bbox.3.max(col + 1);
    }

    boxes
        .into_iter()
        .map(|(label, (r0, c0, r1, c1))| {
            let mask = Array2::from_shape_fn((r1 - r0, c1 - c0), |(r, c)| {
                labels[[r0 + r, c0 + c]] == label
            });
            let intensity = intensity.slice(ndarray::s![r0..r1, c0..c1]).to_owned();
            GrainProperties {
                label,
                bbox: (r0, c0, r1, c1),
                mask,
                intensity,
            }
        })
        .collect()
}
