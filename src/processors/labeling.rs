//! Labeling of non-indexed regions in grain segmentations.
//!
//! Grain maps leave pixels that could not be indexed (label `<= 0`). Before
//! tracking, those pixels are grouped into face-connected components and
//! given fresh labels above the frame's largest grain label, so every pixel
//! belongs to some region.

use std::collections::HashMap;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, ShapeError, Zip};
use rayon::prelude::*;
use thiserror::Error;

/// Errors that can occur while labeling a segmentation volume.
#[derive(Error, Debug)]
pub enum LabelingError {
    #[error("time axis {axis} out of range for a {ndim}-dimensional volume")]
    InvalidTimeAxis { axis: usize, ndim: usize },

    #[error("failed to reassemble labeled frames: {0}")]
    Shape(#[from] ShapeError),
}

/// Result type for labeling operations.
pub type Result<T> = std::result::Result<T, LabelingError>;

/// Find the root of `x` with path halving.
fn find_root(parent: &mut [u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        parent[x as usize] = parent[parent[x as usize] as usize];
        x = parent[x as usize];
    }
    x
}

/// Merge the sets of `a` and `b`, keeping the smaller root.
fn union_labels(parent: &mut [u32], a: u32, b: u32) {
    let ra = find_root(parent, a);
    let rb = find_root(parent, b);
    if ra < rb {
        parent[rb as usize] = ra;
    } else if rb < ra {
        parent[ra as usize] = rb;
    }
}

/// Label face-connected components of a boolean mask of any dimensionality.
///
/// Two `true` pixels are connected when they differ by one along exactly one
/// axis (4-connectivity in 2-D, 6-connectivity in 3-D). Components are
/// numbered from 1 in raster order of their first pixel; `false` pixels are 0.
///
/// # Returns
///
/// The label array (same shape as `mask`) and the number of components.
pub fn label_components(mask: &ArrayViewD<bool>) -> (ArrayD<i64>, usize) {
    let shape = mask.shape().to_vec();
    let ndim = shape.len();
    let n: usize = shape.iter().product();

    // Row-major strides of the logical index space
    let mut strides = vec![1usize; ndim];
    for d in (0..ndim.saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }

    let mut provisional = vec![0u32; n];
    let mut parent: Vec<u32> = vec![0];
    let mut next_label = 1u32;

    // First pass: provisional labels from already-visited face neighbours
    for (flat, (index, &on)) in mask.indexed_iter().enumerate() {
        if !on {
            continue;
        }

        let mut assigned = 0u32;
        for d in 0..ndim {
            if index[d] == 0 {
                continue;
            }
            let neighbour = provisional[flat - strides[d]];
            if neighbour == 0 {
                continue;
            }
            if assigned == 0 {
                assigned = neighbour;
            } else if neighbour != assigned {
                union_labels(&mut parent, assigned, neighbour);
            }
        }

        if assigned == 0 {
            parent.push(next_label);
            assigned = next_label;
            next_label += 1;
        }
        provisional[flat] = assigned;
    }

    // Second pass: sequential ids in order of first appearance
    let mut root_to_label: HashMap<u32, i64> = HashMap::new();
    let mut count = 0usize;
    let mut labels = ArrayD::<i64>::zeros(IxDyn(&shape));

    for (out, &label) in labels.iter_mut().zip(provisional.iter()) {
        if label == 0 {
            continue;
        }
        let root = find_root(&mut parent, label);
        *out = *root_to_label.entry(root).or_insert_with(|| {
            count += 1;
            count as i64
        });
    }

    (labels, count)
}

/// Drop components smaller than `min_size` pixels and renumber the survivors
/// consecutively. Dropped pixels become 0.
fn filter_small_components(labels: &mut ArrayD<i64>, count: usize, min_size: usize) -> usize {
    let mut sizes = vec![0usize; count + 1];
    for &label in labels.iter() {
        sizes[label as usize] += 1;
    }

    let mut remap = vec![0i64; count + 1];
    let mut kept = 0usize;
    for label in 1..=count {
        if sizes[label] >= min_size {
            kept += 1;
            remap[label] = kept as i64;
        }
    }

    labels.mapv_inplace(|label| remap[label as usize]);
    kept
}

/// Give the non-indexed pixels of one frame their own labels.
///
/// New components are offset by the frame's largest label (clamped at 0)
/// so they never collide with existing grains.
pub fn label_non_indexed_frame(frame: &ArrayViewD<i64>, min_size: usize) -> ArrayD<i64> {
    let mask = frame.mapv(|label| label <= 0);
    if !mask.iter().any(|&m| m) {
        return frame.to_owned();
    }

    let offset = frame.iter().copied().max().unwrap_or(0).max(0);
    let (mut new_labels, mut count) = label_components(&mask.view());
    if min_size > 0 {
        count = filter_small_components(&mut new_labels, count, min_size);
    }
    log::debug!(
        "labeled {} non-indexed components above label {}",
        count,
        offset
    );

    let mut output = frame.to_owned();
    Zip::from(&mut output)
        .and(&mask)
        .and(&new_labels)
        .for_each(|out, &non_indexed, &new_label| {
            if non_indexed {
                *out = if new_label > 0 { new_label + offset } else { 0 };
            }
        });
    output
}

/// Label the non-indexed pixels of every frame of a segmentation volume.
///
/// Frames are taken along `time_axis` and processed independently (no
/// connectivity across time). Positive labels pass through unchanged;
/// every pixel `<= 0` receives a new label unique within its frame, unless
/// its component has fewer than `min_size` pixels, in which case it becomes
/// background (0). Frames are processed in parallel with rayon.
///
/// # Errors
///
/// Returns [`LabelingError::InvalidTimeAxis`] if `time_axis` is not an axis
/// of `volume`.
pub fn add_non_indexed(
    volume: &ArrayD<i64>,
    time_axis: usize,
    min_size: usize,
) -> Result<ArrayD<i64>> {
    if time_axis >= volume.ndim() {
        return Err(LabelingError::InvalidTimeAxis {
            axis: time_axis,
            ndim: volume.ndim(),
        });
    }

    let num_frames = volume.len_of(Axis(time_axis));
    if num_frames == 0 {
        return Ok(volume.clone());
    }

    let frames: Vec<ArrayD<i64>> = (0..num_frames)
        .into_par_iter()
        .map(|t| label_non_indexed_frame(&volume.index_axis(Axis(time_axis), t), min_size))
        .collect();

    let views: Vec<ArrayViewD<i64>> = frames.iter().map(|f| f.view()).collect();
    let stacked: ArrayD<i64> = ndarray::stack(Axis(time_axis), &views)?;
    Ok(stacked)
}
