//! Segmentation to trajectory pipeline.
//!
//! 1. Optionally label non-indexed pixels so every pixel belongs to a region
//! 2. Extract per-frame region centroids (ascending label order)
//! 3. Link centroids across frames
//! 4. Assemble `(track_id, time, *coords)` rows into one [`TrackTable`]

use ndarray::{ArrayD, Axis};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::{LabelingConfig, PipelineConfig};
use crate::core::tracks::{TrackRow, TrackTable};
use crate::processors::labeling::{add_non_indexed, LabelingError};
use crate::processors::linking::{LinkError, Linker};
use crate::processors::regions::frame_centroids;

/// Errors that can occur in the tracking pipeline.
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error(transparent)]
    Labeling(#[from] LabelingError),

    #[error(transparent)]
    Linking(#[from] LinkError),

    #[error("frame {frame}: {points} points but {ids} track ids")]
    LengthMismatch {
        frame: usize,
        points: usize,
        ids: usize,
    },
}

/// Result type for tracking operations.
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Extract region centroids for every frame of a segmentation volume.
///
/// Frames are taken along `config.time_axis`; centroid coordinates follow
/// the remaining axes in volume order.
pub fn points_from_seg(volume: &ArrayD<i64>, config: &LabelingConfig) -> Result<Vec<Vec<Vec<f64>>>> {
    let labeled;
    let full = if config.include_non_indexed {
        labeled = add_non_indexed(volume, config.time_axis, config.min_size)?;
        &labeled
    } else {
        if config.time_axis >= volume.ndim() {
            return Err(LabelingError::InvalidTimeAxis {
                axis: config.time_axis,
                ndim: volume.ndim(),
            }
            .into());
        }
        volume
    };

    let num_frames = full.len_of(Axis(config.time_axis));
    let coords: Vec<Vec<Vec<f64>>> = (0..num_frames)
        .into_par_iter()
        .map(|t| frame_centroids(&full.index_axis(Axis(config.time_axis), t)))
        .collect();

    log::debug!(
        "extracted {} centroids over {} frames",
        coords.iter().map(Vec::len).sum::<usize>(),
        num_frames
    );
    Ok(coords)
}

/// Zip per-frame coordinates with their track ids into one table.
///
/// Frame index is the time value; rows are concatenated in time order.
pub fn assemble_tracks(coords: &[Vec<Vec<f64>>], ids: &[Vec<u64>], ndim: usize) -> Result<TrackTable> {
    let mut table = TrackTable::new(ndim);

    for (t, (frame_coords, frame_ids)) in coords.iter().zip(ids).enumerate() {
        if frame_coords.len() != frame_ids.len() {
            return Err(TrackingError::LengthMismatch {
                frame: t,
                points: frame_coords.len(),
                ids: frame_ids.len(),
            });
        }
        table
            .rows
            .extend(frame_coords.iter().zip(frame_ids).map(|(c, &id)| TrackRow {
                track_id: id,
                time: t as u64,
                coords: c.clone(),
            }));
    }

    Ok(table)
}

/// Run the full segmentation to tracks pipeline.
///
/// # Errors
///
/// Propagates labeling errors (bad time axis) and linking errors, including
/// [`LinkError::SubnetOversize`] when tracking cannot resolve a frame.
pub fn tracks_from_seg(volume: &ArrayD<i64>, config: &PipelineConfig) -> Result<TrackTable> {
    let coords = points_from_seg(volume, &config.labeling)?;
    let linker = Linker::new(config.linking.clone())?;
    let ids = linker.link(&coords)?;

    let ndim = volume.ndim().saturating_sub(1);
    let table = assemble_tracks(&coords, &ids, ndim)?;
    log::info!(
        "assembled {} rows in {} tracks",
        table.len(),
        table.track_ids().len()
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, IxDyn};

    fn moving_block_volume() -> ArrayD<i64> {
        let mut volume = Array3::<i64>::zeros((3, 10, 10));
        for t in 0..3 {
            let start = t + 1;
            for r in start..start + 2 {
                for c in start..start + 2 {
                    volume[[t, r, c]] = 1;
                }
            }
        }
        volume.into_dyn()
    }

    fn config_without_background() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.labeling.include_non_indexed = false;
        config
    }

    #[test]
    fn test_moving_block_forms_one_track() {
        let table = tracks_from_seg(&moving_block_volume(), &config_without_background()).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.track_ids().len(), 1);
        let times: Vec<u64> = table.rows.iter().map(|r| r.time).collect();
        assert_eq!(times, vec![0, 1, 2]);
        for (row, expected) in table.rows.iter().zip([1.5, 2.5, 3.5]) {
            assert!((row.coords[0] - expected).abs() < 1e-9);
            assert!((row.coords[1] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_moving_block_with_background_region() {
        let table = tracks_from_seg(&moving_block_volume(), &PipelineConfig::default()).unwrap();

        // Background gets its own region per frame, linked into a second track
        assert_eq!(table.track_ids().len(), 2);
        let block_id = table.rows[0].track_id;
        let block: Vec<&TrackRow> = table.track(block_id);
        assert_eq!(block.len(), 3);
        assert!((block[2].coords[0] - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_two_blocks_never_merge() {
        let mut volume = Array3::<i64>::zeros((3, 20, 20));
        for t in 0..3 {
            for r in 0..2 {
                for c in 0..2 {
                    volume[[t, 2 + t + r, 2 + c]] = 1;
                    volume[[t, 15 + r, 10 + t + c]] = 2;
                }
            }
        }
        let table = tracks_from_seg(&volume.into_dyn(), &config_without_background()).unwrap();

        let ids = table.track_ids();
        assert_eq!(ids.len(), 2);
        for id in ids {
            assert_eq!(table.track(id).len(), 3);
        }
    }

    #[test]
    fn test_hundreds_of_scattered_grains() {
        // 300 two-pixel grains over a 20 x 15 grid of cells, each grain
        // placed at its own offset inside the cell, moving down one row
        let mut volume = Array3::<i64>::zeros((2, 420, 620));
        for k in 0..300usize {
            let r = 20 * (k / 15) + (k * 7) % 11;
            let c = 40 * (k % 15) + (k * 13) % 17;
            for t in 0..2 {
                volume[[t, r + t, c]] = k as i64 + 1;
                volume[[t, r + t, c + 1]] = k as i64 + 1;
            }
        }

        let table = tracks_from_seg(&volume.into_dyn(), &PipelineConfig::default()).unwrap();

        // Every grain plus the background links across both frames
        let ids = table.track_ids();
        assert_eq!(ids.len(), 301);
        for id in ids {
            let rows = table.track(id);
            assert_eq!(rows.len(), 2);
            if id < 300 {
                assert!((rows[1].coords[0] - rows[0].coords[0] - 1.0).abs() < 1e-9);
                assert_eq!(rows[1].coords[1], rows[0].coords[1]);
            }
        }
    }

    #[test]
    fn test_single_point_coordinates_in_time_order() {
        let positions = [(2usize, 3usize), (3, 5), (5, 6), (6, 8)];
        let mut volume = Array3::<i64>::zeros((4, 12, 12));
        for (t, &(r, c)) in positions.iter().enumerate() {
            volume[[t, r, c]] = 1;
        }
        let table = tracks_from_seg(&volume.into_dyn(), &config_without_background()).unwrap();

        assert_eq!(table.track_ids().len(), 1);
        for (row, &(r, c)) in table.rows.iter().zip(positions.iter()) {
            assert_eq!(row.coords, vec![r as f64, c as f64]);
        }
    }

    #[test]
    fn test_empty_frame_does_not_fail() {
        let mut volume = Array3::<i64>::zeros((3, 5, 5));
        volume[[0, 1, 1]] = 1;
        volume[[2, 1, 2]] = 1;
        let coords = points_from_seg(
            &volume.clone().into_dyn(),
            &config_without_background().labeling,
        )
        .unwrap();
        assert!(coords[1].is_empty());

        let table = tracks_from_seg(&volume.into_dyn(), &config_without_background()).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_relabeling_is_deterministic() {
        let mut volume = Array3::<i64>::zeros((2, 8, 8));
        volume[[0, 0, 0]] = 4;
        volume[[0, 5, 5]] = 2;
        volume[[1, 3, 3]] = 1;
        let volume = volume.into_dyn();
        let config = LabelingConfig::default();

        let first = points_from_seg(&volume, &config).unwrap();
        let second = points_from_seg(&volume, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_time_axis_last() {
        let mut volume = ArrayD::<i64>::zeros(IxDyn(&[6, 6, 2]));
        volume[[1, 1, 0]] = 1;
        volume[[2, 2, 1]] = 1;
        let mut config = config_without_background();
        config.labeling.time_axis = 2;

        let table = tracks_from_seg(&volume, &config).unwrap();
        assert_eq!(table.ndim, 2);
        assert_eq!(table.rows[1].coords, vec![2.0, 2.0]);
        assert_eq!(table.rows[0].track_id, table.rows[1].track_id);
    }

    #[test]
    fn test_assemble_length_mismatch() {
        let coords = vec![vec![vec![0.0, 0.0]]];
        let ids = vec![vec![]];
        assert!(matches!(
            assemble_tracks(&coords, &ids, 2),
            Err(TrackingError::LengthMismatch { frame: 0, .. })
        ));
    }
}
