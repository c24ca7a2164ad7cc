//! Trajectory tables produced by the tracking pipeline.

use std::collections::BTreeSet;

use ndarray::Array2;

/// One point of one trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRow {
    pub track_id: u64,
    pub time: u64,
    /// Spatial coordinates, one per non-time axis of the source volume.
    pub coords: Vec<f64>,
}

/// Flat table of `(track_id, time, *coords)` rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackTable {
    /// Number of spatial coordinates per row.
    pub ndim: usize,
    pub rows: Vec<TrackRow>,
}

/// Position of a track at a given time, as located by [`TrackTable::focus_point`].
#[derive(Debug, Clone, PartialEq)]
pub struct FocusPoint {
    pub time: u64,
    pub coords: Vec<f64>,
}

impl FocusPoint {
    /// Camera center for a viewer showing `ndisplay` dimensions.
    ///
    /// A 2-D view centers on the spatial coordinates only; a 3-D view
    /// includes the time coordinate.
    pub fn camera_center(&self, ndisplay: usize) -> Vec<f64> {
        if ndisplay == 2 {
            self.coords.clone()
        } else {
            std::iter::once(self.time as f64)
                .chain(self.coords.iter().copied())
                .collect()
        }
    }
}

impl TrackTable {
    /// Creates an empty table with `ndim` spatial columns.
    pub fn new(ndim: usize) -> Self {
        Self {
            ndim,
            rows: Vec::new(),
        }
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct track ids, ascending.
    pub fn track_ids(&self) -> Vec<u64> {
        self.rows
            .iter()
            .map(|row| row.track_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Rows of one track, ordered by time.
    pub fn track(&self, track_id: u64) -> Vec<&TrackRow> {
        let mut rows: Vec<&TrackRow> = self
            .rows
            .iter()
            .filter(|row| row.track_id == track_id)
            .collect();
        rows.sort_by_key(|row| row.time);
        rows
    }

    /// Locate a track at `current_time`.
    ///
    /// If the track has no point at `current_time`, its last point is used
    /// instead. Returns `None` if the track id is unknown.
    pub fn focus_point(&self, track_id: u64, current_time: u64) -> Option<FocusPoint> {
        let rows = self.track(track_id);
        let row = rows
            .iter()
            .find(|row| row.time == current_time)
            .or_else(|| rows.last())?;
        Some(FocusPoint {
            time: row.time,
            coords: row.coords.clone(),
        })
    }

    /// Dense `(rows, 2 + ndim)` array with columns track_id, time, coords.
    pub fn to_array(&self) -> Array2<f64> {
        let cols = 2 + self.ndim;
        Array2::from_shape_fn((self.rows.len(), cols), |(r, c)| {
            let row = &self.rows[r];
            match c {
                0 => row.track_id as f64,
                1 => row.time as f64,
                _ => row.coords.get(c - 2).copied().unwrap_or(f64::NAN),
            }
        })
    }

    /// Column names: `track_id`, `t`, then one per spatial axis.
    ///
    /// 2-D tables use `y, x`, 3-D tables `z, y, x`; others `axis_N`.
    pub fn column_names(&self) -> Vec<String> {
        let spatial: Vec<String> = match self.ndim {
            1 => vec!["x".to_string()],
            2 => vec!["y".to_string(), "x".to_string()],
            3 => vec!["z".to_string(), "y".to_string(), "x".to_string()],
            n => (0..n).map(|i| format!("axis_{}", i)).collect(),
        };
        ["track_id".to_string(), "t".to_string()]
            .into_iter()
            .chain(spatial)
            .collect()
    }
}
