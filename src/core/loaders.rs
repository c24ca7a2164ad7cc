//! Data loaders for exported grain maps, shear maps, tracks and slip traces.
//!
//! This module provides parsers for:
//! - Grid CSV files (one image row per line, no header) holding grain labels
//!   or max-shear values
//! - Directories of per-frame label grids, ordered by frame number
//! - Track tables written by [`crate::core::writers::write_tracks_csv`]
//! - Slip trace tables exported from the crystallographic analysis

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use csv::{ReaderBuilder, Trim};
use ndarray::{Array2, ArrayD, ArrayView2, Axis};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::core::tracks::{TrackRow, TrackTable};
use crate::processors::slip_bands::{plane_color, SlipTrace, SlipTraceTable};

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("Parse error in '{path}' at row {row}, column {col}: {message}")]
    ParseError {
        path: PathBuf,
        row: usize,
        col: usize,
        message: String,
    },

    #[error("Missing required columns in '{path}': {columns}")]
    MissingColumns { path: PathBuf, columns: String },

    #[error("Frame {index} has shape {found:?}, expected {expected:?}")]
    FrameShapeMismatch {
        index: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("No frames to load")]
    NoFrames,
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

fn csv_error(path: &Path, source: csv::Error) -> LoaderError {
    LoaderError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

/// Load a headerless CSV grid into a 2-D array.
///
/// Every line is one image row; all rows must have the same length.
fn load_grid<T>(path: &Path) -> Result<Array2<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .trim(Trim::All)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;

    let mut values: Vec<T> = Vec::new();
    let mut rows = 0usize;
    let mut cols = 0usize;

    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_error(path, e))?;
        cols = record.len();
        for (col, field) in record.iter().enumerate() {
            let value = field.parse::<T>().map_err(|e| LoaderError::ParseError {
                path: path.to_path_buf(),
                row,
                col,
                message: e.to_string(),
            })?;
            values.push(value);
        }
        rows += 1;
    }

    if rows == 0 {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    Array2::from_shape_vec((rows, cols), values).map_err(|e| LoaderError::ParseError {
        path: path.to_path_buf(),
        row: rows,
        col: cols,
        message: e.to_string(),
    })
}

/// Load a grain label grid. Non-positive values mark non-indexed pixels.
pub fn load_label_grid<P: AsRef<Path>>(path: P) -> Result<Array2<i64>> {
    load_grid(path.as_ref())
}

/// Load a real-valued grid such as a max-shear map. `nan` is accepted.
pub fn load_value_grid<P: AsRef<Path>>(path: P) -> Result<Array2<f64>> {
    load_grid(path.as_ref())
}

/// Stack equally shaped 2-D frames along a new leading time axis.
pub fn stack_frames<T: Clone>(frames: &[Array2<T>]) -> Result<ArrayD<T>> {
    let first = frames.first().ok_or(LoaderError::NoFrames)?;
    let expected = first.dim();
    for (index, frame) in frames.iter().enumerate() {
        if frame.dim() != expected {
            return Err(LoaderError::FrameShapeMismatch {
                index,
                expected,
                found: frame.dim(),
            });
        }
    }

    let views: Vec<ArrayView2<T>> = frames.iter().map(|f| f.view()).collect();
    let stacked = ndarray::stack(Axis(0), &views).map_err(|_| LoaderError::FrameShapeMismatch {
        index: 0,
        expected,
        found: expected,
    })?;
    Ok(stacked.into_dyn())
}

/// Load label grids (one per frame) into a `(time, rows, cols)` volume.
pub fn load_label_stack(paths: &[PathBuf]) -> Result<ArrayD<i64>> {
    let frames = paths
        .iter()
        .map(load_label_grid)
        .collect::<Result<Vec<_>>>()?;
    log::info!("loaded {} label frames", frames.len());
    stack_frames(&frames)
}

/// Trailing frame number of a file stem, e.g. `grains_step12` -> 12.
pub fn frame_number(path: &Path) -> Option<u64> {
    let pattern = Regex::new(r"(\d+)\D*$").ok()?;
    let stem = path.file_stem()?.to_str()?;
    pattern.captures(stem)?.get(1)?.as_str().parse().ok()
}

/// List the CSV files of a directory ordered by frame number.
///
/// Files without a number sort after numbered ones, by name.
pub fn find_frame_files(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(directory)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false)
        })
        .collect();

    files.sort_by_cached_key(|path| {
        let number = frame_number(path);
        (number.is_none(), number, path.clone())
    });
    Ok(files)
}

/// Load a track table CSV with columns `track_id,t,<coords...>`.
pub fn load_tracks_csv<P: AsRef<Path>>(path: P) -> Result<TrackTable> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;

    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
    if headers.len() < 2 || &headers[0] != "track_id" || &headers[1] != "t" {
        return Err(LoaderError::MissingColumns {
            path: path.to_path_buf(),
            columns: "track_id, t".to_string(),
        });
    }

    let ndim = headers.len() - 2;
    let mut table = TrackTable::new(ndim);

    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_error(path, e))?;
        let parse = |col: usize| -> Result<f64> {
            record[col].parse::<f64>().map_err(|e| LoaderError::ParseError {
                path: path.to_path_buf(),
                row,
                col,
                message: e.to_string(),
            })
        };

        let track_id = parse(0)? as u64;
        let time = parse(1)? as u64;
        let coords = (2..record.len()).map(parse).collect::<Result<Vec<f64>>>()?;
        table.rows.push(TrackRow {
            track_id,
            time,
            coords,
        });
    }

    Ok(table)
}

/// One row of a slip trace CSV.
#[derive(Debug, Deserialize)]
struct SlipTraceRecord {
    time: usize,
    label: i64,
    plane: u32,
    plane_label: String,
    schmid_factor: f64,
    angle_deg: f64,
    #[serde(default)]
    color: Option<String>,
}

/// Load slip traces from a CSV with columns
/// `time,label,plane,plane_label,schmid_factor,angle_deg[,color]`.
///
/// Angles are normalized into `[0, 360)`; missing colors follow the plane
/// number.
pub fn load_slip_traces<P: AsRef<Path>>(path: P) -> Result<SlipTraceTable> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;

    let mut table = SlipTraceTable::new();
    for record in reader.deserialize::<SlipTraceRecord>() {
        let record = record.map_err(|e| csv_error(path, e))?;
        let color = record
            .color
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| plane_color(record.plane).to_string());
        table.insert(
            record.time,
            record.label,
            SlipTrace {
                plane: record.plane,
                plane_label: record.plane_label,
                schmid_factor: record.schmid_factor,
                angle_deg: record.angle_deg.rem_euclid(360.0),
                color,
            },
        );
    }

    log::debug!("loaded slip traces for {} grains from {}", table.len(), path.display());
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_label_grid() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "grains.csv", "1, 1, 0\n2, -1, 3\n");

        let grid = load_label_grid(&path).unwrap();
        assert_eq!(grid.dim(), (2, 3));
        assert_eq!(grid[[1, 1]], -1);
        assert_eq!(grid[[1, 2]], 3);
    }

    #[test]
    fn test_load_value_grid_with_nan() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "shear.csv", "0.1,nan\n0.02,0.5\n");

        let grid = load_value_grid(&path).unwrap();
        assert!(grid[[0, 1]].is_nan());
        assert_eq!(grid[[1, 1]], 0.5);
    }

    #[test]
    fn test_load_grid_ragged_rows_fail() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "bad.csv", "1,2,3\n4,5\n");
        assert!(matches!(load_label_grid(&path), Err(LoaderError::Csv { .. })));
    }

    #[test]
    fn test_load_grid_parse_error() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "bad.csv", "1,x\n");
        match load_label_grid(&path) {
            Err(LoaderError::ParseError { row, col, .. }) => {
                assert_eq!(row, 0);
                assert_eq!(col, 1);
            }
            other => panic!("Expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_load_grid_empty_file() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "empty.csv", "");
        assert!(matches!(load_label_grid(&path), Err(LoaderError::EmptyFile(_))));
    }

    #[test]
    fn test_stack_frames_shape_mismatch() {
        let frames = vec![Array2::<i64>::zeros((2, 2)), Array2::<i64>::zeros((2, 3))];
        assert!(matches!(
            stack_frames(&frames),
            Err(LoaderError::FrameShapeMismatch { index: 1, .. })
        ));
        assert!(matches!(
            stack_frames::<i64>(&[]),
            Err(LoaderError::NoFrames)
        ));
    }

    #[test]
    fn test_find_frame_files_numeric_order() {
        let dir = tempdir().unwrap();
        for name in ["step10.csv", "step2.csv", "step1.csv", "notes.txt", "extra.csv"] {
            write_file(dir.path(), name, "1\n");
        }

        let files = find_frame_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["step1.csv", "step2.csv", "step10.csv", "extra.csv"]);
    }

    #[test]
    fn test_load_label_stack() {
        let dir = tempdir().unwrap();
        let a = write_file(dir.path(), "a0.csv", "1,0\n0,1\n");
        let b = write_file(dir.path(), "a1.csv", "2,2\n0,0\n");

        let volume = load_label_stack(&[a, b]).unwrap();
        assert_eq!(volume.shape(), &[2, 2, 2]);
        assert_eq!(volume[[1, 0, 1]], 2);
    }

    #[test]
    fn test_load_tracks_csv() {
        let dir = tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "tracks.csv",
            "track_id,t,y,x\n0,0,1.5,1.5\n0,1,2.5,2.5\n",
        );

        let table = load_tracks_csv(&path).unwrap();
        assert_eq!(table.ndim, 2);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1].coords, vec![2.5, 2.5]);
    }

    #[test]
    fn test_load_tracks_csv_missing_columns() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "tracks.csv", "id,time,y,x\n0,0,1,1\n");
        assert!(matches!(
            load_tracks_csv(&path),
            Err(LoaderError::MissingColumns { .. })
        ));
    }

    #[test]
    fn test_load_slip_traces() {
        let dir = tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "traces.csv",
            "time,label,plane,plane_label,schmid_factor,angle_deg,color\n\
             0,5,1,(111),0.41,-30.0,\n\
             0,5,2,(-111),0.38,100.0,orange\n",
        );

        let table = load_slip_traces(&path).unwrap();
        let traces = table.get(0, 5);
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].angle_deg, 330.0);
        assert_eq!(traces[0].color, "blue");
        assert_eq!(traces[1].color, "orange");
    }
}
