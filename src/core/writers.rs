//! CSV writers for tracking and slip-band results.
//!
//! - Track tables with `track_id,t,<axes...>` columns
//! - Band angle profiles with `angle_deg,intensity` columns
//! - Label grids in the headerless layout read by the loaders

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use ndarray::ArrayView2;
use thiserror::Error;

use super::tracks::TrackTable;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a CSV writer over a buffered file at `path`.
fn create_csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(csv::Writer::from_writer(BufWriter::new(file)))
}

/// Write a track table to CSV.
///
/// Columns are `track_id`, `t`, then one per spatial axis (see
/// [`TrackTable::column_names`]). Coordinates use six decimals.
///
/// # Example
///
/// ```no_run
/// use grain_tracks::core::tracks::TrackTable;
/// use grain_tracks::core::writers::write_tracks_csv;
/// use std::path::Path;
///
/// let table = TrackTable::new(2);
/// write_tracks_csv(Path::new("tracks.csv"), &table).unwrap();
/// ```
pub fn write_tracks_csv(path: &Path, table: &TrackTable) -> Result<()> {
    let mut csv_writer = create_csv_writer(path)?;
    let path_str = path.display().to_string();

    csv_writer
        .write_record(table.column_names())
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for row in &table.rows {
        let mut record = Vec::with_capacity(2 + row.coords.len());
        record.push(row.track_id.to_string());
        record.push(row.time.to_string());
        record.extend(row.coords.iter().map(|c| format!("{:.6}", c)));

        csv_writer
            .write_record(&record)
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// Write a band angle profile as `angle_deg,intensity` rows, one per degree.
pub fn write_profile_csv(path: &Path, profile: &[f64]) -> Result<()> {
    let mut csv_writer = create_csv_writer(path)?;
    let path_str = path.display().to_string();

    csv_writer
        .write_record(["angle_deg", "intensity"])
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for (angle, value) in profile.iter().enumerate() {
        csv_writer
            .write_record(&[angle.to_string(), format!("{:.6}", value)])
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// Write a label grid as headerless CSV, one image row per line.
pub fn write_label_grid(path: &Path, grid: &ArrayView2<i64>) -> Result<()> {
    let mut csv_writer = create_csv_writer(path)?;
    let path_str = path.display().to_string();

    for row in grid.rows() {
        let record: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        csv_writer
            .write_record(&record)
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}
