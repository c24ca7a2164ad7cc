//! Turn DIC/EBSD datasets into viewer layer data.
//!
//! A dataset is opened through its descriptor (see
//! [`crate::core::descriptor`]). Single DIC (`.txt`) or EBSD (`.cpr`, `.crc`)
//! map paths are accepted too: they are resolved to the descriptor sitting in
//! the same directory that lists them.
//!
//! Each read yields an optional max-shear `Image` layer and a grain `Labels`
//! layer, both stacked along a leading time axis and cropped with the
//! timepoint's margins.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayD};
use thiserror::Error;

use crate::core::descriptor::{DatasetDescriptor, DescriptorError, Timepoint};
use crate::core::loaders::{self, LoaderError};
use crate::processors::slip_bands::SlipTraceTable;

/// Extensions of single-map inputs.
pub const MAP_EXTENSIONS: [&str; 3] = ["txt", "cpr", "crc"];

/// Extensions of dataset descriptors.
pub const DESCRIPTOR_EXTENSIONS: [&str; 2] = ["yml", "yaml"];

/// Colormap name given to shear image layers.
pub const SHEAR_COLORMAP: &str = "viridis";

/// Errors that can occur while reading a dataset.
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("no EBSD map (.cpr) found next to '{0}'")]
    CompanionNotFound(PathBuf),

    #[error("no descriptor in '{directory}' lists '{map}'")]
    DescriptorNotFound { directory: PathBuf, map: PathBuf },

    #[error("unsupported input '{0}'")]
    UnsupportedFormat(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Loader(#[from] LoaderError),
}

/// Result type for reader operations.
pub type Result<T> = std::result::Result<T, ReaderError>;

/// Kind of input a path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderKind {
    /// DIC displacement map (`.txt`)
    DicMap,
    /// EBSD map (`.cpr` / `.crc`)
    EbsdMap,
    /// Dataset descriptor (`.yml` / `.yaml`)
    Descriptor,
}

/// How a layer should be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Image,
    Labels,
}

/// Pixel data of a layer, time axis first.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerArray {
    Image(ArrayD<f64>),
    Labels(ArrayD<i64>),
}

impl LayerArray {
    pub fn shape(&self) -> &[usize] {
        match self {
            LayerArray::Image(data) => data.shape(),
            LayerArray::Labels(data) => data.shape(),
        }
    }
}

/// Objects shared by every layer of a dataset.
#[derive(Debug, Clone, Default)]
pub struct LayerMetadata {
    pub descriptor: Option<DatasetDescriptor>,
    pub slip_traces: SlipTraceTable,
}

/// Display options attached to a layer.
#[derive(Debug, Clone, Default)]
pub struct DisplayOptions {
    /// Physical size of one pixel along each axis
    pub scale: Vec<f64>,
    pub colormap: Option<String>,
    pub contrast_limits: Option<[f64; 2]>,
    pub metadata: LayerMetadata,
}

/// One layer: data, display options and kind.
#[derive(Debug, Clone)]
pub struct LayerData {
    pub data: LayerArray,
    pub options: DisplayOptions,
    pub kind: LayerKind,
}

impl LayerData {
    /// Image layer with a colormap and contrast limits from the data range.
    pub fn image(data: ArrayD<f64>, mut options: DisplayOptions) -> Self {
        options.colormap.get_or_insert_with(|| SHEAR_COLORMAP.to_string());
        if options.contrast_limits.is_none() {
            options.contrast_limits = data_range(data.iter().copied());
        }
        Self {
            data: LayerArray::Image(data),
            options,
            kind: LayerKind::Image,
        }
    }

    pub fn labels(data: ArrayD<i64>, options: DisplayOptions) -> Self {
        Self {
            data: LayerArray::Labels(data),
            options,
            kind: LayerKind::Labels,
        }
    }
}

/// Min and max of the finite values, `None` if there are none.
fn data_range(values: impl Iterator<Item = f64>) -> Option<[f64; 2]> {
    values.filter(|v| v.is_finite()).fold(None, |range, v| match range {
        None => Some([v, v]),
        Some([lo, hi]) => Some([lo.min(v), hi.max(v)]),
    })
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Decide how to read `path`; `None` if it is not a supported input.
pub fn reader_for(path: &Path) -> Option<ReaderKind> {
    let ext = extension_of(path)?;
    match ext.as_str() {
        "txt" => Some(ReaderKind::DicMap),
        e if MAP_EXTENSIONS.contains(&e) => Some(ReaderKind::EbsdMap),
        e if DESCRIPTOR_EXTENSIONS.contains(&e) => Some(ReaderKind::Descriptor),
        _ => None,
    }
}

/// Sorted directory entries of `directory` whose extension is one of `extensions`.
fn files_with_extensions(directory: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(directory)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && extension_of(path).is_some_and(|ext| extensions.contains(&ext.as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Find the EBSD map stored next to a DIC map.
///
/// Returns the base path (extension removed) of the first `.cpr` file in the
/// DIC map's directory, in sorted order.
///
/// # Errors
///
/// Returns [`ReaderError::CompanionNotFound`] if the directory holds none.
pub fn find_companion_ebsd(dic_path: &Path) -> Result<PathBuf> {
    let directory = match dic_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    files_with_extensions(directory, &["cpr"])?
        .into_iter()
        .next()
        .map(|path| path.with_extension(""))
        .ok_or_else(|| ReaderError::CompanionNotFound(dic_path.to_path_buf()))
}

/// Canonical parent directory joined with the file stem.
fn canonical_base(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let parent = fs::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf());
    match path.file_stem() {
        Some(stem) => parent.join(stem),
        None => parent,
    }
}

/// Find the descriptor next to a single map that lists it.
fn find_descriptor_for_map(map: &Path) -> Result<PathBuf> {
    let directory = match map.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let map_base = canonical_base(map);
    let is_dic = reader_for(map) == Some(ReaderKind::DicMap);

    for candidate in files_with_extensions(&directory, &DESCRIPTOR_EXTENSIONS)? {
        let descriptor = match DatasetDescriptor::from_yaml(&candidate) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                log::debug!("skipping {}: {}", candidate.display(), e);
                continue;
            }
        };
        let lists_map = descriptor.timepoints.iter().any(|tp| {
            if is_dic {
                canonical_base(&tp.dic) == map_base
            } else {
                tp.ebsd.as_deref().is_some_and(|e| canonical_base(e) == map_base)
            }
        });
        if lists_map {
            return Ok(candidate);
        }
    }

    Err(ReaderError::DescriptorNotFound {
        directory,
        map: map.to_path_buf(),
    })
}

/// Read any supported input into layer data.
pub fn read_path(path: &Path) -> Result<Vec<LayerData>> {
    match reader_for(path) {
        Some(ReaderKind::Descriptor) => read_descriptor(path),
        Some(ReaderKind::DicMap) => {
            let ebsd = find_companion_ebsd(path)?;
            log::info!("pairing {} with EBSD map {}", path.display(), ebsd.display());
            read_descriptor(&find_descriptor_for_map(path)?)
        }
        Some(ReaderKind::EbsdMap) => read_descriptor(&find_descriptor_for_map(path)?),
        None => Err(ReaderError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Apply a timepoint's crop margins, if any.
fn crop_grid<T: Clone>(
    timepoint: &Timepoint,
    grid: Array2<T>,
) -> std::result::Result<Array2<T>, DescriptorError> {
    match &timepoint.crop {
        Some(crop) => crop.apply(&grid.view()),
        None => Ok(grid),
    }
}

/// Read a dataset descriptor into layer data.
///
/// # Returns
///
/// An `Image` layer of max-shear maps when every timepoint has one, followed
/// by a `Labels` layer of grain maps. Both carry scale `[1, s, s]` and the
/// descriptor plus slip traces as metadata.
///
/// # Errors
///
/// Propagates descriptor errors, loader errors for unreadable grids and
/// [`LoaderError::FrameShapeMismatch`] when cropped timepoints differ in shape.
pub fn read_descriptor(path: &Path) -> Result<Vec<LayerData>> {
    let descriptor = DatasetDescriptor::from_yaml(path)?;

    let mut grains = Vec::with_capacity(descriptor.len());
    let mut shears = Vec::with_capacity(descriptor.len());
    let mut slip_traces = SlipTraceTable::new();

    for tp in &descriptor.timepoints {
        grains.push(crop_grid(tp, loaders::load_label_grid(&tp.grains)?)?);
        if let Some(shear) = &tp.shear {
            shears.push(crop_grid(tp, loaders::load_value_grid(shear)?)?);
        }
        if let Some(traces) = &tp.slip_traces {
            slip_traces.merge(loaders::load_slip_traces(traces)?);
        }
    }

    let scale = descriptor.scale;
    let options = DisplayOptions {
        scale: vec![1.0, scale, scale],
        colormap: None,
        contrast_limits: None,
        metadata: LayerMetadata {
            descriptor: Some(descriptor.clone()),
            slip_traces,
        },
    };

    let mut layers = Vec::with_capacity(2);
    if shears.len() == descriptor.len() {
        layers.push(LayerData::image(loaders::stack_frames(&shears)?, options.clone()));
    } else if !shears.is_empty() {
        log::warn!(
            "only {} of {} timepoints have a shear map; skipping the image layer",
            shears.len(),
            descriptor.len()
        );
    }
    layers.push(LayerData::labels(loaders::stack_frames(&grains)?, options));

    log::info!(
        "read {} layers over {} timepoints from {}",
        layers.len(),
        descriptor.len(),
        path.display()
    );
    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn write_dataset(dir: &Path, with_second_shear: bool) -> PathBuf {
        write(dir, "grains_0.csv", "1,1,2\n1,1,2\n0,3,3\n");
        write(dir, "grains_1.csv", "1,2,2\n1,2,2\n3,3,3\n");
        write(dir, "shear_0.csv", "0.1,0.2,0.3\n0.4,0.5,0.6\n0.7,0.8,0.9\n");
        write(dir, "shear_1.csv", "0.0,0.2,0.3\n0.4,NaN,0.6\n0.7,0.8,2.0\n");
        write(
            dir,
            "traces_0.csv",
            "time,label,plane,plane_label,schmid_factor,angle_deg\n0,1,1,(111),0.45,30\n",
        );
        write(dir, "step0.txt", "");

        let second_shear = if with_second_shear { "    shear: shear_1.csv\n" } else { "" };
        let yaml = format!(
            "scale: 0.5\ntimepoints:\n  - dic: step0.txt\n    crop: {{x: [0, 1], y: [0, 0]}}\n    grains: grains_0.csv\n    shear: shear_0.csv\n    slip_traces: traces_0.csv\n  - dic: step1.txt\n    crop: {{x: [0, 1], y: [0, 0]}}\n    grains: grains_1.csv\n{}",
            second_shear
        );
        write(dir, "dataset.yml", &yaml)
    }

    #[test]
    fn test_reader_for_extensions() {
        assert_eq!(reader_for(Path::new("a/map.txt")), Some(ReaderKind::DicMap));
        assert_eq!(reader_for(Path::new("a/map.CPR")), Some(ReaderKind::EbsdMap));
        assert_eq!(reader_for(Path::new("map.crc")), Some(ReaderKind::EbsdMap));
        assert_eq!(reader_for(Path::new("set.yaml")), Some(ReaderKind::Descriptor));
        assert_eq!(reader_for(Path::new("image.png")), None);
        assert_eq!(reader_for(Path::new("noext")), None);
    }

    #[test]
    fn test_find_companion_ebsd() {
        let dir = tempdir().unwrap();
        let dic = write(dir.path(), "dic.txt", "");
        write(dir.path(), "b_map.cpr", "");
        write(dir.path(), "a_map.cpr", "");
        write(dir.path(), "a_map.crc", "");

        let ebsd = find_companion_ebsd(&dic).unwrap();
        assert_eq!(ebsd, dir.path().join("a_map"));
    }

    #[test]
    fn test_companion_not_found() {
        let dir = tempdir().unwrap();
        let dic = write(dir.path(), "dic.txt", "");
        assert!(matches!(
            find_companion_ebsd(&dic),
            Err(ReaderError::CompanionNotFound(_))
        ));
    }

    #[test]
    fn test_read_descriptor_layers() {
        let dir = tempdir().unwrap();
        let path = write_dataset(dir.path(), true);

        let layers = read_descriptor(&path).unwrap();

        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].kind, LayerKind::Image);
        assert_eq!(layers[1].kind, LayerKind::Labels);
        assert_eq!(layers[0].data.shape(), &[2, 3, 2]);
        assert_eq!(layers[1].data.shape(), &[2, 3, 2]);

        let options = &layers[0].options;
        assert_eq!(options.scale, vec![1.0, 0.5, 0.5]);
        assert_eq!(options.colormap.as_deref(), Some(SHEAR_COLORMAP));
        // Crop drops the last column, so 0.9 and 2.0 are gone
        assert_eq!(options.contrast_limits, Some([0.0, 0.8]));
        assert!(layers[1].options.colormap.is_none());

        let traces = &layers[1].options.metadata.slip_traces;
        assert_eq!(traces.get(0, 1)[0].angle_deg, 30.0);
        assert!(layers[1].options.metadata.descriptor.is_some());

        match &layers[1].data {
            LayerArray::Labels(grains) => assert_eq!(grains[[1, 2, 1]], 3),
            LayerArray::Image(_) => panic!("expected labels"),
        }
    }

    #[test]
    fn test_partial_shear_skips_image_layer() {
        let dir = tempdir().unwrap();
        let path = write_dataset(dir.path(), false);

        let layers = read_descriptor(&path).unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].kind, LayerKind::Labels);
    }

    #[test]
    fn test_read_path_from_dic_map() {
        let dir = tempdir().unwrap();
        write_dataset(dir.path(), true);
        write(dir.path(), "sample.cpr", "");

        let layers = read_path(&dir.path().join("step0.txt")).unwrap();
        assert_eq!(layers.len(), 2);
    }

    #[test]
    fn test_read_path_unsupported() {
        assert!(matches!(
            read_path(Path::new("image.png")),
            Err(ReaderError::UnsupportedFormat(_))
        ));
    }
}
