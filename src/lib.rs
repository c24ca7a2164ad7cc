//! Grain tracking and slip-band analysis for DIC/EBSD strain mapping.
//!
//! This crate provides tools for:
//! - Labeling non-indexed regions of grain segmentations
//! - Linking grain centroids across frames into trajectories
//! - Detecting slip-band angles in max-shear maps with a radon transform
//! - Reading multi-timepoint dataset descriptors into viewer layers
//! - Event-driven per-grain band-angle plots
//!
//! # Example
//!
//! ```no_run
//! use grain_tracks::{core::loaders::load_label_stack, processors::tracking::tracks_from_seg};
//! use grain_tracks::PipelineConfig;
//! use std::path::PathBuf;
//!
//! let frames = vec![PathBuf::from("grains_0.csv"), PathBuf::from("grains_1.csv")];
//! let volume = load_label_stack(&frames).unwrap();
//! let tracks = tracks_from_seg(&volume, &PipelineConfig::default()).unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod reader;
pub mod visualization;
pub mod widgets;

pub use config::{LabelingConfig, LinkingConfig, PipelineConfig, PlotConfig, SlipBandConfig};
pub use core::tracks::{TrackRow, TrackTable};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
