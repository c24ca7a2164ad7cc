//! Core data types and I/O operations.

pub mod descriptor;
pub mod loaders;
pub mod tracks;
pub mod writers;

pub use descriptor::{DatasetDescriptor, DescriptorError};
pub use loaders::LoaderError;
pub use tracks::{FocusPoint, TrackRow, TrackTable};
pub use writers::{write_profile_csv, write_tracks_csv, WriteError};
