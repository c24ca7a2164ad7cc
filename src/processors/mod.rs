//! Data processing modules.

pub mod labeling;
pub mod linking;
pub mod regions;
pub mod slip_bands;
pub mod tracking;

// Re-export key types for convenience
pub use labeling::{add_non_indexed, label_components, LabelingError};
pub use linking::{LinkError, Linker};
pub use regions::{frame_centroids, grain_properties, GrainProperties, Region};
pub use slip_bands::{
    band_angle_profile, grain_band_profile, periodic_profile, SlipTrace, SlipTraceTable,
};
pub use tracking::{points_from_seg, tracks_from_seg, TrackingError};
