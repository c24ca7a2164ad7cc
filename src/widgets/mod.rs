//! Event-driven widgets over viewer layers.

pub mod dims;
pub mod events;
pub mod grain_plots;
pub mod layers;

pub use dims::Dims;
pub use events::{Event, EventEmitter, Observer, ObserverHandle};
pub use grain_plots::{BandAnglePlot, GrainPlots, WidgetError};
pub use layers::{ImageLayer, ImageLayerView, LabeledLayerView, LabelsLayer};
