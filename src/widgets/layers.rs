//! Narrow views of the viewer layers a widget reads from.
//!
//! Widgets take these traits by reference instead of searching a viewer for
//! layers of the right type. [`LabelsLayer`] and [`ImageLayer`] are plain
//! in-memory implementations built from reader output.

use ndarray::{ArrayD, ArrayViewD};

use super::events::{Event, EventEmitter};
use crate::reader::{LayerArray, LayerData};

/// A labels layer: label data, pixel scale and the selected label.
pub trait LabeledLayerView {
    fn selected_label(&self) -> i64;
    fn data(&self) -> ArrayViewD<'_, i64>;
    fn scale(&self) -> &[f64];
}

/// An image layer: pixel data only.
pub trait ImageLayerView {
    fn data(&self) -> ArrayViewD<'_, f64>;
}

/// In-memory labels layer that announces selection changes.
#[derive(Debug)]
pub struct LabelsLayer {
    data: ArrayD<i64>,
    scale: Vec<f64>,
    selected_label: i64,
    pub events: EventEmitter,
}

impl LabelsLayer {
    pub fn new(data: ArrayD<i64>, scale: Vec<f64>) -> Self {
        Self {
            data,
            scale,
            selected_label: 1,
            events: EventEmitter::new(),
        }
    }

    /// Take the labels out of a reader layer; `None` for image layers.
    pub fn from_layer_data(layer: &LayerData) -> Option<Self> {
        match &layer.data {
            LayerArray::Labels(data) => Some(Self::new(data.clone(), layer.options.scale.clone())),
            LayerArray::Image(_) => None,
        }
    }

    /// Select a label and notify observers if it changed.
    pub fn set_selected_label(&mut self, label: i64) {
        if label != self.selected_label {
            self.selected_label = label;
            self.events.emit(Event::SelectedLabelChanged(label));
        }
    }
}

impl LabeledLayerView for LabelsLayer {
    fn selected_label(&self) -> i64 {
        self.selected_label
    }

    fn data(&self) -> ArrayViewD<'_, i64> {
        self.data.view()
    }

    fn scale(&self) -> &[f64] {
        &self.scale
    }
}

/// In-memory image layer.
#[derive(Debug, Clone)]
pub struct ImageLayer {
    data: ArrayD<f64>,
}

impl ImageLayer {
    pub fn new(data: ArrayD<f64>) -> Self {
        Self { data }
    }

    /// Take the pixels out of a reader layer; `None` for labels layers.
    pub fn from_layer_data(layer: &LayerData) -> Option<Self> {
        match &layer.data {
            LayerArray::Image(data) => Some(Self::new(data.clone())),
            LayerArray::Labels(_) => None,
        }
    }
}

impl ImageLayerView for ImageLayer {
    fn data(&self) -> ArrayViewD<'_, f64> {
        self.data.view()
    }
}
