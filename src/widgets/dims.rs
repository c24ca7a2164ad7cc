//! Timeline position of a multi-timepoint viewer.

use super::events::{Event, EventEmitter};
use super::layers::LabeledLayerView;

/// Current step along the leading time axis, announced to observers when it
/// changes.
#[derive(Debug)]
pub struct Dims {
    nsteps: usize,
    current_step: usize,
    pub events: EventEmitter,
}

impl Dims {
    /// A timeline of `nsteps` timepoints, positioned at the first one.
    pub fn new(nsteps: usize) -> Self {
        Self {
            nsteps: nsteps.max(1),
            current_step: 0,
            events: EventEmitter::new(),
        }
    }

    /// A timeline over the leading axis of a time-stacked labels layer.
    /// 2-D layers have a single step.
    pub fn for_layer(layer: &dyn LabeledLayerView) -> Self {
        let data = layer.data();
        let nsteps = if data.ndim() >= 3 { data.shape()[0] } else { 1 };
        Self::new(nsteps)
    }

    pub fn nsteps(&self) -> usize {
        self.nsteps
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Move to `step`, clamped to the last timepoint.
    ///
    /// Observers get [`Event::TimepointChanged`] only if the position moved.
    pub fn set_current_step(&mut self, step: usize) {
        let step = step.min(self.nsteps - 1);
        if step != self.current_step {
            self.current_step = step;
            self.events.emit(Event::TimepointChanged(step));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widgets::events::Observer;
    use crate::widgets::layers::LabelsLayer;
    use ndarray::{ArrayD, IxDyn};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Steps(Vec<Event>);

    impl Observer for Steps {
        fn notify(&mut self, event: &Event) {
            self.0.push(*event);
        }
    }

    #[test]
    fn test_emits_only_on_change() {
        let mut dims = Dims::new(4);
        let steps = Rc::new(RefCell::new(Steps::default()));
        dims.events.connect(steps.clone());

        dims.set_current_step(0);
        dims.set_current_step(2);
        dims.set_current_step(2);
        dims.set_current_step(1);

        assert_eq!(
            steps.borrow().0,
            vec![Event::TimepointChanged(2), Event::TimepointChanged(1)]
        );
        assert_eq!(dims.current_step(), 1);
    }

    #[test]
    fn test_step_is_clamped_to_last_timepoint() {
        let mut dims = Dims::new(3);
        dims.set_current_step(10);
        assert_eq!(dims.current_step(), 2);
    }

    #[test]
    fn test_for_layer() {
        let stacked = LabelsLayer::new(ArrayD::zeros(IxDyn(&[5, 2, 2])), vec![1.0, 1.0, 1.0]);
        let single = LabelsLayer::new(ArrayD::zeros(IxDyn(&[2, 2])), vec![1.0, 1.0]);
        assert_eq!(Dims::for_layer(&stacked).nsteps(), 5);

        let mut dims = Dims::for_layer(&single);
        assert_eq!(dims.nsteps(), 1);
        dims.set_current_step(1);
        assert_eq!(dims.current_step(), 0);
    }
}
