//! Viewer events and their delivery to observers.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Changes a widget can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The selected label of a labels layer changed.
    SelectedLabelChanged(i64),
    /// The displayed timepoint changed.
    TimepointChanged(usize),
}

/// Receiver of viewer events.
///
/// Events emitted from inside `notify` on the emitter that is delivering are
/// queued and arrive after the current event has reached every observer. An
/// observer reached through a second emitter while its own `notify` is still
/// running misses that event; the emitter logs a warning.
pub trait Observer {
    fn notify(&mut self, event: &Event);
}

/// Shared handle to an observer registered with an [`EventEmitter`].
pub type ObserverHandle = Rc<RefCell<dyn Observer>>;

/// Publish list delivering events to observers in registration order.
#[derive(Default)]
pub struct EventEmitter {
    observers: Vec<ObserverHandle>,
    pending: RefCell<VecDeque<Event>>,
    delivering: Cell<bool>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; it receives every later event.
    pub fn connect(&mut self, observer: ObserverHandle) {
        self.observers.push(observer);
    }

    /// Remove an observer previously passed to [`connect`](Self::connect).
    ///
    /// Returns true if it was registered.
    pub fn disconnect(&mut self, observer: &ObserverHandle) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| !Rc::ptr_eq(o, observer));
        self.observers.len() != before
    }

    /// Deliver `event` to every observer in registration order.
    ///
    /// A re-entrant emit from an observer is queued behind the event being
    /// delivered. An observer that is already handling an event from another
    /// emitter is skipped with a warning.
    pub fn emit(&self, event: Event) {
        self.pending.borrow_mut().push_back(event);
        if self.delivering.replace(true) {
            return;
        }

        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(event) = next else { break };
            for observer in &self.observers {
                match observer.try_borrow_mut() {
                    Ok(mut observer) => observer.notify(&event),
                    Err(_) => log::warn!("observer busy, dropping {:?}", event),
                }
            }
        }
        self.delivering.set(false);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("observers", &self.observers.len())
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<(&'static str, Event)>>>,
    }

    impl Observer for Recorder {
        fn notify(&mut self, event: &Event) {
            self.log.borrow_mut().push((self.name, *event));
        }
    }

    #[test]
    fn test_emit_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut emitter = EventEmitter::new();
        for name in ["first", "second"] {
            emitter.connect(Rc::new(RefCell::new(Recorder {
                name,
                log: Rc::clone(&log),
            })));
        }

        emitter.emit(Event::SelectedLabelChanged(4));
        emitter.emit(Event::TimepointChanged(1));

        assert_eq!(
            *log.borrow(),
            vec![
                ("first", Event::SelectedLabelChanged(4)),
                ("second", Event::SelectedLabelChanged(4)),
                ("first", Event::TimepointChanged(1)),
                ("second", Event::TimepointChanged(1)),
            ]
        );
    }

    #[test]
    fn test_disconnect() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut emitter = EventEmitter::new();
        let observer: ObserverHandle = Rc::new(RefCell::new(Recorder {
            name: "only",
            log: Rc::clone(&log),
        }));
        emitter.connect(Rc::clone(&observer));

        assert!(emitter.disconnect(&observer));
        assert!(!emitter.disconnect(&observer));
        emitter.emit(Event::TimepointChanged(0));
        assert!(log.borrow().is_empty());
        assert!(emitter.is_empty());
    }

    /// Emits `TimepointChanged(n)` for every `SelectedLabelChanged(n)`, from
    /// inside `notify`.
    struct Echo {
        emitter: Rc<RefCell<EventEmitter>>,
        log: Rc<RefCell<Vec<(&'static str, Event)>>>,
    }

    impl Observer for Echo {
        fn notify(&mut self, event: &Event) {
            self.log.borrow_mut().push(("echo", *event));
            if let Event::SelectedLabelChanged(label) = *event {
                self.emitter.borrow().emit(Event::TimepointChanged(label as usize));
            }
        }
    }

    #[test]
    fn test_reentrant_emit_is_queued() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let emitter = Rc::new(RefCell::new(EventEmitter::new()));
        emitter.borrow_mut().connect(Rc::new(RefCell::new(Echo {
            emitter: Rc::clone(&emitter),
            log: Rc::clone(&log),
        })));
        emitter.borrow_mut().connect(Rc::new(RefCell::new(Recorder {
            name: "recorder",
            log: Rc::clone(&log),
        })));

        emitter.borrow().emit(Event::SelectedLabelChanged(3));

        assert_eq!(
            *log.borrow(),
            vec![
                ("echo", Event::SelectedLabelChanged(3)),
                ("recorder", Event::SelectedLabelChanged(3)),
                ("echo", Event::TimepointChanged(3)),
                ("recorder", Event::TimepointChanged(3)),
            ]
        );
        assert_eq!(emitter.borrow().pending.borrow().len(), 0);
    }

    #[test]
    fn test_busy_observer_on_second_emitter_is_skipped() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let inner = Rc::new(RefCell::new(EventEmitter::new()));
        let echo: ObserverHandle = Rc::new(RefCell::new(Echo {
            emitter: Rc::clone(&inner),
            log: Rc::clone(&log),
        }));
        // The echo listens on both emitters, so its own re-emit reaches it
        // while it is still busy
        inner.borrow_mut().connect(Rc::clone(&echo));
        inner.borrow_mut().connect(Rc::new(RefCell::new(Recorder {
            name: "recorder",
            log: Rc::clone(&log),
        })));
        let mut outer = EventEmitter::new();
        outer.connect(Rc::clone(&echo));

        outer.emit(Event::SelectedLabelChanged(2));

        assert_eq!(
            *log.borrow(),
            vec![
                ("echo", Event::SelectedLabelChanged(2)),
                ("recorder", Event::TimepointChanged(2)),
            ]
        );
    }
}
