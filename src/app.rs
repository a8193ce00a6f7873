use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEvent {
    /// Seconds since the previous frame started
    pub time_since_last_frame: f32,
    pub frame_number: u64,
}

/// Something that runs once per rendered frame
pub trait FrameListener {
    fn frame_started(&mut self, event: &FrameEvent);

    fn frame_ended(&mut self, _event: &FrameEvent) {}
}

/// Drives registered listeners once per frame.
///
/// Listeners are held weakly; dropping a listener unregisters it.
#[derive(Default)]
pub struct FrameLoop {
    listeners: Vec<Weak<RefCell<dyn FrameListener>>>,
    frame_number: u64,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<L: FrameListener + 'static>(&mut self, listener: &Rc<RefCell<L>>) {
        let listener: Rc<RefCell<dyn FrameListener>> = listener.clone();
        self.listeners.push(Rc::downgrade(&listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.iter().filter(|l| l.strong_count() > 0).count()
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Run one frame. Returns false once no listener is left.
    pub fn run_frame(&mut self, time_since_last_frame: f32) -> bool {
        self.frame_number += 1;
        let event = FrameEvent {
            time_since_last_frame,
            frame_number: self.frame_number,
        };
        trace!("Frame {} started", self.frame_number);

        self.listeners.retain(|l| l.strong_count() > 0);
        let live: Vec<_> = self.listeners.iter().filter_map(Weak::upgrade).collect();
        for listener in &live {
            listener.borrow_mut().frame_started(&event);
        }
        for listener in &live {
            listener.borrow_mut().frame_ended(&event);
        }
        !live.is_empty()
    }
}
