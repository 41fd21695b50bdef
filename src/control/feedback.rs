use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;

/// Control requests that arrive from the network side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Note(u8),
    DelayTime(u8),
    SequenceReset,
    SoftReset,
    HardReset,
}

const EMPTY_SLOT: i32 = -1;

/// Single-slot handoff for the note the UI triggered last.
/// A newer trigger overwrites one the audio thread has not picked up yet.
pub struct UiNoteSlot {
    note: AtomicI32,
}

impl UiNoteSlot {
    pub fn new() -> Self {
        Self {
            note: AtomicI32::new(EMPTY_SLOT),
        }
    }

    pub fn trigger(&self, note: u8) {
        self.note.store(note as i32, Ordering::Release);
    }

    pub fn take(&self) -> Option<u8> {
        match self.note.swap(EMPTY_SLOT, Ordering::AcqRel) {
            EMPTY_SLOT => None,
            n => u8::try_from(n).ok(),
        }
    }
}

impl Default for UiNoteSlot {
    fn default() -> Self {
        Self::new()
    }
}

pub const FEEDBACK_CAPACITY: usize = 256;

/// Bounded queue of network-originated events.
///
/// Storage is allocated up front. The audio thread only ever `try_lock`s it;
/// if the network thread holds the lock the events wait for the next block.
pub struct FeedbackQueue {
    events: Mutex<VecDeque<ControlEvent>>,
}

impl FeedbackQueue {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(FEEDBACK_CAPACITY)),
        }
    }

    /// Returns false when the queue is full and the event was dropped
    pub fn push(&self, event: ControlEvent) -> bool {
        let mut events = self.events.lock();
        if events.len() >= FEEDBACK_CAPACITY {
            return false;
        }
        events.push_back(event);
        true
    }

    /// Hand every queued event to `f`, oldest first. Never blocks.
    pub fn drain(&self, mut f: impl FnMut(ControlEvent)) {
        if let Some(mut events) = self.events.try_lock() {
            while let Some(event) = events.pop_front() {
                f(event);
            }
        }
    }
}

impl Default for FeedbackQueue {
    fn default() -> Self {
        Self::new()
    }
}
