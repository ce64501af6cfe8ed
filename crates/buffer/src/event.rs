//! Tick-stamped event storage.
//!
//! Events passed to plugins are ordered by tick and every tick lies in `[0, num_frames)` of the
//! period being rendered. Lists are allocated with a fixed capacity up front; when a list is full
//! the oldest (lowest tick) event is dropped to make room, and the drop is counted so it can be
//! reported off the audio thread.

/// Anything with a sample offset inside the current period.
pub trait Timed: Copy {
    fn tick(&self) -> u32;
    fn set_tick(&mut self, tick: u32);
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MidiEvent {
    pub tick: u32,
    pub channel: u8,
    pub kind: MidiKind,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MidiKind {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    Control { controller: u8, value: u8 },
    PitchBend(i16),
}

/// A synthetic port change produced by automation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ControlEvent {
    pub tick: u32,
    pub port: u32,
    pub value: f32,
}

pub struct EventList<E> {
    events: Vec<E>,
    capacity: usize,
    dropped: u64,
}

impl Timed for MidiEvent {
    fn tick(&self) -> u32 {
        self.tick
    }
    fn set_tick(&mut self, tick: u32) {
        self.tick = tick;
    }
}

impl Timed for ControlEvent {
    fn tick(&self) -> u32 {
        self.tick
    }
    fn set_tick(&mut self, tick: u32) {
        self.tick = tick;
    }
}

impl MidiEvent {
    pub fn note_on(tick: u32, note: u8, velocity: u8) -> Self {
        Self {
            tick,
            channel: 0,
            kind: MidiKind::NoteOn { note, velocity },
        }
    }

    pub fn note_off(tick: u32, note: u8) -> Self {
        Self {
            tick,
            channel: 0,
            kind: MidiKind::NoteOff { note },
        }
    }
}

impl<E: Timed> EventList<E> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Insert `event` keeping the list ordered by tick. Events with equal ticks keep their
    /// insertion order.
    ///
    /// This is an insertion sort from the back. Callers mostly produce events in tick order so
    /// the common case is a single comparison.
    pub fn insert(&mut self, event: E) {
        if self.events.len() == self.capacity {
            if self.capacity == 0 {
                self.dropped += 1;
                return;
            }
            self.events.remove(0);
            self.dropped += 1;
        }
        self.events.push(event);
        let mut idx = self.events.len() - 1;
        while idx > 0 && self.events[idx - 1].tick() > event.tick() {
            self.events.swap(idx - 1, idx);
            idx -= 1;
        }
    }

    /// Insert every event of `other`, shifting each by `offset` ticks.
    pub fn merge(&mut self, other: &[E], offset: u32) {
        for event in other {
            let mut event = *event;
            event.set_tick(event.tick() + offset);
            self.insert(event);
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn as_slice(&self) -> &[E] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take the count of events dropped since the last call.
    pub fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }
}
