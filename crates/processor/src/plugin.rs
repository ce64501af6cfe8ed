use std::{ops::Range, path::Path};

use buffer::{Audio, Timed};

use crate::{Port, StateError, context as cx};

/// What a plugin does with the buffer it is connected to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Adds its own output to the track buffer, driven by MIDI.
    Instrument,
    /// Transforms the track buffer in place.
    Effect,
    /// Mixes the track buffer into another track's buffer.
    Bus,
}

/// An abstract interface into a real-time audio or event processing node.
///
/// Everything except [Plugin::load_state] is called on the audio thread (or a worker standing in
/// for it) and must not allocate, block or log.
pub trait Plugin
where
    Self: Send + 'static,
{
    /// Called once before the first process call, off the audio thread.
    fn initialize(&mut self, sample_rate: f64, max_num_frames: u32);

    fn kind(&self) -> Kind;

    /// Control ports, indexed by [Port::index].
    fn ports(&self) -> &[Port];

    /// Point input `index` at `buffer`. Called before every process call with a view of the
    /// current period.
    fn connect_buffer(&mut self, index: usize, buffer: &Audio, is_sidechain: bool);

    /// Process the connected buffer in place.
    fn process_replacing(&mut self, context: cx::Process<'_>);

    /// Mix the connected buffer into `outputs`. Only called on [Kind::Bus] plugins.
    fn process_mixing(&mut self, context: cx::Process<'_>, outputs: &mut [Audio]) {
        let _ = (context, outputs);
    }

    /// The transport stopped: release held notes, let tails ring out.
    fn on_transport_stop(&mut self) {}

    /// Stop making sound right now.
    fn panic(&mut self) {}

    fn set_port_value(&mut self, port: u32, value: f32);

    fn port_value(&self, port: u32) -> Option<f32>;

    /// Restore port values from a state file. See [crate::state].
    fn load_state(&mut self, path: &Path) -> Result<(), StateError> {
        for (port, value) in crate::state::read(path)? {
            self.set_port_value(port, value);
        }
        Ok(())
    }
}

/// Walk `0..sample_count` in the pieces between events. `f` receives each piece followed by the
/// event that ends it (or `None` for the trailing piece). Pieces may be empty.
pub fn for_each_segment<E: Timed>(
    sample_count: u32,
    events: &[E],
    mut f: impl FnMut(Range<usize>, Option<&E>),
) {
    let end = sample_count as usize;
    let mut start = 0;
    for event in events {
        let tick = (event.tick() as usize).clamp(start, end);
        f(start..tick, Some(event));
        start = tick;
    }
    f(start..end, None);
}

pub mod context {
    use buffer::{ControlEvent, MidiEvent};

    /// Per-call data handed to a plugin.
    #[derive(Copy, Clone)]
    pub struct Process<'a> {
        /// Number of frames to render. Connected buffers hold at least this many.
        pub sample_count: u32,

        /// Absolute sample counter of the first frame.
        pub current_sample: i64,

        /// Ordered by tick, every tick `< sample_count`.
        pub midi: &'a [MidiEvent],

        /// Ordered by tick, every tick `< sample_count`.
        pub automation: &'a [ControlEvent],
    }

    impl<'a> Process<'a> {
        pub fn new(sample_count: u32, current_sample: i64) -> Self {
            Self {
                sample_count,
                current_sample,
                midi: &[],
                automation: &[],
            }
        }

        pub fn with_midi(self, midi: &'a [MidiEvent]) -> Self {
            Self { midi, ..self }
        }

        pub fn with_automation(self, automation: &'a [ControlEvent]) -> Self {
            Self { automation, ..self }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::for_each_segment;
    use buffer::ControlEvent;

    #[test]
    fn segments_cover_the_block() {
        let events = [
            ControlEvent {
                tick: 0,
                port: 0,
                value: 1.0,
            },
            ControlEvent {
                tick: 10,
                port: 0,
                value: 2.0,
            },
            ControlEvent {
                tick: 10,
                port: 1,
                value: 3.0,
            },
        ];
        let mut seen = vec![];
        for_each_segment(16, &events, |range, event| {
            seen.push((range, event.map(|e| e.port)));
        });
        assert_eq!(
            seen,
            vec![(0..0, Some(0)), (0..10, Some(0)), (10..10, Some(1)), (10..16, None)]
        );
    }
}
