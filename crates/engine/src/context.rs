//! The engine context: everything the audio callback touches lives in one [Core] behind one
//! spin lock. The callback holds the lock for its whole duration; control messages take it
//! briefly to swap or flip state, and free whatever they replaced after letting go.
use std::{io::Write, sync::Arc};

use automation::Automation;
use buffer::{Audio, EventList, MidiEvent};
use graph::{Diagnostic, Job, RoutingTable, TrackGraph, TrackSet, WorkerPool};
use timing::{Periods, Transport};
use util::sync::SpinLock;

use crate::{ControlHandle, Error, Options, housekeeping::Housekeeping};

/// The track whose buffer becomes the callback's output.
pub const MASTER: usize = 0;

/// What the UI gets to see of the audio thread, published once per callback.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TransportSnapshot {
    pub position: f64,
    pub tempo: f64,
    pub playing: bool,
    pub current_sample: i64,
    pub bus_timeouts: u64,
    pub dropped_events: u64,
    pub dropped_samples: u64,
}

pub(crate) struct Core {
    pub(crate) transport: Transport,
    pub(crate) tracks: TrackSet,
    pub(crate) routing: RoutingTable,
    pub(crate) graph: TrackGraph,
    pub(crate) automation: Automation,
    pub(crate) recording: bool,
    periods: Periods,
    midi: EventList<MidiEvent>,
    output_view: Audio,
    recorder: Option<fifo::Sender<f32>>,
    dropped_samples: u64,
    snapshot: triple_buffer::Input<TransportSnapshot>,
}

pub struct Engine {
    core: Arc<SpinLock<Core>>,
    pool: WorkerPool,
    options: Arc<Options>,
    snapshots: Option<triple_buffer::Output<TransportSnapshot>>,
    // Declared last: joined after the pool has stopped reporting.
    housekeeping: Housekeeping,
}

impl Core {
    /// Render `len` frames into `output` starting at `offset`.
    fn render_block(
        &mut self,
        pool: &WorkerPool,
        output: &Audio,
        midi: &[MidiEvent],
        offset: u32,
        len: u32,
        midi_track: usize,
    ) {
        let Self {
            transport,
            tracks,
            graph,
            automation,
            periods,
            midi: period_midi,
            output_view,
            ..
        } = self;

        transport.next_callback(len, periods);
        let dropped = periods.take_dropped_ticks();
        if dropped > 0 {
            pool.report(Diagnostic::TicksDropped { count: dropped });
        }

        for period in periods.iter() {
            if period.restarted {
                automation.seek(period.start_beat);
            }
            let start = offset + period.offset;
            let end = start + period.sample_count;

            period_midi.clear();
            for event in midi.iter().filter(|e| (start..end).contains(&e.tick)) {
                period_midi.insert(MidiEvent {
                    tick: event.tick - start,
                    ..*event
                });
            }
            if !period_midi.is_empty() {
                // `Options::validate` keeps the MIDI track inside the track set.
                let pushed = tracks.push_midi(midi_track, period_midi.as_slice());
                debug_assert!(pushed.is_ok(), "midi track {midi_track} out of range");
            }

            pool.run(&Job {
                tracks,
                graph,
                automation,
                period,
                output: MASTER,
            });

            output_view.assign_range(output, start, period.sample_count);
            let taken = tracks.take_output(MASTER, period.offset, output_view);
            debug_assert!(taken.is_ok(), "no master track");
        }

        if self.recording {
            self.record(output, offset, len);
        }
    }

    /// Queue frames for the recorder, interleaved. A block that does not fit is dropped whole.
    fn record(&mut self, output: &Audio, offset: u32, len: u32) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        let num_channels = output.num_channels();
        let count = (len * num_channels) as usize;
        if recorder.free() < count {
            self.dropped_samples += count as u64;
            return;
        }
        for frame in offset..offset + len {
            for channel in 0..num_channels {
                let _ = recorder.push(output[channel][frame as usize]);
            }
        }
    }

    fn publish(&mut self, pool: &WorkerPool) {
        let counters = pool.counters();
        self.snapshot.write(TransportSnapshot {
            position: self.transport.position(),
            tempo: self.transport.tempo(),
            playing: self.transport.is_playing(),
            current_sample: self.transport.current_sample(),
            bus_timeouts: counters.bus_timeouts,
            dropped_events: counters.dropped_events,
            dropped_samples: self.dropped_samples,
        });
    }
}

impl Engine {
    /// Start an engine whose recordings are discarded.
    pub fn init(options: Options) -> Result<Self, Error> {
        Self::with_recorder(options, Box::new(std::io::sink()))
    }

    /// Start an engine that records the master output into `writer` while `record` is on.
    pub fn with_recorder(options: Options, writer: Box<dyn Write + Send>) -> Result<Self, Error> {
        options.validate()?;
        let pool = WorkerPool::new(options.pool_options());
        let tracks = TrackSet::new(options.track_config())?;
        let routing = RoutingTable::new(options.num_tracks, options.max_routes);
        let graph = TrackGraph::build(&routing, pool.num_threads());
        let transport = Transport::new(options.sample_rate, options.tempo)?;
        let (snapshot, snapshots) = triple_buffer::triple_buffer(&TransportSnapshot::default());

        let mut housekeeping = Housekeeping::default();
        housekeeping.spawn_ui_pump(pool.diagnostics());
        let (sender, receiver) = fifo::channel(options.recorder_capacity, || 0.0);
        let recorder = housekeeping
            .spawn_recorder(receiver, writer)
            .then_some(sender);

        let core = Core {
            transport,
            tracks,
            routing,
            graph,
            automation: Automation::default(),
            recording: false,
            periods: Periods::new(options.tick_capacity),
            midi: EventList::with_capacity(options.event_capacity),
            output_view: Audio::new(options.num_channels),
            recorder,
            dropped_samples: 0,
            snapshot,
        };
        tracing::info!(
            "engine ready: {} tracks, {} threads, {} Hz, blocks of {}",
            options.num_tracks,
            pool.num_threads(),
            options.sample_rate,
            options.max_block_size
        );
        Ok(Self {
            core: Arc::new(SpinLock::new(core)),
            pool,
            options: Arc::new(options),
            snapshots: Some(snapshots),
            housekeeping,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn num_threads(&self) -> usize {
        self.pool.num_threads()
    }

    /// A handle for the control thread.
    pub fn control(&self) -> ControlHandle {
        ControlHandle::new(self.core.clone(), self.options.clone(), self.pool.num_threads())
    }

    /// The UI end of the transport snapshots. Handed out once.
    pub fn take_snapshots(&mut self) -> Option<triple_buffer::Output<TransportSnapshot>> {
        self.snapshots.take()
    }

    /// The audio callback. `output` is overwritten with the master bus; `midi` is delivered to
    /// the MIDI input track, ticks relative to the start of `output`.
    pub fn run_callback(&mut self, output: &mut Audio, midi: &[MidiEvent]) {
        let total = output.num_frames();
        let block = self.options.max_block_size;
        let mut core = self.core.lock();
        let mut offset = 0;
        while offset < total {
            let len = block.min(total - offset);
            core.render_block(&self.pool, output, midi, offset, len, self.options.midi_track);
            offset += len;
        }
        core.publish(&self.pool);
    }

    /// Silence every buffer and every plugin.
    pub fn stop_all_sound(&self) {
        self.control().stop_all_sound();
    }

    /// Stop the workers, then drain and stop the housekeeping threads.
    pub fn shutdown(mut self) {
        self.pool.shutdown();
        self.housekeeping.shutdown();
        tracing::info!("engine stopped");
    }
}
