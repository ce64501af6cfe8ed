//! Tracks, the unit of scheduling.
//!
//! A track's state is split by who may touch it while a period renders:
//!
//! - `status` and `bus_counter` are atomics shared by every worker.
//! - The [Bus] holds what upstream tracks write into this one and sits behind a spin lock.
//! - The plugin chain is only touched by the worker that claimed the track, or through a unique
//!   borrow of the [TrackSet] while nothing renders.
use std::{
    cell::UnsafeCell,
    ops::Index,
    sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering},
};

use automation::Automation;
use buffer::{Arena, Audio, ControlEvent, EventList, MidiEvent};
use processor::{Plugin, context};
use timing::AtmTick;
use util::{
    IsSendSync, Padded,
    sync::{SpinLock, SpinOutcome, SpinPolicy},
};

use crate::{Error, Job, RouteKind, TrackGraph};

const NOT_PROCESSED: u8 = 0;
const PROCESSING: u8 = 1;
const PROCESSED: u8 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    NotProcessed,
    Processing,
    Processed,
}

/// Mute/solo envelope state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FadeState {
    #[default]
    Off,
    Fading,
    Faded,
    Returning,
}

/// A linear gain ramp applied after the plugin chain when a track is muted or unmuted.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Fade {
    state: FadeState,
    gain: f32,
    step: f32,
}

#[derive(Clone, Debug)]
pub struct TrackConfig {
    pub num_tracks: usize,
    pub num_channels: u32,
    pub max_frames: u32,
    pub max_plugins: usize,
    pub max_routes: usize,
    /// Capacity of every event list (bus MIDI input, per slot automation).
    pub event_capacity: usize,
    /// Length of the mute/solo ramp.
    pub fade_frames: u32,
    pub hugepages: bool,
}

/// Inputs written by upstream tracks.
pub struct Bus {
    pub main: Audio,
    pub sidechain: Audio,
    pub midi: EventList<MidiEvent>,
}

/// A plugin instance and the automation events generated for it this period.
pub struct Slot {
    uid: u32,
    plugin: Box<dyn Plugin>,
    events: EventList<ControlEvent>,
}

struct Chain {
    plugins: Box<[Option<Slot>]>,
    sends: Box<[Option<Slot>]>,
    fade: Fade,
    view: Audio,
    sidechain_view: Audio,
    send_view: Audio,
}

pub struct Track {
    id: usize,
    status: Padded<AtomicU8>,
    bus_counter: Padded<AtomicI32>,
    mute: AtomicBool,
    solo: AtomicBool,
    // Set for the period when a soloed track (or one it feeds) delivers into this bus.
    solo_fed: AtomicBool,
    bus: SpinLock<Bus>,
    chain: UnsafeCell<Chain>,
}

// The chain is only reached by the worker that won the claim on `status`.
unsafe impl Sync for Track {}

/// What processing left behind for the diagnostics queue.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub dropped_events: u64,
}

/// Every track of a session and the arena backing their buffers.
pub struct TrackSet {
    tracks: Box<[Track]>,
    config: TrackConfig,
    solo_count: usize,
    scratch: IsSendSync<Audio>,
    // Only touched on drop, after every view into it is gone.
    _arena: IsSendSync<Arena>,
}

impl Fade {
    pub fn new(fade_frames: u32) -> Self {
        Self {
            state: FadeState::Off,
            gain: 1.0,
            step: 1.0 / fade_frames.max(1) as f32,
        }
    }

    pub fn state(&self) -> FadeState {
        self.state
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_audible(&mut self, audible: bool) {
        self.state = match (self.state, audible) {
            (FadeState::Off | FadeState::Returning, false) => FadeState::Fading,
            (FadeState::Fading | FadeState::Faded, true) => FadeState::Returning,
            (state, _) => state,
        };
    }

    pub fn apply(&mut self, audio: &mut Audio) {
        let delta = match self.state {
            FadeState::Off => return,
            FadeState::Faded => return audio.clear(),
            FadeState::Fading => -self.step,
            FadeState::Returning => self.step,
        };
        let start = self.gain;
        let num_frames = audio.num_frames() as usize;
        for channel in audio.iter_mut() {
            for (idx, sample) in channel[..num_frames].iter_mut().enumerate() {
                *sample *= (start + delta * (idx + 1) as f32).clamp(0.0, 1.0);
            }
        }
        self.gain = (start + delta * num_frames as f32).clamp(0.0, 1.0);
        if self.gain == 0.0 {
            self.state = FadeState::Faded;
        } else if self.gain == 1.0 {
            self.state = FadeState::Off;
        }
    }
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            num_tracks: 4,
            num_channels: 2,
            max_frames: 1024,
            max_plugins: 4,
            max_routes: 2,
            event_capacity: 256,
            fade_frames: 64,
            hugepages: false,
        }
    }
}

impl Slot {
    pub fn new(uid: u32, plugin: Box<dyn Plugin>, event_capacity: usize) -> Self {
        Self {
            uid,
            plugin,
            events: EventList::with_capacity(event_capacity),
        }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn plugin(&self) -> &dyn Plugin {
        &*self.plugin
    }

    pub fn plugin_mut(&mut self) -> &mut dyn Plugin {
        &mut *self.plugin
    }

    pub fn into_plugin(self) -> Box<dyn Plugin> {
        self.plugin
    }

    fn fill_automation(&mut self, automation: &Automation, ticks: &[AtmTick]) {
        self.events.clear();
        if let Some(curves) = automation.plugin(self.uid) {
            curves.fill_events(ticks, &mut self.events);
        }
    }
}

impl Track {
    fn new(id: usize, config: &TrackConfig, arena: &mut Arena) -> Result<Self, Error> {
        let mut main = Audio::new(config.num_channels);
        let mut sidechain = Audio::new(config.num_channels);
        if !(arena.acquire(&mut main) && arena.acquire(&mut sidechain)) {
            return Err(Error::ArenaExhausted {
                needed: 2 * config.num_channels as usize,
                available: arena.available(),
            });
        }
        let chain = Chain {
            plugins: (0..config.max_plugins).map(|_| None).collect(),
            sends: (0..config.max_routes).map(|_| None).collect(),
            fade: Fade::new(config.fade_frames),
            view: Audio::new(config.num_channels),
            sidechain_view: Audio::new(config.num_channels),
            send_view: Audio::new(config.num_channels),
        };
        Ok(Self {
            id,
            status: Padded::new(AtomicU8::new(NOT_PROCESSED)),
            bus_counter: Padded::new(AtomicI32::new(0)),
            mute: AtomicBool::new(false),
            solo: AtomicBool::new(false),
            solo_fed: AtomicBool::new(false),
            bus: SpinLock::new(Bus {
                main,
                sidechain,
                midi: EventList::with_capacity(config.event_capacity),
            }),
            chain: UnsafeCell::new(chain),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn status(&self) -> Status {
        match self.status.load(Ordering::Acquire) {
            NOT_PROCESSED => Status::NotProcessed,
            PROCESSING => Status::Processing,
            _ => Status::Processed,
        }
    }

    /// Number of upstream tracks yet to deliver this period.
    pub fn bus_counter(&self) -> i32 {
        self.bus_counter.load(Ordering::Acquire)
    }

    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::Relaxed)
    }

    pub fn is_soloed(&self) -> bool {
        self.solo.load(Ordering::Relaxed)
    }

    pub(crate) fn reset(&self, bus_count: u32) {
        self.status.store(NOT_PROCESSED, Ordering::Relaxed);
        self.bus_counter.store(bus_count as i32, Ordering::Relaxed);
        self.solo_fed.store(false, Ordering::Relaxed);
    }

    /// Whether a soloed track delivered into this one during the current period.
    pub fn is_solo_fed(&self) -> bool {
        self.solo_fed.load(Ordering::Acquire)
    }

    /// Try to take ownership of the track for this period.
    pub(crate) fn try_claim(&self) -> bool {
        self.status
            .compare_exchange(NOT_PROCESSED, PROCESSING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn finish(&self) {
        self.status.store(PROCESSED, Ordering::Release);
    }

    /// Spin until every producer has delivered, or `policy` gives up.
    pub fn wait_for_bus(&self, policy: &SpinPolicy) -> SpinOutcome {
        policy.spin_until(|| self.bus_counter.load(Ordering::Acquire) <= 0)
    }

    /// Run the plugin chain over the period, deliver downstream and mark the track processed.
    ///
    /// # Safety
    /// The calling thread must hold the claim on this track for the current period.
    pub(crate) unsafe fn process(&self, job: &Job<'_>) -> Report {
        let chain = unsafe { &mut *self.chain.get() };
        let period = job.period;
        let (offset, num_frames) = (period.offset, period.sample_count);
        let mut report = Report::default();

        let mut bus = self.bus.lock();
        let Bus {
            main,
            sidechain,
            midi,
        } = &mut *bus;
        chain.view.assign_range(main, offset, num_frames);
        chain.sidechain_view.assign_range(sidechain, offset, num_frames);
        let cx = context::Process::new(num_frames, period.current_sample).with_midi(midi.as_slice());

        for slot in chain.plugins.iter_mut().flatten() {
            slot.fill_automation(job.automation, &period.ticks);
            slot.plugin.connect_buffer(0, &chain.view, false);
            slot.plugin.connect_buffer(1, &chain.sidechain_view, true);
            slot.plugin
                .process_replacing(cx.with_automation(slot.events.as_slice()));
            report.dropped_events += slot.events.take_dropped();
        }

        // Solo never closes the output track; only its own mute does.
        let audible = if self.id == job.output {
            !self.is_muted()
        } else {
            job.tracks.is_audible(self)
        };
        chain.fade.set_audible(audible);
        chain.fade.apply(&mut chain.view);
        let carries_solo = self.is_soloed() || self.is_solo_fed();

        // Lock order is always source then destination, so the acyclic graph keeps this
        // deadlock free.
        for route in job.graph.outgoing(self.id) {
            let Some(dest) = job.tracks.get(route.dest) else {
                continue;
            };
            let mut dest_bus = dest.bus.lock();
            // A consumer that gave up on us has already run; what we deliver now would leak
            // into its next period.
            if dest.status() == Status::Processed {
                dest.bus_counter.fetch_sub(1, Ordering::Release);
                continue;
            }
            if carries_solo {
                dest.solo_fed.store(true, Ordering::Relaxed);
            }
            match route.kind {
                RouteKind::Midi => dest_bus.midi.merge(midi.as_slice(), 0),
                RouteKind::Audio | RouteKind::Sidechain => {
                    let target = match route.kind {
                        RouteKind::Audio => &dest_bus.main,
                        _ => &dest_bus.sidechain,
                    };
                    chain.send_view.assign_range(target, offset, num_frames);
                    match chain.sends.get_mut(route.slot).and_then(Option::as_mut) {
                        Some(send) => {
                            send.fill_automation(job.automation, &period.ticks);
                            send.plugin.connect_buffer(0, &chain.view, false);
                            send.plugin.process_mixing(
                                cx.with_automation(send.events.as_slice()),
                                std::slice::from_mut(&mut chain.send_view),
                            );
                            report.dropped_events += send.events.take_dropped();
                        }
                        None => chain.send_view.add_from(&chain.view, 1.0),
                    }
                }
            }
            dest.bus_counter.fetch_sub(1, Ordering::Release);
            drop(dest_bus);
        }

        // The output track is read (and cleared) by the caller once the period is done.
        if self.id != job.output {
            chain.view.clear();
        }
        chain.sidechain_view.clear();
        midi.clear();
        // Marked while the bus is still locked, so a late producer sees it.
        self.finish();
        report
    }
}

impl TrackSet {
    pub fn new(config: TrackConfig) -> Result<Self, Error> {
        let needed = 2 * config.num_tracks * config.num_channels as usize;
        let mut arena = Arena::new(needed, config.max_frames as usize, config.hugepages);
        let tracks = (0..config.num_tracks)
            .map(|id| Track::new(id, &config, &mut arena))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(
            "allocated {} tracks x {} channels x {} frames (hugepages: {})",
            config.num_tracks,
            config.num_channels,
            config.max_frames,
            arena.uses_hugepages()
        );
        Ok(Self {
            tracks: tracks.into_boxed_slice(),
            scratch: IsSendSync::new(Audio::new(config.num_channels)),
            config,
            solo_count: 0,
            _arena: IsSendSync::new(arena),
        })
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, track: usize) -> Option<&Track> {
        self.tracks.get(track)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    fn track_mut(&mut self, track: usize) -> Result<&mut Track, Error> {
        let num_tracks = self.tracks.len();
        self.tracks
            .get_mut(track)
            .ok_or(Error::TrackOutOfRange { track, num_tracks })
    }

    fn slot_mut(
        &mut self,
        track: usize,
        slot: usize,
        send: bool,
    ) -> Result<&mut Option<Slot>, Error> {
        let chain = self.track_mut(track)?.chain.get_mut();
        let slots = if send {
            &mut chain.sends
        } else {
            &mut chain.plugins
        };
        let max_slots = slots.len();
        slots
            .get_mut(slot)
            .ok_or(Error::SlotOutOfRange { slot, max_slots })
    }

    /// Host `plugin` in an insert slot. Returns the plugin it replaces, which the caller drops.
    pub fn insert_plugin(
        &mut self,
        track: usize,
        slot: usize,
        uid: u32,
        plugin: Box<dyn Plugin>,
    ) -> Result<Option<Box<dyn Plugin>>, Error> {
        let capacity = self.config.event_capacity;
        let slot = self.slot_mut(track, slot, false)?;
        Ok(slot
            .replace(Slot::new(uid, plugin, capacity))
            .map(Slot::into_plugin))
    }

    pub fn remove_plugin(
        &mut self,
        track: usize,
        slot: usize,
    ) -> Result<Option<Box<dyn Plugin>>, Error> {
        Ok(self.slot_mut(track, slot, false)?.take().map(Slot::into_plugin))
    }

    /// Host a bus plugin in send slot `slot`; routes through that slot mix with it instead of at
    /// unity gain.
    pub fn insert_send(
        &mut self,
        track: usize,
        slot: usize,
        uid: u32,
        plugin: Box<dyn Plugin>,
    ) -> Result<Option<Box<dyn Plugin>>, Error> {
        let capacity = self.config.event_capacity;
        let slot = self.slot_mut(track, slot, true)?;
        Ok(slot
            .replace(Slot::new(uid, plugin, capacity))
            .map(Slot::into_plugin))
    }

    pub fn remove_send(
        &mut self,
        track: usize,
        slot: usize,
    ) -> Result<Option<Box<dyn Plugin>>, Error> {
        Ok(self.slot_mut(track, slot, true)?.take().map(Slot::into_plugin))
    }

    /// Every hosted plugin, inserts then sends, in track order.
    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.tracks.iter_mut().flat_map(|track| {
            let chain = track.chain.get_mut();
            chain.plugins.iter_mut().chain(chain.sends.iter_mut()).flatten()
        })
    }

    pub fn plugin_mut(&mut self, uid: u32) -> Option<&mut dyn Plugin> {
        self.slots_mut()
            .find(|slot| slot.uid == uid)
            .map(Slot::plugin_mut)
    }

    pub fn fade_state(&mut self, track: usize) -> Result<FadeState, Error> {
        Ok(self.track_mut(track)?.chain.get_mut().fade.state())
    }

    pub fn set_mute(&mut self, track: usize, mute: bool) -> Result<(), Error> {
        self.track_mut(track)?.mute.store(mute, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_solo(&mut self, track: usize, solo: bool) -> Result<(), Error> {
        let was = self.track_mut(track)?.solo.swap(solo, Ordering::Relaxed);
        match (was, solo) {
            (false, true) => self.solo_count += 1,
            (true, false) => self.solo_count -= 1,
            _ => (),
        }
        Ok(())
    }

    /// Not muted, and either no track is soloed, or this one is, or a soloed track feeds it.
    pub fn is_audible(&self, track: &Track) -> bool {
        !track.is_muted()
            && (self.solo_count == 0 || track.is_soloed() || track.is_solo_fed())
    }

    /// Prepare every track for a period.
    pub fn reset(&self, graph: &TrackGraph) {
        for track in self.tracks.iter() {
            track.reset(graph.bus_count(track.id));
        }
    }

    /// Queue MIDI input on a track's bus. Ticks are relative to the next period.
    pub fn push_midi(&mut self, track: usize, events: &[MidiEvent]) -> Result<(), Error> {
        self.track_mut(track)?.bus.get_mut().midi.merge(events, 0);
        Ok(())
    }

    /// Move frames `offset..offset + out.num_frames()` of a track's buffer into `out`, leaving
    /// silence behind.
    pub fn take_output(&mut self, track: usize, offset: u32, out: &mut Audio) -> Result<(), Error> {
        let num_tracks = self.tracks.len();
        let Self { tracks, scratch, .. } = self;
        let track = tracks
            .get_mut(track)
            .ok_or(Error::TrackOutOfRange { track, num_tracks })?;
        scratch.assign_range(&track.bus.get_mut().main, offset, out.num_frames());
        out.copy_from(scratch);
        scratch.clear();
        Ok(())
    }

    /// Silence every buffer, drop queued MIDI and tell every plugin to stop sounding.
    pub fn silence(&mut self) {
        for track in self.tracks.iter_mut() {
            let bus = track.bus.get_mut();
            bus.main.clear();
            bus.sidechain.clear();
            bus.midi.clear();
        }
        for slot in self.slots_mut() {
            slot.plugin.panic();
        }
    }
}

impl Index<usize> for TrackSet {
    type Output = Track;
    fn index(&self, index: usize) -> &Self::Output {
        &self.tracks[index]
    }
}

#[cfg(test)]
mod tests {
    use super::{Fade, FadeState, TrackConfig, TrackSet};
    use crate::{RoutingTable, TrackGraph};
    use buffer::Audio;
    use processor::builtin::gain::Gain;
    use std::time::Duration;
    use util::sync::SpinPolicy;

    #[test]
    fn fade_ramps_out_and_back() {
        let mut fade = Fade::new(4);
        let mut data = vec![1.0f32; 8];
        let ptrs = [data.as_mut_ptr()];
        let mut audio = unsafe { Audio::from_raw(ptrs.as_ptr(), 1, 8) };

        fade.set_audible(false);
        assert_eq!(fade.state(), FadeState::Fading);
        fade.apply(&mut audio);
        assert_eq!(fade.state(), FadeState::Faded);
        assert_eq!(&audio[0][..5], &[0.75, 0.5, 0.25, 0.0, 0.0]);

        audio[0].fill(1.0);
        fade.apply(&mut audio);
        assert!(audio[0].iter().all(|s| *s == 0.0));

        audio[0].fill(1.0);
        fade.set_audible(true);
        fade.apply(&mut audio);
        assert_eq!(fade.state(), FadeState::Off);
        assert_eq!(fade.gain(), 1.0);
        assert_eq!(&audio[0][..5], &[0.25, 0.5, 0.75, 1.0, 1.0]);
    }

    #[test]
    fn solo_and_mute() {
        let mut tracks = TrackSet::new(TrackConfig::default()).unwrap();
        assert!(tracks.is_audible(&tracks[1]));
        tracks.set_solo(2, true).unwrap();
        assert!(!tracks.is_audible(&tracks[1]));
        assert!(tracks.is_audible(&tracks[2]));
        tracks.set_mute(2, true).unwrap();
        assert!(!tracks.is_audible(&tracks[2]));
        tracks.set_solo(2, false).unwrap();
        tracks.set_solo(2, false).unwrap();
        assert!(tracks.is_audible(&tracks[1]));
        assert!(tracks.set_mute(9, true).is_err());
    }

    #[test]
    fn slots_are_bounded() {
        let mut tracks = TrackSet::new(TrackConfig::default()).unwrap();
        assert!(tracks.insert_plugin(0, 0, 7, Box::new(Gain::new())).unwrap().is_none());
        assert!(tracks.insert_plugin(0, 0, 8, Box::new(Gain::new())).unwrap().is_some());
        assert!(tracks.plugin_mut(7).is_none());
        assert!(tracks.plugin_mut(8).is_some());
        assert!(tracks.insert_plugin(0, 4, 9, Box::new(Gain::new())).is_err());
        assert!(tracks.insert_send(0, 2, 9, Box::new(Gain::new())).is_err());
    }

    #[test]
    fn producer_that_never_delivers_times_out() {
        let tracks = TrackSet::new(TrackConfig::default()).unwrap();
        let table = RoutingTable::parse("1|0|0|0\n", 4, 2).unwrap();
        let graph = TrackGraph::build(&table, 1);
        tracks.reset(&graph);
        assert_eq!(tracks[0].bus_counter(), 1);
        let policy = SpinPolicy::new(u64::MAX, Some(Duration::from_millis(10)));
        assert!(!tracks[0].wait_for_bus(&policy).is_ready());
        assert!(tracks[1].wait_for_bus(&policy).is_ready());
    }
}
