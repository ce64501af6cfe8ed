//! Polyphonic voice allocation.
//!
//! The allocator only decides which voice plays a note and records intent (start, release,
//! kill). The instrument that owns it renders the voices and reports back with
//! [VoiceAllocator::finish] once a killed voice has faded out. Every voice follows
//! `Off -> Running -> (Releasing) -> Killed -> Off`; a stolen voice is reset to `Off` before it
//! starts again.
use util::collections::Array;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum VoiceState {
    #[default]
    Off,
    Running,
    Releasing,
    Killed,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PolyMode {
    /// Every note restarts voice 0.
    Retrigger,
    /// Every note kills whatever is sounding and starts a fresh voice.
    Mono,
    #[default]
    Poly,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Voice {
    pub number: usize,
    /// The note being played, or -1 when the voice is free.
    pub note: i32,
    pub state: VoiceState,
    /// Sample time the voice started.
    pub on: i64,
    /// Sample time the voice was released, or -1.
    pub off: i64,
}

/// A fixed pool of voices for one instrument instance.
pub struct VoiceAllocator {
    voices: Array<Voice>,
    mode: PolyMode,
    steal_threshold: usize,
}

impl Voice {
    fn new(number: usize) -> Self {
        Self {
            number,
            note: -1,
            state: VoiceState::Off,
            on: -1,
            off: -1,
        }
    }

    /// Running or releasing: still making its own sound.
    pub fn is_sounding(&self) -> bool {
        matches!(self.state, VoiceState::Running | VoiceState::Releasing)
    }

    fn reset(&mut self) {
        self.note = -1;
        self.state = VoiceState::Off;
        self.off = -1;
    }

    fn start(&mut self, note: u8, time: i64) {
        debug_assert_eq!(self.state, VoiceState::Off);
        self.note = i32::from(note);
        self.state = VoiceState::Running;
        self.on = time;
        self.off = -1;
    }
}

impl VoiceAllocator {
    /// Create an allocator with `count` voices. Once `steal_threshold` voices are sounding, new
    /// notes kill the oldest running voice early to leave headroom for the fade out. The
    /// threshold is clamped below `count`.
    pub fn new(count: usize, steal_threshold: usize, mode: PolyMode) -> Self {
        let count = count.max(1);
        let voices = (0..count).map(Voice::new).collect();
        Self {
            voices,
            mode,
            steal_threshold: steal_threshold.min(count - 1),
        }
    }

    pub fn mode(&self) -> PolyMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PolyMode) {
        self.mode = mode;
    }

    pub fn steal_threshold(&self) -> usize {
        self.steal_threshold
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voice(&self, index: usize) -> Option<&Voice> {
        self.voices.get(index)
    }

    /// Number of voices running or releasing.
    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_sounding()).count()
    }

    /// Choose a voice for `note` and start it. Returns the voice number.
    pub fn pick_voice(&mut self, note: u8, sample_time: i64, offset_ticks: u32) -> usize {
        let time = sample_time + i64::from(offset_ticks);
        let index = match self.mode {
            PolyMode::Retrigger => 0,
            PolyMode::Mono => {
                for voice in self.voices.iter_mut().filter(|v| v.is_sounding()) {
                    voice.state = VoiceState::Killed;
                }
                self.free_voice().unwrap_or_else(|| self.oldest(|_| true))
            }
            PolyMode::Poly => self.pick_poly(note),
        };
        let voice = &mut self.voices[index];
        voice.reset();
        voice.start(note, time);
        index
    }

    fn pick_poly(&mut self, note: u8) -> usize {
        let note = i32::from(note);

        // Cap stacking of one note at two voices.
        let same_note = |v: &Voice| v.note == note && v.state != VoiceState::Off;
        if self.voices.iter().filter(|v| same_note(*v)).count() >= 2 {
            return self.oldest(same_note);
        }

        if self.active_count() >= self.steal_threshold {
            let oldest = self.oldest(|v| v.state == VoiceState::Running);
            if self.voices[oldest].state == VoiceState::Running {
                self.voices[oldest].state = VoiceState::Killed;
            }
        }

        self.free_voice().unwrap_or_else(|| self.oldest(|_| true))
    }

    fn free_voice(&self) -> Option<usize> {
        self.voices.iter().position(|v| v.state == VoiceState::Off)
    }

    /// Index of the voice with the earliest start time among those matching `filter`, or 0.
    fn oldest(&self, filter: impl Fn(&Voice) -> bool) -> usize {
        self.voices
            .iter()
            .filter(|v| filter(*v))
            .min_by_key(|v| v.on)
            .map_or(0, |v| v.number)
    }

    /// Release every running voice playing `note`.
    pub fn note_off(&mut self, note: u8, sample_time: i64, offset_ticks: u32) {
        let time = sample_time + i64::from(offset_ticks);
        for voice in self.voices.iter_mut() {
            if voice.state == VoiceState::Running && voice.note == i32::from(note) {
                voice.state = VoiceState::Releasing;
                voice.off = time;
            }
        }
    }

    /// Mark a voice for a fast fade out.
    pub fn kill(&mut self, index: usize) {
        if let Some(voice) = self.voices.get_mut(index) {
            if voice.state != VoiceState::Off {
                voice.state = VoiceState::Killed;
            }
        }
    }

    /// The instrument finished rendering a voice; it becomes free.
    pub fn finish(&mut self, index: usize) {
        if let Some(voice) = self.voices.get_mut(index) {
            voice.reset();
        }
    }

    /// Silence everything immediately.
    pub fn kill_all(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.reset();
        }
    }

    /// Release every running voice, as on transport stop.
    pub fn release_all(&mut self, sample_time: i64) {
        for voice in self.voices.iter_mut() {
            if voice.state == VoiceState::Running {
                voice.state = VoiceState::Releasing;
                voice.off = sample_time;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PolyMode, VoiceAllocator, VoiceState};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn fills_free_voices_in_order() {
        let mut voices = VoiceAllocator::new(8, 7, PolyMode::Poly);
        assert_eq!(voices.pick_voice(60, 0, 0), 0);
        assert_eq!(voices.pick_voice(64, 10, 0), 1);
        assert_eq!(voices.pick_voice(67, 20, 5), 2);
        assert_eq!(voices.voices()[2].on, 25);
        assert_eq!(voices.active_count(), 3);
    }

    #[test]
    fn steals_oldest_when_full() {
        let count = 4;
        let mut voices = VoiceAllocator::new(count, count, PolyMode::Poly);
        assert_eq!(voices.steal_threshold(), 3);
        for (i, note) in [60u8, 62, 64].into_iter().enumerate() {
            assert_eq!(voices.pick_voice(note, i as i64, 0), i);
        }
        // The fourth note crosses the threshold: voice 0 is killed early, voice 3 is free.
        assert_eq!(voices.pick_voice(65, 3, 0), 3);
        assert_eq!(voices.voices()[0].state, VoiceState::Killed);
        // The fifth finds nothing free and reuses the oldest voice.
        assert_eq!(voices.pick_voice(67, 4, 0), 0);
        let stolen = voices.voices()[0];
        assert_eq!(stolen.state, VoiceState::Running);
        assert_eq!(stolen.note, 67);
        assert_eq!(stolen.on, 4);
    }

    #[test]
    fn same_note_stacks_at_most_twice() {
        let mut voices = VoiceAllocator::new(8, 7, PolyMode::Poly);
        assert_eq!(voices.pick_voice(60, 0, 0), 0);
        assert_eq!(voices.pick_voice(60, 1, 0), 1);
        // A third 60 reuses the older of the two.
        assert_eq!(voices.pick_voice(60, 2, 0), 0);
        assert_eq!(voices.voices().iter().filter(|v| v.note == 60).count(), 2);
    }

    #[test]
    fn killed_voices_count_towards_stacking() {
        let mut voices = VoiceAllocator::new(8, 7, PolyMode::Poly);
        voices.pick_voice(60, 0, 0);
        voices.pick_voice(60, 1, 0);
        voices.kill(1);
        assert_eq!(voices.pick_voice(60, 2, 0), 0);
        voices.finish(1);
        assert_eq!(voices.voices()[1].state, VoiceState::Off);
        assert_eq!(voices.pick_voice(60, 3, 0), 1);
    }

    #[test]
    fn note_off_matches_running_note_only() {
        let mut voices = VoiceAllocator::new(4, 3, PolyMode::Poly);
        voices.pick_voice(60, 0, 0);
        voices.pick_voice(62, 0, 0);
        voices.pick_voice(60, 0, 0);
        voices.kill(2);
        voices.note_off(60, 100, 7);
        let states: Vec<_> = voices.voices().iter().map(|v| v.state).collect();
        assert_eq!(
            states,
            vec![
                VoiceState::Releasing,
                VoiceState::Running,
                VoiceState::Killed,
                VoiceState::Off
            ]
        );
        assert_eq!(voices.voices()[0].off, 107);
        assert_eq!(voices.voices()[2].off, -1);
    }

    #[test]
    fn retrigger_reuses_voice_zero() {
        let mut voices = VoiceAllocator::new(4, 3, PolyMode::Retrigger);
        for (t, note) in [60u8, 61, 62].into_iter().enumerate() {
            assert_eq!(voices.pick_voice(note, t as i64, 0), 0);
        }
        assert_eq!(voices.voices()[0].note, 62);
        assert_eq!(voices.active_count(), 1);
    }

    #[test]
    fn mono_never_runs_two_voices() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut voices = VoiceAllocator::new(4, 3, PolyMode::Mono);
        for t in 0..5_000i64 {
            let note = rng.random_range(40..80u8);
            match rng.random_range(0..4) {
                0 | 1 => {
                    voices.pick_voice(note, t, 0);
                }
                2 => voices.note_off(note, t, 0),
                _ => {
                    // The instrument finishes some fade outs.
                    let index = rng.random_range(0..4);
                    if voices.voices()[index].state == VoiceState::Killed {
                        voices.finish(index);
                    }
                }
            }
            let running = voices
                .voices()
                .iter()
                .filter(|v| v.state == VoiceState::Running)
                .count();
            assert!(running <= 1);
        }
    }

    #[test]
    fn panic_and_stop() {
        let mut voices = VoiceAllocator::new(4, 3, PolyMode::Poly);
        voices.pick_voice(60, 0, 0);
        voices.pick_voice(61, 0, 0);
        voices.release_all(50);
        assert!(
            voices
                .voices()
                .iter()
                .take(2)
                .all(|v| v.state == VoiceState::Releasing && v.off == 50)
        );
        voices.kill_all();
        assert_eq!(voices.active_count(), 0);
        assert!(voices.voices().iter().all(|v| v.note == -1));
    }
}
