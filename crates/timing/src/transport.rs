use crate::{
    period::Periods,
    split::{PeriodEvent, split},
};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TimingError {
    #[error("tempo must be a positive, finite bpm (got {0})")]
    InvalidTempo(f64),
    #[error("loop region [{start}, {end}) is empty or negative")]
    InvalidLoopRegion { start: f64, end: f64 },
    #[error("beat {0} is not a valid song position")]
    InvalidBeat(f64),
    #[error("sample rate must be positive (got {0})")]
    InvalidSampleRate(f64),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LoopMode {
    #[default]
    Off,
    On,
}

/// From `beat` on, play at `bpm`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TempoChange {
    pub beat: f64,
    pub bpm: f64,
}

/// Playhead state: where we are, how fast we move, and where we loop.
///
/// All setters run on the control path. [Transport::next_callback] runs on the audio thread and
/// does not allocate.
#[derive(Clone, Debug)]
pub struct Transport {
    sample_rate: f64,
    base_tempo: f64,
    tempo: f64,
    position: f64,
    current_sample: i64,
    playing: bool,
    loop_mode: LoopMode,
    loop_start: f64,
    loop_end: f64,
    tempo_map: Vec<TempoChange>,
    restart_pending: bool,
}

fn check_bpm(bpm: f64) -> Result<f64, TimingError> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(bpm)
    } else {
        Err(TimingError::InvalidTempo(bpm))
    }
}

fn check_beat(beat: f64) -> Result<f64, TimingError> {
    if beat.is_finite() && beat >= 0.0 {
        Ok(beat)
    } else {
        Err(TimingError::InvalidBeat(beat))
    }
}

impl Transport {
    pub fn new(sample_rate: f64, bpm: f64) -> Result<Self, TimingError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(TimingError::InvalidSampleRate(sample_rate));
        }
        let bpm = check_bpm(bpm)?;
        Ok(Self {
            sample_rate,
            base_tempo: bpm,
            tempo: bpm,
            position: 0.0,
            current_sample: 0,
            playing: false,
            loop_mode: LoopMode::Off,
            loop_start: 0.0,
            loop_end: 4.0,
            tempo_map: Vec::new(),
            restart_pending: false,
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Tempo in effect at the playhead.
    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn beats_per_sample(&self) -> f64 {
        self.increment(self.tempo)
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn current_sample(&self) -> i64 {
        self.current_sample
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn loop_region(&self) -> (f64, f64) {
        (self.loop_start, self.loop_end)
    }

    pub fn tempo_map(&self) -> &[TempoChange] {
        &self.tempo_map
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    pub fn seek(&mut self, beat: f64) -> Result<(), TimingError> {
        self.position = check_beat(beat)?;
        self.restart_pending = false;
        self.tempo = self.tempo_at(self.position);
        Ok(())
    }

    /// Set the tempo used before the first tempo change.
    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), TimingError> {
        self.base_tempo = check_bpm(bpm)?;
        self.tempo = self.tempo_at(self.position);
        Ok(())
    }

    /// Add (or replace) a tempo change. Keeps the map sorted by beat.
    pub fn add_tempo_change(&mut self, beat: f64, bpm: f64) -> Result<(), TimingError> {
        let beat = check_beat(beat)?;
        let bpm = check_bpm(bpm)?;
        let index = self.tempo_map.partition_point(|c| c.beat < beat);
        match self.tempo_map.get_mut(index) {
            Some(change) if change.beat == beat => change.bpm = bpm,
            _ => self.tempo_map.insert(index, TempoChange { beat, bpm }),
        }
        self.tempo = self.tempo_at(self.position);
        Ok(())
    }

    pub fn clear_tempo_map(&mut self) {
        self.tempo_map.clear();
        self.tempo = self.base_tempo;
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    pub fn set_loop_region(&mut self, start: f64, end: f64) -> Result<(), TimingError> {
        if !(start.is_finite() && end.is_finite() && start >= 0.0 && end > start) {
            return Err(TimingError::InvalidLoopRegion { start, end });
        }
        self.loop_start = start;
        self.loop_end = end;
        Ok(())
    }

    /// The tempo in effect at `beat`.
    pub fn tempo_at(&self, beat: f64) -> f64 {
        let index = self.tempo_map.partition_point(|c| c.beat <= beat);
        match index {
            0 => self.base_tempo,
            n => self.tempo_map[n - 1].bpm,
        }
    }

    fn increment(&self, bpm: f64) -> f64 {
        bpm / 60.0 / self.sample_rate
    }

    /// Compute the periods of the next callback of `sample_count` samples and advance the
    /// playhead past it.
    ///
    /// While stopped the callback is a single period that does not move in musical time. While
    /// playing, the next tempo change and the loop end (if looping) found inside the callback
    /// split it. A tempo change that falls after the loop end is picked up once playback gets
    /// there again. Further tempo changes inside the same callback take effect on the next one.
    pub fn next_callback(&mut self, sample_count: u32, out: &mut Periods) {
        let current_sample = self.current_sample;
        self.current_sample += i64::from(sample_count);

        if !self.playing {
            out.clear();
            if sample_count > 0 {
                out.push(
                    sample_count,
                    self.position,
                    self.position,
                    0,
                    current_sample,
                    false,
                    false,
                );
            }
            return;
        }

        // A previous callback that ended on the loop end (to within half a sample) wraps now.
        let landed_on_loop_end = self.loop_mode == LoopMode::On
            && self.position >= self.loop_end
            && self.position - self.loop_end <= 0.5 * self.beats_per_sample();
        if landed_on_loop_end {
            self.position = self.loop_start;
            self.tempo = self.tempo_at(self.position);
        }
        let restarted = landed_on_loop_end || std::mem::take(&mut self.restart_pending);

        let start = self.position;
        let inc = self.beats_per_sample();
        let end = start + f64::from(sample_count) * inc;

        let mut events = [None; 2];
        let looping = self.loop_mode == LoopMode::On
            && start < self.loop_end
            && self.loop_end < end;
        let horizon = if looping { self.loop_end } else { end };

        let index = self.tempo_map.partition_point(|c| c.beat <= start);
        if let Some(change) = self.tempo_map.get(index).filter(|c| c.beat < horizon) {
            events[0] = Some(PeriodEvent::Tempo {
                beat: change.beat,
                beats_per_sample: self.increment(change.bpm),
            });
        }
        if looping {
            events[1] = Some(PeriodEvent::Loop {
                beat: self.loop_end,
                restart: self.loop_start,
                beats_per_sample: self.increment(self.tempo_at(self.loop_start)),
            });
        }

        let mut ordered = [PeriodEvent::Tempo {
            beat: 0.0,
            beats_per_sample: 0.0,
        }; 2];
        let mut count = 0;
        for event in events.into_iter().flatten() {
            ordered[count] = event;
            count += 1;
        }

        let result = split(start, inc, sample_count, current_sample, &ordered[..count], out);
        if restarted {
            out.mark_restarted();
        }
        self.restart_pending = result.restart_pending || (restarted && out.len() == 0);
        self.position = result.end_beat;
        self.tempo = self.tempo_at(self.position);
    }
}

#[cfg(test)]
mod tests {
    use super::{LoopMode, TimingError, Transport};
    use crate::period::Periods;
    use approx::assert_relative_eq;

    #[test]
    fn stopped_transport_holds_position() {
        let mut transport = Transport::new(48_000.0, 120.0).unwrap();
        transport.seek(3.0).unwrap();
        let mut periods = Periods::new(64);
        transport.next_callback(256, &mut periods);
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].start_beat, 3.0);
        assert_eq!(periods[0].end_beat, 3.0);
        assert!(periods[0].ticks.is_empty());
        assert_eq!(transport.position(), 3.0);
        assert_eq!(transport.current_sample(), 256);
    }

    #[test]
    fn playing_advances_by_tempo() {
        // One beat per second at a power of two rate keeps the arithmetic exact.
        let mut transport = Transport::new(32_768.0, 60.0).unwrap();
        transport.play();
        let mut periods = Periods::new(64);
        transport.next_callback(32_768, &mut periods);
        assert_eq!(periods.len(), 1);
        assert_eq!(transport.position(), 1.0);
        assert_eq!(periods[0].ticks.len(), 32);
    }

    #[test]
    fn loop_wraps_position() {
        let mut transport = Transport::new(48_000.0, 120.0).unwrap();
        transport.set_loop_region(0.0, 1.0).unwrap();
        transport.set_loop_mode(LoopMode::On);
        transport.seek(0.75).unwrap();
        transport.play();
        let mut periods = Periods::new(64);
        // Half a beat: the second half lands after the restart.
        transport.next_callback(12_000, &mut periods);
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].sample_count, 6_000);
        assert!(periods[1].restarted);
        assert_eq!(periods[1].start_beat, 0.0);
        assert_relative_eq!(transport.position(), 0.25, epsilon = 1e-9);
    }

    #[test]
    fn loop_end_on_callback_boundary_wraps() {
        let mut transport = Transport::new(32_768.0, 60.0).unwrap();
        transport.set_loop_region(0.0, 1.0).unwrap();
        transport.set_loop_mode(LoopMode::On);
        transport.play();
        let mut periods = Periods::new(64);
        transport.next_callback(32_768, &mut periods);
        assert_eq!(transport.position(), 1.0);
        transport.next_callback(16_384, &mut periods);
        assert_eq!(periods.len(), 1);
        assert!(periods[0].restarted);
        assert_eq!(periods[0].start_beat, 0.0);
        assert_eq!(transport.position(), 0.5);
    }

    #[test]
    fn loop_end_rounding_onto_callback_end_flags_next_callback() {
        let mut transport = Transport::new(32_768.0, 60.0).unwrap();
        transport.set_loop_region(0.0, 1.0).unwrap();
        transport.set_loop_mode(LoopMode::On);
        // The loop end falls 99.7 samples into the next 100 sample callback.
        transport.seek(1.0 - 99.7 / 32_768.0).unwrap();
        transport.play();
        let mut periods = Periods::new(64);
        transport.next_callback(100, &mut periods);
        assert_eq!(periods.len(), 1);
        assert!(!periods[0].restarted);
        assert_eq!(transport.position(), 0.0);

        transport.next_callback(100, &mut periods);
        assert_eq!(periods.len(), 1);
        assert!(periods[0].restarted);
        assert_eq!(periods[0].start_beat, 0.0);

        transport.next_callback(100, &mut periods);
        assert!(!periods[0].restarted);
    }

    #[test]
    fn tempo_map_splits_callback() {
        let mut transport = Transport::new(48_000.0, 120.0).unwrap();
        transport.add_tempo_change(0.5, 240.0).unwrap();
        transport.play();
        let mut periods = Periods::new(64);
        transport.next_callback(24_000, &mut periods);
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].sample_count, 12_000);
        // 12000 samples at 240 bpm is one more beat.
        assert_relative_eq!(transport.position(), 1.5, epsilon = 1e-9);
        assert_relative_eq!(transport.tempo(), 240.0, epsilon = 1e-6);
    }

    #[test]
    fn loop_restores_tempo_of_loop_start() {
        let mut transport = Transport::new(48_000.0, 120.0).unwrap();
        transport.add_tempo_change(0.5, 240.0).unwrap();
        transport.set_loop_region(0.0, 1.0).unwrap();
        transport.set_loop_mode(LoopMode::On);
        transport.seek(0.75).unwrap();
        assert_eq!(transport.tempo(), 240.0);
        transport.play();
        let mut periods = Periods::new(64);
        transport.next_callback(12_000, &mut periods);
        assert_relative_eq!(transport.tempo(), 120.0, epsilon = 1e-6);
    }

    #[test]
    fn tempo_changes_are_sorted_and_replaced() {
        let mut transport = Transport::new(44_100.0, 100.0).unwrap();
        transport.add_tempo_change(8.0, 90.0).unwrap();
        transport.add_tempo_change(4.0, 110.0).unwrap();
        transport.add_tempo_change(8.0, 95.0).unwrap();
        let beats: Vec<_> = transport.tempo_map().iter().map(|c| (c.beat, c.bpm)).collect();
        assert_eq!(beats, vec![(4.0, 110.0), (8.0, 95.0)]);
        assert_eq!(transport.tempo_at(3.9), 100.0);
        assert_eq!(transport.tempo_at(4.0), 110.0);
        assert_eq!(transport.tempo_at(100.0), 95.0);
    }

    #[test]
    fn rejects_bad_input() {
        let mut transport = Transport::new(48_000.0, 120.0).unwrap();
        assert_eq!(transport.set_tempo(0.0), Err(TimingError::InvalidTempo(0.0)));
        assert!(transport.set_loop_region(4.0, 4.0).is_err());
        assert!(transport.seek(-1.0).is_err());
        assert!(Transport::new(0.0, 120.0).is_err());
    }
}
