use std::ops::Deref;

/// A callback is split at most twice (one tempo change, one loop restart).
pub const MAX_PERIODS: usize = 3;

/// Resolution of the automation clock.
pub const TICKS_PER_BEAT: u32 = 32;

/// One point of the automation grid.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AtmTick {
    /// Song position of the tick.
    pub beat: f64,
    /// Sample offset inside the owning period, always `< sample_count`.
    pub tick: u32,
}

/// Fixed capacity list of automation ticks. Ticks past capacity are dropped and counted.
#[derive(Clone, Debug)]
pub struct TickList {
    ticks: Vec<AtmTick>,
    capacity: usize,
    dropped: u64,
}

/// A contiguous piece of a callback that runs at one tempo.
#[derive(Clone, Debug)]
pub struct SamplePeriod {
    pub sample_count: u32,
    pub start_beat: f64,
    pub end_beat: f64,
    /// First sample of this period inside the callback's buffers.
    pub offset: u32,
    /// Absolute sample counter at the first sample of this period.
    pub current_sample: i64,
    /// This period begins at a loop restart; cursors must be repositioned before it is rendered.
    pub restarted: bool,
    pub ticks: TickList,
}

/// The periods produced for one callback. Storage is allocated once.
#[derive(Clone, Debug)]
pub struct Periods {
    periods: [SamplePeriod; MAX_PERIODS],
    len: usize,
}

impl TickList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ticks: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, tick: AtmTick) {
        if self.ticks.len() == self.capacity {
            self.dropped += 1;
            return;
        }
        self.ticks.push(tick);
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }

    /// Fill with the grid beats `k / TICKS_PER_BEAT` inside `[start, end)`, each mapped linearly
    /// onto `[0, sample_count)`.
    pub fn fill(&mut self, start: f64, end: f64, sample_count: u32) {
        self.clear();
        if sample_count == 0 || end <= start {
            return;
        }
        let resolution = f64::from(TICKS_PER_BEAT);
        let width = end - start;
        let last = sample_count - 1;
        let mut k = (start * resolution).ceil() as i64;
        loop {
            let beat = k as f64 / resolution;
            if beat >= end {
                break;
            }
            let offset = ((beat - start) / width * f64::from(sample_count)).round();
            let tick = (offset.max(0.0) as u32).min(last);
            self.push(AtmTick { beat, tick });
            k += 1;
        }
    }
}

impl Deref for TickList {
    type Target = [AtmTick];
    fn deref(&self) -> &Self::Target {
        &self.ticks
    }
}

impl SamplePeriod {
    pub fn new(tick_capacity: usize) -> Self {
        Self {
            sample_count: 0,
            start_beat: 0.0,
            end_beat: 0.0,
            offset: 0,
            current_sample: 0,
            restarted: false,
            ticks: TickList::with_capacity(tick_capacity),
        }
    }

    /// Beats advanced per sample in this period. Zero while the transport is stopped.
    pub fn beats_per_sample(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        (self.end_beat - self.start_beat) / f64::from(self.sample_count)
    }
}

impl Periods {
    pub fn new(tick_capacity: usize) -> Self {
        Self {
            periods: std::array::from_fn(|_| SamplePeriod::new(tick_capacity)),
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append a period. Ticks are generated only when `with_ticks` is set (ie. while playing).
    pub(crate) fn push(
        &mut self,
        sample_count: u32,
        start_beat: f64,
        end_beat: f64,
        offset: u32,
        current_sample: i64,
        restarted: bool,
        with_ticks: bool,
    ) {
        debug_assert!(self.len < MAX_PERIODS);
        let Some(period) = self.periods.get_mut(self.len) else {
            return;
        };
        period.sample_count = sample_count;
        period.start_beat = start_beat;
        period.end_beat = end_beat;
        period.offset = offset;
        period.current_sample = current_sample;
        period.restarted = restarted;
        if with_ticks {
            period.ticks.fill(start_beat, end_beat, sample_count);
        } else {
            period.ticks.clear();
        }
        self.len += 1;
    }

    /// Flag the first period as starting right after a loop restart.
    pub(crate) fn mark_restarted(&mut self) {
        if let Some(first) = self.periods[..self.len].first_mut() {
            first.restarted = true;
        }
    }

    /// Ticks dropped for lack of capacity since the last call, across all periods.
    pub fn take_dropped_ticks(&mut self) -> u64 {
        self.periods.iter_mut().map(|p| p.ticks.take_dropped()).sum()
    }
}

impl Deref for Periods {
    type Target = [SamplePeriod];
    fn deref(&self) -> &Self::Target {
        &self.periods[..self.len]
    }
}
