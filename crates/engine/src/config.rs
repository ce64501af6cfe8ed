use std::time::Duration;

use util::sync::SpinPolicy;

/// Engine configuration. Everything the audio path allocates is sized from here at init.
#[derive(Clone, Debug)]
pub struct Options {
    pub sample_rate: f64,
    /// Largest callback rendered in one go. Longer callbacks are rendered in blocks of this size.
    pub max_block_size: u32,
    /// Threads rendering each period, the audio thread included.
    pub num_threads: usize,
    /// Track 0 is the master.
    pub num_tracks: usize,
    pub num_channels: u32,
    pub max_plugins: usize,
    pub max_routes: usize,
    pub event_capacity: usize,
    pub tick_capacity: usize,
    pub bus_wait: SpinPolicy,
    /// SCHED_FIFO priority for the workers. `None` keeps normal scheduling.
    pub rt_priority: Option<i32>,
    pub hugepages: bool,
    pub fade_frames: u32,
    /// Samples buffered between the audio thread and the recorder. Must be a power of two.
    pub recorder_capacity: usize,
    pub tempo: f64,
    /// The track receiving the callback's MIDI input.
    pub midi_track: usize,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid sample rate {0}")]
    SampleRate(f64),
    #[error("invalid block size {0}")]
    BlockSize(u32),
    #[error("at least one track is required")]
    NoTracks,
    #[error("{channels} channels requested, at most {max} supported")]
    Channels { channels: u32, max: u32 },
    #[error("at least one thread is required")]
    NoThreads,
    #[error("recorder capacity {0} is not a power of two")]
    RecorderCapacity(usize),
    #[error("MIDI input track {track} out of range ({num_tracks} tracks)")]
    MidiTrack { track: usize, num_tracks: usize },
    #[error("invalid tempo {0}")]
    Tempo(f64),
    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
}

impl Default for Options {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            max_block_size: 1024,
            num_threads: num_cpus::get(),
            num_tracks: 16,
            num_channels: 2,
            max_plugins: 8,
            max_routes: 4,
            event_capacity: 512,
            tick_capacity: 256,
            bus_wait: SpinPolicy::new(100_000_000, Some(Duration::from_millis(50))),
            rt_priority: None,
            hugepages: false,
            fade_frames: 256,
            recorder_capacity: 1 << 16,
            tempo: 120.0,
            midi_track: 1,
        }
    }
}

impl Options {
    /// The defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env(|var| std::env::var(var).ok())
    }

    /// Apply `CADENCE_THREADS` and `CADENCE_HUGEPAGES` as reported by `lookup`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("CADENCE_THREADS") {
            self.num_threads = match value.trim().parse() {
                Ok(threads) if threads > 0 => threads,
                _ => {
                    return Err(ConfigError::Env {
                        var: "CADENCE_THREADS",
                        value,
                    });
                }
            };
        }
        if let Some(value) = lookup("CADENCE_HUGEPAGES") {
            self.hugepages = match value.trim() {
                "1" | "true" | "on" => true,
                "0" | "false" | "off" => false,
                _ => {
                    return Err(ConfigError::Env {
                        var: "CADENCE_HUGEPAGES",
                        value,
                    });
                }
            };
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        if self.max_block_size == 0 {
            return Err(ConfigError::BlockSize(self.max_block_size));
        }
        if self.num_tracks == 0 {
            return Err(ConfigError::NoTracks);
        }
        if self.num_channels == 0 || self.num_channels > processor::MAX_CHANNELS {
            return Err(ConfigError::Channels {
                channels: self.num_channels,
                max: processor::MAX_CHANNELS,
            });
        }
        if self.num_threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        if !self.recorder_capacity.is_power_of_two() {
            return Err(ConfigError::RecorderCapacity(self.recorder_capacity));
        }
        if self.midi_track >= self.num_tracks {
            return Err(ConfigError::MidiTrack {
                track: self.midi_track,
                num_tracks: self.num_tracks,
            });
        }
        if !(self.tempo.is_finite() && self.tempo > 0.0) {
            return Err(ConfigError::Tempo(self.tempo));
        }
        Ok(())
    }

    pub(crate) fn track_config(&self) -> graph::TrackConfig {
        graph::TrackConfig {
            num_tracks: self.num_tracks,
            num_channels: self.num_channels,
            max_frames: self.max_block_size,
            max_plugins: self.max_plugins,
            max_routes: self.max_routes,
            event_capacity: self.event_capacity,
            fade_frames: self.fade_frames,
            hugepages: self.hugepages,
        }
    }

    pub(crate) fn pool_options(&self) -> graph::Options {
        graph::Options {
            num_threads: self.num_threads,
            bus_wait: self.bus_wait,
            rt_priority: self.rt_priority,
            ..graph::Options::default()
        }
    }
}
