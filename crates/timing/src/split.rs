//! Cutting a callback at tempo changes and loop restarts.
use crate::period::Periods;

/// Something that happens strictly inside a callback's beat range.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PeriodEvent {
    /// From `beat` on, playback advances `beats_per_sample`.
    Tempo { beat: f64, beats_per_sample: f64 },
    /// At `beat` playback jumps back to `restart`, continuing at `beats_per_sample`.
    Loop {
        beat: f64,
        restart: f64,
        beats_per_sample: f64,
    },
}

/// Where playback stands after the last period of a split.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Split {
    pub end_beat: f64,
    pub beats_per_sample: f64,
    /// A loop restart rounded onto the very end of the range, so no period here carries it.
    /// The first period of the next callback starts right after the restart.
    pub restart_pending: bool,
}

impl PeriodEvent {
    pub fn beat(&self) -> f64 {
        match self {
            Self::Tempo { beat, .. } | Self::Loop { beat, .. } => *beat,
        }
    }
}

/// Split `sample_count` samples starting at `start_beat` into periods.
///
/// `events` are applied in order. An event whose beat is not strictly inside the range that
/// remains when it is reached is ignored. The samples before an event get
/// `round(distance / width * remaining)` samples; pieces that round to zero samples are not
/// emitted but their event still applies. Sample counts always sum to `sample_count`.
pub fn split(
    start_beat: f64,
    beats_per_sample: f64,
    sample_count: u32,
    current_sample: i64,
    events: &[PeriodEvent],
    out: &mut Periods,
) -> Split {
    out.clear();
    let mut cur_start = start_beat;
    let mut cur_end = start_beat + f64::from(sample_count) * beats_per_sample;
    let mut inc = beats_per_sample;
    let mut remaining = sample_count;
    let mut offset = 0;
    let mut restarted = false;

    for event in events {
        let beat = event.beat();
        if remaining == 0 || !(cur_start < beat && beat < cur_end) {
            continue;
        }
        let fraction = (beat - cur_start) / (cur_end - cur_start);
        let samples = ((fraction * f64::from(remaining)).round() as u32).min(remaining);
        if samples > 0 {
            out.push(
                samples,
                cur_start,
                beat,
                offset,
                current_sample + i64::from(offset),
                restarted,
                true,
            );
            remaining -= samples;
            offset += samples;
            restarted = false;
        }
        match *event {
            PeriodEvent::Tempo {
                beats_per_sample, ..
            } => {
                // A piece that rounded away is absorbed by the next one.
                if samples > 0 {
                    cur_start = beat;
                }
                inc = beats_per_sample;
                cur_end = beat + f64::from(remaining) * inc;
            }
            PeriodEvent::Loop {
                restart,
                beats_per_sample,
                ..
            } => {
                inc = beats_per_sample;
                cur_start = restart;
                cur_end = restart + f64::from(remaining) * inc;
                restarted = true;
            }
        }
    }

    if remaining > 0 {
        out.push(
            remaining,
            cur_start,
            cur_end,
            offset,
            current_sample + i64::from(offset),
            restarted,
            true,
        );
    }

    Split {
        end_beat: cur_end,
        beats_per_sample: inc,
        restart_pending: restarted && remaining == 0,
    }
}
