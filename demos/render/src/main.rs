//! Render four bars of a two track session offline and record the master bus.
//!
//! `cargo run -p cadence-demo-render -- out.f32` writes interleaved stereo little endian f32.
use std::{fs::File, io::BufWriter};

use buffer::{Audio, MidiEvent};
use engine::{Engine, MASTER, Options};
use processor::builtin::{fader::Fader, gain::Gain, sine::Sine};
use voice::PolyMode;

const BLOCK: u32 = 512;
const LEAD: usize = 1;
const PAD: usize = 2;

// A beat, the note and its length in beats.
const MELODY: [(f64, u8, f64); 8] = [
    (0.0, 69, 0.5),
    (0.5, 72, 0.5),
    (1.0, 76, 1.0),
    (2.0, 74, 0.5),
    (2.5, 72, 0.5),
    (3.0, 69, 1.0),
    (4.0, 67, 2.0),
    (6.0, 69, 2.0),
];

// The lead feeds the master and doubles its MIDI onto the pad, which sends through a fader.
const ROUTING: &str = "1|0|0|0\n1|1|2|2\n2|0|0|0\n\\\n";

// Swell the lead in over the first bar, and the pad's send fader over the whole take.
const AUTOMATION: &str = "\
0|3|20|0|10|0
4|3|110|1|10|0
0|0|0.2|0|21|0
16|0|1|1|21|0
\\
";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let path = std::env::args().nth(1).unwrap_or_else(|| "render.f32".into());

    let options = Options::from_env()?;
    let sample_rate = options.sample_rate;
    let writer = BufWriter::new(File::create(&path)?);
    let mut engine = Engine::with_recorder(options, Box::new(writer))?;
    let mut snapshots = engine.take_snapshots();

    let control = engine.control();
    control.insert_plugin(LEAD, 0, 10, Box::new(Sine::new(8, PolyMode::Poly)))?;
    control.insert_plugin(PAD, 0, 20, Box::new(Sine::new(4, PolyMode::Mono)))?;
    control.insert_send(PAD, 0, 21, Box::new(Fader::new()))?;
    control.insert_plugin(MASTER, 0, 30, Box::new(Gain::new()))?;
    control.apply("port|30|0|0.5")?;
    control.apply(&format!("routing|{ROUTING}"))?;
    control.apply(&format!("automation|{AUTOMATION}"))?;
    control.apply("tempo|96")?;
    control.apply("record|1")?;
    control.apply("play")?;

    let mut left = vec![0.0f32; BLOCK as usize];
    let mut right = vec![0.0f32; BLOCK as usize];
    let samples_per_beat = sample_rate * 60.0 / 96.0;
    let total = (16.0 * samples_per_beat) as i64;
    let mut midi = Vec::new();
    let mut sample = 0i64;
    while sample < total {
        let end = sample + i64::from(BLOCK);
        midi.clear();
        for &(beat, note, length) in &MELODY {
            for (start, event) in [
                (beat, MidiEvent::note_on(0, note, 100)),
                (beat + length, MidiEvent::note_off(0, note)),
            ] {
                let at = (start * samples_per_beat) as i64;
                if (sample..end).contains(&at) {
                    midi.push(MidiEvent {
                        tick: (at - sample) as u32,
                        ..event
                    });
                }
            }
        }
        midi.sort_by_key(|e| e.tick);

        let ptrs = [left.as_mut_ptr(), right.as_mut_ptr()];
        let mut output = unsafe { Audio::from_raw(ptrs.as_ptr(), 2, BLOCK) };
        engine.run_callback(&mut output, &midi);
        sample = end;
    }

    control.apply("record|0")?;
    if let Some(snapshot) = snapshots.as_mut().map(|s| *s.read()) {
        tracing::info!(
            "rendered to beat {:.2} at {} bpm, {} bus timeouts, {} samples dropped",
            snapshot.position,
            snapshot.tempo,
            snapshot.bus_timeouts,
            snapshot.dropped_samples
        );
    }
    engine.shutdown();
    tracing::info!("wrote {path}");
    Ok(())
}
