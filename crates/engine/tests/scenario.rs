use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use buffer::{Audio, MidiEvent};
use cadence_engine::{ControlError, Engine, MASTER, Options};
use graph::RoutingError;
use processor::{Kind, Plugin, Port, builtin::sine, context};

// One beat is 32768 samples and one automation tick (1/32 beat) is exactly one block.
const BEAT: i64 = 32_768;
const BLOCK: u32 = 1024;
const TRACK_A: usize = 1;
const TRACK_B: usize = 2;
const PORT: u32 = 3;

static PORTS: [Port; 1] = [Port::new(PORT, "level", 0.0, 127.0, 0.0)];

/// Adds a constant to its track and records the automation it receives.
struct Source {
    main: Audio,
    level: f32,
    value: f32,
    seen: Arc<Mutex<Vec<(i64, f32)>>>,
}

impl Source {
    fn new(level: f32) -> (Self, Arc<Mutex<Vec<(i64, f32)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let source = Self {
            main: Audio::new(2),
            level,
            value: 0.0,
            seen: seen.clone(),
        };
        (source, seen)
    }
}

impl Plugin for Source {
    fn initialize(&mut self, _sample_rate: f64, _max_num_frames: u32) {}

    fn kind(&self) -> Kind {
        Kind::Instrument
    }

    fn ports(&self) -> &[Port] {
        &PORTS
    }

    fn connect_buffer(&mut self, index: usize, buffer: &Audio, is_sidechain: bool) {
        if index == 0 && !is_sidechain {
            self.main.assign_to(buffer);
        }
    }

    fn process_replacing(&mut self, context: context::Process<'_>) {
        let n = context.sample_count as usize;
        for channel in self.main.iter_mut() {
            channel[..n].iter_mut().for_each(|s| *s += self.level);
        }
        let mut seen = self.seen.lock().unwrap();
        for event in context.automation.iter().filter(|e| e.port == PORT) {
            self.value = event.value;
            seen.push((context.current_sample + i64::from(event.tick), event.value));
        }
    }

    fn set_port_value(&mut self, port: u32, value: f32) {
        if port == PORT {
            self.value = value;
        }
    }

    fn port_value(&self, port: u32) -> Option<f32> {
        (port == PORT).then_some(self.value)
    }
}

struct Output {
    data: Vec<f32>,
}

impl Output {
    fn new() -> Self {
        Self {
            data: vec![0.0; 2 * BLOCK as usize],
        }
    }

    fn render(&mut self, engine: &mut Engine, midi: &[MidiEvent]) {
        let ptrs = [self.data.as_mut_ptr(), unsafe {
            self.data.as_mut_ptr().add(BLOCK as usize)
        }];
        let mut audio = unsafe { Audio::from_raw(ptrs.as_ptr(), 2, BLOCK) };
        engine.run_callback(&mut audio, midi);
    }

    fn left(&self) -> &[f32] {
        &self.data[..BLOCK as usize]
    }
}

fn options() -> Options {
    Options {
        sample_rate: 32_768.0,
        tempo: 60.0,
        max_block_size: BLOCK,
        num_threads: 2,
        num_tracks: 4,
        max_routes: 2,
        fade_frames: 64,
        ..Options::default()
    }
}

#[test]
fn automation_reaches_the_plugin_on_track_a() {
    let mut engine = Engine::init(options()).unwrap();
    let control = engine.control();
    let (source_a, seen) = Source::new(1.0);
    let (source_b, _) = Source::new(0.5);
    control.insert_plugin(TRACK_A, 0, 10, Box::new(source_a)).unwrap();
    control.insert_plugin(TRACK_B, 0, 20, Box::new(source_b)).unwrap();
    control.apply("routing|1|0|0|0\n2|0|0|0\n\\\n").unwrap();
    control
        .apply("automation|0|3|0|0|10|0\n4|3|127|1|10|0\n\\\n")
        .unwrap();
    control.apply("play").unwrap();

    let mut output = Output::new();
    for _ in 0..5 * 32 {
        output.render(&mut engine, &[]);
        assert!(output.left().iter().all(|s| *s == 1.5));
    }

    let seen = seen.lock().unwrap().clone();
    let at = |sample: i64| seen.iter().find(|(s, _)| *s == sample).map(|(_, v)| *v);
    assert_eq!(at(0), Some(0.0));
    assert_relative_eq!(at(2 * BEAT).unwrap(), 63.5);
    assert_relative_eq!(at(4 * BEAT).unwrap(), 127.0);
    assert!(seen.iter().filter(|(s, _)| *s > 4 * BEAT).all(|(_, v)| *v == 127.0));
    assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(control.port_value(10, PORT), Some(127.0));
    engine.shutdown();
}

#[test]
fn loop_restart_reemits_automation() {
    let mut engine = Engine::init(options()).unwrap();
    let control = engine.control();
    let (source, seen) = Source::new(0.0);
    control.insert_plugin(TRACK_A, 0, 10, Box::new(source)).unwrap();
    control
        .apply("automation|0|3|0|0|10|0\n4|3|127|1|10|0\n\\\n")
        .unwrap();
    control.apply("loop_region|0|1").unwrap();
    control.apply("loop_mode|1").unwrap();
    control.apply("play").unwrap();

    let mut output = Output::new();
    for _ in 0..48 {
        output.render(&mut engine, &[]);
    }
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.iter().filter(|(_, v)| *v == 0.0).count(), 2);
    assert!(seen.iter().any(|(s, v)| *s == BEAT && *v == 0.0));
    engine.shutdown();
}

#[test]
fn mute_fades_a_track_out() {
    let mut engine = Engine::init(options()).unwrap();
    let control = engine.control();
    let (source_a, _) = Source::new(1.0);
    let (source_b, _) = Source::new(0.5);
    control.insert_plugin(TRACK_A, 0, 10, Box::new(source_a)).unwrap();
    control.insert_plugin(TRACK_B, 0, 20, Box::new(source_b)).unwrap();
    control.apply("routing|1|0|0|0\n2|0|0|0\n\\\n").unwrap();

    let mut output = Output::new();
    output.render(&mut engine, &[]);
    assert_eq!(output.left()[0], 1.5);

    control.apply("mute|2|1").unwrap();
    output.render(&mut engine, &[]);
    assert!(output.left()[0] > 1.0);
    assert_eq!(output.left()[BLOCK as usize - 1], 1.0);

    control.apply("solo|2|1").unwrap();
    output.render(&mut engine, &[]);
    output.render(&mut engine, &[]);
    assert!(output.left().iter().all(|s| *s == 0.0));
    engine.shutdown();
}

#[test]
fn solo_reaches_the_master_bus() {
    let mut engine = Engine::init(options()).unwrap();
    let control = engine.control();
    let (source_a, _) = Source::new(1.0);
    let (source_b, _) = Source::new(0.5);
    control.insert_plugin(TRACK_A, 0, 10, Box::new(source_a)).unwrap();
    control.insert_plugin(TRACK_B, 0, 20, Box::new(source_b)).unwrap();
    control.apply("routing|1|0|0|0\n2|0|0|0\n\\\n").unwrap();

    let mut output = Output::new();
    output.render(&mut engine, &[]);
    assert!(output.left().iter().all(|s| *s == 1.5));

    control.apply("solo|1|1").unwrap();
    output.render(&mut engine, &[]);
    assert!(output.left()[0] > 1.0);
    assert_eq!(output.left()[BLOCK as usize - 1], 1.0);
    output.render(&mut engine, &[]);
    assert!(output.left().iter().all(|s| *s == 1.0));

    control.apply("solo|1|0").unwrap();
    output.render(&mut engine, &[]);
    output.render(&mut engine, &[]);
    assert!(output.left().iter().all(|s| *s == 1.5));
    engine.shutdown();
}

#[test]
fn midi_input_plays_the_instrument_track() {
    let mut engine = Engine::init(options()).unwrap();
    let control = engine.control();
    control
        .insert_plugin(TRACK_A, 0, 30, Box::new(sine::Sine::new(4, voice::PolyMode::Poly)))
        .unwrap();
    control.apply("routing|1|0|0|0\n\\\n").unwrap();

    let mut output = Output::new();
    output.render(&mut engine, &[]);
    assert!(output.left().iter().all(|s| *s == 0.0));

    output.render(&mut engine, &[MidiEvent::note_on(0, 69, 100)]);
    assert!(output.left().iter().any(|s| *s != 0.0));

    control.apply("panic").unwrap();
    output.render(&mut engine, &[]);
    assert!(output.left().iter().all(|s| *s == 0.0));
    engine.shutdown();
}

#[test]
fn rejected_messages_leave_the_engine_alone() {
    let mut engine = Engine::init(options()).unwrap();
    let control = engine.control();
    let (source, _) = Source::new(1.0);
    control.insert_plugin(TRACK_A, 0, 10, Box::new(source)).unwrap();
    control.apply("routing|1|0|3|0\n3|0|0|0\n\\\n").unwrap();

    let err = control
        .apply("routing|1|0|3|0\n3|0|2|0\n2|0|1|0\n\\\n")
        .unwrap_err();
    assert!(matches!(err, ControlError::Routing(RoutingError::Cycle(_))));
    assert!(matches!(
        control.apply("automation|0|3|zero|0|10|0"),
        Err(ControlError::Automation(_))
    ));
    assert!(matches!(
        control.apply("routing|1|0|1|0"),
        Err(ControlError::Routing(RoutingError::SelfRoute(1)))
    ));

    let mut output = Output::new();
    output.render(&mut engine, &[]);
    assert!(output.left().iter().all(|s| *s == 1.0));
    engine.shutdown();
}

#[test]
fn recording_captures_the_master_bus() {
    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for Sink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let sink = Sink::default();
    let mut engine = Engine::with_recorder(options(), Box::new(sink.clone())).unwrap();
    let control = engine.control();
    let (source, _) = Source::new(0.25);
    control.insert_plugin(MASTER, 0, 10, Box::new(source)).unwrap();

    let mut output = Output::new();
    output.render(&mut engine, &[]);
    control.apply("record|1").unwrap();
    output.render(&mut engine, &[]);
    output.render(&mut engine, &[]);
    control.apply("record|0").unwrap();
    output.render(&mut engine, &[]);
    engine.shutdown();

    let bytes = sink.0.lock().unwrap().clone();
    assert_eq!(bytes.len(), 2 * 2 * BLOCK as usize * 4);
    assert!(
        bytes
            .chunks_exact(4)
            .all(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) == 0.25)
    );
}
