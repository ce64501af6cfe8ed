//! Plugins that ship with the engine.

pub mod gain {
    use buffer::Audio;

    use crate::{Kind, MAX_CHANNELS, Plugin, Port, context, for_each_segment};

    pub const GAIN: u32 = 0;

    static PORTS: [Port; 1] = [Port::new(GAIN, "gain", 0.0, 4.0, 1.0)];

    /// Linear gain, sample accurate under automation.
    pub struct Gain {
        main: Audio,
        gain: f32,
    }

    impl Gain {
        pub fn new() -> Self {
            Self {
                main: Audio::new(MAX_CHANNELS),
                gain: PORTS[0].default,
            }
        }
    }

    impl Default for Gain {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Plugin for Gain {
        fn initialize(&mut self, _sample_rate: f64, _max_num_frames: u32) {}

        fn kind(&self) -> Kind {
            Kind::Effect
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
            let Self { main, gain } = self;
            for_each_segment(context.sample_count, context.automation, |range, event| {
                for channel in main.iter_mut() {
                    if let Some(samples) = channel.get_mut(range.clone()) {
                        samples.iter_mut().for_each(|s| *s *= *gain);
                    }
                }
                if let Some(event) = event.filter(|e| e.port == GAIN) {
                    *gain = PORTS[0].clamp(event.value);
                }
            });
        }

        fn set_port_value(&mut self, port: u32, value: f32) {
            if port == GAIN {
                self.gain = PORTS[0].clamp(value);
            }
        }

        fn port_value(&self, port: u32) -> Option<f32> {
            (port == GAIN).then_some(self.gain)
        }
    }
}

pub mod fader {
    use buffer::Audio;

    use crate::{Kind, MAX_CHANNELS, Plugin, Port, context, for_each_segment};

    pub const GAIN: u32 = 0;

    static PORTS: [Port; 1] = [Port::new(GAIN, "gain", 0.0, 4.0, 1.0)];

    /// Send level. Hosted in a send slot it mixes the track into the route's destination; in an
    /// insert slot it scales the track in place.
    pub struct Fader {
        input: Audio,
        gain: f32,
    }

    impl Fader {
        pub fn new() -> Self {
            Self {
                input: Audio::new(MAX_CHANNELS),
                gain: PORTS[0].default,
            }
        }
    }

    impl Default for Fader {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Plugin for Fader {
        fn initialize(&mut self, _sample_rate: f64, _max_num_frames: u32) {}

        fn kind(&self) -> Kind {
            Kind::Bus
        }

        fn ports(&self) -> &[Port] {
            &PORTS
        }

        fn connect_buffer(&mut self, index: usize, buffer: &Audio, is_sidechain: bool) {
            if index == 0 && !is_sidechain {
                self.input.assign_to(buffer);
            }
        }

        fn process_replacing(&mut self, context: context::Process<'_>) {
            let Self { input, gain } = self;
            for_each_segment(context.sample_count, context.automation, |range, event| {
                for channel in input.iter_mut() {
                    if let Some(samples) = channel.get_mut(range.clone()) {
                        samples.iter_mut().for_each(|s| *s *= *gain);
                    }
                }
                if let Some(event) = event.filter(|e| e.port == GAIN) {
                    *gain = PORTS[0].clamp(event.value);
                }
            });
        }

        fn process_mixing(&mut self, context: context::Process<'_>, outputs: &mut [Audio]) {
            let Self { input, gain } = self;
            let num_src = input.num_channels() as usize;
            if num_src == 0 {
                return;
            }
            for_each_segment(context.sample_count, context.automation, |range, event| {
                for output in outputs.iter_mut() {
                    for (idx, dst) in output.iter_mut().enumerate() {
                        if num_src != 1 && idx >= num_src {
                            break;
                        }
                        let src = &input[idx.min(num_src - 1)];
                        let (Some(dst), Some(src)) =
                            (dst.get_mut(range.clone()), src.get(range.clone()))
                        else {
                            continue;
                        };
                        for (d, s) in dst.iter_mut().zip(src) {
                            *d += *s * *gain;
                        }
                    }
                }
                if let Some(event) = event.filter(|e| e.port == GAIN) {
                    *gain = PORTS[0].clamp(event.value);
                }
            });
        }

        fn set_port_value(&mut self, port: u32, value: f32) {
            if port == GAIN {
                self.gain = PORTS[0].clamp(value);
            }
        }

        fn port_value(&self, port: u32) -> Option<f32> {
            (port == GAIN).then_some(self.gain)
        }
    }
}

pub mod sine {
    use std::{f32::consts::TAU, ops::Range};

    use buffer::{Audio, MidiEvent, MidiKind};
    use voice::{PolyMode, VoiceAllocator, VoiceState};

    use crate::{Kind, MAX_CHANNELS, Plugin, Port, context};

    pub const GAIN: u32 = 0;
    pub const ATTACK: u32 = 1;
    pub const RELEASE: u32 = 2;
    pub const VOLUME: u32 = 3;

    static PORTS: [Port; 4] = [
        Port::new(GAIN, "gain", 0.0, 2.0, 1.0),
        Port::new(ATTACK, "attack_ms", 0.0, 1000.0, 5.0),
        Port::new(RELEASE, "release_ms", 0.0, 5000.0, 100.0),
        Port::new(VOLUME, "volume", 0.0, 127.0, 100.0),
    ];

    /// Length of the fade applied to killed (stolen or panicked) voices.
    const KILL_FRAMES: f32 = 64.0;

    #[derive(Copy, Clone, Default)]
    struct Osc {
        phase: f32,
        step: f32,
        level: f32,
        velocity: f32,
    }

    /// A polyphonic sine instrument.
    pub struct Sine {
        main: Audio,
        voices: VoiceAllocator,
        oscs: Vec<Osc>,
        sample_rate: f32,
        values: [f32; 4],
    }

    impl Sine {
        pub fn new(num_voices: usize, mode: PolyMode) -> Self {
            let num_voices = num_voices.max(1);
            Self {
                main: Audio::new(MAX_CHANNELS),
                voices: VoiceAllocator::new(num_voices, num_voices - 1, mode),
                oscs: vec![Osc::default(); num_voices],
                sample_rate: 48_000.0,
                values: PORTS.each_ref().map(|p| p.default),
            }
        }

        pub fn voices(&self) -> &VoiceAllocator {
            &self.voices
        }

        fn ramp(&self, port: u32) -> f32 {
            let ms = self.values[port as usize];
            let frames = ms * 0.001 * self.sample_rate;
            if frames < 1.0 { 1.0 } else { 1.0 / frames }
        }

        fn handle_midi(&mut self, event: &MidiEvent, current_sample: i64) {
            match event.kind {
                MidiKind::NoteOn { note, velocity: 0 } => {
                    self.voices.note_off(note, current_sample, event.tick);
                }
                MidiKind::NoteOn { note, velocity } => {
                    let index = self.voices.pick_voice(note, current_sample, event.tick);
                    let freq = 440.0 * ((f32::from(note) - 69.0) / 12.0).exp2();
                    self.oscs[index] = Osc {
                        phase: 0.0,
                        step: freq / self.sample_rate,
                        level: 0.0,
                        velocity: f32::from(velocity) / 127.0,
                    };
                }
                MidiKind::NoteOff { note } => {
                    self.voices.note_off(note, current_sample, event.tick);
                }
                MidiKind::Control { .. } | MidiKind::PitchBend(_) => (),
            }
        }

        fn render(&mut self, range: Range<usize>) {
            let attack = self.ramp(ATTACK);
            let release = self.ramp(RELEASE);
            let amp = self.values[GAIN as usize] * self.values[VOLUME as usize] / 127.0;
            for frame in range {
                let mut sum = 0.0;
                for (index, osc) in self.oscs.iter_mut().enumerate() {
                    let Some(voice) = self.voices.voice(index) else {
                        break;
                    };
                    match voice.state {
                        VoiceState::Off => continue,
                        VoiceState::Running => osc.level = (osc.level + attack).min(1.0),
                        VoiceState::Releasing => osc.level -= release,
                        VoiceState::Killed => osc.level -= 1.0 / KILL_FRAMES,
                    }
                    if osc.level <= 0.0 {
                        osc.level = 0.0;
                        self.voices.kill(index);
                        self.voices.finish(index);
                        continue;
                    }
                    sum += (osc.phase * TAU).sin() * osc.level * osc.velocity;
                    osc.phase = (osc.phase + osc.step).fract();
                }
                let sample = sum * amp;
                for channel in self.main.iter_mut() {
                    if let Some(s) = channel.get_mut(frame) {
                        *s += sample;
                    }
                }
            }
        }
    }

    impl Plugin for Sine {
        fn initialize(&mut self, sample_rate: f64, _max_num_frames: u32) {
            self.sample_rate = sample_rate as f32;
        }

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
            let end = context.sample_count as usize;
            let (mut midi, mut automation) = (0, 0);
            let mut pos = 0;
            loop {
                while let Some(event) = context.midi.get(midi).filter(|e| e.tick as usize <= pos) {
                    self.handle_midi(event, context.current_sample);
                    midi += 1;
                }
                while let Some(event) = context
                    .automation
                    .get(automation)
                    .filter(|e| e.tick as usize <= pos)
                {
                    self.set_port_value(event.port, event.value);
                    automation += 1;
                }
                let next = [
                    context.midi.get(midi).map(|e| e.tick as usize),
                    context.automation.get(automation).map(|e| e.tick as usize),
                ]
                .into_iter()
                .flatten()
                .fold(end, usize::min);
                self.render(pos..next);
                pos = next;
                if pos >= end {
                    break;
                }
            }
        }

        fn on_transport_stop(&mut self) {
            self.voices.release_all(0);
        }

        fn panic(&mut self) {
            self.voices.kill_all();
            self.oscs.iter_mut().for_each(|o| *o = Osc::default());
        }

        fn set_port_value(&mut self, port: u32, value: f32) {
            if let Some(p) = crate::port::find(&PORTS, port) {
                self.values[port as usize] = p.clamp(value);
            }
        }

        fn port_value(&self, port: u32) -> Option<f32> {
            self.values.get(port as usize).copied()
        }
    }
}
