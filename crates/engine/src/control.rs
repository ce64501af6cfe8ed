//! The control surface. Messages are `key|value` strings; anything that has to be parsed or
//! allocated is done before the engine lock is taken, and anything replaced is dropped after.
use std::{path::Path, str::FromStr, sync::Arc};

use automation::Automation;
use graph::{RoutingError, RoutingTable, TrackGraph};
use processor::Plugin;
use timing::LoopMode;
use util::sync::SpinLock;

use crate::{ControlError, Error, Options, context::Core};

#[derive(Clone)]
pub struct ControlHandle {
    core: Arc<SpinLock<Core>>,
    options: Arc<Options>,
    num_threads: usize,
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ControlError> {
    value.trim().parse().map_err(|_| ControlError::Malformed {
        key,
        value: value.to_owned(),
    })
}

fn pair<A: FromStr, B: FromStr>(key: &'static str, value: &str) -> Result<(A, B), ControlError> {
    let (a, b) = value.split_once('|').ok_or_else(|| ControlError::Malformed {
        key,
        value: value.to_owned(),
    })?;
    Ok((parse(key, a)?, parse(key, b)?))
}

fn flag(key: &'static str, value: &str) -> Result<bool, ControlError> {
    match value.trim() {
        "1" | "on" | "true" => Ok(true),
        "0" | "off" | "false" => Ok(false),
        _ => Err(ControlError::Malformed {
            key,
            value: value.to_owned(),
        }),
    }
}

fn track_flag(key: &'static str, value: &str) -> Result<(usize, bool), ControlError> {
    let (track, on) = value.split_once('|').ok_or_else(|| ControlError::Malformed {
        key,
        value: value.to_owned(),
    })?;
    Ok((parse(key, track)?, flag(key, on)?))
}

impl ControlHandle {
    pub(crate) fn new(core: Arc<SpinLock<Core>>, options: Arc<Options>, num_threads: usize) -> Self {
        Self {
            core,
            options,
            num_threads,
        }
    }

    /// Apply one control message. A rejected message leaves the engine untouched.
    ///
    /// | key            | value                      |
    /// |----------------|----------------------------|
    /// | `play`, `stop`, `panic` | none              |
    /// | `seek`         | beat                       |
    /// | `tempo`        | bpm                        |
    /// | `tempo_change` | `beat\|bpm`                |
    /// | `loop_mode`    | `on` or `off`              |
    /// | `loop_region`  | `start\|end`               |
    /// | `solo`, `mute` | `track\|on`                |
    /// | `routing`      | routing table text         |
    /// | `automation`   | automation text            |
    /// | `port`         | `uid\|port\|value`         |
    /// | `record`       | `on` or `off`              |
    pub fn apply(&self, message: &str) -> Result<(), ControlError> {
        let (key, value) = message.split_once('|').unwrap_or((message, ""));
        let key = key.trim();
        tracing::debug!("control: {key}");
        match key {
            "play" => self.core.lock().transport.play(),
            "stop" => self.stop(),
            "panic" => self.stop_all_sound(),
            "seek" => {
                let beat = parse("seek", value)?;
                let mut core = self.core.lock();
                core.transport.seek(beat)?;
                core.automation.seek(beat);
            }
            "tempo" => {
                let bpm = parse("tempo", value)?;
                self.core.lock().transport.set_tempo(bpm)?;
            }
            "tempo_change" => {
                let (beat, bpm) = pair("tempo_change", value)?;
                self.core.lock().transport.add_tempo_change(beat, bpm)?;
            }
            "loop_mode" => {
                let mode = if flag("loop_mode", value)? {
                    LoopMode::On
                } else {
                    LoopMode::Off
                };
                self.core.lock().transport.set_loop_mode(mode);
            }
            "loop_region" => {
                let (start, end) = pair("loop_region", value)?;
                self.core.lock().transport.set_loop_region(start, end)?;
            }
            "solo" => {
                let (track, on) = track_flag("solo", value)?;
                self.core.lock().tracks.set_solo(track, on)?;
            }
            "mute" => {
                let (track, on) = track_flag("mute", value)?;
                self.core.lock().tracks.set_mute(track, on)?;
            }
            "routing" => {
                let table =
                    RoutingTable::parse(value, self.options.num_tracks, self.options.max_routes)?;
                self.set_routing(table)?;
            }
            "automation" => self.set_automation(Automation::parse(value)?),
            "port" => {
                let (uid, rest) = value.split_once('|').ok_or_else(|| ControlError::Malformed {
                    key: "port",
                    value: value.to_owned(),
                })?;
                let uid = parse("port", uid)?;
                let (port, value) = pair("port", rest)?;
                let mut core = self.core.lock();
                let plugin = core
                    .tracks
                    .plugin_mut(uid)
                    .ok_or(ControlError::UnknownPlugin(uid))?;
                plugin.set_port_value(port, value);
            }
            "record" => {
                let on = flag("record", value)?;
                self.core.lock().recording = on;
            }
            _ => return Err(ControlError::UnknownKey(key.to_owned())),
        }
        Ok(())
    }

    /// Stop the transport and let every plugin release its notes.
    pub fn stop(&self) {
        let mut core = self.core.lock();
        core.transport.stop();
        for slot in core.tracks.slots_mut() {
            slot.plugin_mut().on_transport_stop();
        }
    }

    /// Silence every buffer and every plugin.
    pub fn stop_all_sound(&self) {
        self.core.lock().tracks.silence();
    }

    /// Replace the routing. Rejected if the table is cyclic or sized for another engine.
    pub fn set_routing(&self, table: RoutingTable) -> Result<(), ControlError> {
        if table.num_tracks() != self.options.num_tracks
            || table.max_routes() != self.options.max_routes
        {
            return Err(graph::Error::RoutingSize {
                expected: (self.options.num_tracks, self.options.max_routes),
                found: (table.num_tracks(), table.max_routes()),
            }
            .into());
        }
        if let Some(cycle) = table.find_cycle() {
            return Err(RoutingError::Cycle(cycle).into());
        }
        let graph = TrackGraph::build(&table, self.num_threads);
        let num_routes = table.routes().count();
        let replaced = {
            let mut core = self.core.lock();
            (
                std::mem::replace(&mut core.routing, table),
                std::mem::replace(&mut core.graph, graph),
            )
        };
        drop(replaced);
        tracing::info!("routing updated: {num_routes} routes");
        Ok(())
    }

    /// A copy of the routing in effect.
    pub fn routing(&self) -> RoutingTable {
        self.core.lock().routing.clone()
    }

    /// Replace the automation, positioned at the playhead.
    pub fn set_automation(&self, automation: Automation) {
        let num_points = automation.num_points();
        let replaced = {
            let mut core = self.core.lock();
            automation.seek(core.transport.position());
            std::mem::replace(&mut core.automation, automation)
        };
        drop(replaced);
        tracing::info!("automation updated: {num_points} points");
    }

    /// Host `plugin` in insert slot `slot` of `track` under `uid`.
    pub fn insert_plugin(
        &self,
        track: usize,
        slot: usize,
        uid: u32,
        mut plugin: Box<dyn Plugin>,
    ) -> Result<(), Error> {
        plugin.initialize(self.options.sample_rate, self.options.max_block_size);
        let replaced = self
            .core
            .lock()
            .tracks
            .insert_plugin(track, slot, uid, plugin)?;
        drop(replaced);
        Ok(())
    }

    /// Host a bus plugin in send slot `slot` of `track`. Audio routed through that slot is mixed
    /// by the plugin.
    pub fn insert_send(
        &self,
        track: usize,
        slot: usize,
        uid: u32,
        mut plugin: Box<dyn Plugin>,
    ) -> Result<(), Error> {
        plugin.initialize(self.options.sample_rate, self.options.max_block_size);
        let replaced = self
            .core
            .lock()
            .tracks
            .insert_send(track, slot, uid, plugin)?;
        drop(replaced);
        Ok(())
    }

    /// Take a plugin out of an insert slot and hand it back.
    pub fn remove_plugin(&self, track: usize, slot: usize) -> Result<Option<Box<dyn Plugin>>, Error> {
        Ok(self.core.lock().tracks.remove_plugin(track, slot)?)
    }

    pub fn remove_send(&self, track: usize, slot: usize) -> Result<Option<Box<dyn Plugin>>, Error> {
        Ok(self.core.lock().tracks.remove_send(track, slot)?)
    }

    /// Read a state file and apply it to the plugin hosted under `uid`.
    pub fn load_plugin_state(&self, uid: u32, path: &Path) -> Result<(), Error> {
        let values = processor::state::read(path)?;
        let mut core = self.core.lock();
        let plugin = core.tracks.plugin_mut(uid).ok_or(Error::UnknownPlugin(uid))?;
        for (port, value) in values {
            plugin.set_port_value(port, value);
        }
        Ok(())
    }

    pub fn port_value(&self, uid: u32, port: u32) -> Option<f32> {
        let mut core = self.core.lock();
        core.tracks.plugin_mut(uid)?.port_value(port)
    }

    pub fn is_recording(&self) -> bool {
        self.core.lock().recording
    }
}
