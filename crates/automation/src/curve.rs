use ahash::AHashMap;
use buffer::{ControlEvent, EventList};
use timing::AtmTick;
use util::sync::SpinLock;

/// One breakpoint of a port's curve.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AtmPoint {
    pub beat: f64,
    pub value: f32,
    pub port: u32,
    /// Orders points that share a beat.
    pub index: u32,
    pub plugin_uid: u32,
    /// Hold this value until the next point instead of ramping to it.
    pub break_after: bool,
}

/// An automated port: its points in `(beat, index)` order and a playback cursor.
pub struct AtmPort {
    port: u32,
    points: Vec<AtmPoint>,
    /// `1 / (next.beat - beat)` for every point but the last.
    recips: Vec<f64>,
    cursor: SpinLock<Cursor>,
}

#[derive(Copy, Clone, Debug)]
struct Cursor {
    atm_pos: usize,
    last_val: f32,
    fresh: bool,
}

/// All automated ports of one plugin instance.
pub struct AtmPlugin {
    uid: u32,
    ports: Vec<AtmPort>,
}

/// The automation of a song.
#[derive(Default)]
pub struct Automation {
    plugins: Vec<AtmPlugin>,
    by_uid: AHashMap<u32, usize>,
}

impl Cursor {
    const RESET: Self = Self {
        atm_pos: 0,
        last_val: 0.0,
        fresh: true,
    };
}

impl AtmPort {
    fn new(port: u32, mut points: Vec<AtmPoint>) -> Self {
        points.sort_by(|a, b| a.beat.total_cmp(&b.beat).then(a.index.cmp(&b.index)));
        let recips = points
            .windows(2)
            .map(|w| {
                let width = w[1].beat - w[0].beat;
                if width > 0.0 { width.recip() } else { 0.0 }
            })
            .collect();
        Self {
            port,
            points,
            recips,
            cursor: SpinLock::new(Cursor::RESET),
        }
    }

    pub fn port(&self) -> u32 {
        self.port
    }

    pub fn points(&self) -> &[AtmPoint] {
        &self.points
    }

    /// Value of the curve at `pos` given the point the cursor sits on.
    fn value(&self, pos: usize, beat: f64) -> f32 {
        let point = &self.points[pos];
        let Some(next) = self.points.get(pos + 1) else {
            return point.value;
        };
        if beat < point.beat || point.break_after {
            return point.value;
        }
        let delta = f64::from(next.value - point.value);
        (f64::from(point.value) + delta * (beat - point.beat) * self.recips[pos]) as f32
    }

    /// Index of the last point at or before `beat`, or 0.
    fn position_of(&self, beat: f64) -> usize {
        self.points
            .partition_point(|p| p.beat <= beat)
            .saturating_sub(1)
    }

    /// The curve's value at `beat`, without touching the cursor.
    pub fn value_at(&self, beat: f64) -> Option<f32> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.value(self.position_of(beat), beat))
    }

    /// Advance the cursor to `beat` and return the value, unless it equals the last value
    /// returned since the previous seek.
    pub fn tick(&self, beat: f64) -> Option<f32> {
        if self.points.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock();
        while cursor.atm_pos + 1 < self.points.len() && self.points[cursor.atm_pos + 1].beat <= beat
        {
            cursor.atm_pos += 1;
        }
        let value = self.value(cursor.atm_pos, beat);
        if !cursor.fresh && value == cursor.last_val {
            return None;
        }
        cursor.fresh = false;
        cursor.last_val = value;
        Some(value)
    }

    /// Move the cursor to `beat` and force the next tick to emit.
    pub fn seek(&self, beat: f64) {
        let atm_pos = self.position_of(beat);
        *self.cursor.lock() = Cursor {
            atm_pos,
            ..Cursor::RESET
        };
    }

    pub fn cursor_position(&self) -> usize {
        self.cursor.lock().atm_pos
    }
}

impl AtmPlugin {
    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn ports(&self) -> &[AtmPort] {
        &self.ports
    }

    pub fn port(&self, port: u32) -> Option<&AtmPort> {
        self.ports.iter().find(|p| p.port == port)
    }

    /// Run the automation clock over `ticks`, inserting a control event for every port whose
    /// value changed.
    pub fn fill_events(&self, ticks: &[AtmTick], events: &mut EventList<ControlEvent>) {
        for tick in ticks {
            for port in &self.ports {
                if let Some(value) = port.tick(tick.beat) {
                    events.insert(ControlEvent {
                        tick: tick.tick,
                        port: port.port,
                        value,
                    });
                }
            }
        }
    }

    pub fn seek(&self, beat: f64) {
        self.ports.iter().for_each(|p| p.seek(beat));
    }
}

impl Automation {
    /// Group points by plugin, then port.
    pub fn from_points(points: impl IntoIterator<Item = AtmPoint>) -> Self {
        let mut grouped: AHashMap<u32, AHashMap<u32, Vec<AtmPoint>>> = AHashMap::new();
        for point in points {
            grouped
                .entry(point.plugin_uid)
                .or_default()
                .entry(point.port)
                .or_default()
                .push(point);
        }
        let mut plugins: Vec<_> = grouped
            .into_iter()
            .map(|(uid, ports)| {
                let mut ports: Vec<_> = ports
                    .into_iter()
                    .map(|(port, points)| AtmPort::new(port, points))
                    .collect();
                ports.sort_by_key(|p| p.port);
                AtmPlugin { uid, ports }
            })
            .collect();
        plugins.sort_by_key(|p| p.uid);
        let by_uid = plugins
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.uid, idx))
            .collect();
        Self { plugins, by_uid }
    }

    pub fn plugins(&self) -> &[AtmPlugin] {
        &self.plugins
    }

    pub fn plugin(&self, uid: u32) -> Option<&AtmPlugin> {
        self.by_uid.get(&uid).map(|idx| &self.plugins[*idx])
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn num_points(&self) -> usize {
        self.plugins
            .iter()
            .flat_map(|p| &p.ports)
            .map(|p| p.points.len())
            .sum()
    }

    /// Reposition every cursor, as on seek or loop restart.
    pub fn seek(&self, beat: f64) {
        self.plugins.iter().for_each(|p| p.seek(beat));
    }
}

#[cfg(test)]
mod tests {
    use super::{AtmPoint, Automation};
    use approx::assert_relative_eq;
    use buffer::{ControlEvent, EventList};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use timing::{AtmTick, TickList};

    fn point(beat: f64, value: f32, break_after: bool) -> AtmPoint {
        AtmPoint {
            beat,
            value,
            port: 3,
            index: 0,
            plugin_uid: 1,
            break_after,
        }
    }

    fn ramp() -> Automation {
        Automation::from_points([point(0.0, 0.0, false), point(4.0, 127.0, false)])
    }

    #[test]
    fn interpolates_between_points() {
        let automation = ramp();
        let port = automation.plugin(1).and_then(|p| p.port(3)).unwrap();
        assert_eq!(port.value_at(2.0), Some(63.5));
        assert_eq!(port.value_at(4.0), Some(127.0));
        assert_eq!(port.value_at(5.0), Some(127.0));
        assert_eq!(port.value_at(0.0), Some(0.0));
    }

    #[test]
    fn exact_at_points() {
        let automation = Automation::from_points([
            point(0.0, 0.1, false),
            point(1.0 / 3.0, 0.7, false),
            point(2.0, 0.3, false),
        ]);
        let port = automation.plugin(1).and_then(|p| p.port(3)).unwrap();
        for p in port.points() {
            assert_eq!(port.value_at(p.beat), Some(p.value));
        }
    }

    #[test]
    fn break_after_holds() {
        let automation =
            Automation::from_points([point(1.0, 10.0, true), point(2.0, 20.0, false)]);
        let port = automation.plugin(1).and_then(|p| p.port(3)).unwrap();
        // Before the first point the first value applies.
        assert_eq!(port.value_at(0.0), Some(10.0));
        assert_eq!(port.value_at(1.99), Some(10.0));
        assert_eq!(port.value_at(2.0), Some(20.0));
    }

    #[test]
    fn same_tick_emits_once() {
        let automation = ramp();
        let plugin = automation.plugin(1).unwrap();
        let port = plugin.port(3).unwrap();
        assert_eq!(port.tick(2.0), Some(63.5));
        assert_eq!(port.tick(2.0), None);
        // A seek re-arms the port even though the value is unchanged.
        automation.seek(2.0);
        assert_eq!(port.tick(2.0), Some(63.5));
    }

    #[test]
    fn static_curve_is_sent_once() {
        let automation = Automation::from_points([point(0.0, 5.0, false)]);
        let plugin = automation.plugin(1).unwrap();
        let mut ticks = TickList::with_capacity(64);
        ticks.fill(0.0, 1.0, 512);
        let mut events = EventList::with_capacity(64);
        plugin.fill_events(&ticks, &mut events);
        plugin.fill_events(&ticks, &mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events.as_slice()[0],
            ControlEvent {
                tick: 0,
                port: 3,
                value: 5.0
            }
        );
    }

    #[test]
    fn events_are_tick_ordered_across_ports() {
        let mut points = vec![point(0.0, 0.0, false), point(1.0, 1.0, false)];
        points.extend([
            AtmPoint {
                port: 7,
                ..point(0.0, 1.0, false)
            },
            AtmPoint {
                port: 7,
                ..point(1.0, 0.0, false)
            },
        ]);
        let automation = Automation::from_points(points);
        let plugin = automation.plugin(1).unwrap();
        let ticks = [
            AtmTick { beat: 0.0, tick: 0 },
            AtmTick {
                beat: 0.5,
                tick: 100,
            },
        ];
        let mut events = EventList::with_capacity(8);
        plugin.fill_events(&ticks, &mut events);
        let seen: Vec<_> = events
            .as_slice()
            .iter()
            .map(|e| (e.tick, e.port, e.value))
            .collect();
        assert_eq!(
            seen,
            vec![(0, 3, 0.0), (0, 7, 1.0), (100, 3, 0.5), (100, 7, 0.5)]
        );
    }

    #[test]
    fn cursor_matches_random_lookup() {
        let mut rng = ChaCha8Rng::seed_from_u64(32);
        for _ in 0..200 {
            let count = rng.random_range(1..20);
            let points: Vec<_> = (0..count)
                .map(|i| AtmPoint {
                    index: i,
                    ..point(
                        rng.random_range(0.0..16.0),
                        rng.random_range(0.0..127.0),
                        rng.random_bool(0.2),
                    )
                })
                .collect();
            let automation = Automation::from_points(points);
            let port = automation.plugin(1).and_then(|p| p.port(3)).unwrap();
            let mut last = None;
            let mut beat = 0.0;
            while beat < 20.0 {
                let expected = port.value_at(beat);
                if let Some(value) = port.tick(beat) {
                    assert_eq!(Some(value), expected);
                    last = Some(value);
                } else {
                    assert_eq!(last, expected);
                }
                beat += rng.random_range(0.0..0.5);
            }
            let cursor = port.cursor_position();
            assert!(cursor < port.points().len());
            assert_relative_eq!(
                port.value_at(20.0).unwrap_or_default(),
                port.points().last().map(|p| p.value).unwrap_or_default()
            );
        }
    }
}
