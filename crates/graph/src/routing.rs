//! The bus routing table and its text format.
//!
//! One route per line: `<track>|<slot>|<dest>|<kind>[|<active>]`, with kind `0` audio, `1`
//! sidechain, `2` MIDI and an optional active flag (`1` when omitted). Blank lines and the `\`
//! terminator are ignored.
use std::fmt::Write;

use crate::RoutingError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RouteKind {
    Audio,
    Sidechain,
    Midi,
}

/// `source` sends through its send `slot` into `dest`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BusRoute {
    pub source: usize,
    pub slot: usize,
    pub dest: usize,
    pub kind: RouteKind,
    pub active: bool,
}

/// Fixed size table of `num_tracks × max_routes` send slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingTable {
    num_tracks: usize,
    max_routes: usize,
    slots: Box<[Option<BusRoute>]>,
}

impl RouteKind {
    fn code(self) -> u8 {
        match self {
            Self::Audio => 0,
            Self::Sidechain => 1,
            Self::Midi => 2,
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Self::Audio),
            "1" => Some(Self::Sidechain),
            "2" => Some(Self::Midi),
            _ => None,
        }
    }
}

impl BusRoute {
    pub fn new(source: usize, slot: usize, dest: usize, kind: RouteKind) -> Self {
        Self {
            source,
            slot,
            dest,
            kind,
            active: true,
        }
    }
}

impl RoutingTable {
    pub fn new(num_tracks: usize, max_routes: usize) -> Self {
        Self {
            num_tracks,
            max_routes,
            slots: vec![None; num_tracks * max_routes].into_boxed_slice(),
        }
    }

    pub fn num_tracks(&self) -> usize {
        self.num_tracks
    }

    pub fn max_routes(&self) -> usize {
        self.max_routes
    }

    fn check(&self, track: usize, slot: usize) -> Result<usize, RoutingError> {
        if track >= self.num_tracks {
            return Err(RoutingError::TrackOutOfRange {
                track,
                num_tracks: self.num_tracks,
            });
        }
        if slot >= self.max_routes {
            return Err(RoutingError::SlotOutOfRange {
                slot,
                max_routes: self.max_routes,
            });
        }
        Ok(track * self.max_routes + slot)
    }

    /// Put `route` in its source's send slot, replacing what was there.
    pub fn set(&mut self, route: BusRoute) -> Result<Option<BusRoute>, RoutingError> {
        let index = self.check(route.source, route.slot)?;
        if route.dest >= self.num_tracks {
            return Err(RoutingError::TrackOutOfRange {
                track: route.dest,
                num_tracks: self.num_tracks,
            });
        }
        if route.dest == route.source {
            return Err(RoutingError::SelfRoute(route.source));
        }
        Ok(self.slots[index].replace(route))
    }

    pub fn remove(&mut self, track: usize, slot: usize) -> Result<Option<BusRoute>, RoutingError> {
        let index = self.check(track, slot)?;
        Ok(self.slots[index].take())
    }

    pub fn get(&self, track: usize, slot: usize) -> Option<&BusRoute> {
        let index = self.check(track, slot).ok()?;
        self.slots[index].as_ref()
    }

    /// Every route, active or not, in `(track, slot)` order.
    pub fn routes(&self) -> impl Iterator<Item = &BusRoute> {
        self.slots.iter().flatten()
    }

    /// Active routes leaving `track`.
    pub fn outgoing(&self, track: usize) -> impl Iterator<Item = &BusRoute> {
        let start = (track * self.max_routes).min(self.slots.len());
        let end = (start + self.max_routes).min(self.slots.len());
        self.slots[start..end].iter().flatten().filter(|r| r.active)
    }

    /// Number of active routes arriving at each track.
    pub fn fan_in(&self) -> Vec<u32> {
        let mut counts = vec![0; self.num_tracks];
        for route in self.routes().filter(|r| r.active) {
            counts[route.dest] += 1;
        }
        counts
    }

    /// Routing depth of every track: 0 for tracks nothing routes into, otherwise one more than
    /// the deepest producer. On a cyclic table, returns the tracks that could not be ordered.
    pub fn depths(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut pending = self.fan_in();
        let mut depth = vec![0; self.num_tracks];
        let mut ready: Vec<_> = (0..self.num_tracks).filter(|t| pending[*t] == 0).collect();
        let mut visited = 0;
        while let Some(track) = ready.pop() {
            visited += 1;
            for route in self.outgoing(track) {
                depth[route.dest] = depth[route.dest].max(depth[track] + 1);
                pending[route.dest] -= 1;
                if pending[route.dest] == 0 {
                    ready.push(route.dest);
                }
            }
        }
        if visited == self.num_tracks {
            Ok(depth)
        } else {
            Err((0..self.num_tracks).filter(|t| pending[*t] > 0).collect())
        }
    }

    /// Tracks that take part in (or sit downstream of) a routing cycle, if any.
    pub fn find_cycle(&self) -> Option<Vec<usize>> {
        self.depths().err()
    }

    /// Check that `route` could be added without closing a cycle.
    pub fn would_create_cycle(&self, source: usize, dest: usize) -> bool {
        if source == dest {
            return true;
        }
        // Is there already a path from dest back to source?
        let mut visited = vec![false; self.num_tracks];
        let mut stack = vec![dest];
        while let Some(track) = stack.pop() {
            if track == source {
                return true;
            }
            if std::mem::replace(&mut visited[track], true) {
                continue;
            }
            stack.extend(self.outgoing(track).map(|r| r.dest));
        }
        false
    }

    /// Parse a routing table. Every route is range checked; cycles are not (see
    /// [RoutingTable::find_cycle]).
    pub fn parse(text: &str, num_tracks: usize, max_routes: usize) -> Result<Self, RoutingError> {
        let mut table = Self::new(num_tracks, max_routes);
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line == "\\" {
                continue;
            }
            let error = || RoutingError::Parse {
                line: idx + 1,
                text: raw.to_owned(),
            };
            let fields: Vec<_> = line.split('|').map(str::trim).collect();
            let (track, slot, dest, kind, active) = match fields[..] {
                [track, slot, dest, kind] => (track, slot, dest, kind, "1"),
                [track, slot, dest, kind, active] => (track, slot, dest, kind, active),
                _ => return Err(error()),
            };
            let route = BusRoute {
                source: track.parse().map_err(|_| error())?,
                slot: slot.parse().map_err(|_| error())?,
                dest: dest.parse().map_err(|_| error())?,
                kind: RouteKind::from_code(kind).ok_or_else(error)?,
                active: match active {
                    "0" => false,
                    "1" => true,
                    _ => return Err(error()),
                },
            };
            table.set(route)?;
        }
        Ok(table)
    }

    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for route in self.routes() {
            let _ = write!(
                text,
                "{}|{}|{}|{}",
                route.source,
                route.slot,
                route.dest,
                route.kind.code()
            );
            if !route.active {
                text.push_str("|0");
            }
            text.push('\n');
        }
        text.push_str("\\\n");
        text
    }
}

#[cfg(test)]
mod tests {
    use super::{BusRoute, RouteKind, RoutingTable};
    use crate::RoutingError;

    fn diamond() -> RoutingTable {
        // 1 -> 2, 1 -> 3, 2 -> 4, 3 -> 4, 4 -> 0
        let mut table = RoutingTable::new(5, 2);
        for (source, slot, dest) in [(1, 0, 2), (1, 1, 3), (2, 0, 4), (3, 0, 4), (4, 0, 0)] {
            table
                .set(BusRoute::new(source, slot, dest, RouteKind::Audio))
                .unwrap();
        }
        table
    }

    #[test]
    fn depth_and_fan_in() {
        let table = diamond();
        assert_eq!(table.fan_in(), vec![1, 0, 1, 1, 2]);
        assert_eq!(table.depths(), Ok(vec![4, 0, 1, 1, 2]));
        assert!(table.find_cycle().is_none());
    }

    #[test]
    fn inactive_routes_are_ignored() {
        let mut table = diamond();
        table
            .set(BusRoute {
                active: false,
                ..BusRoute::new(0, 0, 1, RouteKind::Audio)
            })
            .unwrap();
        assert_eq!(table.fan_in()[1], 0);
        assert!(table.find_cycle().is_none());
    }

    #[test]
    fn detects_cycles() {
        let mut table = diamond();
        assert!(table.would_create_cycle(0, 1));
        assert!(!table.would_create_cycle(1, 0));
        table
            .set(BusRoute::new(0, 0, 1, RouteKind::Midi))
            .unwrap();
        let cycle = table.find_cycle().unwrap();
        assert!(cycle.contains(&0) && cycle.contains(&1) && cycle.contains(&4));
    }

    #[test]
    fn rejects_bad_routes() {
        let mut table = RoutingTable::new(2, 1);
        assert_eq!(
            table.set(BusRoute::new(0, 0, 0, RouteKind::Audio)),
            Err(RoutingError::SelfRoute(0))
        );
        assert!(matches!(
            table.set(BusRoute::new(0, 1, 1, RouteKind::Audio)),
            Err(RoutingError::SlotOutOfRange { slot: 1, .. })
        ));
        assert!(matches!(
            table.set(BusRoute::new(0, 0, 7, RouteKind::Audio)),
            Err(RoutingError::TrackOutOfRange { track: 7, .. })
        ));
    }

    #[test]
    fn text_format() {
        let text = "1|0|0|0\n2|0|1|1\n\n3|1|0|2|0\n\\\n";
        let table = RoutingTable::parse(text, 4, 2).unwrap();
        assert_eq!(table.get(2, 0).map(|r| r.kind), Some(RouteKind::Sidechain));
        assert_eq!(table.get(3, 1).map(|r| r.active), Some(false));
        assert_eq!(table.to_text(), "1|0|0|0\n2|0|1|1\n3|1|0|2|0\n\\\n");

        assert!(matches!(
            RoutingTable::parse("1|0|0|9\n", 4, 2),
            Err(RoutingError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            RoutingTable::parse("1|0|0|0\n1|0\n", 4, 2),
            Err(RoutingError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            RoutingTable::parse("9|0|0|0\n", 4, 2),
            Err(RoutingError::TrackOutOfRange { track: 9, .. })
        ));
    }
}
