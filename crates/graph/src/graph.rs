use crate::{BusRoute, RoutingTable};

/// The scheduling view of a routing table: how many producers each track waits for, who it
/// delivers to, and the order each worker scans tracks in.
#[derive(Clone, Debug)]
pub struct TrackGraph {
    bus_count: Box<[u32]>,
    outgoing: Box<[Box<[BusRoute]>]>,
    order: Box<[usize]>,
    starts: Box<[usize]>,
}

impl TrackGraph {
    /// Build the graph for `num_workers` workers (the calling thread included).
    ///
    /// The table must be acyclic, see [RoutingTable::find_cycle]. A cyclic table still builds,
    /// ordered by track id, and the tracks on the cycle end up giving up on their bus wait
    /// every period.
    pub fn build(table: &RoutingTable, num_workers: usize) -> Self {
        let num_tracks = table.num_tracks();
        let depth = table.depths().unwrap_or_else(|_| vec![0; num_tracks]);

        // Producers before consumers. The sort is stable so equal depths keep id order.
        let mut order: Vec<usize> = (0..num_tracks).collect();
        order.sort_by_key(|track| depth[*track]);

        let num_workers = num_workers.max(1);
        let starts = (0..num_workers)
            .map(|worker| worker * num_tracks / num_workers)
            .collect();
        let outgoing = (0..num_tracks)
            .map(|track| table.outgoing(track).copied().collect())
            .collect();

        Self {
            bus_count: table.fan_in().into_boxed_slice(),
            outgoing,
            order: order.into_boxed_slice(),
            starts,
        }
    }

    /// A graph with no routes at all.
    pub fn unrouted(num_tracks: usize, num_workers: usize) -> Self {
        Self::build(&RoutingTable::new(num_tracks, 0), num_workers)
    }

    pub fn num_tracks(&self) -> usize {
        self.bus_count.len()
    }

    pub fn num_workers(&self) -> usize {
        self.starts.len()
    }

    /// Number of active routes into `track`.
    pub fn bus_count(&self, track: usize) -> u32 {
        self.bus_count.get(track).copied().unwrap_or(0)
    }

    pub fn outgoing(&self, track: usize) -> &[BusRoute] {
        self.outgoing.get(track).map_or(&[][..], |routes| &routes[..])
    }

    /// Every track ordered by routing depth.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// The depth order rotated to start at `worker`'s slice.
    pub fn worker_order(&self, worker: usize) -> impl Iterator<Item = usize> + '_ {
        let start = self.starts[worker % self.starts.len()];
        let (head, tail) = self.order.split_at(start);
        tail.iter().chain(head).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::TrackGraph;
    use crate::RoutingTable;

    #[test]
    fn orders_producers_first() {
        let table = RoutingTable::parse("1|0|2|0\n1|1|3|0\n2|0|4|0\n3|0|4|0\n4|0|0|0\n", 5, 2)
            .unwrap();
        let graph = TrackGraph::build(&table, 2);
        assert_eq!(graph.order(), &[1, 2, 3, 4, 0]);
        assert_eq!(
            (0..5).map(|t| graph.bus_count(t)).collect::<Vec<_>>(),
            vec![1, 0, 1, 1, 2]
        );
        assert_eq!(graph.outgoing(1).len(), 2);
        assert!(graph.outgoing(0).is_empty());

        let first: Vec<_> = graph.worker_order(0).collect();
        let second: Vec<_> = graph.worker_order(1).collect();
        assert_eq!(first, vec![1, 2, 3, 4, 0]);
        assert_eq!(second, vec![3, 4, 0, 1, 2]);
    }

    #[test]
    fn unrouted_tracks_never_wait() {
        let graph = TrackGraph::unrouted(3, 8);
        assert_eq!(graph.num_workers(), 8);
        assert!((0..3).all(|t| graph.bus_count(t) == 0));
        // More workers than tracks: every rotation is still a permutation.
        for worker in 0..8 {
            let mut order: Vec<_> = graph.worker_order(worker).collect();
            order.sort();
            assert_eq!(order, vec![0, 1, 2]);
        }
    }
}
