//! Track scheduling: bus routing, the dependency graph derived from it and the worker pool that
//! renders a period across threads.
//!
//! ## Usage
//!
//! ```rs
//! use cadence_graph as graph;
//!
//! let table = graph::RoutingTable::parse("1|0|0|0\n2|0|0|0\n", 3, 2)?;
//! let pool = graph::WorkerPool::new(graph::Options { num_threads: 4, ..Default::default() });
//! let tracks = graph::TrackSet::new(graph::TrackConfig { num_tracks: 3, ..Default::default() })?;
//! let graph = graph::TrackGraph::build(&table, pool.num_threads());
//!
//! // Once per period, on the audio thread.
//! pool.run(&graph::Job { tracks: &tracks, graph: &graph, automation: &automation, period, output: 0 });
//! ```
mod error;
mod graph;
mod pool;
mod routing;
mod track;

pub use error::{Error, RoutingError};
pub use graph::TrackGraph;
pub use pool::{Counters, Diagnostic, Job, Options, WorkerPool};
pub use routing::{BusRoute, RouteKind, RoutingTable};
pub use track::{Bus, Fade, FadeState, Report, Slot, Status, Track, TrackConfig, TrackSet};
