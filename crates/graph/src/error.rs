#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("line {line}: malformed route {text:?}")]
    Parse { line: usize, text: String },
    #[error("track {track} out of range ({num_tracks} tracks)")]
    TrackOutOfRange { track: usize, num_tracks: usize },
    #[error("send slot {slot} out of range ({max_routes} slots)")]
    SlotOutOfRange { slot: usize, max_routes: usize },
    #[error("track {0} routes into itself")]
    SelfRoute(usize),
    #[error("routing cycle through tracks {0:?}")]
    Cycle(Vec<usize>),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("track {track} out of range ({num_tracks} tracks)")]
    TrackOutOfRange { track: usize, num_tracks: usize },
    #[error("plugin slot {slot} out of range ({max_slots} slots)")]
    SlotOutOfRange { slot: usize, max_slots: usize },
    #[error("buffer arena exhausted: {needed} channels needed, {available} available")]
    ArenaExhausted { needed: usize, available: usize },
    /// Sizes are `(tracks, routes per track)`.
    #[error("routing table is sized {found:?}, expected {expected:?}")]
    RoutingSize {
        expected: (usize, usize),
        found: (usize, usize),
    },
}
