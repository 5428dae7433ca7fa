use std::time::Duration;

/// Which `ChokingStrategy` implementation `SwarmEngine::new` should build.
/// Selecting `TitForTat` pulls `regular_unchoke_count`/`optimistic_unchoke_count`/
/// `optimistic_refresh_cycles` from this same config. To run a strategy that
/// doesn't fit this small menu, build it directly and construct the engine
/// with `SwarmEngine::with_strategies` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChokingStrategyKind {
    #[default]
    Naive,
    TitForTat,
}

/// Which `PieceSelectionStrategy` implementation `SwarmEngine::new` should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PieceSelectionStrategyKind {
    #[default]
    Random,
    RarestFirst,
    EndGame,
    Bep3,
}

/// Every tunable knob named in the external interfaces, gathered into one
/// struct constructed programmatically by the embedder. No file or
/// environment-variable parsing lives here; that belongs to the host
/// application.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Fixed protocol piece size. The last piece of any content may be shorter.
    pub piece_size: u32,
    /// Size of a single REQUEST/PIECE exchange. Defaults to `piece_size` when unset.
    pub request_size: Option<u32>,
    pub max_requests_per_peer: usize,
    pub rate_window_period: Duration,
    pub choking_period: Duration,
    pub regular_unchoke_count: usize,
    pub optimistic_unchoke_count: usize,
    pub optimistic_refresh_cycles: u32,
    /// Credit rate samples at piece verification rather than at wire arrival.
    pub calc_rate_after_verify: bool,
    pub choking_strategy: ChokingStrategyKind,
    pub piece_selection_strategy: PieceSelectionStrategyKind,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            piece_size: 1 << 19,
            request_size: None,
            max_requests_per_peer: 3,
            rate_window_period: Duration::from_secs(20),
            choking_period: Duration::from_secs(10),
            regular_unchoke_count: 3,
            optimistic_unchoke_count: 1,
            optimistic_refresh_cycles: 3,
            calc_rate_after_verify: true,
            choking_strategy: ChokingStrategyKind::default(),
            piece_selection_strategy: PieceSelectionStrategyKind::default(),
        }
    }
}

impl SwarmConfig {
    pub fn request_size(&self) -> u32 {
        self.request_size.unwrap_or(self.piece_size)
    }
}
