//! Pluggable choking policy. Strategies are stored as
//! `Box<dyn ChokingStrategy>` rather than an enum, matching the corpus's
//! preference for runtime-pluggable backend traits over closed enum
//! dispatch. Each strategy owns whatever per-session bookkeeping it needs
//! (e.g. tit-for-tat's optimistic-unchoke cycle counters); the engine itself
//! carries no choking-specific state beyond the `choked`/`choking_us` flags
//! on each `FileSessionPeer`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::seq::IteratorRandom;
use swarmfile_core::TopHash;

use crate::session::PeerId;

/// A decision the strategy wants the engine to apply. The engine's own
/// choke/unchoke transition is idempotent, so strategies may emit the same
/// decision repeatedly without causing redundant wire traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChokeDecision {
    Choke(PeerId),
    Unchoke(PeerId),
}

/// Read-only view of one peer within a session, handed to strategies so
/// they never need a reference to the engine itself.
#[derive(Debug, Clone, Copy)]
pub struct PeerSnapshot {
    pub peer: PeerId,
    pub interested: bool,
    pub choked: bool,
    pub rate_up: f64,
    pub rate_down: f64,
}

/// Read-only view of one session, rebuilt by the engine before every
/// strategy call.
#[derive(Debug, Clone)]
pub struct SessionSnapshot<'a> {
    pub tophash: &'a TopHash,
    pub is_complete: bool,
    pub peers: Vec<PeerSnapshot>,
}

pub trait ChokingStrategy: Send {
    fn start(&mut self) {}
    fn stop(&mut self) {}

    /// Called whenever a peer's INTERESTED flag changes.
    fn peer_interested(&mut self, session: &SessionSnapshot<'_>, peer: PeerId) -> Vec<ChokeDecision>;

    /// Called on every engine tick; strategies that run on a cadence (like
    /// tit-for-tat) gate themselves against `period` using their own
    /// per-session last-fired bookkeeping.
    fn on_tick(
        &mut self,
        session: &SessionSnapshot<'_>,
        now: Instant,
        period: Duration,
    ) -> Vec<ChokeDecision> {
        let _ = (session, now, period);
        Vec::new()
    }
}

/// Unchoke any interested peer immediately; never chokes anyone back.
#[derive(Debug, Default)]
pub struct NaiveStrategy;

impl ChokingStrategy for NaiveStrategy {
    fn peer_interested(&mut self, session: &SessionSnapshot<'_>, peer: PeerId) -> Vec<ChokeDecision> {
        let Some(p) = session.peers.iter().find(|p| p.peer == peer) else {
            return Vec::new();
        };
        if p.interested {
            vec![ChokeDecision::Unchoke(peer)]
        } else {
            Vec::new()
        }
    }
}

struct PerSessionTitForTat {
    last_rechoke: Option<Instant>,
    cycle: u32,
    optimistic: Vec<PeerId>,
}

impl Default for PerSessionTitForTat {
    fn default() -> Self {
        Self {
            last_rechoke: None,
            cycle: 0,
            optimistic: Vec::new(),
        }
    }
}

/// Classic BitTorrent-style tit-for-tat: regular unchokes ranked by
/// rate (download rate while leeching, upload rate while seeding), plus a
/// periodically-refreshed optimistic-unchoke set that gives new peers a
/// chance regardless of measured rate.
pub struct TitForTatStrategy {
    regular_unchoke_count: usize,
    optimistic_unchoke_count: usize,
    optimistic_refresh_cycles: u32,
    sessions: HashMap<TopHash, PerSessionTitForTat>,
}

impl TitForTatStrategy {
    pub fn new(
        regular_unchoke_count: usize,
        optimistic_unchoke_count: usize,
        optimistic_refresh_cycles: u32,
    ) -> Self {
        Self {
            regular_unchoke_count,
            optimistic_unchoke_count,
            optimistic_refresh_cycles,
            sessions: HashMap::new(),
        }
    }
}

impl ChokingStrategy for TitForTatStrategy {
    fn peer_interested(&mut self, _session: &SessionSnapshot<'_>, _peer: PeerId) -> Vec<ChokeDecision> {
        // Tit-for-tat only rechokes on its own cadence via `on_tick`.
        Vec::new()
    }

    fn on_tick(
        &mut self,
        session: &SessionSnapshot<'_>,
        now: Instant,
        period: Duration,
    ) -> Vec<ChokeDecision> {
        let state = self
            .sessions
            .entry(session.tophash.clone())
            .or_insert_with(PerSessionTitForTat::default);

        let should_fire = match state.last_rechoke {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= period,
        };
        if !should_fire {
            return Vec::new();
        }
        state.last_rechoke = Some(now);
        state.cycle += 1;

        let interested: Vec<&PeerSnapshot> = session.peers.iter().filter(|p| p.interested).collect();

        let key = |p: &PeerSnapshot| -> f64 {
            if session.is_complete {
                p.rate_up
            } else {
                p.rate_down
            }
        };

        let mut ranked = interested.clone();
        ranked.sort_by(|a, b| key(b).partial_cmp(&key(a)).unwrap_or(std::cmp::Ordering::Equal));
        let regular: Vec<PeerId> = ranked
            .iter()
            .take(self.regular_unchoke_count)
            .map(|p| p.peer)
            .collect();

        let refresh_optimistic = state.optimistic.is_empty()
            || state.cycle % self.optimistic_refresh_cycles.max(1) == 0;
        if refresh_optimistic {
            let remaining: Vec<PeerId> = interested
                .iter()
                .map(|p| p.peer)
                .filter(|p| !regular.contains(p))
                .collect();
            let mut rng = rand::rng();
            state.optimistic = remaining
                .into_iter()
                .choose_multiple(&mut rng, self.optimistic_unchoke_count);
        } else {
            // Keep only peers still interested; drop ones that left.
            let interested_ids: Vec<PeerId> = interested.iter().map(|p| p.peer).collect();
            state.optimistic.retain(|p| interested_ids.contains(p));
        }

        let unchoke_set: std::collections::HashSet<PeerId> =
            regular.iter().copied().chain(state.optimistic.iter().copied()).collect();

        let mut decisions = Vec::new();
        for p in &session.peers {
            if unchoke_set.contains(&p.peer) {
                if p.choked {
                    decisions.push(ChokeDecision::Unchoke(p.peer));
                }
            } else if !p.choked {
                decisions.push(ChokeDecision::Choke(p.peer));
            }
        }
        decisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tophash() -> TopHash {
        TopHash::of(b"session")
    }

    fn snapshot(peers: Vec<PeerSnapshot>, is_complete: bool, th: &TopHash) -> SessionSnapshot<'_> {
        SessionSnapshot {
            tophash: th,
            is_complete,
            peers,
        }
    }

    #[test]
    fn test_naive_unchokes_interested_peer() {
        let th = tophash();
        let snap = snapshot(
            vec![PeerSnapshot {
                peer: 1,
                interested: true,
                choked: true,
                rate_up: 0.0,
                rate_down: 0.0,
            }],
            false,
            &th,
        );
        let mut s = NaiveStrategy;
        assert_eq!(s.peer_interested(&snap, 1), vec![ChokeDecision::Unchoke(1)]);
    }

    #[test]
    fn test_naive_ignores_uninterested_peer() {
        let th = tophash();
        let snap = snapshot(
            vec![PeerSnapshot {
                peer: 1,
                interested: false,
                choked: true,
                rate_up: 0.0,
                rate_down: 0.0,
            }],
            false,
            &th,
        );
        let mut s = NaiveStrategy;
        assert!(s.peer_interested(&snap, 1).is_empty());
    }

    #[test]
    fn test_tit_for_tat_unchokes_top_rate_peers_and_gates_on_period() {
        let th = tophash();
        let peers = (0..5)
            .map(|i| PeerSnapshot {
                peer: i,
                interested: true,
                choked: true,
                rate_up: 0.0,
                rate_down: (5 - i) as f64,
            })
            .collect();
        let snap = snapshot(peers, false, &th);
        let mut s = TitForTatStrategy::new(2, 1, 3);
        let t0 = Instant::now();
        let period = Duration::from_secs(10);

        let decisions = s.on_tick(&snap, t0, period);
        let unchoked: Vec<PeerId> = decisions
            .iter()
            .filter_map(|d| match d {
                ChokeDecision::Unchoke(p) => Some(*p),
                _ => None,
            })
            .collect();
        // Two regular unchokes by highest rate_down (peers 0 and 1), plus one
        // optimistic pick from the remainder.
        assert!(unchoked.contains(&0));
        assert!(unchoked.contains(&1));
        assert_eq!(unchoked.len(), 3);

        // A second tick inside the same period must not refire.
        let again = s.on_tick(&snap, t0 + Duration::from_secs(2), period);
        assert!(again.is_empty());
    }
}
