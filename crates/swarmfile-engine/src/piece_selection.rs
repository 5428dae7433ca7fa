//! Pluggable piece-selection policy, invoked by the engine's interest
//! recalculation to choose which brand-new pieces to start requesting from
//! a peer. Like `ChokingStrategy`, stored as a `Box<dyn PieceSelectionStrategy>`.

use std::collections::{BTreeSet, HashMap};

use rand::seq::SliceRandom;

use crate::pending_piece::PendingPiece;
use crate::session::{FileSession, PeerId};

/// Read-only context handed to a piece-selection strategy for one
/// `(session, peer)` interest-recalc pass.
pub struct PieceSelectionContext<'a> {
    pub session: &'a FileSession,
    pub pending: &'a HashMap<swarmfile_core::PieceHash, PendingPiece>,
    pub peer: PeerId,
    pub peer_pieces: &'a BTreeSet<u32>,
    /// `peer_pieces \ session.haveset() \ already-pending`: pieces nobody is
    /// fetching yet that this peer could serve.
    pub available: BTreeSet<u32>,
    /// `peer_pieces \ session.haveset()`, including pieces already pending.
    pub wanted: BTreeSet<u32>,
}

impl<'a> PieceSelectionContext<'a> {
    pub fn build(
        session: &'a FileSession,
        pending: &'a HashMap<swarmfile_core::PieceHash, PendingPiece>,
        peer: PeerId,
        peer_pieces: &'a BTreeSet<u32>,
    ) -> Self {
        let have = session.haveset();
        let tophash = session.top_hash();
        let wanted: BTreeSet<u32> = peer_pieces.difference(have).copied().collect();
        let is_pending = |piece_no: u32| -> bool {
            let Some(hash) = piece_hash_for(session, piece_no) else {
                return false;
            };
            pending
                .get(hash)
                .is_some_and(|pp| pp.sessions().contains(&(tophash.clone(), piece_no)))
        };
        let available: BTreeSet<u32> = wanted.iter().copied().filter(|&pn| !is_pending(pn)).collect();
        Self {
            session,
            pending,
            peer,
            peer_pieces,
            available,
            wanted,
        }
    }

    /// Count, among this session's currently joined peers, how many claim to
    /// have `piece_no` — the frequency rarest-first ranks by.
    pub fn frequency(&self, piece_no: u32) -> usize {
        self.session
            .peers()
            .values()
            .filter(|p| p.pieces.contains(&piece_no))
            .count()
    }
}

fn piece_hash_for(session: &FileSession, piece_no: u32) -> Option<&swarmfile_core::PieceHash> {
    session.hashed_file().hashes().get(piece_no as usize)
}

pub trait PieceSelectionStrategy: Send {
    fn pick(&mut self, ctx: &PieceSelectionContext<'_>, count: usize) -> Vec<u32>;
}

/// Uniform random sample of `available`.
#[derive(Debug, Default)]
pub struct RandomStrategy;

impl PieceSelectionStrategy for RandomStrategy {
    fn pick(&mut self, ctx: &PieceSelectionContext<'_>, count: usize) -> Vec<u32> {
        let mut candidates: Vec<u32> = ctx.available.iter().copied().collect();
        let mut rng = rand::rng();
        candidates.shuffle(&mut rng);
        candidates.truncate(count);
        candidates
    }
}

/// Shuffle `available` to break ties fairly, then return the `count` least
/// common pieces among this session's peers.
#[derive(Debug, Default)]
pub struct RarestFirstStrategy;

impl PieceSelectionStrategy for RarestFirstStrategy {
    fn pick(&mut self, ctx: &PieceSelectionContext<'_>, count: usize) -> Vec<u32> {
        let mut candidates: Vec<u32> = ctx.available.iter().copied().collect();
        let mut rng = rand::rng();
        candidates.shuffle(&mut rng);
        candidates.sort_by_key(|&pn| ctx.frequency(pn));
        candidates.truncate(count);
        candidates
    }
}

/// Once `available` is empty, duplicate-request outstanding subpieces of
/// pending pieces this peer has but hasn't been asked for yet, to speed up
/// tail latency.
#[derive(Debug, Default)]
pub struct EndGameStrategy;

impl PieceSelectionStrategy for EndGameStrategy {
    fn pick(&mut self, ctx: &PieceSelectionContext<'_>, count: usize) -> Vec<u32> {
        if !ctx.available.is_empty() {
            return Vec::new();
        }
        let tophash = ctx.session.top_hash();
        let mut candidates: Vec<u32> = ctx
            .wanted
            .iter()
            .copied()
            .filter(|&pn| {
                let Some(hash) = piece_hash_for(ctx.session, pn) else {
                    return false;
                };
                let Some(pp) = ctx.pending.get(hash) else {
                    return false;
                };
                pp.sessions().contains(&(tophash.clone(), pn)) && !pp.peer_has_outstanding_request(&ctx.peer)
            })
            .collect();
        candidates.truncate(count);
        candidates
    }
}

/// BEP3 composite: random while nothing is complete, end-game once nothing
/// new is available, rarest-first otherwise.
#[derive(Default)]
pub struct Bep3Strategy {
    random: RandomStrategy,
    rarest: RarestFirstStrategy,
    end_game: EndGameStrategy,
}

impl PieceSelectionStrategy for Bep3Strategy {
    fn pick(&mut self, ctx: &PieceSelectionContext<'_>, count: usize) -> Vec<u32> {
        if ctx.session.haveset().is_empty() {
            self.random.pick(ctx, count)
        } else if ctx.available.is_empty() {
            self.end_game.pick(ctx, count)
        } else {
            self.rarest.pick(ctx, count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashed_file::HashedFile;
    use std::fs::File;
    use std::io::Write as _;

    fn session_with(data: &[u8], piece_size: u32) -> (tempfile::TempDir, FileSession) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.bin");
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        let seed = HashedFile::from_complete_file(&path, piece_size).unwrap();
        let metainfo = seed.metainfo();
        let dl_path = dir.path().join("download.part");
        let hf = HashedFile::from_metainfo_new(&metainfo, &dl_path, piece_size).unwrap();
        (dir, FileSession::new(hf))
    }

    #[test]
    fn test_random_picks_from_available_only() {
        let (_dir, mut session) = session_with(b"aaaaabbbbbccccc", 5);
        session.upsert_peer_bitmap(1, [0, 1, 2].into_iter().collect());
        let peer_pieces = session.peer(&1).unwrap().pieces.clone();
        let pending = HashMap::new();
        let ctx = PieceSelectionContext::build(&session, &pending, 1, &peer_pieces);
        assert_eq!(ctx.available, [0, 1, 2].into_iter().collect());

        let mut s = RandomStrategy;
        let picked = s.pick(&ctx, 2);
        assert_eq!(picked.len(), 2);
        for p in picked {
            assert!(ctx.available.contains(&p));
        }
    }

    #[test]
    fn test_rarest_first_orders_by_ascending_frequency() {
        let (_dir, mut session) = session_with(b"aaaaabbbbbccccc", 5);
        session.upsert_peer_bitmap(1, [0, 1, 2].into_iter().collect());
        session.upsert_peer_bitmap(2, [0].into_iter().collect());
        let peer_pieces = session.peer(&1).unwrap().pieces.clone();
        let pending = HashMap::new();
        let ctx = PieceSelectionContext::build(&session, &pending, 1, &peer_pieces);

        let mut s = RarestFirstStrategy;
        let picked = s.pick(&ctx, 3);
        // Piece 0 is held by both peers (frequency 2); pieces 1 and 2 are
        // held by peer 1 only (frequency 1), so they must sort before 0.
        assert_eq!(picked.last(), Some(&0));
    }

    #[test]
    fn test_end_game_only_fires_when_available_is_empty() {
        let (_dir, mut session) = session_with(b"aaaaabbbbb", 5);
        session.upsert_peer_bitmap(1, [0, 1].into_iter().collect());
        let peer_pieces = session.peer(&1).unwrap().pieces.clone();

        let piece_hash = session.hashed_file().piece_hash(0).clone();
        let mut pp = PendingPiece::new(piece_hash.clone(), 5);
        pp.add_session(session.top_hash().clone(), 0);
        pp.register_request(0, 5, 2); // requested from peer 2, not peer 1
        let mut pending = HashMap::new();
        pending.insert(piece_hash, pp);

        let ctx = PieceSelectionContext::build(&session, &pending, 1, &peer_pieces);
        // Piece 1 is still genuinely available, so end-game must not fire.
        assert!(ctx.available.contains(&1));
        let mut s = EndGameStrategy;
        assert!(s.pick(&ctx, 5).is_empty());
    }

    #[test]
    fn test_end_game_duplicates_unrequested_peer() {
        let (_dir, mut session) = session_with(b"aaaaa", 5);
        session.upsert_peer_bitmap(1, [0].into_iter().collect());
        let peer_pieces = session.peer(&1).unwrap().pieces.clone();

        let piece_hash = session.hashed_file().piece_hash(0).clone();
        let mut pp = PendingPiece::new(piece_hash.clone(), 5);
        pp.add_session(session.top_hash().clone(), 0);
        pp.register_request(0, 5, 2); // requested from peer 2 only
        let mut pending = HashMap::new();
        pending.insert(piece_hash, pp);

        let ctx = PieceSelectionContext::build(&session, &pending, 1, &peer_pieces);
        assert!(ctx.available.is_empty());
        let mut s = EndGameStrategy;
        assert_eq!(s.pick(&ctx, 5), vec![0]);
    }

    #[test]
    fn test_bep3_uses_random_before_any_piece_is_complete() {
        let (_dir, mut session) = session_with(b"aaaaabbbbb", 5);
        session.upsert_peer_bitmap(1, [0, 1].into_iter().collect());
        let peer_pieces = session.peer(&1).unwrap().pieces.clone();
        let pending = HashMap::new();
        let ctx = PieceSelectionContext::build(&session, &pending, 1, &peer_pieces);
        assert!(session.haveset().is_empty());

        let mut s = Bep3Strategy::default();
        let picked = s.pick(&ctx, 2);
        assert_eq!(picked.len(), 2);
    }
}
