//! In-flight piece assembly. A `PendingPiece` is keyed by piece hash rather
//! than by a pointer, so the same piece hash arriving through different
//! sessions naturally shares one assembly (the "two sessions sharing a
//! piece hash" scenario) without any cyclic ownership between session and
//! pending-piece records.

use std::collections::{BTreeMap, BTreeSet};

use swarmfile_core::{PieceHash, TopHash};

use crate::session::PeerId;

/// Outcome of handing a received subpiece to `PendingPiece::accept_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
    UnknownOffset,
    WrongLength,
    AlreadyDone,
}

/// One byte-range slice of the piece, the granularity of REQUEST/PIECE.
#[derive(Debug, Clone)]
pub struct Subpiece {
    pub length: u32,
    pub done: bool,
    pub requested_peers: BTreeSet<PeerId>,
    /// Who the data that completed this subpiece arrived from, used to
    /// attribute rate credit correctly even when several peers contribute
    /// different subpieces of the same piece.
    pub received_from: Option<PeerId>,
}

pub struct PendingPiece {
    piece_hash: PieceHash,
    length: u32,
    sessions: BTreeSet<(TopHash, u32)>,
    subpieces: BTreeMap<u32, Subpiece>,
}

impl PendingPiece {
    pub fn new(piece_hash: PieceHash, length: u32) -> Self {
        Self {
            piece_hash,
            length,
            sessions: BTreeSet::new(),
            subpieces: BTreeMap::new(),
        }
    }

    pub fn piece_hash(&self) -> &PieceHash {
        &self.piece_hash
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn sessions(&self) -> &BTreeSet<(TopHash, u32)> {
        &self.sessions
    }

    pub fn add_session(&mut self, tophash: TopHash, piece_no: u32) {
        self.sessions.insert((tophash, piece_no));
    }

    pub fn remove_session(&mut self, tophash: &TopHash, piece_no: u32) {
        self.sessions.remove(&(tophash.clone(), piece_no));
    }

    /// No session wants this piece any more; the caller should drop it.
    pub fn is_orphaned(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every `(tophash, _)` membership for a session being torn down,
    /// regardless of which piece index it joined under.
    pub fn remove_all_for_session(&mut self, tophash: &TopHash) {
        self.sessions.retain(|(t, _)| t != tophash);
    }

    pub fn subpieces(&self) -> &BTreeMap<u32, Subpiece> {
        &self.subpieces
    }

    /// Register that `peer` was asked for `(offset, length)`, creating the
    /// subpiece record on first request.
    pub fn register_request(&mut self, offset: u32, length: u32, peer: PeerId) {
        self.subpieces
            .entry(offset)
            .or_insert_with(|| Subpiece {
                length,
                done: false,
                requested_peers: BTreeSet::new(),
                received_from: None,
            })
            .requested_peers
            .insert(peer);
    }

    /// Drop `peer` from every subpiece's requester set, pruning any subpiece
    /// that is left with no requesters and is not yet done.
    pub fn remove_peer_requests(&mut self, peer: &PeerId) {
        let mut to_prune = Vec::new();
        for (&offset, sp) in self.subpieces.iter_mut() {
            sp.requested_peers.remove(peer);
            if !sp.done && sp.requested_peers.is_empty() {
                to_prune.push(offset);
            }
        }
        for offset in to_prune {
            self.subpieces.remove(&offset);
        }
    }

    /// Whether `peer` has ever been asked for any part of this piece.
    pub fn peer_has_outstanding_request(&self, peer: &PeerId) -> bool {
        self.subpieces
            .values()
            .any(|sp| sp.requested_peers.contains(peer))
    }

    /// Scan subpieces in offset order and return the first uncovered gap. If
    /// `include_pending`, also return the first not-yet-done existing
    /// subpiece at its recorded offset/length before it would otherwise be
    /// skipped as "already covered". Returns `None` once the piece is fully
    /// covered (or, with `include_pending`, fully covered-or-in-flight).
    pub fn pick_subpiece(&self, include_pending: bool, max_len: u32) -> Option<(u32, u32)> {
        let mut cursor = 0u32;
        for (&offset, sp) in self.subpieces.iter() {
            if offset > cursor {
                let gap_len = (offset - cursor).min(max_len.max(1));
                return Some((cursor, gap_len));
            }
            if include_pending && !sp.done {
                return Some((offset, sp.length));
            }
            cursor = cursor.max(offset + sp.length);
        }
        if cursor < self.length {
            let gap_len = (self.length - cursor).min(max_len.max(1));
            return Some((cursor, gap_len));
        }
        None
    }

    pub fn is_complete(&self) -> bool {
        self.pick_subpiece(true, u32::MAX).is_none()
    }

    /// Validate and accept arrived data for `offset`. Does not write the
    /// bytes anywhere; the engine is responsible for propagating accepted
    /// data to every joined session's backing file.
    pub fn accept_data(&mut self, offset: u32, data_len: u32, from: PeerId) -> AcceptOutcome {
        let Some(sp) = self.subpieces.get_mut(&offset) else {
            return AcceptOutcome::UnknownOffset;
        };
        if sp.done {
            return AcceptOutcome::AlreadyDone;
        }
        if sp.length != data_len {
            return AcceptOutcome::WrongLength;
        }
        sp.done = true;
        sp.received_from = Some(from);
        AcceptOutcome::Accepted
    }

    /// Total length of subpieces marked done, for test/debug assertions that
    /// the cover invariant holds once complete.
    pub fn done_length(&self) -> u32 {
        self.subpieces
            .values()
            .filter(|sp| sp.done)
            .map(|sp| sp.length)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tophash(tag: &str) -> TopHash {
        TopHash::of(tag.as_bytes())
    }

    #[test]
    fn test_pick_subpiece_finds_first_gap() {
        let pp = PendingPiece::new(PieceHash::of(b"x"), 100);
        assert_eq!(pp.pick_subpiece(false, 40), Some((0, 40)));
    }

    #[test]
    fn test_pick_subpiece_skips_covered_region_without_include_pending() {
        let mut pp = PendingPiece::new(PieceHash::of(b"x"), 100);
        pp.register_request(0, 40, 1);
        // Without include_pending, the requested-but-not-done region at [0,40)
        // is treated as covered; the next gap starts at 40.
        assert_eq!(pp.pick_subpiece(false, 40), Some((40, 40)));
    }

    #[test]
    fn test_pick_subpiece_include_pending_returns_not_done_offset() {
        let mut pp = PendingPiece::new(PieceHash::of(b"x"), 100);
        pp.register_request(0, 40, 1);
        assert_eq!(pp.pick_subpiece(true, 40), Some((0, 40)));
    }

    #[test]
    fn test_complete_when_all_subpieces_done() {
        let mut pp = PendingPiece::new(PieceHash::of(b"x"), 10);
        pp.register_request(0, 10, 1);
        assert!(!pp.is_complete());
        assert_eq!(pp.accept_data(0, 10, 1), AcceptOutcome::Accepted);
        assert!(pp.is_complete());
        assert_eq!(pp.done_length(), 10);
    }

    #[test]
    fn test_accept_data_rejects_unknown_wrong_length_and_duplicate() {
        let mut pp = PendingPiece::new(PieceHash::of(b"x"), 10);
        pp.register_request(0, 10, 1);
        assert_eq!(pp.accept_data(5, 10, 1), AcceptOutcome::UnknownOffset);
        assert_eq!(pp.accept_data(0, 3, 1), AcceptOutcome::WrongLength);
        assert_eq!(pp.accept_data(0, 10, 1), AcceptOutcome::Accepted);
        assert_eq!(pp.accept_data(0, 10, 1), AcceptOutcome::AlreadyDone);
    }

    #[test]
    fn test_remove_peer_requests_prunes_undone_orphans() {
        let mut pp = PendingPiece::new(PieceHash::of(b"x"), 20);
        pp.register_request(0, 10, 1);
        pp.register_request(10, 10, 2);
        pp.remove_peer_requests(&1);
        // offset 0 had only peer 1 requesting and wasn't done: pruned, so it
        // reappears as a gap.
        assert_eq!(pp.pick_subpiece(false, 20), Some((0, 10)));
        assert!(pp.peer_has_outstanding_request(&2));
        assert!(!pp.peer_has_outstanding_request(&1));
    }

    #[test]
    fn test_remove_peer_requests_keeps_done_subpiece() {
        let mut pp = PendingPiece::new(PieceHash::of(b"x"), 10);
        pp.register_request(0, 10, 1);
        pp.accept_data(0, 10, 1);
        pp.remove_peer_requests(&1);
        assert!(pp.is_complete());
    }

    #[test]
    fn test_session_membership_tracks_orphan_state() {
        let mut pp = PendingPiece::new(PieceHash::of(b"x"), 10);
        assert!(pp.is_orphaned());
        pp.add_session(tophash("s1"), 3);
        pp.add_session(tophash("s2"), 3);
        assert!(!pp.is_orphaned());
        pp.remove_session(&tophash("s1"), 3);
        assert!(!pp.is_orphaned());
        pp.remove_session(&tophash("s2"), 3);
        assert!(pp.is_orphaned());
    }
}
