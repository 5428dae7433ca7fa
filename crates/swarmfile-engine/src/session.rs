//! Per-content session state (`FileSession`) and per-(session, peer) state
//! (`FileSessionPeer`). A session owns its `HashedFile`; peer entries are
//! removed synchronously on disconnect rather than relying on any kind of
//! weak-reference expiry, since the engine is the sole owner of both maps.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use swarmfile_core::{PieceHash, TopHash};

use crate::hashed_file::HashedFile;
use crate::rate::RateTracker;

/// Opaque handle for a peer connection, assigned by the host application.
/// The swarm core never interprets this value; it only uses it as a map key.
pub type PeerId = u64;

/// Outstanding requests this side has made of one peer, grouped by piece:
/// `piece_no -> (piece_hash, {offset -> length})`.
pub type PeerRequests = HashMap<u32, (PieceHash, BTreeMap<u32, u32>)>;

/// Per-(session, peer) protocol state.
#[derive(Debug, Clone)]
pub struct FileSessionPeer {
    /// Piece indices the remote peer claims to have.
    pub pieces: BTreeSet<u32>,
    /// We are refusing to serve this peer.
    pub choked: bool,
    /// This peer wants something of ours.
    pub interested: bool,
    /// This peer refuses to serve us.
    pub choking_us: bool,
    /// We want something of this peer's.
    pub interesting_us: bool,
    pub requests: PeerRequests,
    pub sent: RateTracker,
    pub recvd: RateTracker,
    pub rate_up: f64,
    pub rate_down: f64,
}

impl Default for FileSessionPeer {
    fn default() -> Self {
        Self {
            pieces: BTreeSet::new(),
            choked: true,
            interested: false,
            choking_us: true,
            interesting_us: false,
            requests: HashMap::new(),
            sent: RateTracker::new(),
            recvd: RateTracker::new(),
            rate_up: 0.0,
            rate_down: 0.0,
        }
    }
}

impl FileSessionPeer {
    pub fn new(pieces: BTreeSet<u32>) -> Self {
        Self {
            pieces,
            ..Self::default()
        }
    }

    /// Total outstanding subpiece requests across all pieces, the quantity
    /// `max_requests_per_peer` bounds.
    pub fn req_count(&self) -> usize {
        self.requests.values().map(|(_, offsets)| offsets.len()).sum()
    }
}

/// One content-distribution session: the backing `HashedFile`, the peers
/// that have joined it, and completion callbacks fired exactly once.
pub struct FileSession {
    hashed_file: HashedFile,
    peers: HashMap<PeerId, FileSessionPeer>,
    completed: bool,
    on_complete: Vec<Box<dyn FnMut() + Send>>,
}

impl FileSession {
    pub fn new(hashed_file: HashedFile) -> Self {
        let completed = hashed_file.is_complete();
        Self {
            hashed_file,
            peers: HashMap::new(),
            completed,
            on_complete: Vec::new(),
        }
    }

    pub fn top_hash(&self) -> &TopHash {
        self.hashed_file.top_hash()
    }

    pub fn hashed_file(&self) -> &HashedFile {
        &self.hashed_file
    }

    pub fn hashed_file_mut(&mut self) -> &mut HashedFile {
        &mut self.hashed_file
    }

    pub fn piece_count(&self) -> u32 {
        self.hashed_file.piece_count()
    }

    pub fn haveset(&self) -> &BTreeSet<u32> {
        self.hashed_file.haveset()
    }

    pub fn is_complete(&self) -> bool {
        self.hashed_file.is_complete()
    }

    pub fn peers(&self) -> &HashMap<PeerId, FileSessionPeer> {
        &self.peers
    }

    pub fn peer(&self, peer: &PeerId) -> Option<&FileSessionPeer> {
        self.peers.get(peer)
    }

    pub fn peer_mut(&mut self, peer: &PeerId) -> Option<&mut FileSessionPeer> {
        self.peers.get_mut(peer)
    }

    /// Every joined peer, mutably, for bulk bookkeeping passes (rate refresh,
    /// clearing completed requests) that touch all of them at once.
    pub fn peers_mut(&mut self) -> impl Iterator<Item = &mut FileSessionPeer> {
        self.peers.values_mut()
    }

    /// Create or update the `FileSessionPeer` entry with a freshly decoded
    /// bitmap. Returns the entry for the caller to run interest recalc on.
    pub fn upsert_peer_bitmap(&mut self, peer: PeerId, pieces: BTreeSet<u32>) {
        self.peers
            .entry(peer)
            .and_modify(|p| p.pieces = pieces.clone())
            .or_insert_with(|| FileSessionPeer::new(pieces));
    }

    /// Remove a peer's state synchronously; returns it so the caller can
    /// unwind its outstanding requests against the pending-piece registry.
    pub fn remove_peer(&mut self, peer: &PeerId) -> Option<FileSessionPeer> {
        self.peers.remove(peer)
    }

    /// Register a completion callback, fired exactly once the first time
    /// `mark_have` brings `haveset` to full coverage.
    pub fn on_complete(&mut self, cb: impl FnMut() + Send + 'static) {
        self.on_complete.push(Box::new(cb));
    }

    /// Record a piece as verified-present. Returns `true` the one time this
    /// call transitions the session from incomplete to complete, at which
    /// point the caller should expect `fire_completion_callbacks` to run.
    pub fn mark_have(&mut self, piece_no: u32) -> bool {
        self.hashed_file.mark_have(piece_no);
        if !self.completed && self.hashed_file.is_complete() {
            self.completed = true;
            return true;
        }
        false
    }

    pub fn fire_completion_callbacks(&mut self) {
        for cb in self.on_complete.iter_mut() {
            cb();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn hashed_file(dir: &std::path::Path, data: &[u8], piece_size: u32) -> HashedFile {
        let path = dir.join("content.bin");
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        HashedFile::from_complete_file(&path, piece_size).unwrap()
    }

    #[test]
    fn test_default_peer_state_matches_spec() {
        let p = FileSessionPeer::default();
        assert!(p.choked);
        assert!(!p.interested);
        assert!(p.choking_us);
        assert!(!p.interesting_us);
        assert!(p.pieces.is_empty());
        assert_eq!(p.req_count(), 0);
    }

    #[test]
    fn test_upsert_then_remove_peer() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = FileSession::new(hashed_file(dir.path(), b"abcdefghij", 5));
        session.upsert_peer_bitmap(1, [0, 1].into_iter().collect());
        assert!(session.peer(&1).is_some());
        let removed = session.remove_peer(&1).unwrap();
        assert_eq!(removed.pieces, [0, 1].into_iter().collect());
        assert!(session.peer(&1).is_none());
    }

    #[test]
    fn test_completion_callback_fires_once() {
        let dir = tempfile::tempdir().unwrap();
        let seed = hashed_file(dir.path(), b"abcde", 5);
        let metainfo = seed.metainfo();
        let dl_path = dir.path().join("download.part");
        let hf = HashedFile::from_metainfo_new(&metainfo, &dl_path, 5).unwrap();
        let mut session = FileSession::new(hf);

        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        session.on_complete(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        let mut stream = session.hashed_file_mut().get_chunk_stream(0).unwrap();
        stream.write(b"abcde").unwrap();
        let became_complete = session.mark_have(0);
        assert!(became_complete);
        session.fire_completion_callbacks();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Re-marking an already-complete session must not refire.
        let became_complete_again = session.mark_have(0);
        assert!(!became_complete_again);
    }

    #[test]
    fn test_seeder_starts_already_complete() {
        let dir = tempfile::tempdir().unwrap();
        let session = FileSession::new(hashed_file(dir.path(), b"abcde", 5));
        assert!(session.is_complete());
    }
}
