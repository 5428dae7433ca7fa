//! The swarm protocol state machine: the hub that handles inbound wire
//! events, issues outbound requests, enforces the choke/interest invariants,
//! and drives pieces from request through verified write to HAVE broadcast.
//! The engine owns no thread, socket, or timer of its own — it is driven one
//! event (or one `on_tick` call) at a time by the host application.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use rand::seq::IteratorRandom;
use swarmfile_core::{PieceHash, TopHash};
use swarmfile_wire::{bitmap_to_set, set_to_bitmap, Message};

use crate::choking::{ChokingStrategy, NaiveStrategy, PeerSnapshot, SessionSnapshot, TitForTatStrategy};
use crate::config::{ChokingStrategyKind, PieceSelectionStrategyKind, SwarmConfig};
use crate::error::{Error, Result};
use crate::hashed_file::HashedFile;
use crate::pending_piece::{AcceptOutcome, PendingPiece};
use crate::piece_selection::{
    Bep3Strategy, EndGameStrategy, PieceSelectionContext, PieceSelectionStrategy, RandomStrategy,
    RarestFirstStrategy,
};
use crate::session::{FileSession, PeerId};

/// One outbound wire send, in the order the caller must forward it so that
/// per-peer ordering is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub peer: PeerId,
    pub message: Message,
}

impl Outbound {
    fn new(peer: PeerId, message: Message) -> Self {
        Self { peer, message }
    }
}

pub struct SwarmEngine {
    config: SwarmConfig,
    sessions: HashMap<TopHash, FileSession>,
    pending: HashMap<PieceHash, PendingPiece>,
    choking: Box<dyn ChokingStrategy>,
    selection: Box<dyn PieceSelectionStrategy>,
}

impl SwarmEngine {
    /// Build strategies from `config.choking_strategy`/`config.piece_selection_strategy`.
    /// For a strategy outside that small menu, construct it directly and use
    /// `with_strategies` instead.
    pub fn new(config: SwarmConfig) -> Self {
        let choking: Box<dyn ChokingStrategy> = match config.choking_strategy {
            ChokingStrategyKind::Naive => Box::new(NaiveStrategy),
            ChokingStrategyKind::TitForTat => Box::new(TitForTatStrategy::new(
                config.regular_unchoke_count,
                config.optimistic_unchoke_count,
                config.optimistic_refresh_cycles,
            )),
        };
        let selection: Box<dyn PieceSelectionStrategy> = match config.piece_selection_strategy {
            PieceSelectionStrategyKind::Random => Box::new(RandomStrategy),
            PieceSelectionStrategyKind::RarestFirst => Box::new(RarestFirstStrategy),
            PieceSelectionStrategyKind::EndGame => Box::new(EndGameStrategy),
            PieceSelectionStrategyKind::Bep3 => Box::new(Bep3Strategy::default()),
        };
        Self::with_strategies(config, choking, selection)
    }

    pub fn with_strategies(
        config: SwarmConfig,
        choking: Box<dyn ChokingStrategy>,
        selection: Box<dyn PieceSelectionStrategy>,
    ) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            pending: HashMap::new(),
            choking,
            selection,
        }
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn session(&self, tophash: &TopHash) -> Option<&FileSession> {
        self.sessions.get(tophash)
    }

    pub fn sessions(&self) -> impl Iterator<Item = (&TopHash, &FileSession)> {
        self.sessions.iter()
    }

    pub fn pending_piece(&self, hash: &PieceHash) -> Option<&PendingPiece> {
        self.pending.get(hash)
    }

    /// Join a session the engine will now track, either freshly seeded or
    /// accepted from an inbound metainfo; returns its top hash for lookups.
    pub fn add_session(&mut self, hashed_file: HashedFile) -> TopHash {
        let tophash = hashed_file.top_hash().clone();
        tracing::debug!(tophash = %tophash, pieces = hashed_file.piece_count(), "session added");
        self.sessions
            .entry(tophash.clone())
            .or_insert_with(|| FileSession::new(hashed_file));
        tophash
    }

    /// Register a completion callback on a tracked session.
    pub fn on_session_complete(&mut self, tophash: &TopHash, cb: impl FnMut() + Send + 'static) {
        if let Some(session) = self.sessions.get_mut(tophash) {
            session.on_complete(cb);
        }
    }

    /// Explicitly destroy a session; any `PendingPiece` left orphaned as a
    /// result is dropped too.
    pub fn remove_session(&mut self, tophash: &TopHash) {
        if self.sessions.remove(tophash).is_some() {
            tracing::debug!(tophash = %tophash, "session removed");
            for pp in self.pending.values_mut() {
                pp.remove_all_for_session(tophash);
            }
            self.pending.retain(|_, pp| !pp.is_orphaned());
        }
    }

    /// A new peer wire-up: announce every locally tracked session with an
    /// unsolicited BITMAP.
    pub fn on_peer_connected(&mut self, peer: PeerId) -> Vec<Outbound> {
        tracing::trace!(peer, "peer connected");
        self.sessions
            .values()
            .map(|session| {
                Outbound::new(
                    peer,
                    Message::Bitmap {
                        tophash: session.top_hash().clone(),
                        bitmap: set_to_bitmap(session.haveset(), session.piece_count()),
                        is_reply: false,
                    },
                )
            })
            .collect()
    }

    /// Remove a peer from every session it had joined, unwinding its
    /// outstanding requests from the pending-piece registry, then give the
    /// remaining peers of each affected session a chance to pick up the
    /// freed work.
    pub fn on_peer_disconnected(&mut self, peer: PeerId, now: Instant) -> Vec<Outbound> {
        tracing::trace!(peer, "peer disconnected");
        let mut out = Vec::new();
        let tophashes: Vec<TopHash> = self.sessions.keys().cloned().collect();
        for tophash in tophashes {
            let removed = self
                .sessions
                .get_mut(&tophash)
                .and_then(|session| session.remove_peer(&peer));
            let Some(fsp) = removed else { continue };

            for (_piece_no, (piece_hash, _offsets)) in fsp.requests {
                if let Some(pp) = self.pending.get_mut(&piece_hash) {
                    pp.remove_peer_requests(&peer);
                }
            }
            self.pending.retain(|_, pp| !pp.is_orphaned());

            let remaining: Vec<PeerId> = self
                .sessions
                .get(&tophash)
                .map(|s| s.peers().keys().copied().collect())
                .unwrap_or_default();
            for p in remaining {
                out.extend(self.recalc_interest(&tophash, p, now));
            }
        }
        out
    }

    /// Dispatch one inbound wire event to its handler.
    pub fn handle_message(&mut self, peer: PeerId, message: Message, now: Instant) -> Result<Vec<Outbound>> {
        match message {
            Message::Bitmap { tophash, bitmap, is_reply } => self.on_bitmap(peer, tophash, bitmap, is_reply, now),
            Message::Interested { tophash, interested } => Ok(self.on_interested(peer, tophash, interested)),
            Message::Choke { tophash, choked } => Ok(self.on_choke(peer, tophash, choked, now)),
            Message::Have { tophash, piece_no } => Ok(self.on_have(peer, tophash, piece_no, now)),
            Message::Request { tophash, piece_no, offset, length } => {
                Ok(self.on_request(peer, tophash, piece_no, offset, length, now))
            }
            Message::Cancel { .. } => Ok(Vec::new()),
            Message::Piece { piece_hash, offset, data } => Ok(self.on_piece(peer, piece_hash, offset, data, now)),
        }
    }

    fn on_bitmap(
        &mut self,
        peer: PeerId,
        tophash: TopHash,
        bitmap: Vec<u8>,
        is_reply: bool,
        now: Instant,
    ) -> Result<Vec<Outbound>> {
        let Some(session) = self.sessions.get_mut(&tophash) else {
            return Ok(Vec::new());
        };

        let expected_len = session.piece_count().div_ceil(8) as usize;
        if bitmap.len() != expected_len {
            tracing::warn!(tophash = %tophash, peer, got = bitmap.len(), expected = expected_len, "malformed bitmap");
            return Err(Error::MalformedBitmap(format!(
                "expected {expected_len} bytes, got {}",
                bitmap.len()
            )));
        }

        let mut out = Vec::new();
        if !is_reply {
            out.push(Outbound::new(
                peer,
                Message::Bitmap {
                    tophash: tophash.clone(),
                    bitmap: set_to_bitmap(session.haveset(), session.piece_count()),
                    is_reply: true,
                },
            ));
        }

        let pieces = bitmap_to_set(&bitmap);
        session.upsert_peer_bitmap(peer, pieces);
        tracing::debug!(tophash = %tophash, peer, "peer bitmap registered");
        out.extend(self.recalc_interest(&tophash, peer, now));
        Ok(out)
    }

    fn on_interested(&mut self, peer: PeerId, tophash: TopHash, interested: bool) -> Vec<Outbound> {
        let Some(session) = self.sessions.get_mut(&tophash) else {
            return Vec::new();
        };
        let Some(fsp) = session.peer_mut(&peer) else {
            return Vec::new();
        };
        fsp.interested = interested;

        let snapshot = Self::build_snapshot(session, &tophash);
        let decisions = self.choking.peer_interested(&snapshot, peer);
        self.apply_choke_decisions(&tophash, decisions)
    }

    fn on_choke(&mut self, peer: PeerId, tophash: TopHash, choked: bool, now: Instant) -> Vec<Outbound> {
        let Some(session) = self.sessions.get_mut(&tophash) else {
            return Vec::new();
        };
        let Some(fsp) = session.peer_mut(&peer) else {
            return Vec::new();
        };
        let was_choking = fsp.choking_us;
        fsp.choking_us = choked;

        let mut out = Vec::new();
        if was_choking && !choked {
            // Transitioned to unchoked: re-emit every still-outstanding
            // request, since the peer may have dropped them while choked.
            for (&piece_no, (piece_hash, offsets)) in fsp.requests.iter() {
                for (&offset, &length) in offsets.iter() {
                    let _ = piece_hash;
                    out.push(Outbound::new(
                        peer,
                        Message::Request {
                            tophash: tophash.clone(),
                            piece_no,
                            offset,
                            length,
                        },
                    ));
                }
            }
            out.extend(self.recalc_interest(&tophash, peer, now));
        }
        out
    }

    fn on_have(&mut self, peer: PeerId, tophash: TopHash, piece_no: u32, now: Instant) -> Vec<Outbound> {
        let Some(session) = self.sessions.get_mut(&tophash) else {
            return Vec::new();
        };
        let Some(fsp) = session.peer_mut(&peer) else {
            return Vec::new();
        };
        fsp.pieces.insert(piece_no);
        self.recalc_interest(&tophash, peer, now)
    }

    fn on_request(
        &mut self,
        peer: PeerId,
        tophash: TopHash,
        piece_no: u32,
        offset: u32,
        length: u32,
        now: Instant,
    ) -> Vec<Outbound> {
        let Some(session) = self.sessions.get(&tophash) else {
            return Vec::new();
        };
        let Some(fsp) = session.peer(&peer) else {
            return Vec::new();
        };
        if fsp.choked || !session.haveset().contains(&piece_no) {
            return Vec::new();
        }
        let Some(mut stream) = session.hashed_file().get_chunk_stream(piece_no) else {
            return Vec::new();
        };
        stream.seek(crate::chunk_stream::Whence::Start, offset as i64);
        let Ok(data) = stream.read(length) else {
            tracing::warn!(tophash = %tophash, peer, piece_no, "i/o error serving request");
            return Vec::new();
        };
        let piece_hash = session.hashed_file().piece_hash(piece_no).clone();

        let session = self.sessions.get_mut(&tophash).expect("session checked above");
        if let Some(fsp) = session.peer_mut(&peer) {
            fsp.sent.record(now, data.len() as u64);
        }

        vec![Outbound::new(
            peer,
            Message::Piece {
                piece_hash,
                offset,
                data,
            },
        )]
    }

    fn on_piece(&mut self, peer: PeerId, piece_hash: PieceHash, offset: u32, data: Vec<u8>, now: Instant) -> Vec<Outbound> {
        let Some(pp) = self.pending.get_mut(&piece_hash) else {
            tracing::warn!(peer, "unsolicited piece: no such pending piece");
            return Vec::new();
        };

        match pp.accept_data(offset, data.len() as u32, peer) {
            AcceptOutcome::Accepted => {}
            outcome => {
                tracing::warn!(peer, offset, ?outcome, "rejected piece data");
                return Vec::new();
            }
        }

        let sessions: Vec<(TopHash, u32)> = pp.sessions().iter().cloned().collect();
        for (tophash, piece_no) in &sessions {
            if let Some(session) = self.sessions.get_mut(tophash) {
                if let Some(mut stream) = session.hashed_file().get_chunk_stream(*piece_no) {
                    stream.seek(crate::chunk_stream::Whence::Start, offset as i64);
                    let _ = stream.write(&data);
                }
                // The subpiece is now either done or superseded; clear it
                // from every peer's outstanding-request bookkeeping.
                for fsp in session.peers_mut() {
                    if let Some((hash, offsets)) = fsp.requests.get_mut(piece_no) {
                        if *hash == piece_hash {
                            offsets.remove(&offset);
                            if offsets.is_empty() {
                                fsp.requests.remove(piece_no);
                            }
                        }
                    }
                }
            }
        }

        let tophashes: Vec<TopHash> = sessions.iter().map(|(t, _)| t.clone()).collect();

        if !self.config.calc_rate_after_verify {
            self.credit_receive(&tophashes, peer, data.len() as u64, now);
        }

        if !self.pending.get(&piece_hash).is_some_and(PendingPiece::is_complete) {
            let mut touched: Vec<(TopHash, PeerId)> = Vec::new();
            for (tophash, _) in &sessions {
                let Some(session) = self.sessions.get(tophash) else {
                    continue;
                };
                touched.extend(session.peers().keys().map(|&p| (tophash.clone(), p)));
            }
            let mut out = Vec::new();
            for (tophash, p) in touched {
                out.extend(self.recalc_interest(&tophash, p, now));
            }
            return out;
        }

        let pp = self.pending.remove(&piece_hash).expect("just checked present");
        let verified = sessions
            .first()
            .and_then(|(tophash, piece_no)| self.sessions.get(tophash).map(|s| (s, *piece_no)))
            .and_then(|(session, piece_no)| {
                session
                    .hashed_file()
                    .get_chunk_stream(piece_no)
                    .and_then(|s| s.read_all().ok())
            })
            .map(|data| piece_hash.verify(&data))
            .unwrap_or(false);

        let mut out = Vec::new();
        if !verified {
            tracing::warn!(piece = %hex::encode(piece_hash.digest()), "piece verification failed, dropping");
            return out;
        }

        if self.config.calc_rate_after_verify {
            for (offset, sp) in pp.subpieces() {
                if let Some(sender) = sp.received_from {
                    self.credit_receive(&tophashes, sender, sp.length as u64, now);
                }
                let _ = offset;
            }
        }

        let mut touched: Vec<(TopHash, PeerId)> = Vec::new();
        for (tophash, piece_no) in &sessions {
            let Some(session) = self.sessions.get_mut(tophash) else {
                continue;
            };
            let became_complete = session.mark_have(*piece_no);
            tracing::debug!(tophash = %tophash, piece_no, "piece verified and credited");
            for &p in session.peers().keys() {
                out.push(Outbound::new(
                    p,
                    Message::Have {
                        tophash: tophash.clone(),
                        piece_no: *piece_no,
                    },
                ));
                touched.push((tophash.clone(), p));
            }
            if became_complete {
                session.fire_completion_callbacks();
                tracing::debug!(tophash = %tophash, "session complete");
            }
        }

        for (tophash, p) in touched {
            out.extend(self.recalc_interest(&tophash, p, now));
        }
        out
    }

    fn credit_receive(&mut self, sessions: &[TopHash], sender: PeerId, total_len: u64, now: Instant) {
        let n = sessions.len().max(1) as u64;
        let share = total_len / n;
        for tophash in sessions {
            if let Some(session) = self.sessions.get_mut(tophash) {
                if let Some(fsp) = session.peer_mut(&sender) {
                    fsp.recvd.record(now, share);
                }
            }
        }
    }

    /// Clamp `length` to what remains of the piece, register the request
    /// against the (possibly freshly created) `PendingPiece` and the peer's
    /// own bookkeeping, then emit the REQUEST.
    fn request(&mut self, tophash: &TopHash, peer: PeerId, piece_no: u32, offset: u32, length: u32) -> Option<Outbound> {
        let session = self.sessions.get(tophash)?;
        let full_len = session.hashed_file().piece_length(piece_no)?;
        if offset >= full_len {
            return None;
        }
        let length = length.min(full_len - offset);
        let piece_hash = session.hashed_file().piece_hash(piece_no).clone();

        let pp = self
            .pending
            .entry(piece_hash.clone())
            .or_insert_with(|| PendingPiece::new(piece_hash.clone(), full_len));
        pp.add_session(tophash.clone(), piece_no);
        pp.register_request(offset, length, peer);

        let session = self.sessions.get_mut(tophash)?;
        let fsp = session.peer_mut(&peer)?;
        fsp.requests
            .entry(piece_no)
            .or_insert_with(|| (piece_hash.clone(), Default::default()))
            .1
            .insert(offset, length);

        Some(Outbound::new(
            peer,
            Message::Request {
                tophash: tophash.clone(),
                piece_no,
                offset,
                length,
            },
        ))
    }

    /// Issue the next request for `piece_no` against `peer`: continues an
    /// existing `PendingPiece`'s remaining gaps, or starts a brand new one
    /// at offset 0. Returns `None` once nothing is left to request.
    fn issue_piece_request(&mut self, tophash: &TopHash, peer: PeerId, piece_no: u32) -> Option<Outbound> {
        let session = self.sessions.get(tophash)?;
        let piece_hash = session.hashed_file().piece_hash(piece_no).clone();
        let request_size = self.config.request_size();

        let (offset, length) = if let Some(pp) = self.pending.get(&piece_hash) {
            pp.pick_subpiece(true, request_size)?
        } else {
            let full_len = session.hashed_file().piece_length(piece_no)?;
            (0, request_size.min(full_len))
        };
        self.request(tophash, peer, piece_no, offset, length)
    }

    fn piece_is_pending(&self, tophash: &TopHash, piece_no: u32, session: &FileSession) -> bool {
        let Some(hash) = session.hashed_file().hashes().get(piece_no as usize) else {
            return false;
        };
        self.pending
            .get(hash)
            .is_some_and(|pp| pp.sessions().contains(&(tophash.clone(), piece_no)))
    }

    /// Recompute `interesting_us`, then (budget permitting) finish an
    /// in-flight piece before starting new ones via the selection strategy.
    fn recalc_interest(&mut self, tophash: &TopHash, peer: PeerId, _now: Instant) -> Vec<Outbound> {
        let mut out = Vec::new();
        let Some(session) = self.sessions.get(tophash) else {
            return out;
        };
        let Some(fsp) = session.peer(&peer) else {
            return out;
        };

        let only_theirs: BTreeSet<u32> = fsp.pieces.difference(session.haveset()).copied().collect();
        let now_interesting = !only_theirs.is_empty();
        let was_interesting = fsp.interesting_us;
        let choking_us = fsp.choking_us;
        let req_count = fsp.req_count();

        if now_interesting != was_interesting {
            let session = self.sessions.get_mut(tophash).expect("checked above");
            if let Some(fsp) = session.peer_mut(&peer) {
                fsp.interesting_us = now_interesting;
            }
            out.push(Outbound::new(
                peer,
                Message::Interested {
                    tophash: tophash.clone(),
                    interested: now_interesting,
                },
            ));
        }

        if choking_us {
            return out;
        }
        let mut requests_left = self.config.max_requests_per_peer.saturating_sub(req_count);
        if requests_left == 0 {
            return out;
        }

        let session = self.sessions.get(tophash).expect("checked above");
        let pending_candidates: Vec<u32> = only_theirs
            .iter()
            .copied()
            .filter(|&pn| self.piece_is_pending(tophash, pn, session))
            .collect();

        if let Some(&chosen) = pending_candidates.iter().choose(&mut rand::rng()) {
            while requests_left > 0 {
                match self.issue_piece_request(tophash, peer, chosen) {
                    Some(ob) => {
                        out.push(ob);
                        requests_left -= 1;
                    }
                    None => break,
                }
            }
        }

        if requests_left > 0 {
            let session = self.sessions.get(tophash).expect("checked above");
            let fsp = session.peer(&peer).expect("checked above");
            let peer_pieces = fsp.pieces.clone();
            let ctx = PieceSelectionContext::build(session, &self.pending, peer, &peer_pieces);
            let picks = self.selection.pick(&ctx, requests_left);
            for pn in picks {
                if requests_left == 0 {
                    break;
                }
                if let Some(ob) = self.issue_piece_request(tophash, peer, pn) {
                    out.push(ob);
                    requests_left -= 1;
                }
            }
        }

        out
    }

    /// Refresh every peer's cached rates, then hand each session to the
    /// choking strategy for a tick. Call on whatever cadence the
    /// host application's own timer drives.
    pub fn on_tick(&mut self, now: Instant) -> Vec<Outbound> {
        let window = self.config.rate_window_period;
        let period = self.config.choking_period;
        let tophashes: Vec<TopHash> = self.sessions.keys().cloned().collect();
        let mut out = Vec::new();
        for tophash in tophashes {
            if let Some(session) = self.sessions.get_mut(&tophash) {
                for fsp in session.peers_mut() {
                    fsp.rate_down = fsp.recvd.rate(now, window);
                    fsp.rate_up = fsp.sent.rate(now, window);
                }
            }
            let Some(session) = self.sessions.get(&tophash) else {
                continue;
            };
            let snapshot = Self::build_snapshot(session, &tophash);
            let decisions = self.choking.on_tick(&snapshot, now, period);
            out.extend(self.apply_choke_decisions(&tophash, decisions));
        }
        out
    }

    fn build_snapshot<'a>(session: &'a FileSession, tophash: &'a TopHash) -> SessionSnapshot<'a> {
        SessionSnapshot {
            tophash,
            is_complete: session.is_complete(),
            peers: session
                .peers()
                .iter()
                .map(|(&peer, fsp)| PeerSnapshot {
                    peer,
                    interested: fsp.interested,
                    choked: fsp.choked,
                    rate_up: fsp.rate_up,
                    rate_down: fsp.rate_down,
                })
                .collect(),
        }
    }

    fn apply_choke_decisions(&mut self, tophash: &TopHash, decisions: Vec<crate::choking::ChokeDecision>) -> Vec<Outbound> {
        use crate::choking::ChokeDecision;
        let mut out = Vec::new();
        for decision in decisions {
            let (peer, choked) = match decision {
                ChokeDecision::Choke(p) => (p, true),
                ChokeDecision::Unchoke(p) => (p, false),
            };
            let Some(session) = self.sessions.get_mut(tophash) else {
                continue;
            };
            let Some(fsp) = session.peer_mut(&peer) else {
                continue;
            };
            if fsp.choked == choked {
                continue;
            }
            fsp.choked = choked;
            tracing::debug!(tophash = %tophash, peer, choked, "choke transition");
            out.push(Outbound::new(
                peer,
                Message::Choke {
                    tophash: tophash.clone(),
                    choked,
                },
            ));
        }
        out
    }
}
