// The consensus core: role machine, log replication, commit advancement,
// persistence, and snapshot installation. One struct, one lock guarding all
// persistent and volatile fields, explicit role transitions, with its own
// background tasks for the election timer, leader heartbeats, and apply
// delivery, since every RPC here is genuinely async over a transport trait.

use crate::error::Result;
use crate::log::RaftLog;
use crate::persist::Persister;
use crate::types::{
    AppendEntriesRequest, AppendEntriesResponse, ApplyMsg, InstallSnapshotRequest,
    InstallSnapshotResponse, LogEntry, LogIndex, NodeId, PeerConfig, Role, Term, VoteRequest,
    VoteResponse,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

const CONFLICT_BACKOFF_K: LogIndex = 50;
const APPLY_CHANNEL_CAPACITY: usize = 256;

/// The peer-to-peer transport. `raft` never opens a socket itself: it calls
/// out through this trait, which is implemented by `LabrpcTransport` here
/// (for tests) and by a TCP transport in `kvraft-server`.
#[async_trait]
pub trait RaftRpc: Send + Sync {
    async fn request_vote(&self, peer: NodeId, req: VoteRequest) -> Result<VoteResponse>;
    async fn append_entries(
        &self,
        peer: NodeId,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse>;
    async fn install_snapshot(
        &self,
        peer: NodeId,
        req: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse>;
}

#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct PersistedState {
    current_term: Term,
    voted_for: Option<NodeId>,
    log: Vec<PersistedEntry>,
    commit_index: LogIndex,
    last_applied: LogIndex,
}

#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct PersistedEntry {
    index: LogIndex,
    term: Term,
    command: Vec<u8>,
}

impl From<&LogEntry> for PersistedEntry {
    fn from(e: &LogEntry) -> Self {
        Self {
            index: e.index,
            term: e.term,
            command: e.command.clone(),
        }
    }
}

impl From<PersistedEntry> for LogEntry {
    fn from(e: PersistedEntry) -> Self {
        Self {
            index: e.index,
            term: e.term,
            command: e.command,
        }
    }
}

struct State {
    role: Role,
    current_term: Term,
    voted_for: Option<NodeId>,
    log: RaftLog,
    commit_index: LogIndex,
    last_applied: LogIndex,
    current_leader: Option<NodeId>,
    votes_received: HashSet<NodeId>,
    next_index: HashMap<NodeId, LogIndex>,
    match_index: HashMap<NodeId, LogIndex>,
    snapshot_data: Option<Vec<u8>>,
}

/// A single Raft peer. Held behind `Arc` so background tasks (election
/// timer, heartbeat loop, per-RPC senders) can each hold a cheap handle.
pub struct Peer {
    config: PeerConfig,
    rpc: Arc<dyn RaftRpc>,
    persister: Arc<dyn Persister>,
    state: Mutex<State>,
    apply_tx: Mutex<Option<mpsc::Sender<ApplyMsg>>>,
    shutdown: AtomicBool,
    election_reset: Notify,
    commit_advanced: Notify,
}

impl Peer {
    /// Restores persistent state and snapshot (if any), then starts the
    /// role machine and apply-delivery task. Returns the peer handle and
    /// the receiving end of its apply stream.
    pub fn new(
        config: PeerConfig,
        persister: Arc<dyn Persister>,
        rpc: Arc<dyn RaftRpc>,
    ) -> (Arc<Peer>, mpsc::Receiver<ApplyMsg>) {
        let restored = persister
            .read_raft_state()
            .ok()
            .flatten()
            .and_then(|bytes| {
                bincode::decode_from_slice::<PersistedState, _>(&bytes, bincode::config::standard())
                    .ok()
                    .map(|(v, _)| v)
            });
        let snapshot_data = persister.read_snapshot().ok().flatten();

        let log = match &restored {
            Some(p) if !p.log.is_empty() => {
                RaftLog::from_entries(p.log.iter().cloned().map(LogEntry::from).collect())
            }
            _ => RaftLog::new(),
        };
        let (current_term, voted_for, commit_index, last_applied) = match restored {
            Some(p) => (p.current_term, p.voted_for, p.commit_index, p.last_applied),
            None => (0, None, 0, 0),
        };

        let state = State {
            role: Role::Follower,
            current_term,
            voted_for,
            log,
            commit_index,
            last_applied,
            current_leader: None,
            votes_received: HashSet::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            snapshot_data,
        };

        let (apply_tx, apply_rx) = mpsc::channel(APPLY_CHANNEL_CAPACITY);

        let peer = Arc::new(Peer {
            config,
            rpc,
            persister,
            state: Mutex::new(state),
            apply_tx: Mutex::new(Some(apply_tx)),
            shutdown: AtomicBool::new(false),
            election_reset: Notify::new(),
            commit_advanced: Notify::new(),
        });

        tokio::spawn(Peer::run_election_timer(Arc::clone(&peer)));
        tokio::spawn(Peer::run_apply_loop(Arc::clone(&peer)));

        (peer, apply_rx)
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id()
    }

    /// `(term, isLeader)` — a snapshot read of the current role.
    pub fn state(&self) -> (Term, bool) {
        let st = self.state.lock();
        (st.current_term, st.role == Role::Leader)
    }

    pub fn raft_state_size(&self) -> usize {
        self.persister.raft_state_size()
    }

    /// The peer this node last heard claim leadership, if any. Not a
    /// guarantee: the hint can be stale by the time a caller acts on it.
    pub fn leader_hint(&self) -> Option<NodeId> {
        self.state.lock().current_leader
    }

    /// Appends `command` to the log if we're leader and kicks immediate
    /// replication. Returns `(index, term, isLeader)`; `isLeader=false`
    /// carries no index/term guarantee.
    pub fn propose(self: &Arc<Self>, command: Vec<u8>) -> (LogIndex, Term, bool) {
        let (index, term) = {
            let mut st = self.state.lock();
            if st.role != Role::Leader {
                return (0, st.current_term, false);
            }
            let index = st.log.last_index() + 1;
            let term = st.current_term;
            st.log.append(LogEntry {
                index,
                term,
                command,
            });
            self.persist_locked(&st);
            (index, term)
        };
        self.trigger_replication(term);
        (index, term, true)
    }

    /// Service-layer snapshot notification: replace the compacted log
    /// prefix and durably store the snapshot bytes.
    pub fn trim_to(&self, index: LogIndex, snapshot_bytes: Vec<u8>) {
        let mut st = self.state.lock();
        if index <= st.log.base_index() || index > st.log.last_index() {
            return;
        }
        st.log.compact_to(index);
        st.snapshot_data = Some(snapshot_bytes.clone());
        let bytes = self.persist_state_bytes(&st);
        if let Err(e) = self.persister.save_state_and_snapshot(bytes, snapshot_bytes) {
            tracing::error!(node = self.node_id(), error = %e, "snapshot persistence failed, halting");
            std::process::abort();
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        *self.apply_tx.lock() = None;
        self.election_reset.notify_one();
        self.commit_advanced.notify_one();
    }

    // ---- inbound RPC handlers -------------------------------------------------

    pub async fn handle_vote_request(&self, req: VoteRequest) -> VoteResponse {
        let (term, granted) = {
            let mut st = self.state.lock();
            if req.term < st.current_term {
                return VoteResponse {
                    term: st.current_term,
                    granted: false,
                };
            }
            if req.term > st.current_term {
                self.become_follower_locked(&mut st, req.term);
            }
            let can_vote =
                st.voted_for.is_none() || st.voted_for == Some(req.candidate_id);
            let log_ok = st
                .log
                .is_at_least_as_up_to_date_as(req.last_log_term, req.last_log_index);
            let granted = can_vote && log_ok;
            if granted {
                st.voted_for = Some(req.candidate_id);
            }
            self.persist_locked(&st);
            (st.current_term, granted)
        };
        if granted {
            self.election_reset.notify_one();
        }
        VoteResponse { term, granted }
    }

    pub async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesResponse {
        let response = {
            let mut st = self.state.lock();
            if req.term < st.current_term {
                return AppendEntriesResponse {
                    term: st.current_term,
                    success: false,
                    hint: None,
                };
            }
            if req.term > st.current_term {
                self.become_follower_locked(&mut st, req.term);
                // The sender is the leader for this new term; record it as
                // the vote instead of leaving `voted_for` empty.
                st.voted_for = Some(req.leader_id);
            }
            st.role = Role::Follower;
            st.current_leader = Some(req.leader_id);

            let last_log_index = st.log.last_index();
            if req.prev_log_index > last_log_index {
                self.persist_locked(&st);
                return AppendEntriesResponse {
                    term: st.current_term,
                    success: false,
                    hint: Some(last_log_index + 1),
                };
            }
            if req.prev_log_index < st.log.base_index() {
                self.persist_locked(&st);
                return AppendEntriesResponse {
                    term: st.current_term,
                    success: false,
                    hint: None,
                };
            }
            if let Some(term_at_prev) = st.log.term_at(req.prev_log_index) {
                if term_at_prev != req.prev_log_term {
                    self.persist_locked(&st);
                    let hint = req.prev_log_index.saturating_sub(CONFLICT_BACKOFF_K).max(1);
                    return AppendEntriesResponse {
                        term: st.current_term,
                        success: false,
                        hint: Some(hint),
                    };
                }
            }

            let mut appended = false;
            for entry in req.entries {
                match st.log.get(entry.index) {
                    None => {
                        st.log.append(entry);
                        appended = true;
                    }
                    Some(existing) if existing.term == entry.term => {}
                    Some(_) => {
                        st.log.truncate_from(entry.index);
                        st.log.append(entry);
                        appended = true;
                    }
                }
            }

            if req.leader_commit > st.commit_index {
                st.commit_index = req.leader_commit.min(st.log.last_index());
            }

            self.persist_locked(&st);
            let _ = appended;
            AppendEntriesResponse {
                term: st.current_term,
                success: true,
                hint: None,
            }
        };
        self.election_reset.notify_one();
        self.commit_advanced.notify_one();
        response
    }

    pub async fn handle_install_snapshot(
        &self,
        req: InstallSnapshotRequest,
    ) -> InstallSnapshotResponse {
        let (term, emit) = {
            let mut st = self.state.lock();
            if req.term < st.current_term {
                return InstallSnapshotResponse {
                    term: st.current_term,
                };
            }
            if req.term > st.current_term {
                self.become_follower_locked(&mut st, req.term);
            }
            st.role = Role::Follower;
            st.current_leader = Some(req.leader_id);

            if req.last_included_index <= st.log.base_index() {
                (st.current_term, None)
            } else {
                st.log
                    .install_snapshot(req.last_included_index, req.last_included_term);
                st.snapshot_data = Some(req.data.clone());
                if req.last_included_index > st.commit_index {
                    st.commit_index = req.last_included_index;
                }
                st.last_applied = st.last_applied.max(req.last_included_index);
                let bytes = self.persist_state_bytes(&st);
                if let Err(e) = self
                    .persister
                    .save_state_and_snapshot(bytes, req.data.clone())
                {
                    tracing::error!(node = self.node_id(), error = %e, "snapshot persistence failed, halting");
                    std::process::abort();
                }
                (
                    st.current_term,
                    Some((req.last_included_index, req.last_included_term, req.data)),
                )
            }
        };
        if let Some((index, snap_term, data)) = emit {
            self.send_apply(ApplyMsg::SnapshotInstalled {
                last_included_index: index,
                last_included_term: snap_term,
                data,
            })
            .await;
        }
        self.election_reset.notify_one();
        InstallSnapshotResponse { term }
    }

    // ---- role machine -----------------------------------------------------

    fn become_follower_locked(&self, st: &mut State, term: Term) {
        st.current_term = term;
        st.voted_for = None;
        st.role = Role::Follower;
        // A leader parked on `election_reset.notified()` would otherwise
        // never wake up to start its own election after stepping down.
        self.election_reset.notify_one();
    }

    fn start_election(self: &Arc<Self>) {
        let (req, peers, became_leader) = {
            let mut st = self.state.lock();
            st.current_term += 1;
            st.voted_for = Some(self.node_id());
            st.role = Role::Candidate;
            st.current_leader = None;
            st.votes_received.clear();
            st.votes_received.insert(self.node_id());
            self.persist_locked(&st);
            let req = VoteRequest {
                term: st.current_term,
                candidate_id: self.node_id(),
                last_log_index: st.log.last_index(),
                last_log_term: st.log.last_term(),
            };
            let election_term = st.current_term;
            let became_leader = self.promote_to_leader_if_won_locked(&mut st, election_term);
            (req, self.config.other_peers(), became_leader)
        };
        tracing::info!(node = self.node_id(), term = req.term, "starting election");
        if became_leader {
            // Single-peer cluster: the self-vote alone is already a majority.
            tracing::info!(node = self.node_id(), term = req.term, "became leader");
            self.election_reset.notify_one();
            self.trigger_replication(req.term);
            Peer::spawn_heartbeat_loop(Arc::clone(self), req.term);
            return;
        }
        for peer in peers {
            let this = Arc::clone(self);
            let req = req.clone();
            tokio::spawn(async move {
                if let Ok(resp) = this.rpc.request_vote(peer, req.clone()).await {
                    this.handle_vote_response(peer, req.term, resp);
                }
            });
        }
    }

    /// Promotes to leader and rebuilds leader-only tables if `votes_received`
    /// already holds a quorum for `election_term`. Shared by the self-vote
    /// check at election start and by `handle_vote_response`.
    fn promote_to_leader_if_won_locked(&self, st: &mut State, election_term: Term) -> bool {
        if st.role != Role::Candidate || st.current_term != election_term {
            return false;
        }
        let won = st.votes_received.len() >= self.config.quorum();
        if won {
            st.role = Role::Leader;
            st.current_leader = Some(self.node_id());
            let last_index = st.log.last_index();
            for p in self.config.other_peers() {
                st.next_index.insert(p, last_index + 1);
                st.match_index.insert(p, 0);
            }
        }
        won
    }

    fn handle_vote_response(self: &Arc<Self>, peer: NodeId, election_term: Term, resp: VoteResponse) {
        let became_leader = {
            let mut st = self.state.lock();
            if resp.term > st.current_term {
                self.become_follower_locked(&mut st, resp.term);
                self.persist_locked(&st);
                return;
            }
            if st.role != Role::Candidate || st.current_term != election_term {
                return;
            }
            if resp.granted {
                st.votes_received.insert(peer);
            }
            self.promote_to_leader_if_won_locked(&mut st, election_term)
        };
        if became_leader {
            tracing::info!(node = self.node_id(), term = election_term, "became leader");
            self.election_reset.notify_one();
            self.trigger_replication(election_term);
            Peer::spawn_heartbeat_loop(Arc::clone(self), election_term);
        }
    }

    fn spawn_heartbeat_loop(this: Arc<Self>, leader_term: Term) {
        tokio::spawn(async move {
            loop {
                if this.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                {
                    let st = this.state.lock();
                    if st.role != Role::Leader || st.current_term != leader_term {
                        return;
                    }
                }
                this.trigger_replication(leader_term);
                let interval = this.random_heartbeat_interval();
                tokio::time::sleep(interval).await;
            }
        });
    }

    fn trigger_replication(self: &Arc<Self>, term: Term) {
        for peer in self.config.other_peers() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.replicate_to_peer(peer, term).await;
            });
        }
    }

    async fn replicate_to_peer(self: Arc<Self>, peer: NodeId, term: Term) {
        enum Outbound {
            Append(AppendEntriesRequest, LogIndex, LogIndex),
            Snapshot(InstallSnapshotRequest),
        }

        let outbound = {
            let st = self.state.lock();
            if st.role != Role::Leader || st.current_term != term {
                return;
            }
            let next_index = *st.next_index.get(&peer).unwrap_or(&1);
            if st.log.base_index() > 0 && next_index <= st.log.base_index() {
                Outbound::Snapshot(InstallSnapshotRequest {
                    term: st.current_term,
                    leader_id: self.node_id(),
                    last_included_index: st.log.base_index(),
                    last_included_term: st.log.base_term(),
                    data: st.snapshot_data.clone().unwrap_or_default(),
                })
            } else {
                let prev_log_index = next_index.saturating_sub(1);
                let prev_log_term = st.log.term_at(prev_log_index).unwrap_or(0);
                let entries = st.log.entries_after(prev_log_index);
                let sent_len = entries.len() as LogIndex;
                Outbound::Append(
                    AppendEntriesRequest {
                        term: st.current_term,
                        leader_id: self.node_id(),
                        prev_log_index,
                        prev_log_term,
                        entries,
                        leader_commit: st.commit_index,
                    },
                    prev_log_index,
                    sent_len,
                )
            }
        };

        match outbound {
            Outbound::Append(req, prev_log_index, sent_len) => {
                if let Ok(resp) = self.rpc.append_entries(peer, req).await {
                    self.handle_append_entries_reply(peer, term, prev_log_index, sent_len, resp);
                }
            }
            Outbound::Snapshot(req) => {
                let included = req.last_included_index;
                if let Ok(resp) = self.rpc.install_snapshot(peer, req).await {
                    self.handle_install_snapshot_reply(peer, term, included, resp);
                }
            }
        }
    }

    fn handle_append_entries_reply(
        &self,
        peer: NodeId,
        term: Term,
        prev_log_index: LogIndex,
        sent_len: LogIndex,
        resp: AppendEntriesResponse,
    ) {
        let mut st = self.state.lock();
        if resp.term > st.current_term {
            self.become_follower_locked(&mut st, resp.term);
            self.persist_locked(&st);
            return;
        }
        if st.role != Role::Leader || st.current_term != term {
            return;
        }
        if resp.success {
            let new_next = prev_log_index + sent_len + 1;
            let new_match = new_next - 1;
            st.next_index.insert(peer, new_next);
            let entry = st.match_index.entry(peer).or_insert(0);
            if new_match > *entry {
                *entry = new_match;
            }
            self.recompute_commit_index_locked(&mut st);
        } else {
            let current_next = *st.next_index.get(&peer).unwrap_or(&1);
            let new_next = match resp.hint {
                Some(hint) => hint.min(current_next),
                None => current_next.saturating_sub(1).max(1),
            };
            st.next_index.insert(peer, new_next);
        }
    }

    fn handle_install_snapshot_reply(
        &self,
        peer: NodeId,
        term: Term,
        included_index: LogIndex,
        resp: InstallSnapshotResponse,
    ) {
        let mut st = self.state.lock();
        if resp.term > st.current_term {
            self.become_follower_locked(&mut st, resp.term);
            self.persist_locked(&st);
            return;
        }
        if st.role != Role::Leader || st.current_term != term {
            return;
        }
        st.next_index.insert(peer, included_index + 1);
        let entry = st.match_index.entry(peer).or_insert(0);
        if included_index > *entry {
            *entry = included_index;
        }
        self.recompute_commit_index_locked(&mut st);
    }

    /// Largest `N > commitIndex` backed by a majority (including self) with
    /// `log[N].term == currentTerm` — the figure-8 safety rule, computed
    /// directly rather than via a median of `match_index` (which isn't
    /// guaranteed to land on an index a majority actually holds once
    /// entries span multiple terms).
    fn recompute_commit_index_locked(&self, st: &mut State) {
        let mut match_indices: Vec<LogIndex> = st.match_index.values().copied().collect();
        match_indices.push(st.log.last_index()); // self
        let quorum = self.config.quorum();

        let mut candidates = match_indices.clone();
        candidates.sort_unstable();
        candidates.dedup();

        let mut best = st.commit_index;
        for &n in candidates.iter().rev() {
            if n <= st.commit_index {
                break;
            }
            let count = match_indices.iter().filter(|&&m| m >= n).count();
            if count >= quorum && st.log.term_at(n) == Some(st.current_term) {
                best = n;
                break;
            }
        }
        if best > st.commit_index {
            st.commit_index = best;
            self.commit_advanced.notify_one();
        }
    }

    // ---- background loops --------------------------------------------------

    async fn run_election_timer(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let is_leader = self.state.lock().role == Role::Leader;
            if is_leader {
                self.election_reset.notified().await;
                continue;
            }
            let timeout = self.random_election_timeout();
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    self.start_election();
                }
                _ = self.election_reset.notified() => {}
            }
        }
    }

    async fn run_apply_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let msg = {
                let mut st = self.state.lock();
                if st.last_applied < st.log.base_index() {
                    let index = st.log.base_index();
                    let term = st.log.base_term();
                    let data = st.snapshot_data.clone().unwrap_or_default();
                    st.last_applied = index;
                    self.persist_locked(&st);
                    Some(ApplyMsg::SnapshotInstalled {
                        last_included_index: index,
                        last_included_term: term,
                        data,
                    })
                } else if st.last_applied < st.commit_index {
                    let next = st.last_applied + 1;
                    st.log.get(next).cloned().map(|entry| {
                        st.last_applied = next;
                        self.persist_locked(&st);
                        ApplyMsg::Commit {
                            index: entry.index,
                            term: entry.term,
                            command: entry.command,
                        }
                    })
                } else {
                    None
                }
            };

            if let Some(msg) = msg {
                if !self.send_apply(msg).await {
                    return;
                }
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.apply_tick) => {}
                _ = self.commit_advanced.notified() => {}
            }
        }
    }

    async fn send_apply(&self, msg: ApplyMsg) -> bool {
        let tx = self.apply_tx.lock().clone();
        match tx {
            Some(tx) => tx.send(msg).await.is_ok(),
            None => false,
        }
    }

    fn random_election_timeout(&self) -> Duration {
        let (lo, hi) = self.config.election_timeout_range;
        Self::sample_range(lo, hi)
    }

    fn random_heartbeat_interval(&self) -> Duration {
        let (lo, hi) = self.config.election_timeout_range;
        let f = self.config.heartbeat_fraction;
        Self::sample_range(lo.mul_f64(f), hi.mul_f64(f))
    }

    fn sample_range(lo: Duration, hi: Duration) -> Duration {
        let lo_ms = lo.as_millis() as u64;
        let hi_ms = hi.as_millis().max(lo.as_millis() + 1) as u64;
        let ms = rand::rng().random_range(lo_ms..hi_ms);
        Duration::from_millis(ms)
    }

    // ---- persistence --------------------------------------------------------

    fn persist_state_bytes(&self, st: &State) -> Vec<u8> {
        let persisted = PersistedState {
            current_term: st.current_term,
            voted_for: st.voted_for,
            log: st.log.entries().iter().map(PersistedEntry::from).collect(),
            commit_index: st.commit_index,
            last_applied: st.last_applied,
        };
        bincode::encode_to_vec(&persisted, bincode::config::standard())
            .expect("in-memory structures always encode")
    }

    fn persist_locked(&self, st: &State) {
        let bytes = self.persist_state_bytes(st);
        if let Err(e) = self.persister.save_raft_state(bytes) {
            tracing::error!(node = self.node_id(), error = %e, "raft state persistence failed, halting");
            std::process::abort();
        }
    }
}
