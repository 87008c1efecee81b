// Wire and persistent data types for the consensus core: term/log index
// aliases, role enum, vote/append/install-snapshot request-response pairs.
// No joint consensus, no membership change, no match-index replication
// batching.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub type NodeId = u64;
pub type Term = u64;
pub type LogIndex = u64;

/// One of the three mutually exclusive Raft roles. Modeled as an explicit
/// tagged enum rather than scattered booleans: every transition resets
/// exactly the state its destination role needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// A replicated log entry. Index 0 is always a sentinel carrying the index
/// and term of the last snapshot-included entry (0/0 at genesis); it is
/// never applied and its `command` is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: LogIndex,
    pub term: Term,
    pub command: Vec<u8>,
}

impl LogEntry {
    pub fn sentinel(index: LogIndex, term: Term) -> Self {
        Self {
            index,
            term,
            command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    pub granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    /// `Some(h)` is a conflict hint the leader should jump `nextIndex` to
    /// directly; `None` means "no hint, back off by one".
    pub hint: Option<LogIndex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub term: Term,
    pub leader_id: NodeId,
    pub last_included_index: LogIndex,
    pub last_included_term: Term,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub term: Term,
}

/// A message on the apply stream: either a committed command in index
/// order, or a snapshot the state machine must adopt wholesale before
/// resuming incremental application.
#[derive(Debug, Clone)]
pub enum ApplyMsg {
    Commit {
        index: LogIndex,
        term: Term,
        command: Vec<u8>,
    },
    SnapshotInstalled {
        last_included_index: LogIndex,
        last_included_term: Term,
        data: Vec<u8>,
    },
}

/// Per-peer tunables. `peers` lists every member of the cluster (including
/// `me`); the consensus core derives "the other peers" by excluding its own
/// id at `me`.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub me: usize,
    pub peers: Vec<NodeId>,
    pub election_timeout_range: (Duration, Duration),
    /// Leader heartbeat interval, expressed as a fraction of the election
    /// timeout range so heartbeats always arrive well inside it.
    pub heartbeat_fraction: f64,
    pub apply_tick: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            me: 0,
            peers: Vec::new(),
            election_timeout_range: (Duration::from_millis(600), Duration::from_millis(750)),
            heartbeat_fraction: 0.5,
            apply_tick: Duration::from_millis(200),
        }
    }
}

impl PeerConfig {
    pub fn node_id(&self) -> NodeId {
        self.peers[self.me]
    }

    pub fn other_peers(&self) -> Vec<NodeId> {
        self.peers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.me)
            .map(|(_, id)| *id)
            .collect()
    }

    pub fn quorum(&self) -> usize {
        self.peers.len() / 2 + 1
    }
}
