//! Consensus core: leader election, log replication, commit advancement,
//! crash-consistent persistence, and snapshot installation.
//!
//! The rest of this workspace treats [`Peer`] as an opaque replicated log:
//! call [`Peer::propose`] to submit a command, read committed commands off
//! the [`ApplyMsg`] stream returned by [`Peer::new`], and call
//! [`Peer::trim_to`] once the state machine has checkpointed far enough to
//! let the log compact.

pub mod error;
pub mod log;
pub mod peer;
pub mod persist;
pub mod rpc;
pub mod types;

pub use error::{RaftError, Result};
pub use peer::{Peer, RaftRpc};
pub use persist::{FilePersister, MemoryPersister, Persister};
pub use types::{
    AppendEntriesRequest, AppendEntriesResponse, ApplyMsg, InstallSnapshotRequest,
    InstallSnapshotResponse, LogEntry, LogIndex, NodeId, PeerConfig, Role, Term, VoteRequest,
    VoteResponse,
};
