// Crash-and-restart: reload the same persisted state into a fresh `Peer`
// and check term/vote/log survive.

use raft::{MemoryPersister, Peer, PeerConfig, Persister};
use std::sync::Arc;
use std::time::Duration;

struct NullRpc;

#[async_trait::async_trait]
impl raft::RaftRpc for NullRpc {
    async fn request_vote(
        &self,
        _peer: raft::NodeId,
        _req: raft::VoteRequest,
    ) -> raft::Result<raft::VoteResponse> {
        Err(raft::RaftError::Internal("no network in this test".into()))
    }

    async fn append_entries(
        &self,
        _peer: raft::NodeId,
        _req: raft::AppendEntriesRequest,
    ) -> raft::Result<raft::AppendEntriesResponse> {
        Err(raft::RaftError::Internal("no network in this test".into()))
    }

    async fn install_snapshot(
        &self,
        _peer: raft::NodeId,
        _req: raft::InstallSnapshotRequest,
    ) -> raft::Result<raft::InstallSnapshotResponse> {
        Err(raft::RaftError::Internal("no network in this test".into()))
    }
}

fn single_node_config() -> PeerConfig {
    PeerConfig {
        me: 0,
        peers: vec![1],
        election_timeout_range: (Duration::from_millis(40), Duration::from_millis(60)),
        heartbeat_fraction: 0.5,
        apply_tick: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn restart_reloads_term_vote_and_log() {
    let persister = Arc::new(MemoryPersister::new());

    let term_before_restart = {
        let (peer, _rx) = Peer::new(
            single_node_config(),
            Arc::clone(&persister) as Arc<dyn Persister>,
            Arc::new(NullRpc),
        );
        // A lone node in a 1-peer cluster wins its own election immediately.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let (term, is_leader) = peer.state();
        assert!(is_leader, "sole peer must elect itself");

        let (index, proposed_term, is_leader) = peer.propose(vec![7, 8, 9]);
        assert!(is_leader);
        assert_eq!(index, 1, "first proposal on a fresh log lands at index 1");
        assert_eq!(proposed_term, term);
        peer.shutdown();

        proposed_term
    };

    let (peer, _rx) = Peer::new(single_node_config(), persister, Arc::new(NullRpc));
    let (restored_term, _) = peer.state();
    assert!(restored_term >= term_before_restart);
    assert_eq!(peer.leader_hint(), None, "role resets to follower on restart");

    // The persisted log entry is still there, so the next proposal lands
    // at index 2, not 1.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let (index, _, is_leader) = peer.propose(vec![1]);
    assert!(is_leader);
    assert_eq!(index, 2, "restart must reload the previously persisted entry");
}
