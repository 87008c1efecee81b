// Shared in-process cluster harness for integration tests: spins up `n`
// peers wired by `labrpc`, with helpers to partition/heal a link and
// observe each peer's applied-entry stream.

use labrpc::{Network, NetworkConfig};
use raft::rpc::LabrpcTransport;
use raft::{ApplyMsg, MemoryPersister, Peer, PeerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

pub struct TestCluster {
    pub network: Network,
    pub peers: Vec<Arc<Peer>>,
    pub persisters: Vec<Arc<MemoryPersister>>,
    pub applied: Vec<Arc<Mutex<Vec<ApplyMsg>>>>,
}

impl TestCluster {
    pub async fn new(n: usize) -> Self {
        let network = Network::new(NetworkConfig::default());
        let node_ids: Vec<u64> = (1..=n as u64).collect();

        let mut peers = Vec::new();
        let mut persisters = Vec::new();
        let mut applied = Vec::new();

        for me in 0..n {
            let persister = Arc::new(MemoryPersister::new());
            let (peer, rx) = Self::spawn_peer(&network, me, node_ids.clone(), Arc::clone(&persister) as _);
            let sink = Self::drain(rx);
            peers.push(peer);
            persisters.push(persister);
            applied.push(sink);
        }

        Self {
            network,
            peers,
            persisters,
            applied,
        }
    }

    fn spawn_peer(
        network: &Network,
        me: usize,
        peers: Vec<u64>,
        persister: Arc<dyn raft::Persister>,
    ) -> (Arc<Peer>, mpsc::Receiver<ApplyMsg>) {
        let config = PeerConfig {
            me,
            peers,
            election_timeout_range: (Duration::from_millis(150), Duration::from_millis(250)),
            heartbeat_fraction: 0.4,
            apply_tick: Duration::from_millis(30),
        };
        let rpc = Arc::new(LabrpcTransport::new(network.clone(), peers[me]));
        let (peer, rx) = Peer::new(config, persister, rpc);
        LabrpcTransport::register(network, Arc::clone(&peer));
        (peer, rx)
    }

    fn drain(mut rx: mpsc::Receiver<ApplyMsg>) -> Arc<Mutex<Vec<ApplyMsg>>> {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let sink2 = Arc::clone(&sink);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                sink2.lock().await.push(msg);
            }
        });
        sink
    }

    /// Polls until some peer reports itself leader for the current term, or
    /// panics after the timeout.
    pub async fn await_leader(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for (i, p) in self.peers.iter().enumerate() {
                let (_, is_leader) = p.state();
                if is_leader {
                    return i;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("no leader elected within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn partition(&self, i: usize) {
        self.network.set_connected(self.peers[i].node_id(), false);
    }

    pub fn heal(&self, i: usize) {
        self.network.set_connected(self.peers[i].node_id(), true);
    }

    pub async fn committed_count(&self, i: usize) -> usize {
        self.applied[i]
            .lock()
            .await
            .iter()
            .filter(|m| matches!(m, ApplyMsg::Commit { .. }))
            .count()
    }

    pub async fn wait_for_commits(&self, i: usize, at_least: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.committed_count(i).await >= at_least {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("peer {i} did not reach {at_least} commits within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Highest log index this peer has observed applied, whether via an
    /// individual `Commit` or a `SnapshotInstalled` jump.
    pub async fn applied_through(&self, i: usize) -> u64 {
        self.applied[i]
            .lock()
            .await
            .iter()
            .map(|m| match m {
                raft::ApplyMsg::Commit { index, .. } => *index,
                raft::ApplyMsg::SnapshotInstalled {
                    last_included_index,
                    ..
                } => *last_included_index,
            })
            .max()
            .unwrap_or(0)
    }

    pub async fn wait_until_applied(&self, i: usize, target_index: u64, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.applied_through(i).await >= target_index {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("peer {i} did not apply through index {target_index} within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
