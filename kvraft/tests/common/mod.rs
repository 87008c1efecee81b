use kvraft::{Clerk, KvServer, ServiceConfig};
use labrpc::{Network, NetworkConfig};
use raft::{MemoryPersister, PeerConfig};
use std::sync::Arc;
use std::time::Duration;

pub struct TestCluster {
    pub network: Network,
    pub servers: Vec<Arc<KvServer>>,
    pub node_ids: Vec<u64>,
}

impl TestCluster {
    pub async fn new(n: usize, max_raft_state: Option<usize>) -> Self {
        let network = Network::new(NetworkConfig::default());
        let node_ids: Vec<u64> = (1..=n as u64).collect();
        let mut servers = Vec::new();

        for me in 0..n {
            let persister = Arc::new(MemoryPersister::new());
            let config = ServiceConfig {
                raft: PeerConfig {
                    me,
                    peers: node_ids.clone(),
                    election_timeout_range: (Duration::from_millis(150), Duration::from_millis(250)),
                    heartbeat_fraction: 0.4,
                    apply_tick: Duration::from_millis(30),
                },
                max_raft_state,
                client_rpc_timeout: Duration::from_secs(2),
            };
            let rpc = Arc::new(raft::rpc::LabrpcTransport::new(network.clone(), node_ids[me]));
            let server = KvServer::new(config, persister, rpc);
            raft::rpc::LabrpcTransport::register(&network, server.raft_peer());
            kvraft::rpc::register(&network, node_ids[me], Arc::clone(&server));
            servers.push(server);
        }

        Self {
            network,
            servers,
            node_ids,
        }
    }

    pub fn clerk(&self, client_id: i64) -> Arc<Clerk> {
        Clerk::new(self.network.clone(), self.node_ids.clone(), client_id)
    }

    pub fn partition(&self, i: usize) {
        self.network.set_connected(self.node_ids[i], false);
    }

    pub fn heal(&self, i: usize) {
        self.network.set_connected(self.node_ids[i], true);
    }
}
