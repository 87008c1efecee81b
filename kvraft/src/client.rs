// The client shim: retries to a random peer until one reports leadership.
// An external collaborator at the consensus core's scope, but still needed
// for anything to exercise the service end-to-end, so it lives here rather
// than in a test-only harness.

use crate::rpc::{call_get, call_put_append};
use crate::types::{ClientId, GetRequest, Op, PutAppendRequest};
use labrpc::Network;
use rand::Rng;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

/// A single client's session against the cluster. Not thread-safe by
/// construction (an `opNum` sequence belongs to one logical caller); wrap
/// in an `Arc<Mutex<_>>` to share across tasks.
pub struct Clerk {
    network: Network,
    servers: Vec<u64>,
    client_id: ClientId,
    next_op_num: AtomicI64,
    last_leader: AtomicUsize,
}

impl Clerk {
    pub fn new(network: Network, servers: Vec<u64>, client_id: ClientId) -> Arc<Self> {
        Arc::new(Self {
            network,
            servers,
            client_id,
            next_op_num: AtomicI64::new(1),
            last_leader: AtomicUsize::new(0),
        })
    }

    pub async fn get(&self, key: &str) -> String {
        let op_num = self.next_op_num.fetch_add(1, Ordering::Relaxed);
        let req = GetRequest {
            key: key.to_string(),
            client_id: self.client_id,
            op_num,
        };
        loop {
            for server in self.candidate_order() {
                let Ok(reply) = call_get(&self.network, server, req.clone()).await else {
                    continue;
                };
                if reply.wrong_leader {
                    continue;
                }
                self.remember_leader(server);
                return reply.value;
            }
        }
    }

    pub async fn put(&self, key: &str, value: &str) {
        self.put_append(key, value, Op::Put).await;
    }

    pub async fn append(&self, key: &str, value: &str) {
        self.put_append(key, value, Op::Append).await;
    }

    async fn put_append(&self, key: &str, value: &str, op: Op) {
        let op_num = self.next_op_num.fetch_add(1, Ordering::Relaxed);
        let req = PutAppendRequest {
            key: key.to_string(),
            value: value.to_string(),
            op,
            client_id: self.client_id,
            op_num,
        };
        loop {
            for server in self.candidate_order() {
                let Ok(reply) = call_put_append(&self.network, server, req.clone()).await else {
                    continue;
                };
                if reply.wrong_leader {
                    continue;
                }
                self.remember_leader(server);
                return;
            }
        }
    }

    /// Try the last known leader first, then the rest of the cluster in
    /// random order.
    fn candidate_order(&self) -> Vec<u64> {
        let last = self.last_leader.load(Ordering::Relaxed);
        let mut rest: Vec<usize> = (0..self.servers.len()).filter(|i| *i != last).collect();
        let mut rng = rand::rng();
        for i in (1..rest.len()).rev() {
            let j = rng.random_range(0..=i);
            rest.swap(i, j);
        }
        std::iter::once(last)
            .chain(rest)
            .map(|i| self.servers[i])
            .collect()
    }

    fn remember_leader(&self, server: u64) {
        if let Some(idx) = self.servers.iter().position(|s| *s == server) {
            self.last_leader.store(idx, Ordering::Relaxed);
        }
    }
}

pub fn random_client_id() -> ClientId {
    rand::rng().random()
}
