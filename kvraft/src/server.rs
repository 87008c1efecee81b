// The service layer: dedup, application to the key/value map, reply
// routing to blocked client RPCs, and snapshot production. Mirrors the
// shape of `raft::Peer` (one struct, one lock, a background consumer task)
// but sits one layer up, talking to the consensus core only through
// `propose`/`trim_to` and the apply stream.

use crate::types::{
    Command, ServiceConfig, SnapshotPayload, ERR_NO_KEY, ERR_OK,
};
use parking_lot::Mutex;
use raft::{ApplyMsg, LogIndex, Peer, Persister, RaftRpc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub(crate) struct Outcome {
    pub wrong_leader: bool,
    pub err: String,
    pub value: String,
}

impl Outcome {
    fn wrong_leader() -> Self {
        Self {
            wrong_leader: true,
            err: ERR_OK.to_string(),
            value: String::new(),
        }
    }
}

struct PendingEntry {
    command: Command,
    tx: oneshot::Sender<Outcome>,
}

struct ServiceState {
    kv: HashMap<String, String>,
    last_op_num: HashMap<crate::types::ClientId, crate::types::OpNum>,
    pending: HashMap<LogIndex, PendingEntry>,
}

pub struct KvServer {
    config: ServiceConfig,
    raft: Arc<Peer>,
    state: Mutex<ServiceState>,
}

impl KvServer {
    pub fn new(
        config: ServiceConfig,
        persister: Arc<dyn Persister>,
        rpc: Arc<dyn RaftRpc>,
    ) -> Arc<KvServer> {
        let (raft, mut apply_rx) = Peer::new(config.raft.clone(), persister, rpc);

        let server = Arc::new(KvServer {
            config,
            raft,
            state: Mutex::new(ServiceState {
                kv: HashMap::new(),
                last_op_num: HashMap::new(),
                pending: HashMap::new(),
            }),
        });

        let consumer = Arc::clone(&server);
        tokio::spawn(async move {
            while let Some(msg) = apply_rx.recv().await {
                consumer.handle_apply(msg);
            }
        });

        server
    }

    /// The underlying consensus peer, for transports that need to dispatch
    /// inbound `Raft.*` RPCs directly (e.g. `kvraft-server`'s TCP listener).
    pub fn raft_peer(&self) -> Arc<Peer> {
        Arc::clone(&self.raft)
    }

    pub async fn get(self: &Arc<Self>, req: crate::types::GetRequest) -> crate::types::GetReply {
        let command = Command::Get {
            key: req.key,
            client_id: req.client_id,
            op_num: req.op_num,
        };
        let outcome = self.propose_and_wait(command).await;
        crate::types::GetReply {
            wrong_leader: outcome.wrong_leader,
            err: outcome.err,
            value: outcome.value,
        }
    }

    pub async fn put_append(
        self: &Arc<Self>,
        req: crate::types::PutAppendRequest,
    ) -> crate::types::PutAppendReply {
        let command = Command::from_put_append(req.op, req.key, req.value, req.client_id, req.op_num);
        let outcome = self.propose_and_wait(command).await;
        crate::types::PutAppendReply {
            wrong_leader: outcome.wrong_leader,
            err: outcome.err,
        }
    }

    async fn propose_and_wait(self: &Arc<Self>, command: Command) -> Outcome {
        let (index, _term, is_leader) = self.raft.propose(command.encode());
        if !is_leader {
            return Outcome::wrong_leader();
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut st = self.state.lock();
            st.pending.insert(
                index,
                PendingEntry {
                    command,
                    tx,
                },
            );
        }

        match tokio::time::timeout(self.config.client_rpc_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            _ => {
                self.state.lock().pending.remove(&index);
                Outcome::wrong_leader()
            }
        }
    }

    fn handle_apply(self: &Arc<Self>, msg: ApplyMsg) {
        match msg {
            ApplyMsg::Commit { index, command, .. } => self.apply_commit(index, command),
            ApplyMsg::SnapshotInstalled {
                last_included_index,
                data,
                ..
            } => self.apply_snapshot(last_included_index, data),
        }
    }

    fn apply_commit(self: &Arc<Self>, index: LogIndex, bytes: Vec<u8>) {
        let Some(command) = Command::decode(&bytes) else {
            tracing::error!(index, "undecodable command in committed entry, dropping");
            return;
        };

        let mut st = self.state.lock();
        let dup = command.is_mutation()
            && st
                .last_op_num
                .get(&command.client_id())
                .copied()
                .unwrap_or(0)
                >= command.op_num();

        let (err, value) = if dup {
            (ERR_OK.to_string(), String::new())
        } else {
            match &command {
                Command::Put { key, value, .. } => {
                    st.kv.insert(key.clone(), value.clone());
                    (ERR_OK.to_string(), String::new())
                }
                Command::Append { key, value, .. } => {
                    st.kv
                        .entry(key.clone())
                        .and_modify(|existing| existing.push_str(value))
                        .or_insert_with(|| value.clone());
                    (ERR_OK.to_string(), String::new())
                }
                Command::Get { key, .. } => match st.kv.get(key) {
                    Some(v) => (ERR_OK.to_string(), v.clone()),
                    None => (ERR_NO_KEY.to_string(), String::new()),
                },
            }
        };

        if command.is_mutation() {
            let entry = st.last_op_num.entry(command.client_id()).or_insert(0);
            if command.op_num() > *entry {
                *entry = command.op_num();
            }
        }

        if let Some(pending) = st.pending.remove(&index) {
            let outcome = if pending.command == command {
                Outcome {
                    wrong_leader: false,
                    err,
                    value,
                }
            } else {
                Outcome::wrong_leader()
            };
            let _ = pending.tx.send(outcome);
        }

        drop(st);
        self.maybe_snapshot(index);
    }

    fn apply_snapshot(self: &Arc<Self>, last_included_index: LogIndex, data: Vec<u8>) {
        let payload: SnapshotPayload = if data.is_empty() {
            SnapshotPayload::default()
        } else {
            match bincode::decode_from_slice(&data, bincode::config::standard()) {
                Ok((v, _)) => v,
                Err(e) => {
                    tracing::error!(error = %e, "undecodable snapshot payload, ignoring install");
                    return;
                }
            }
        };

        let mut st = self.state.lock();
        st.kv = payload.kv;
        st.last_op_num = payload.last_op_num;
        let stale: Vec<LogIndex> = st
            .pending
            .keys()
            .copied()
            .filter(|i| *i <= last_included_index)
            .collect();
        for index in stale {
            if let Some(pending) = st.pending.remove(&index) {
                let _ = pending.tx.send(Outcome::wrong_leader());
            }
        }
    }

    fn maybe_snapshot(self: &Arc<Self>, index: LogIndex) {
        let Some(threshold) = self.config.max_raft_state else {
            return;
        };
        if self.raft.raft_state_size() < threshold {
            return;
        }
        let st = self.state.lock();
        let payload = SnapshotPayload {
            kv: st.kv.clone(),
            last_op_num: st.last_op_num.clone(),
        };
        drop(st);
        let bytes = bincode::encode_to_vec(&payload, bincode::config::standard())
            .expect("snapshot payload always encodes");
        self.raft.trim_to(index, bytes);
    }
}
