// Wire and command types for the service layer.

use raft::PeerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub type ClientId = i64;
pub type OpNum = i64;

pub const ERR_OK: &str = "";
pub const ERR_NO_KEY: &str = "ErrNoKey";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum Op {
    Put,
    Append,
}

/// The opaque payload proposed to the consensus core. `Get` is represented
/// here too even though it mutates nothing, so that reads go through the
/// log like every other command rather than relying on a leader lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum Command {
    Put {
        key: String,
        value: String,
        client_id: ClientId,
        op_num: OpNum,
    },
    Append {
        key: String,
        value: String,
        client_id: ClientId,
        op_num: OpNum,
    },
    Get {
        key: String,
        client_id: ClientId,
        op_num: OpNum,
    },
}

impl Command {
    pub fn from_put_append(op: Op, key: String, value: String, client_id: ClientId, op_num: OpNum) -> Self {
        match op {
            Op::Put => Command::Put {
                key,
                value,
                client_id,
                op_num,
            },
            Op::Append => Command::Append {
                key,
                value,
                client_id,
                op_num,
            },
        }
    }

    pub fn client_id(&self) -> ClientId {
        match self {
            Command::Put { client_id, .. } => *client_id,
            Command::Append { client_id, .. } => *client_id,
            Command::Get { client_id, .. } => *client_id,
        }
    }

    pub fn op_num(&self) -> OpNum {
        match self {
            Command::Put { op_num, .. } => *op_num,
            Command::Append { op_num, .. } => *op_num,
            Command::Get { op_num, .. } => *op_num,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, Command::Put { .. } | Command::Append { .. })
    }

    pub fn encode(&self) -> Vec<u8> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .expect("command always encodes")
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .ok()
            .map(|(v, _)| v)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub key: String,
    pub client_id: ClientId,
    pub op_num: OpNum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReply {
    pub wrong_leader: bool,
    pub err: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutAppendRequest {
    pub key: String,
    pub value: String,
    pub op: Op,
    pub client_id: ClientId,
    pub op_num: OpNum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutAppendReply {
    pub wrong_leader: bool,
    pub err: String,
}

/// Persisted snapshot payload: `(kv, lastOpNum)`, index/term carried by the
/// consensus core's own log sentinel.
#[derive(Debug, Clone, Default, bincode::Encode, bincode::Decode)]
pub struct SnapshotPayload {
    pub kv: std::collections::HashMap<String, String>,
    pub last_op_num: std::collections::HashMap<ClientId, OpNum>,
}

/// Composes `raft::PeerConfig` with the service-layer tunables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub raft: PeerConfig,
    /// Snapshot once the consensus core's persisted raft state exceeds
    /// this many bytes. `None` disables snapshotting (replacing the
    /// source's `-1` sentinel).
    pub max_raft_state: Option<usize>,
    pub client_rpc_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            raft: PeerConfig::default(),
            max_raft_state: None,
            client_rpc_timeout: Duration::from_secs(5),
        }
    }
}
