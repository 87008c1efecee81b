// Adapter wiring `RaftRpc` onto the simulated `labrpc` transport, naming
// each call "Raft.RequestVote" / "Raft.AppendEntries" /
// "Raft.InstallSnapshot" in the usual "Service.Method" RPC convention.

use crate::error::{RaftError, Result};
use crate::peer::{Peer, RaftRpc};
use crate::types::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    NodeId, VoteRequest, VoteResponse,
};
use async_trait::async_trait;
use labrpc::{Network, Rpc, RpcError};
use std::sync::Arc;

const REQUEST_VOTE: &str = "Raft.RequestVote";
const APPEND_ENTRIES: &str = "Raft.AppendEntries";
const INSTALL_SNAPSHOT: &str = "Raft.InstallSnapshot";

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| RaftError::Serialization(e.to_string()))
}

fn decode<T: for<'a> serde::Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| RaftError::Serialization(e.to_string()))
}

fn to_raft_error(e: RpcError) -> RaftError {
    RaftError::Internal(e.to_string())
}

/// `RaftRpc` implementation that dials out through a shared [`labrpc::Network`].
/// One instance per peer; Raft node ids and `labrpc` endpoint ids are the
/// same space in this crate. `self_id` lets outbound calls fail fast when
/// this node is itself the partitioned side, matching a real symmetric
/// network partition rather than only rejecting inbound calls.
pub struct LabrpcTransport {
    network: Network,
    self_id: NodeId,
}

impl LabrpcTransport {
    pub fn new(network: Network, self_id: NodeId) -> Self {
        Self { network, self_id }
    }

    fn check_connected(&self) -> Result<()> {
        if self.network.is_connected(self.self_id) {
            Ok(())
        } else {
            Err(RaftError::Internal("self partitioned from network".into()))
        }
    }

    /// Registers `peer`'s three RPC handlers on `network` under its own
    /// node id, decoding/dispatching/re-encoding around the typed handlers.
    pub fn register(network: &Network, peer: Arc<Peer>) {
        let endpoint = peer.node_id();

        let p = Arc::clone(&peer);
        network.register(
            endpoint,
            REQUEST_VOTE,
            Arc::new(move |bytes: Vec<u8>| {
                let p = Arc::clone(&p);
                async move {
                    let req: VoteRequest =
                        decode(&bytes).map_err(|e| RpcError::Handler(e.to_string()))?;
                    let resp = p.handle_vote_request(req).await;
                    encode(&resp).map_err(|e| RpcError::Handler(e.to_string()))
                }
            }),
        );

        let p = Arc::clone(&peer);
        network.register(
            endpoint,
            APPEND_ENTRIES,
            Arc::new(move |bytes: Vec<u8>| {
                let p = Arc::clone(&p);
                async move {
                    let req: AppendEntriesRequest =
                        decode(&bytes).map_err(|e| RpcError::Handler(e.to_string()))?;
                    let resp = p.handle_append_entries(req).await;
                    encode(&resp).map_err(|e| RpcError::Handler(e.to_string()))
                }
            }),
        );

        let p = Arc::clone(&peer);
        network.register(
            endpoint,
            INSTALL_SNAPSHOT,
            Arc::new(move |bytes: Vec<u8>| {
                let p = Arc::clone(&p);
                async move {
                    let req: InstallSnapshotRequest =
                        decode(&bytes).map_err(|e| RpcError::Handler(e.to_string()))?;
                    let resp = p.handle_install_snapshot(req).await;
                    encode(&resp).map_err(|e| RpcError::Handler(e.to_string()))
                }
            }),
        );
    }
}

#[async_trait]
impl RaftRpc for LabrpcTransport {
    async fn request_vote(&self, peer: NodeId, req: VoteRequest) -> Result<VoteResponse> {
        self.check_connected()?;
        let bytes = encode(&req)?;
        let reply = self
            .network
            .client(peer)
            .call(REQUEST_VOTE, bytes)
            .await
            .map_err(to_raft_error)?;
        decode(&reply)
    }

    async fn append_entries(
        &self,
        peer: NodeId,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        self.check_connected()?;
        let bytes = encode(&req)?;
        let reply = self
            .network
            .client(peer)
            .call(APPEND_ENTRIES, bytes)
            .await
            .map_err(to_raft_error)?;
        decode(&reply)
    }

    async fn install_snapshot(
        &self,
        peer: NodeId,
        req: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        self.check_connected()?;
        let bytes = encode(&req)?;
        let reply = self
            .network
            .client(peer)
            .call(INSTALL_SNAPSHOT, bytes)
            .await
            .map_err(to_raft_error)?;
        decode(&reply)
    }
}
