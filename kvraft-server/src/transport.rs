// Real TCP implementation of `raft::RaftRpc`, the production counterpart to
// `raft::rpc::LabrpcTransport`. One connection is opened per outbound call,
// mirroring labrpc's per-call simplicity: a task is spawned per outbound RPC
// rather than pooling connections.

use raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    NodeId, RaftError, RaftRpc, Result, VoteRequest, VoteResponse,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(serde::Serialize)]
struct Frame<'a, T: Serialize> {
    method: &'a str,
    payload: &'a T,
}

#[derive(serde::Deserialize)]
struct ReplyFrame<T> {
    ok: bool,
    payload: Option<T>,
    error: Option<String>,
}

pub async fn send_frame<T: Serialize>(stream: &mut TcpStream, method: &str, payload: &T) -> Result<()> {
    let body = serde_json::to_vec(&Frame { method, payload })
        .map_err(|e| RaftError::Internal(e.to_string()))?;
    let len = body.len() as u32;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(RaftError::Io)?;
    stream.write_all(&body).await.map_err(RaftError::Io)?;
    Ok(())
}

pub async fn read_frame_bytes(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(RaftError::Io)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.map_err(RaftError::Io)?;
    Ok(buf)
}

async fn call<Req: Serialize, Resp: DeserializeOwned>(
    addr: &str,
    method: &str,
    req: &Req,
) -> Result<Resp> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(RaftError::Io)?;
    send_frame(&mut stream, method, req).await?;
    let bytes = read_frame_bytes(&mut stream).await?;
    let reply: ReplyFrame<Resp> =
        serde_json::from_slice(&bytes).map_err(|e| RaftError::Internal(e.to_string()))?;
    if reply.ok {
        reply.payload.ok_or_else(|| RaftError::Internal("missing payload".into()))
    } else {
        Err(RaftError::Internal(reply.error.unwrap_or_default()))
    }
}

/// Maps Raft node ids to `host:port` strings and dials out over TCP.
pub struct TcpTransport {
    addrs: HashMap<NodeId, String>,
}

impl TcpTransport {
    pub fn new(addrs: HashMap<NodeId, String>) -> Self {
        Self { addrs }
    }

    fn addr(&self, peer: NodeId) -> Result<&str> {
        self.addrs
            .get(&peer)
            .map(|s| s.as_str())
            .ok_or_else(|| RaftError::Internal(format!("no address for peer {peer}")))
    }
}

#[async_trait::async_trait]
impl RaftRpc for TcpTransport {
    async fn request_vote(&self, peer: NodeId, req: VoteRequest) -> Result<VoteResponse> {
        call(self.addr(peer)?, "Raft.RequestVote", &req).await
    }

    async fn append_entries(
        &self,
        peer: NodeId,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        call(self.addr(peer)?, "Raft.AppendEntries", &req).await
    }

    async fn install_snapshot(
        &self,
        peer: NodeId,
        req: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        call(self.addr(peer)?, "Raft.InstallSnapshot", &req).await
    }
}
