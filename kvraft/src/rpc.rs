// Client-to-service RPC registration over the simulated `labrpc` transport,
// mirroring `raft::rpc::LabrpcTransport`'s naming convention.

use crate::server::KvServer;
use crate::types::{GetReply, GetRequest, PutAppendReply, PutAppendRequest};
use labrpc::{Network, RpcError};
use std::sync::Arc;

pub const GET: &str = "KVServer.Get";
pub const PUT_APPEND: &str = "KVServer.PutAppend";

fn encode<T: serde::Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("reply types always encode")
}

fn decode<T: for<'a> serde::Deserialize<'a>>(bytes: &[u8]) -> std::result::Result<T, RpcError> {
    serde_json::from_slice(bytes).map_err(|e| RpcError::Handler(e.to_string()))
}

/// Registers a server's client-facing RPC handlers on `network` under its
/// own node id.
pub fn register(network: &Network, node_id: u64, server: Arc<KvServer>) {
    let s = Arc::clone(&server);
    network.register(
        node_id,
        GET,
        Arc::new(move |bytes: Vec<u8>| {
            let s = Arc::clone(&s);
            async move {
                let req: GetRequest = decode(&bytes)?;
                let reply = s.get(req).await;
                Ok(encode(&reply))
            }
        }),
    );

    let s = Arc::clone(&server);
    network.register(
        node_id,
        PUT_APPEND,
        Arc::new(move |bytes: Vec<u8>| {
            let s = Arc::clone(&s);
            async move {
                let req: PutAppendRequest = decode(&bytes)?;
                let reply = s.put_append(req).await;
                Ok(encode(&reply))
            }
        }),
    );
}

pub async fn call_get(
    network: &Network,
    node_id: u64,
    req: GetRequest,
) -> std::result::Result<GetReply, RpcError> {
    use labrpc::Rpc;
    let bytes = network.client(node_id).call(GET, encode(&req)).await?;
    decode(&bytes)
}

pub async fn call_put_append(
    network: &Network,
    node_id: u64,
    req: PutAppendRequest,
) -> std::result::Result<PutAppendReply, RpcError> {
    use labrpc::Rpc;
    let bytes = network
        .client(node_id)
        .call(PUT_APPEND, encode(&req))
        .await?;
    decode(&bytes)
}
