// Inbound side of the TCP transport: one listener per node accepting both
// peer-to-peer Raft RPCs and client Get/PutAppend RPCs, dispatched by the
// `method` field of each framed request (the real-transport counterpart of
// `labrpc::Network::register`).

use kvraft::KvServer;
use raft::{AppendEntriesRequest, InstallSnapshotRequest, VoteRequest};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

#[derive(serde::Deserialize)]
struct IncomingFrame {
    method: String,
    payload: Value,
}

pub async fn serve(addr: &str, server: Arc<KvServer>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening for peer and client RPCs");
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, server).await {
                tracing::warn!(%peer_addr, error = %e, "connection ended");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, server: Arc<KvServer>) -> std::io::Result<()> {
    loop {
        let bytes = match read_frame_bytes_raw(&mut stream).await {
            Ok(Some(b)) => b,
            Ok(None) => return Ok(()),
            Err(e) => return Err(e),
        };
        let frame: IncomingFrame = match serde_json::from_slice(&bytes) {
            Ok(f) => f,
            Err(_) => continue,
        };
        dispatch(&mut stream, &server, &frame.method, frame.payload).await?;
    }
}

// `read_frame_bytes` treats EOF-on-first-read as an error; a long-lived
// connection expects a clean close between requests, so wrap it.
async fn read_frame_bytes_raw(stream: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
    use tokio::io::AsyncReadExt;
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

async fn dispatch(
    stream: &mut TcpStream,
    server: &Arc<KvServer>,
    method: &str,
    payload: Value,
) -> std::io::Result<()> {
    match method {
        "Raft.RequestVote" => {
            let Ok(req) = serde_json::from_value::<VoteRequest>(payload) else {
                return write_error(stream, "bad payload").await;
            };
            let resp = server.raft_peer().handle_vote_request(req).await;
            write_ok(stream, &resp).await
        }
        "Raft.AppendEntries" => {
            let Ok(req) = serde_json::from_value::<AppendEntriesRequest>(payload) else {
                return write_error(stream, "bad payload").await;
            };
            let resp = server.raft_peer().handle_append_entries(req).await;
            write_ok(stream, &resp).await
        }
        "Raft.InstallSnapshot" => {
            let Ok(req) = serde_json::from_value::<InstallSnapshotRequest>(payload) else {
                return write_error(stream, "bad payload").await;
            };
            let resp = server.raft_peer().handle_install_snapshot(req).await;
            write_ok(stream, &resp).await
        }
        "KVServer.Get" => {
            let Ok(req) = serde_json::from_value::<kvraft::GetRequest>(payload) else {
                return write_error(stream, "bad payload").await;
            };
            let resp = server.get(req).await;
            write_ok(stream, &resp).await
        }
        "KVServer.PutAppend" => {
            let Ok(req) = serde_json::from_value::<kvraft::PutAppendRequest>(payload) else {
                return write_error(stream, "bad payload").await;
            };
            let resp = server.put_append(req).await;
            write_ok(stream, &resp).await
        }
        other => write_error(stream, &format!("no such method: {other}")).await,
    }
}

async fn write_ok<T: Serialize>(stream: &mut TcpStream, payload: &T) -> std::io::Result<()> {
    let body = serde_json::json!({ "ok": true, "payload": payload, "error": null });
    write_frame(stream, &body).await
}

async fn write_error(stream: &mut TcpStream, message: &str) -> std::io::Result<()> {
    let body = serde_json::json!({ "ok": false, "payload": null, "error": message });
    write_frame(stream, &body).await
}

async fn write_frame(stream: &mut TcpStream, value: &Value) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(value).expect("json value always encodes");
    let len = bytes.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&bytes).await
}
