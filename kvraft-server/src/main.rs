// Entry point for a single replicated key/value node. Wires one `raft::Peer`
// plus one `kvraft::KvServer` to a real TCP transport and serves both
// peer-to-peer and client RPCs on one listening socket.
//
// Usage: kvraft-server <me> <addr0> <addr1> ... <addrN-1> [--data DIR] [--max-raft-state BYTES]

use kvraft::ServiceConfig;
use kvraft_server::{listener, transport::TcpTransport};
use raft::{FilePersister, PeerConfig, Persister};
use std::collections::HashMap;
use std::sync::Arc;

fn parse_args() -> (usize, Vec<String>, String, Option<usize>) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let mut data_dir = "./data".to_string();
    let mut max_raft_state = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--data" if i + 1 < args.len() => {
                data_dir = args[i + 1].clone();
                args.drain(i..=i + 1);
            }
            "--max-raft-state" if i + 1 < args.len() => {
                max_raft_state = args[i + 1].parse().ok();
                args.drain(i..=i + 1);
            }
            _ => i += 1,
        }
    }

    let me: usize = args
        .first()
        .expect("usage: kvraft-server <me> <addr0> <addr1> ...")
        .parse()
        .expect("<me> must be an integer index");
    let addrs: Vec<String> = args[1..].to_vec();
    assert!(
        me < addrs.len(),
        "peer index {me} out of range for {} addresses",
        addrs.len()
    );
    (me, addrs, data_dir, max_raft_state)
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let (me, addrs, data_dir, max_raft_state) = parse_args();
    let node_ids: Vec<u64> = (1..=addrs.len() as u64).collect();
    let addr_map: HashMap<u64, String> = node_ids
        .iter()
        .copied()
        .zip(addrs.iter().cloned())
        .collect();

    let my_dir = std::path::Path::new(&data_dir).join(format!("node-{me}"));
    let persister: Arc<dyn Persister> =
        Arc::new(FilePersister::new(my_dir.as_path()).expect("failed to open persistence directory"));

    let config = ServiceConfig {
        raft: PeerConfig {
            me,
            peers: node_ids,
            ..PeerConfig::default()
        },
        max_raft_state,
        ..ServiceConfig::default()
    };

    let rpc = Arc::new(TcpTransport::new(addr_map));
    let server = kvraft::KvServer::new(config, persister, rpc);

    let my_addr = addrs[me].clone();
    tracing::info!(me, %my_addr, "starting kvraft-server node");
    listener::serve(&my_addr, server).await
}
