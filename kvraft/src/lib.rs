//! Replicated key/value service layer: dedup, application to an in-memory
//! map, reply routing to blocked client RPCs, and snapshot production,
//! built on top of [`raft::Peer`].

pub mod client;
pub mod error;
pub mod rpc;
pub mod server;
pub mod types;

pub use client::Clerk;
pub use error::{KvError, Result};
pub use server::KvServer;
pub use types::{
    Command, GetReply, GetRequest, Op, PutAppendReply, PutAppendRequest, ServiceConfig,
    SnapshotPayload,
};
